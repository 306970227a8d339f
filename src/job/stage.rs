//! Stages of the per-device state machine.

use serde::{Deserialize, Serialize};

/// A stage in a device job's lifecycle.
///
/// The shared bootstrap sequence runs first for every workflow; the active
/// strategy then supplies workflow-specific stages until one of the two
/// absorbing terminals (`Done`, `Failed`) is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    // Shared bootstrap.
    Init,
    StartDevice,
    ConfirmRunning,
    InstallApp,
    ConfirmInstalled,
    Login,
    PollLoginTask,
    VerifyLogin,
    StampIdentity,

    // Warmup workflow.
    Warmup,

    // Profile-setup / posting workflows.
    SetAvatar,
    SetBio,
    PostFirst,
    PostSecond,
    Highlight,
    SetPrivate,
    EnableTwoFactor,

    // Rename ("sister") workflow.
    Rename,

    /// User-ordered custom workflow: index into the configured stage list.
    Custom(u8),

    // Terminals.
    Done,
    Failed,
}

/// Number of progress steps the shared bootstrap contributes.
pub const BOOTSTRAP_STEPS: u32 = 9;

impl Stage {
    /// Whether this stage is one of the two absorbing terminals.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether this stage belongs to the shared bootstrap sequence.
    pub fn is_bootstrap(self) -> bool {
        matches!(
            self,
            Self::Init
                | Self::StartDevice
                | Self::ConfirmRunning
                | Self::InstallApp
                | Self::ConfirmInstalled
                | Self::Login
                | Self::PollLoginTask
                | Self::VerifyLogin
                | Self::StampIdentity
        )
    }

    /// The stage a budget-consuming retry of this stage re-enters.
    ///
    /// A failed login poll or re-verification always restarts the login
    /// attempt itself rather than re-polling a dead task.
    pub fn retry_target(self) -> Stage {
        match self {
            Self::PollLoginTask | Self::VerifyLogin => Self::Login,
            other => other,
        }
    }

    /// Progress step number within the shared bootstrap (1-based).
    pub fn bootstrap_step(self) -> Option<u32> {
        let step = match self {
            Self::Init => 1,
            Self::StartDevice => 2,
            Self::ConfirmRunning => 3,
            Self::InstallApp => 4,
            Self::ConfirmInstalled => 5,
            Self::Login => 6,
            Self::PollLoginTask => 7,
            Self::VerifyLogin => 8,
            Self::StampIdentity => 9,
            _ => return None,
        };
        Some(step)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::StartDevice => "START_DEVICE",
            Self::ConfirmRunning => "CONFIRM_RUNNING",
            Self::InstallApp => "INSTALL_APP",
            Self::ConfirmInstalled => "CONFIRM_INSTALLED",
            Self::Login => "LOGIN",
            Self::PollLoginTask => "POLL_LOGIN_TASK",
            Self::VerifyLogin => "VERIFY_LOGIN",
            Self::StampIdentity => "STAMP_IDENTITY",
            Self::Warmup => "WARMUP",
            Self::SetAvatar => "SET_AVATAR",
            Self::SetBio => "SET_BIO",
            Self::PostFirst => "POST_FIRST",
            Self::PostSecond => "POST_SECOND",
            Self::Highlight => "HIGHLIGHT",
            Self::SetPrivate => "SET_PRIVATE",
            Self::EnableTwoFactor => "ENABLE_TWO_FACTOR",
            Self::Rename => "RENAME",
            Self::Custom(i) => return write!(f, "CUSTOM_{i}"),
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminals() {
        assert!(Stage::Done.is_terminal());
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Login.is_terminal());
        assert!(!Stage::Custom(3).is_terminal());
    }

    #[test]
    fn bootstrap_membership() {
        assert!(Stage::Init.is_bootstrap());
        assert!(Stage::StampIdentity.is_bootstrap());
        assert!(!Stage::Warmup.is_bootstrap());
        assert!(!Stage::Done.is_bootstrap());
    }

    #[test]
    fn login_retry_routing() {
        assert_eq!(Stage::PollLoginTask.retry_target(), Stage::Login);
        assert_eq!(Stage::VerifyLogin.retry_target(), Stage::Login);
        assert_eq!(Stage::SetBio.retry_target(), Stage::SetBio);
    }

    #[test]
    fn bootstrap_steps_monotonic() {
        let stages = [
            Stage::Init,
            Stage::StartDevice,
            Stage::ConfirmRunning,
            Stage::InstallApp,
            Stage::ConfirmInstalled,
            Stage::Login,
            Stage::PollLoginTask,
            Stage::VerifyLogin,
            Stage::StampIdentity,
        ];
        let steps: Vec<u32> = stages.iter().map(|s| s.bootstrap_step().unwrap()).collect();
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*steps.last().unwrap(), BOOTSTRAP_STEPS);
    }

    #[test]
    fn display_names() {
        assert_eq!(Stage::SetBio.to_string(), "SET_BIO");
        assert_eq!(Stage::PollLoginTask.to_string(), "POLL_LOGIN_TASK");
        assert_eq!(Stage::Custom(2).to_string(), "CUSTOM_2");
    }
}
