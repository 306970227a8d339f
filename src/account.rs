//! Account records loaded into a run.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// How aggressively the warmup workflow browses and engages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarmupIntensity {
    Light,
    #[default]
    Medium,
    Heavy,
}

impl WarmupIntensity {
    /// Number of browse sessions a warmup run performs.
    pub fn sessions(self) -> u32 {
        match self {
            Self::Light => 1,
            Self::Medium => 2,
            Self::Heavy => 4,
        }
    }

    /// Nominal duration of one browse session, in seconds.
    pub fn session_secs(self) -> u64 {
        match self {
            Self::Light => 180,
            Self::Medium => 420,
            Self::Heavy => 900,
        }
    }
}

/// Kind of content a post publishes. Serialized into publish-task params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Image,
    Video,
}

/// One post's payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PostContent {
    pub media_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Platform-specific community / topic to post into.
    #[serde(default)]
    pub community: Option<String>,
}

/// Highlight payload for platforms that support pinned story highlights.
#[derive(Debug, Clone, Deserialize)]
pub struct HighlightData {
    pub title: String,
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// One account row, immutable once loaded into a run.
///
/// Secrets are held as `SecretString` so they never land in debug output or
/// serialized snapshots.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub totp_secret: Option<SecretString>,

    // Profile payload.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,

    /// Up to two post payloads; anything beyond the second is ignored.
    #[serde(default)]
    pub posts: Vec<PostContent>,
    #[serde(default)]
    pub highlight: Option<HighlightData>,

    /// Target username for the rename workflow.
    #[serde(default)]
    pub rename_to: Option<String>,

    // Feature flags.
    #[serde(default)]
    pub run_warmup: bool,
    #[serde(default)]
    pub browse_intensity: Option<WarmupIntensity>,
    #[serde(default)]
    pub content_kind: ContentKind,
}

impl AccountRecord {
    /// Post payload by index (0 or 1), if present.
    pub fn post(&self, index: usize) -> Option<&PostContent> {
        if index >= 2 {
            return None;
        }
        self.posts.get(index)
    }

    /// Intensity for this account, falling back to the run default.
    pub fn intensity_or(&self, default: WarmupIntensity) -> WarmupIntensity {
        self.browse_intensity.unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_json(extra: &str) -> String {
        format!(r#"{{"username": "alice", "password": "pw123"{extra}}}"#)
    }

    #[test]
    fn minimal_account_deserializes() {
        let acct: AccountRecord = serde_json::from_str(&account_json("")).unwrap();
        assert_eq!(acct.username, "alice");
        assert!(acct.bio.is_none());
        assert!(!acct.run_warmup);
        assert_eq!(acct.content_kind, ContentKind::Image);
    }

    #[test]
    fn password_redacted_in_debug() {
        let acct: AccountRecord = serde_json::from_str(&account_json("")).unwrap();
        let debug = format!("{acct:?}");
        assert!(!debug.contains("pw123"));
    }

    #[test]
    fn third_post_ignored() {
        let extra = r#", "posts": [
            {"media_url": "a.jpg"}, {"media_url": "b.jpg"}, {"media_url": "c.jpg"}
        ]"#;
        let acct: AccountRecord = serde_json::from_str(&account_json(extra)).unwrap();
        assert!(acct.post(0).is_some());
        assert!(acct.post(1).is_some());
        assert!(acct.post(2).is_none());
    }

    #[test]
    fn intensity_fallback() {
        let acct: AccountRecord = serde_json::from_str(&account_json("")).unwrap();
        assert_eq!(acct.intensity_or(WarmupIntensity::Heavy), WarmupIntensity::Heavy);

        let acct: AccountRecord =
            serde_json::from_str(&account_json(r#", "browse_intensity": "light""#)).unwrap();
        assert_eq!(acct.intensity_or(WarmupIntensity::Heavy), WarmupIntensity::Light);
    }
}
