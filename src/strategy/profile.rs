//! Profile-setup workflow.
//!
//! An ordered catalogue of optional stages. At every boundary the strategy
//! scans forward and skips stages whose required payload is absent from the
//! account; privacy and 2FA run regardless of payload whenever their flow id
//! is bound.

use async_trait::async_trait;
use serde_json::json;
use secrecy::ExposeSecret;

use super::warmup::run_browse_sessions;
use crate::account::AccountRecord;
use crate::client::ActionKind;
use crate::config::RunConfig;
use crate::error::StageError;
use crate::events::LogLevel;
use crate::job::stage::Stage;
use crate::job::DeviceJob;
use crate::strategy::{StageContext, WorkflowKind, WorkflowStrategy};

const CATALOGUE: [Stage; 7] = [
    Stage::SetAvatar,
    Stage::SetBio,
    Stage::PostFirst,
    Stage::PostSecond,
    Stage::Highlight,
    Stage::SetPrivate,
    Stage::EnableTwoFactor,
];

/// Whether a catalogue stage has the input it needs to run.
fn applies(stage: Stage, account: Option<&AccountRecord>, config: &RunConfig) -> bool {
    match stage {
        Stage::SetAvatar => account.is_some_and(|a| a.avatar_url.is_some()),
        Stage::SetBio => account.is_some_and(|a| a.bio.is_some()),
        Stage::PostFirst => account.is_some_and(|a| a.post(0).is_some()),
        Stage::PostSecond => account.is_some_and(|a| a.post(1).is_some()),
        Stage::Highlight => account.is_some_and(|a| a.highlight.is_some()),
        // Always-run stages, gated only on their flow binding.
        Stage::SetPrivate => config.flow_id(ActionKind::SetPrivate).is_some(),
        Stage::EnableTwoFactor => config.flow_id(ActionKind::EnableTwoFactor).is_some(),
        _ => false,
    }
}

/// First applicable stage strictly after `after` (or from the start when
/// `None`); `Done` when the catalogue is exhausted.
fn next_applicable(after: Option<Stage>, account: Option<&AccountRecord>, config: &RunConfig) -> Stage {
    let start = match after {
        Some(stage) => CATALOGUE.iter().position(|s| *s == stage).map_or(0, |i| i + 1),
        None => 0,
    };
    CATALOGUE[start..]
        .iter()
        .copied()
        .find(|s| applies(*s, account, config))
        .unwrap_or(Stage::Done)
}

pub struct ProfileSetupStrategy;

#[async_trait]
impl WorkflowStrategy for ProfileSetupStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::ProfileSetup
    }

    fn first_stage(&self, job: &DeviceJob) -> Stage {
        // Accounts flagged for warmup browse before touching their profile.
        // Config is not available here; run_stage re-checks applicability and
        // skips forward from the catalogue head.
        if job.account.as_ref().is_some_and(|a| a.run_warmup) {
            Stage::Warmup
        } else {
            Stage::SetAvatar
        }
    }

    fn is_retryable(&self, stage: Stage) -> bool {
        stage == Stage::Warmup || CATALOGUE.contains(&stage)
    }

    fn total_steps(&self) -> u32 {
        1 + CATALOGUE.len() as u32
    }

    fn step_number(&self, stage: Stage) -> Option<u32> {
        if stage == Stage::Warmup {
            return Some(1);
        }
        CATALOGUE
            .iter()
            .position(|s| *s == stage)
            .map(|i| i as u32 + 2)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut StageContext<'_>,
    ) -> Result<Stage, StageError> {
        if stage == Stage::Warmup {
            let wanted = ctx.account()?.run_warmup;
            if wanted && ctx.config.flow_id(ActionKind::Browse).is_some() {
                run_browse_sessions(ctx).await?;
            } else if wanted {
                ctx.log(
                    LogLevel::Warn,
                    "Account wants warmup but no browse flow is bound, skipping it",
                );
            }
            return Ok(next_applicable(None, ctx.job.account.as_ref(), ctx.config));
        }

        // Entering a stage whose payload is absent is not an error: scan
        // forward to the next one that applies.
        if !applies(stage, ctx.job.account.as_ref(), ctx.config) {
            let next = next_applicable(Some(stage), ctx.job.account.as_ref(), ctx.config);
            ctx.log(LogLevel::Debug, format!("Stage {stage} has no payload, skipping to {next}"));
            return Ok(next);
        }

        match stage {
            Stage::SetAvatar => {
                let account = ctx.account()?;
                let params = json!({
                    "username": account.username,
                    "avatar_url": account.avatar_url,
                });
                ctx.run_flow(ActionKind::SetAvatar, "set profile picture", params)
                    .await?;
            }
            Stage::SetBio => {
                let account = ctx.account()?;
                let params = json!({ "bio": account.bio });
                ctx.run_flow(ActionKind::SetBio, "set bio", params).await?;
            }
            Stage::PostFirst | Stage::PostSecond => {
                let index = usize::from(stage == Stage::PostSecond);
                let account = ctx.account()?;
                let post = account
                    .post(index)
                    .ok_or_else(|| StageError::Permanent(format!("post {index} missing")))?;
                let params = json!({
                    "media_url": post.media_url,
                    "caption": post.caption,
                    "content_kind": account.content_kind,
                });
                let media_url = post.media_url.clone();
                ctx.run_flow(ActionKind::PublishPost, "publish post", params)
                    .await?;
                ctx.job.uploaded_media.push(media_url);
            }
            Stage::Highlight => {
                let account = ctx.account()?;
                let highlight = account
                    .highlight
                    .as_ref()
                    .ok_or_else(|| StageError::Permanent("highlight payload missing".into()))?;
                let params = json!({
                    "title": highlight.title,
                    "cover_url": highlight.cover_url,
                });
                ctx.run_flow(ActionKind::Highlight, "create highlight", params)
                    .await?;
            }
            Stage::SetPrivate => {
                ctx.run_flow(ActionKind::SetPrivate, "set account private", json!({ "private": true }))
                    .await?;
            }
            Stage::EnableTwoFactor => {
                let secret = ctx
                    .account()?
                    .totp_secret
                    .as_ref()
                    .map(|s| s.expose_secret().to_string());
                ctx.run_flow(ActionKind::EnableTwoFactor, "enable 2FA", json!({ "totp_secret": secret }))
                    .await?;
            }
            other => {
                return Err(StageError::Permanent(format!(
                    "profile setup cannot handle stage {other}"
                )));
            }
        }

        Ok(next_applicable(Some(stage), ctx.job.account.as_ref(), ctx.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(json: &str) -> AccountRecord {
        serde_json::from_str(json).unwrap()
    }

    fn full_account() -> AccountRecord {
        account(
            r#"{
                "username": "alice", "password": "pw",
                "bio": "hi", "avatar_url": "a.png",
                "posts": [{"media_url": "p1.jpg"}, {"media_url": "p2.jpg"}],
                "highlight": {"title": "trips"},
                "totp_secret": "SECRET"
            }"#,
        )
    }

    #[test]
    fn skip_scan_jumps_over_missing_payloads() {
        // Only a bio: avatar is skipped, bio runs, everything after is
        // skipped (no bindings for the always-run stages).
        let acct = account(r#"{"username": "a", "password": "p", "bio": "hello"}"#);
        let config = RunConfig::default();

        assert_eq!(next_applicable(None, Some(&acct), &config), Stage::SetBio);
        assert_eq!(
            next_applicable(Some(Stage::SetBio), Some(&acct), &config),
            Stage::Done
        );
    }

    #[test]
    fn full_payload_walks_whole_catalogue() {
        let acct = full_account();
        let mut config = RunConfig::default();
        config
            .flow_bindings
            .insert(ActionKind::SetPrivate, "f-priv".into());
        config
            .flow_bindings
            .insert(ActionKind::EnableTwoFactor, "f-2fa".into());

        let mut stage = next_applicable(None, Some(&acct), &config);
        let mut walked = vec![];
        while stage != Stage::Done {
            walked.push(stage);
            stage = next_applicable(Some(stage), Some(&acct), &config);
        }
        assert_eq!(walked, CATALOGUE.to_vec());
    }

    #[test]
    fn always_run_stages_gated_on_binding_not_payload() {
        // Account with no payload at all: only the bound always-run stage
        // applies.
        let acct = account(r#"{"username": "a", "password": "p"}"#);
        let mut config = RunConfig::default();
        config
            .flow_bindings
            .insert(ActionKind::SetPrivate, "f-priv".into());

        assert_eq!(next_applicable(None, Some(&acct), &config), Stage::SetPrivate);
        assert_eq!(
            next_applicable(Some(Stage::SetPrivate), Some(&acct), &config),
            Stage::Done
        );
    }

    #[test]
    fn steps_are_sequential() {
        let strategy = ProfileSetupStrategy;
        assert_eq!(strategy.total_steps(), 8);
        assert_eq!(strategy.step_number(Stage::Warmup), Some(1));
        assert_eq!(strategy.step_number(Stage::SetAvatar), Some(2));
        assert_eq!(strategy.step_number(Stage::EnableTwoFactor), Some(8));
        assert_eq!(strategy.step_number(Stage::Login), None);
    }

    #[test]
    fn catalogue_stages_are_retryable() {
        let strategy = ProfileSetupStrategy;
        assert!(strategy.is_retryable(Stage::SetBio));
        assert!(strategy.is_retryable(Stage::PostSecond));
        assert!(strategy.is_retryable(Stage::Warmup));
        assert!(!strategy.is_retryable(Stage::Login));
    }
}
