//! Content-only posting workflow, with a platform variant that publishes
//! into a community/topic.
//!
//! The index of the next post to publish lives on the job (`post_index`),
//! not in the strategy, so one strategy instance serves every concurrent job.

use async_trait::async_trait;
use serde_json::json;

use crate::client::ActionKind;
use crate::error::StageError;
use crate::events::LogLevel;
use crate::job::stage::Stage;
use crate::job::DeviceJob;
use crate::strategy::{StageContext, WorkflowKind, WorkflowStrategy};

pub struct PostStrategy {
    community: bool,
}

impl PostStrategy {
    pub fn content_only() -> Self {
        Self { community: false }
    }

    pub fn community() -> Self {
        Self { community: true }
    }
}

#[async_trait]
impl WorkflowStrategy for PostStrategy {
    fn kind(&self) -> WorkflowKind {
        if self.community {
            WorkflowKind::CommunityPost
        } else {
            WorkflowKind::Post
        }
    }

    fn first_stage(&self, job: &DeviceJob) -> Stage {
        match job.account.as_ref().and_then(|a| a.post(0)) {
            Some(_) => Stage::PostFirst,
            None => Stage::Done,
        }
    }

    fn is_retryable(&self, stage: Stage) -> bool {
        matches!(stage, Stage::PostFirst | Stage::PostSecond)
    }

    fn total_steps(&self) -> u32 {
        2
    }

    fn step_number(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::PostFirst => Some(1),
            Stage::PostSecond => Some(2),
            _ => None,
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut StageContext<'_>,
    ) -> Result<Stage, StageError> {
        if !matches!(stage, Stage::PostFirst | Stage::PostSecond) {
            return Err(StageError::Permanent(format!(
                "post workflow cannot handle stage {stage}"
            )));
        }

        let index = usize::from(ctx.job.post_index);
        let account = ctx.account()?;
        let Some(post) = account.post(index) else {
            // Nothing (left) to publish.
            return Ok(Stage::Done);
        };

        let mut params = json!({
            "media_url": post.media_url,
            "caption": post.caption,
            "content_kind": account.content_kind,
        });
        if self.community {
            let community = post.community.clone().ok_or_else(|| {
                StageError::Permanent(format!(
                    "post {index} has no community but the workflow posts into one"
                ))
            })?;
            params["community"] = json!(community);
        }

        let media_url = post.media_url.clone();
        ctx.log(LogLevel::Info, format!("Publishing post {}", index + 1));
        ctx.run_flow(ActionKind::PublishPost, "publish post", params)
            .await?;
        ctx.job.uploaded_media.push(media_url);
        ctx.job.post_index += 1;

        if ctx.account()?.post(usize::from(ctx.job.post_index)).is_some() {
            Ok(Stage::PostSecond)
        } else {
            Ok(Stage::Done)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRecord;
    use crate::client::Device;
    use crate::matcher::{DeviceAssignment, VerificationResult};

    fn job_with(posts: &str) -> DeviceJob {
        let account: AccountRecord = serde_json::from_str(&format!(
            r#"{{"username": "a", "password": "p", "posts": {posts}}}"#
        ))
        .unwrap();
        DeviceJob::from_assignment(
            DeviceAssignment {
                device: Device {
                    id: "d1".into(),
                    name: "D1".into(),
                    serial: "emu-1".into(),
                },
                ordinal: 1,
                verification: VerificationResult::Clean,
                account: Some(account),
                swapped_from: None,
            },
            10,
        )
    }

    #[test]
    fn first_stage_skips_to_done_without_content() {
        let strategy = PostStrategy::content_only();
        assert_eq!(strategy.first_stage(&job_with("[]")), Stage::Done);
        assert_eq!(
            strategy.first_stage(&job_with(r#"[{"media_url": "p.jpg"}]"#)),
            Stage::PostFirst
        );
    }

    #[test]
    fn variant_reports_its_kind() {
        assert_eq!(PostStrategy::content_only().kind(), WorkflowKind::Post);
        assert_eq!(PostStrategy::community().kind(), WorkflowKind::CommunityPost);
    }

    #[test]
    fn post_stages_are_retryable() {
        let strategy = PostStrategy::community();
        assert!(strategy.is_retryable(Stage::PostFirst));
        assert!(strategy.is_retryable(Stage::PostSecond));
        assert!(!strategy.is_retryable(Stage::Rename));
    }
}
