use turnengine_core::{EngineError, Result, SharedSpace};

use crate::store::Store;
use crate::types::{StepRecord, StepType};

/// What the orchestrator must do to resume an interrupted request (§4.8
/// Resume, assembled from steps 1-3; step 4's actual replay dispatch is
/// the orchestrator's job since it alone knows how to re-invoke the LLM,
/// a tool, a hook, or a delegated assistant).
pub struct ResumePlan {
    /// The interrupted/failed step itself.
    pub target: StepRecord,
    /// Ancestor chain, root first, including `target` as the last entry.
    pub stack: Vec<StepRecord>,
    pub shared_space: SharedSpace,
}

/// Build a [`ResumePlan`] for `chat_id`, or `None` if there is nothing to
/// resume (§4.8 Resume steps 1-3).
pub async fn plan_resume(store: &dyn Store, chat_id: &str) -> Result<Option<ResumePlan>> {
    let Some(target) = store.last_unfinished_step(chat_id).await? else {
        return Ok(None);
    };

    let stack = store.ancestor_chain(&target).await?;
    let shared_space = SharedSpace::from_snapshot(target.space_snapshot.clone());

    Ok(Some(ResumePlan { target, stack, shared_space }))
}

/// The replay action the orchestrator should take for `plan.target.type`
/// (§4.8 Resume step 4).
#[derive(Debug, Clone)]
pub enum ReplayAction {
    ReplayLlm { input: serde_json::Value },
    ReplayTool { arguments: serde_json::Value },
    ReplayHookNext { payload: serde_json::Value },
    ReplayDelegate { messages: serde_json::Value },
}

pub fn replay_action(target: &StepRecord) -> Result<ReplayAction> {
    match target.kind {
        StepType::Llm => Ok(ReplayAction::ReplayLlm { input: target.input.clone() }),
        StepType::Tool => Ok(ReplayAction::ReplayTool { arguments: target.input.clone() }),
        StepType::HookNext => Ok(ReplayAction::ReplayHookNext { payload: target.input.clone() }),
        StepType::Delegate => Ok(ReplayAction::ReplayDelegate { messages: target.input.clone() }),
        other => Err(EngineError::Validation(format!("step type {other:?} is not resumable"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use crate::types::{StepStatus, StepType};
    use chrono::Utc;

    fn step(kind: StepType, status: StepStatus, stack_id: &str, parent: Option<&str>, depth: u32, seq: i64) -> StepRecord {
        StepRecord {
            step_id: uuid::Uuid::new_v4().to_string(),
            chat_id: "c1".into(),
            request_id: "r1".into(),
            assistant_id: "a1".into(),
            stack_id: stack_id.into(),
            stack_parent_id: parent.map(str::to_string),
            stack_depth: depth,
            kind,
            status,
            input: serde_json::json!({"msg": "hi"}),
            output: serde_json::Value::Null,
            space_snapshot: Default::default(),
            error: None,
            sequence: seq,
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn plan_resume_walks_parent_chain() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        store
            .commit_turn(
                "c1",
                vec![],
                vec![
                    step(StepType::Delegate, StepStatus::Completed, "root", None, 0, 1),
                    step(StepType::Llm, StepStatus::Interrupted, "child", Some("root"), 1, 2),
                ],
            )
            .await
            .unwrap();

        let plan = plan_resume(&store, "c1").await.unwrap().unwrap();
        assert_eq!(plan.target.stack_id, "child");
        assert_eq!(plan.stack.len(), 2);
        assert_eq!(plan.stack[0].stack_id, "root");
        assert_eq!(plan.stack[1].stack_id, "child");
    }

    #[tokio::test]
    async fn no_unfinished_step_returns_none() {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_chat("c1", "s1", "a1").await.unwrap();
        let plan = plan_resume(&store, "c1").await.unwrap();
        assert!(plan.is_none());
    }
}
