use serde_json::Value;
use tokio::time::{sleep, Duration};
use turnengine_core::{EngineError, Result};

use crate::bridge::{CompiledHook, HookHost};
use crate::capability::Capability;

/// Retry-loop configuration (§4.6 defaults: `times=3, delay=200ms,
/// delay_max=1000ms`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub times: u32,
    pub delay_ms: u64,
    pub delay_max_ms: u64,
    pub prompt_template: String,
    pub hook_timeout_ms: u64,
}

/// One attempt's worth of context fed to the retry-prompt template and to
/// the `Retry` hook.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetryContext {
    pub error: String,
    pub output: Value,
    pub input: Value,
}

/// Drive `attempt` against `policy`, sleeping and rewriting the prompt
/// between failures, until it succeeds, the attempt budget is exhausted,
/// or a non-retryable error is returned (§4.6).
///
/// `attempt(rewritten_prompt: Option<&str>) -> Result<T>` performs one
/// `MakeCall`/LLM re-entry; on failure this function renders the retry
/// template (optionally further rewritten by the script's `Retry` hook)
/// and feeds it back in as `rewritten_prompt` for the next attempt.
pub async fn run_with_retry<T, F, Fut>(
    host: &HookHost,
    compiled: Option<&CompiledHook>,
    cap: Capability,
    ctx_map: Value,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut counter = 0u32;
    let mut rewritten: Option<String> = None;

    loop {
        match attempt(rewritten.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable() => {
                counter += 1;
                if counter > policy.times {
                    return Err(err);
                }

                let delay = Duration::from_millis((policy.delay_ms * counter as u64).min(policy.delay_max_ms));
                sleep(delay).await;

                let retry_ctx = RetryContext { error: err.to_string(), output: Value::Null, input: Value::Null };
                let rendered = cap
                    .replace(&policy.prompt_template, &serde_json::to_value(&retry_ctx).map_err(|e| EngineError::Parse(e.to_string()))?)
                    .unwrap_or_else(|_| policy.prompt_template.clone());

                rewritten = Some(match compiled {
                    Some(compiled) => {
                        host.call_retry(compiled, cap.clone(), ctx_map.clone(), &rendered, policy.hook_timeout_ms)
                            .await?
                            .prompt
                    }
                    None => rendered,
                });
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;
    use turnengine_core::SharedSpace;
    use turnengine_protocol::NullSink;

    fn cap() -> Capability {
        Capability::new(SharedSpace::new(), StdArc::new(NullSink), None, None, None)
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let host = HookHost::new();
        let policy = RetryPolicy { times: 3, delay_ms: 1, delay_max_ms: 5, prompt_template: "retry: {{error}}".into(), hook_timeout_ms: 50 };
        let result: Result<u32> = run_with_retry(&host, None, cap(), Value::Null, &policy, |_| async { Ok(42u32) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_budget_exhausted() {
        let host = HookHost::new();
        let policy = RetryPolicy { times: 2, delay_ms: 1, delay_max_ms: 5, prompt_template: "retry: {{error}}".into(), hook_timeout_ms: 50 };
        let calls = StdArc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<u32> = run_with_retry(&host, None, cap(), Value::Null, &policy, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Llm("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let host = HookHost::new();
        let policy = RetryPolicy { times: 3, delay_ms: 1, delay_max_ms: 5, prompt_template: "retry".into(), hook_timeout_ms: 50 };
        let calls = StdArc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<u32> = run_with_retry(&host, None, cap(), Value::Null, &policy, move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Validation("bad input".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
