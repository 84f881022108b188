use std::time::Duration;

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use tokio::time::timeout;
use tracing::warn;
use turnengine_core::{EngineError, Result};

use crate::capability::Capability;
use crate::types::{CreateOutcome, FailOutcome, HookName, NextOutcome, RetryOutcome, StreamOutcome};

/// A hook script, compiled once and cached alongside its owning assistant
/// (§4.3: "Script source is compiled once and stored on the assistant").
#[derive(Clone)]
pub struct CompiledHook {
    ast: AST,
}

/// Owns the shared `rhai::Engine` used to compile and run every assistant's
/// hook script. One `HookHost` is constructed at startup and shared across
/// turns; per-call state (shared space, sink, delegator) is injected fresh
/// into each invocation via [`Capability`], never stored on the engine.
pub struct HookHost {
    engine: Engine,
}

impl HookHost {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 32);
        register_capability_api(&mut engine);
        Self { engine }
    }

    pub fn compile(&self, source: &str) -> Result<CompiledHook> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| EngineError::Hook { hook: "compile".into(), message: e.to_string() })?;
        Ok(CompiledHook { ast })
    }

    /// Does the compiled script define the given hook function at all?
    /// Absent hooks are simply skipped by the orchestrator.
    pub fn defines(&self, compiled: &CompiledHook, hook: HookName) -> bool {
        compiled.ast.iter_functions().any(|f| f.name == hook.fn_name())
    }

    /// Run one hook function with up to `args`, respecting the short-hook
    /// 5-second deadline (§4.6) for `Stream`/`Fail`/`Retry`; `Create`/`Done`
    /// run without an internal deadline (bounded only by the turn's own
    /// cancellation, observed by the caller).
    async fn call<T: serde::de::DeserializeOwned + Send + 'static>(
        &self,
        compiled: &CompiledHook,
        hook: HookName,
        cap: Capability,
        args: Vec<Value>,
        hook_timeout_ms: u64,
    ) -> Result<Option<T>> {
        if !self.defines(compiled, hook) {
            return Ok(None);
        }

        let engine = self.engine.clone();
        let ast = compiled.ast.clone();
        let fn_name = hook.fn_name();
        let is_short = hook.is_short();

        let call = tokio::task::spawn_blocking(move || -> Result<Dynamic> {
            let mut scope = Scope::new();
            scope.push("cap", cap);
            let dynamic_args: Vec<Dynamic> = args
                .into_iter()
                .map(|v| to_dynamic(v).unwrap_or(Dynamic::UNIT))
                .collect();
            engine
                .call_fn::<Dynamic>(&mut scope, &ast, fn_name, dynamic_args)
                .map_err(|e| EngineError::Hook { hook: fn_name.to_string(), message: e.to_string() })
        });

        let result = if is_short {
            match timeout(Duration::from_millis(hook_timeout_ms), call).await {
                Ok(join_result) => join_result.map_err(|e| EngineError::Internal(e.to_string()))?,
                Err(_) => {
                    warn!(hook = fn_name, "hook timed out");
                    return Err(EngineError::Hook { hook: fn_name.to_string(), message: "timed out".into() });
                }
            }
        } else {
            call.await.map_err(|e| EngineError::Internal(e.to_string()))?
        }?;

        if result.is_unit() {
            return Ok(None);
        }

        let json: Value = from_dynamic(&result).map_err(|e| EngineError::Parse(e.to_string()))?;
        let parsed: T =
            serde_json::from_value(json).map_err(|e| EngineError::Hook { hook: fn_name.to_string(), message: e.to_string() })?;
        Ok(Some(parsed))
    }

    pub async fn call_create(
        &self,
        compiled: &CompiledHook,
        cap: Capability,
        ctx_map: Value,
        messages: Value,
        options: Value,
    ) -> Result<CreateOutcome> {
        let out: Option<CreateOutcome> = self
            .call(compiled, HookName::Create, cap, vec![ctx_map, messages, options], 0)
            .await?;
        Ok(out.unwrap_or_default())
    }

    pub async fn call_stream(
        &self,
        compiled: &CompiledHook,
        cap: Capability,
        ctx_map: Value,
        delta: &str,
        hook_timeout_ms: u64,
    ) -> Result<StreamOutcome> {
        let out: Option<StreamOutcome> = self
            .call(
                compiled,
                HookName::Stream,
                cap,
                vec![ctx_map, Value::String(delta.to_string())],
                hook_timeout_ms,
            )
            .await?;
        Ok(out.unwrap_or(StreamOutcome::Proceed { text: delta.to_string() }))
    }

    pub async fn call_next(
        &self,
        compiled: &CompiledHook,
        cap: Capability,
        ctx_map: Value,
        contents: Value,
    ) -> Result<NextOutcome> {
        let out: Option<NextOutcome> = self
            .call(compiled, HookName::Next, cap, vec![ctx_map, contents], 0)
            .await?;
        Ok(out.unwrap_or_default())
    }

    pub async fn call_done(&self, compiled: &CompiledHook, cap: Capability, ctx_map: Value, output: Value) -> Result<()> {
        let _: Option<Value> = self.call(compiled, HookName::Done, cap, vec![ctx_map, output], 0).await?;
        Ok(())
    }

    pub async fn call_fail(
        &self,
        compiled: &CompiledHook,
        cap: Capability,
        ctx_map: Value,
        error: &str,
        hook_timeout_ms: u64,
    ) -> Result<FailOutcome> {
        let out: Option<FailOutcome> = self
            .call(
                compiled,
                HookName::Fail,
                cap,
                vec![ctx_map, Value::String(error.to_string())],
                hook_timeout_ms,
            )
            .await?;
        Ok(out.unwrap_or(FailOutcome { message: error.to_string(), retry: false }))
    }

    pub async fn call_retry(
        &self,
        compiled: &CompiledHook,
        cap: Capability,
        ctx_map: Value,
        rendered_prompt: &str,
        hook_timeout_ms: u64,
    ) -> Result<RetryOutcome> {
        let out: Option<RetryOutcome> = self
            .call(
                compiled,
                HookName::Retry,
                cap,
                vec![ctx_map, Value::String(rendered_prompt.to_string())],
                hook_timeout_ms,
            )
            .await?;
        Ok(out.unwrap_or(RetryOutcome { prompt: rendered_prompt.to_string() }))
    }

    pub async fn call_init(&self, compiled: &CompiledHook, cap: Capability, ctx_map: Value) -> Result<()> {
        let _: Option<Value> = self.call(compiled, HookName::Init, cap, vec![ctx_map], 0).await?;
        Ok(())
    }
}

impl Default for HookHost {
    fn default() -> Self {
        Self::new()
    }
}

fn dynamic_to_json(d: Dynamic) -> Value {
    from_dynamic(&d).unwrap_or(Value::Null)
}

fn json_to_dynamic(v: Value) -> Dynamic {
    to_dynamic(v).unwrap_or(Dynamic::UNIT)
}

/// Register the restricted capability API (§4.6) onto `engine` so hook
/// scripts can call `cap.Send(...)`, `cap.Get(...)`, etc. This is called
/// once, at `HookHost` construction; the `Capability` instance bound to
/// `cap` is fresh per turn (pushed into the call [`Scope`]).
fn register_capability_api(engine: &mut Engine) {
    engine.register_type_with_name::<Capability>("Capability");

    engine.register_fn("Send", |cap: &mut Capability, message: Dynamic, save_history: bool| {
        cap.send(dynamic_to_json(message), save_history);
    });
    engine.register_fn("Send", |cap: &mut Capability, message: Dynamic| {
        cap.send(dynamic_to_json(message), true);
    });

    engine.register_fn("Assets", |cap: &mut Capability, name: &str, data: Dynamic| -> String {
        cap.assets(name, &dynamic_to_json(data)).unwrap_or_default()
    });

    engine.register_fn("Replace", |cap: &mut Capability, template: &str, data: Dynamic| -> String {
        cap.replace(template, &dynamic_to_json(data)).unwrap_or_else(|_| template.to_string())
    });

    engine.register_fn(
        "MakeCall",
        |cap: &mut Capability, assistant_id: &str, input: Dynamic, options: Dynamic| -> Dynamic {
            match cap.make_call(assistant_id, dynamic_to_json(input), dynamic_to_json(options)) {
                Ok(v) => json_to_dynamic(v),
                Err(e) => json_to_dynamic(serde_json::json!({ "error": e.to_string() })),
            }
        },
    );

    engine.register_fn("MakePlan", |cap: &mut Capability, id: &str| -> Dynamic {
        json_to_dynamic(cap.make_plan(id))
    });

    engine.register_fn("Set", |cap: &mut Capability, key: &str, value: Dynamic| {
        cap.space_set(key, dynamic_to_json(value));
    });
    engine.register_fn("Get", |cap: &mut Capability, key: &str| -> Dynamic { json_to_dynamic(cap.space_get(key)) });
    engine.register_fn("Del", |cap: &mut Capability, key: &str| {
        cap.space_del(key);
    });
    engine.register_fn("Clear", |cap: &mut Capability| {
        cap.space_clear();
    });
}
