use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use turnengine_assistant::ToolSpec;
use turnengine_core::{EngineError, Result};

/// A host-registered tool backend. Implementations may run in-process, via
/// a sub-process stdio-JSON bridge, or as a remote MCP call — the
/// orchestrator treats all three identically (§4.7).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn spec(&self) -> &ToolSpec;
    async fn execute(&self, arguments: Value) -> Result<Value>;
}

/// In-process tool registry keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| e.clone())
    }
}

/// Outcome of dispatching one parsed tool call (§4.7).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub function: String,
    pub output: Value,
    pub is_error: bool,
}

/// Look up `function` in `registry`, validate `arguments` against its
/// parameter schema, and execute it. Schema violations short-circuit to a
/// tool error without invoking the backend (§4.7).
pub async fn dispatch(registry: &ToolRegistry, function: &str, arguments: Value) -> ToolOutcome {
    let Some(tool) = registry.get(function) else {
        return ToolOutcome {
            function: function.to_string(),
            output: Value::String(format!("unknown tool: {function}")),
            is_error: true,
        };
    };

    if let Err(message) = validate_arguments(tool.spec(), &arguments) {
        return ToolOutcome { function: function.to_string(), output: Value::String(message), is_error: true };
    }

    match tool.execute(arguments).await {
        Ok(output) => ToolOutcome { function: function.to_string(), output, is_error: false },
        Err(EngineError::Tool { message, .. }) => {
            ToolOutcome { function: function.to_string(), output: Value::String(message), is_error: true }
        }
        Err(e) => ToolOutcome { function: function.to_string(), output: Value::String(e.to_string()), is_error: true },
    }
}

fn validate_arguments(spec: &ToolSpec, arguments: &Value) -> std::result::Result<(), String> {
    let validator = jsonschema::validator_for(&spec.parameters)
        .map_err(|e| format!("invalid schema for tool {}: {e}", spec.name))?;
    let errors: Vec<String> = validator.iter_errors(arguments).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("argument validation failed for {}: {}", spec.name, errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(ToolSpec);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            &self.0.name
        }
        fn spec(&self) -> &ToolSpec {
            &self.0
        }
        async fn execute(&self, arguments: Value) -> Result<Value> {
            Ok(arguments)
        }
    }

    fn echo_tool() -> Arc<dyn Tool> {
        Arc::new(Echo(ToolSpec {
            name: "echo".to_string(),
            description: "echoes back".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
        }))
    }

    #[tokio::test]
    async fn dispatch_executes_known_tool() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        let outcome = dispatch(&registry, "echo", serde_json::json!({"text": "hi"})).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.output["text"], "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let outcome = dispatch(&registry, "missing", Value::Null).await;
        assert!(outcome.is_error);
    }

    #[tokio::test]
    async fn dispatch_short_circuits_on_schema_violation() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool());
        let outcome = dispatch(&registry, "echo", serde_json::json!({})).await;
        assert!(outcome.is_error);
    }
}
