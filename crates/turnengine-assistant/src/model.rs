use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `(role, content, name?)` — a single assembled or stored prompt turn (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub role: PromptRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// Function-calling tool shape (§3). `parameters` is JSON-Schema-subset,
/// including `oneOf`/`enum` at any nesting level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    /// Render the `<tool>{"function":"NAME","arguments":{…}}</tool>` example
    /// stub used to teach non-function-calling models the tool envelope
    /// (§3, §4.4 step 5).
    pub fn example(&self) -> String {
        let arguments = render_schema_example(&self.parameters);
        let body = serde_json::json!({ "function": self.name, "arguments": arguments });
        format!("<tool>{}</tool>", body)
    }
}

/// Build a placeholder value tree from a JSON-Schema-subset node, following
/// the exact rules in §3: `string` → `"<name:string>"`, `enum` → first
/// value, `oneOf` → first non-null branch, `object`/`array` recursed via
/// `properties`/`items`.
fn render_schema_example(schema: &serde_json::Value) -> serde_json::Value {
    render_schema_example_named(schema, None)
}

fn render_schema_example_named(schema: &serde_json::Value, name: Option<&str>) -> serde_json::Value {
    if let Some(one_of) = schema.get("oneOf").and_then(|v| v.as_array()) {
        let branch = one_of
            .iter()
            .find(|b| b.get("type").and_then(|t| t.as_str()) != Some("null"))
            .or_else(|| one_of.first());
        return branch
            .map(|b| render_schema_example_named(b, name))
            .unwrap_or(serde_json::Value::Null);
    }

    if let Some(values) = schema.get("enum").and_then(|v| v.as_array()) {
        return values.first().cloned().unwrap_or(serde_json::Value::Null);
    }

    match schema.get("type").and_then(|t| t.as_str()) {
        Some("object") => {
            let mut obj = serde_json::Map::new();
            if let Some(props) = schema.get("properties").and_then(|v| v.as_object()) {
                for (key, sub) in props {
                    obj.insert(key.clone(), render_schema_example_named(sub, Some(key)));
                }
            }
            serde_json::Value::Object(obj)
        }
        Some("array") => {
            let item = schema
                .get("items")
                .map(|i| render_schema_example_named(i, name))
                .unwrap_or(serde_json::Value::String("<item>".to_string()));
            serde_json::Value::Array(vec![item])
        }
        Some("integer") | Some("number") => serde_json::Value::String(format!("<{}:number>", name.unwrap_or("value"))),
        Some("boolean") => serde_json::Value::String(format!("<{}:boolean>", name.unwrap_or("value"))),
        _ => serde_json::Value::String(format!("<{}:string>", name.unwrap_or("value"))),
    }
}

/// Tool schemas plus any supplementary prompts injected alongside them
/// (§3 "ToolSet").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSet {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
}

/// An addressable bundle of configuration, prompts, tools, and optional
/// owner-authored script (§3 "Assistant").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    /// LLM backing identifier, resolved by the LLM adapter layer (C10).
    pub connector: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub tool_set: Option<ToolSet>,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub mentionable: bool,
    #[serde(default)]
    pub automated: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub built_in: bool,
    #[serde(default)]
    pub disable_global_prompts: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort: i64,
    #[serde(default)]
    pub locale: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assistant {
    /// `loadMap` validation (§4.3): id, name, connector all required.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("assistant_id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.connector.trim().is_empty() {
            return Err("connector must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_renders_string_enum_and_nested_object() {
        let tool = ToolSpec {
            name: "search".to_string(),
            description: "search the web".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "mode": {"type": "string", "enum": ["fast", "deep"]},
                    "filter": {
                        "type": "object",
                        "properties": {"lang": {"type": "string"}}
                    }
                }
            }),
        };
        let example = tool.example();
        assert!(example.starts_with("<tool>"));
        assert!(example.ends_with("</tool>"));
        let inner = &example[6..example.len() - 7];
        let parsed: serde_json::Value = serde_json::from_str(inner).unwrap();
        assert_eq!(parsed["function"], "search");
        assert_eq!(parsed["arguments"]["query"], "<query:string>");
        assert_eq!(parsed["arguments"]["mode"], "fast");
        assert_eq!(parsed["arguments"]["filter"]["lang"], "<lang:string>");
    }

    #[test]
    fn one_of_picks_first_non_null_branch() {
        let schema = serde_json::json!({"oneOf": [{"type": "null"}, {"type": "string"}]});
        let rendered = render_schema_example_named(&schema, Some("x"));
        assert_eq!(rendered, "<x:string>");
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let mut a = sample();
        a.id = "".to_string();
        assert!(a.validate().is_err());
    }

    fn sample() -> Assistant {
        Assistant {
            id: "a1".into(),
            name: "Assistant".into(),
            avatar: None,
            connector: "openai".into(),
            script: None,
            prompts: vec![],
            tool_set: None,
            options: HashMap::new(),
            vision: false,
            mentionable: false,
            automated: false,
            readonly: false,
            built_in: false,
            disable_global_prompts: false,
            tags: vec![],
            sort: 0,
            locale: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
