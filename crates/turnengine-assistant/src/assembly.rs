use std::collections::HashMap;

use serde_json::Value;
use turnengine_core::TurnContext;

use crate::model::{Assistant, Prompt, PromptRole};

/// One fully-assembled chat-completion message, in the wire shape the LLM
/// adapter expects (plain text or, for vision turns, structured content
/// blocks).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum AssembledContent {
    Text(String),
    Blocks(Vec<Value>),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssembledMessage {
    pub role: PromptRole,
    pub content: AssembledContent,
}

/// An image attachment on the current user turn, already resolved to a
/// data URL or remote URL by the (out-of-scope) vision pipeline.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub url: String,
    pub alt: Option<String>,
}

/// A single expanded history entry (§4.4 step 3).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: PromptRole,
    pub content: String,
}

/// Assemble the full message list for one LLM call (C4).
///
/// Order: merged global+assistant prompts (placeholders substituted) →
/// chat history → current user turn (text, or structured blocks if
/// vision-capable and images are attached) → injected tool-example system
/// prompts, if the assistant exposes a `ToolSet`.
pub fn assemble(
    assistant: &Assistant,
    global_prompts: &[Prompt],
    ctx: &TurnContext,
    history: &[HistoryEntry],
    user_text: &str,
    images: &[ImageAttachment],
) -> Vec<AssembledMessage> {
    let mut messages = Vec::new();

    let base_prompts: Vec<&Prompt> = if assistant.disable_global_prompts {
        assistant.prompts.iter().collect()
    } else {
        global_prompts.iter().chain(assistant.prompts.iter()).collect()
    };

    let env = env_table();
    let ctx_map = ctx.to_map();
    for prompt in base_prompts {
        let content = substitute(&prompt.content, &env, &ctx_map);
        messages.push(AssembledMessage { role: prompt.role, content: AssembledContent::Text(content) });
    }

    for entry in history {
        messages.push(AssembledMessage { role: entry.role, content: AssembledContent::Text(entry.content.clone()) });
    }

    if assistant.vision && !images.is_empty() {
        let mut blocks = vec![serde_json::json!({ "type": "text", "text": user_text })];
        for img in images {
            blocks.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": img.url, "alt": img.alt },
            }));
        }
        messages.push(AssembledMessage { role: PromptRole::User, content: AssembledContent::Blocks(blocks) });
    } else {
        for img in images {
            let caption = img.alt.clone().unwrap_or_default();
            messages.push(AssembledMessage {
                role: PromptRole::System,
                content: AssembledContent::Text(format!("[attached image: {} {}]", img.url, caption)),
            });
        }
        messages.push(AssembledMessage {
            role: PromptRole::User,
            content: AssembledContent::Text(user_text.to_string()),
        });
    }

    if let Some(tool_set) = &assistant.tool_set {
        for tool in &tool_set.tools {
            messages.push(AssembledMessage {
                role: PromptRole::System,
                content: AssembledContent::Text(tool.example()),
            });
        }
        for prompt in &tool_set.prompts {
            let content = substitute(&prompt.content, &env, &ctx_map);
            messages.push(AssembledMessage { role: prompt.role, content: AssembledContent::Text(content) });
        }
    }

    messages
}

fn env_table() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Eagerly substitute `$SYS.<K>`, `$ENV.<K>`, `$CTX.<K>` placeholders
/// (§4.2, §4.4 step 2).
///
/// Unknown `$SYS.*`/`$CTX.*` keys are left literal; unknown `$ENV.*` keys
/// are replaced with an empty string (the one "known-namespace miss"
/// case — `$ENV` always resolves against a real, if possibly absent,
/// process environment).
pub fn substitute(content: &str, env: &HashMap<String, String>, ctx: &HashMap<String, Value>) -> String {
    let sys = turnengine_core::sys_table(chrono::Utc::now());
    let mut out = String::with_capacity(content.len());

    let mut i = 0;
    while i < content.len() {
        if content[i..].starts_with('$') {
            if let Some((namespace, key, consumed)) = parse_placeholder(&content[i..]) {
                match namespace {
                    "SYS" => match sys.get(key.as_str()) {
                        Some(v) => out.push_str(v),
                        None => out.push_str(&content[i..i + consumed]),
                    },
                    "ENV" => out.push_str(env.get(&key).map(String::as_str).unwrap_or("")),
                    "CTX" => match ctx.get(&key) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(v) => out.push_str(&v.to_string()),
                        None => out.push_str(&content[i..i + consumed]),
                    },
                    _ => out.push_str(&content[i..i + consumed]),
                }
                i += consumed;
                continue;
            }
        }
        let ch = content[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Parse a `$NAMESPACE.KEY` token starting at `s[0]=='$'`. `KEY` runs over
/// alphanumerics and underscores. Returns `(namespace, key, byte_len)`.
fn parse_placeholder(s: &str) -> Option<(&str, String, usize)> {
    let rest = &s[1..];
    let dot = rest.find('.')?;
    let namespace = &rest[..dot];
    if namespace.is_empty() || !namespace.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let after_dot = &rest[dot + 1..];
    let key_len = after_dot
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(idx, _)| idx)
        .unwrap_or(after_dot.len());
    if key_len == 0 {
        return None;
    }
    let key = after_dot[..key_len].to_string();
    Some((namespace, key, 1 + namespace.len() + 1 + key_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_sys_key() {
        let env = HashMap::new();
        let ctx = HashMap::new();
        let out = substitute("today is $SYS.DATE.", &env, &ctx);
        assert!(!out.contains("$SYS"));
        assert!(out.starts_with("today is "));
    }

    #[test]
    fn unknown_sys_key_left_literal() {
        let env = HashMap::new();
        let ctx = HashMap::new();
        let out = substitute("value: $SYS.NOPE", &env, &ctx);
        assert_eq!(out, "value: $SYS.NOPE");
    }

    #[test]
    fn unknown_env_key_becomes_empty() {
        let env = HashMap::new();
        let ctx = HashMap::new();
        let out = substitute("key=[$ENV.DOES_NOT_EXIST_XYZ]", &env, &ctx);
        assert_eq!(out, "key=[]");
    }

    #[test]
    fn ctx_key_resolves_from_map() {
        let env = HashMap::new();
        let mut ctx = HashMap::new();
        ctx.insert("locale".to_string(), Value::String("en".to_string()));
        let out = substitute("locale=$CTX.locale", &env, &ctx);
        assert_eq!(out, "locale=en");
    }

    #[test]
    fn substitution_is_idempotent_on_already_substituted_text() {
        let env = HashMap::new();
        let ctx = HashMap::new();
        let once = substitute("x=$SYS.NOPE y=$ENV.ALSO_NOPE_XYZ", &env, &ctx);
        let twice = substitute(&once, &env, &ctx);
        assert_eq!(once, twice);
    }
}
