use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use turnengine_core::{EngineError, Result};

use crate::model::{Assistant, Prompt, ToolSet};

/// A persisted, not-yet-validated assistant record, as it comes back from
/// the store or from a filesystem directory (§4.3 `loadMap` input).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RawAssistant {
    pub assistant_id: String,
    pub name: String,
    pub connector: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    /// Either a native array or an embedded JSON string (§4.3).
    #[serde(default)]
    pub prompts: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_set: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
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
    pub sort: i64,
    #[serde(default)]
    pub locale: Option<serde_json::Value>,
    /// Set only when this record was loaded from a filesystem directory.
    #[serde(default)]
    pub path: Option<String>,
}

/// Validate and build an [`Assistant`] from a raw record (§4.3 `loadMap`).
///
/// Structured fields (`prompts`, `tool_set`, `options`, `tags`, `locale`)
/// accept either native values or embedded JSON strings; the latter are
/// parsed transparently.
pub fn load_map(raw: RawAssistant, assets_dir: Option<&Path>) -> Result<Assistant> {
    let prompts = parse_prompts(raw.prompts, assets_dir)?;
    let tool_set = raw
        .tool_set
        .map(|v| parse_embedded::<ToolSet>(v))
        .transpose()?;
    let options = raw
        .options
        .map(|v| parse_embedded::<HashMap<String, serde_json::Value>>(v))
        .transpose()?
        .unwrap_or_default();
    let tags = raw
        .tags
        .map(|v| parse_embedded::<Vec<String>>(v))
        .transpose()?
        .unwrap_or_default();
    let locale = raw
        .locale
        .map(|v| parse_embedded::<HashMap<String, String>>(v))
        .transpose()?
        .unwrap_or_default();

    let now = Utc::now();
    let assistant = Assistant {
        id: raw.assistant_id,
        name: raw.name,
        avatar: raw.avatar,
        connector: raw.connector,
        script: raw.script,
        prompts,
        tool_set,
        options,
        vision: raw.vision,
        mentionable: raw.mentionable,
        automated: raw.automated,
        readonly: raw.readonly,
        built_in: raw.built_in,
        disable_global_prompts: raw.disable_global_prompts,
        tags,
        sort: raw.sort,
        locale,
        created_at: now,
        updated_at: now,
    };

    assistant.validate().map_err(EngineError::Validation)?;
    Ok(assistant)
}

/// Accepts either an already-structured JSON value or a JSON-encoded string
/// (the "embedded JSON string" case from §4.3) and deserializes it to `T`.
fn parse_embedded<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    match value {
        serde_json::Value::String(s) => {
            serde_json::from_str(&s).map_err(|e| EngineError::Parse(e.to_string()))
        }
        other => serde_json::from_value(other).map_err(|e| EngineError::Parse(e.to_string())),
    }
}

/// Parse a prompts field, which may be a native array, an embedded JSON
/// string, or (filesystem layout) a YAML document. `@assets/<path>`
/// references inside any prompt body are inlined from `assets_dir`.
fn parse_prompts(value: Option<serde_json::Value>, assets_dir: Option<&Path>) -> Result<Vec<Prompt>> {
    let Some(value) = value else { return Ok(Vec::new()) };
    let mut prompts: Vec<Prompt> = match value {
        serde_json::Value::String(s) => {
            // Try YAML first (filesystem `prompts` file), then JSON.
            match serde_yaml::from_str::<Vec<Prompt>>(&s) {
                Ok(p) => p,
                Err(yaml_err) => serde_json::from_str(&s)
                    .map_err(|_| EngineError::Parse(yaml_err.to_string()))?,
            }
        }
        other => serde_json::from_value(other).map_err(|e| EngineError::Parse(e.to_string()))?,
    };

    if let Some(dir) = assets_dir {
        for p in &mut prompts {
            p.content = inline_assets(&p.content, dir)?;
        }
    }
    Ok(prompts)
}

/// Replace `@assets/<path>` references inside a prompt body with the
/// referenced file's contents, re-indenting the inlined block to match the
/// reference's own leading whitespace so it composes correctly inside a
/// YAML block scalar (§4.3).
fn inline_assets(content: &str, assets_dir: &Path) -> Result<String> {
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let trimmed_end = line.trim_end_matches('\n');
        let indent_len = trimmed_end.len() - trimmed_end.trim_start().len();
        let body = trimmed_end.trim_start();
        if let Some(rest) = body.strip_prefix("@assets/") {
            let path = assets_dir.join(rest);
            let asset = std::fs::read_to_string(&path)
                .map_err(|e| EngineError::NotFound(format!("asset {}: {e}", path.display())))?;
            let indent = " ".repeat(indent_len);
            for (i, asset_line) in asset.lines().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push_str(asset_line);
            }
            if trimmed_end.len() != line.len() {
                out.push('\n');
            }
        } else {
            out.push_str(line);
        }
    }
    Ok(out)
}

/// Filesystem loader for built-in assistants: `<root>/<id>/{package,prompts,src/index}`
/// (§4.3 `LoadBuiltIn`).
pub struct FsAssistantSource {
    pub root: PathBuf,
}

impl FsAssistantSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Enumerate built-in assistant directories: any child of `root` that
    /// contains a `package` file.
    pub fn discover(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| EngineError::Storage(format!("reading assistants root: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Storage(e.to_string()))?;
            if entry.path().join("package").is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load one assistant directory into a [`RawAssistant`], ready for
    /// `load_map`.
    pub fn load_raw(&self, id: &str) -> Result<RawAssistant> {
        let dir = self.root.join(id);
        let package_path = dir.join("package");
        let package_text = std::fs::read_to_string(&package_path)
            .map_err(|e| EngineError::NotFound(format!("package for {id}: {e}")))?;
        let mut raw: RawAssistant = serde_yaml::from_str(&package_text)
            .map_err(|e| EngineError::Parse(format!("package for {id}: {e}")))?;

        if raw.assistant_id.is_empty() {
            raw.assistant_id = id.to_string();
        }

        let prompts_path = dir.join("prompts");
        if prompts_path.is_file() {
            let prompts_text = std::fs::read_to_string(&prompts_path)
                .map_err(|e| EngineError::Storage(e.to_string()))?;
            raw.prompts = Some(serde_json::Value::String(prompts_text));
        }

        let index_path = dir.join("src").join("index");
        if index_path.is_file() {
            raw.script = Some(
                std::fs::read_to_string(&index_path).map_err(|e| EngineError::Storage(e.to_string()))?,
            );
        }

        raw.built_in = true;
        raw.readonly = true;
        raw.path = Some(dir.to_string_lossy().to_string());
        Ok(raw)
    }

    pub fn assets_dir(&self, id: &str) -> PathBuf {
        self.root.join(id).join("assets")
    }
}

/// Parse a raw `$SYS`/global-prompts file at `<root>/agent/prompts` (§4.4),
/// loaded once at startup.
pub fn load_global_prompts(root: &Path) -> Result<Vec<Prompt>> {
    let path = root.join("agent").join("prompts");
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(&path).map_err(|e| EngineError::Storage(e.to_string()))?;
    serde_yaml::from_str(&text).map_err(|e| EngineError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_json_string_parses() {
        let v = serde_json::json!({
            "assistant_id": "a1",
            "name": "Bot",
            "connector": "openai",
            "options": "{\"temperature\": 0.7}"
        });
        let raw: RawAssistant = serde_json::from_value(v).unwrap();
        let assistant = load_map(raw, None).unwrap();
        assert_eq!(assistant.options.get("temperature"), Some(&serde_json::json!(0.7)));
    }

    #[test]
    fn rejects_missing_connector() {
        let raw = RawAssistant {
            assistant_id: "a1".into(),
            name: "Bot".into(),
            connector: "".into(),
            ..Default::default()
        };
        assert!(load_map(raw, None).is_err());
    }

    #[test]
    fn asset_inlining_preserves_indentation() {
        let dir = std::env::temp_dir().join(format!("turnengine-asset-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("rules.txt"), "line one\nline two").unwrap();

        let content = "  intro\n  @assets/rules.txt\n  outro\n";
        let out = inline_assets(content, &dir).unwrap();
        assert!(out.contains("  line one\n  line two"));
        assert!(out.starts_with("  intro\n"));
        assert!(out.trim_end().ends_with("outro"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
