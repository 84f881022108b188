use serde::{Deserialize, Serialize};

/// The fixed set of wire frame / aggregator entry kinds (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Text,
    Think,
    Tool,
    Error,
    Loading,
    Action,
    Image,
    File,
}

/// A single typed delta on the wire (§3 "Message frame (wire)").
///
/// Clients consume a stream of these over SSE; the server also aggregates
/// them into a `Contents` record whose final JSON is the stored assistant
/// message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageFrame {
    #[serde(rename = "type")]
    pub kind: Option<FrameType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageFrame {
    pub fn text_delta(id: &str, text: impl Into<String>) -> Self {
        Self {
            kind: Some(FrameType::Text),
            id: Some(id.to_string()),
            text: Some(text.into()),
            done: Some(false),
            ..Default::default()
        }
    }

    pub fn region(kind: FrameType, id: &str, text: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            id: Some(id.to_string()),
            text: Some(text.into()),
            done: Some(false),
            ..Default::default()
        }
    }

    pub fn tool_result(id: &str, function: &str, output: serde_json::Value, is_error: bool) -> Self {
        Self {
            kind: Some(FrameType::Tool),
            id: Some(id.to_string()),
            tool: Some(serde_json::json!({ "function": function, "output": output })),
            error: if is_error { Some("tool execution failed".to_string()) } else { None },
            done: Some(false),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self { done: Some(true), ..Default::default() }
    }

    pub fn done_with_text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), done: Some(true), ..Default::default() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: Some(FrameType::Error),
            error: Some(message.into()),
            done: Some(true),
            ..Default::default()
        }
    }
}

/// One entry in the `Contents` aggregate (§3 "Contents aggregator").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Data {
    #[serde(rename = "type")]
    pub kind: FrameType,
    pub id: Option<String>,
    /// Accumulated text content for this entry.
    pub bytes: String,
    pub function: Option<String>,
    /// Accumulated (possibly partial) JSON-argument text for a native tool
    /// call delta, before it is parsed (NewTool/AppendTool).
    pub arguments: Option<String>,
    pub props: Option<serde_json::Value>,
}

impl Data {
    fn text(id: String) -> Self {
        Self { kind: FrameType::Text, id: Some(id), bytes: String::new(), function: None, arguments: None, props: None }
    }
}

/// Ordered sequence of `Data` with a `current` cursor — always the last
/// entry once non-empty (§3 invariant).
#[derive(Debug, Clone, Default)]
pub struct Contents {
    pub data: Vec<Data>,
    state: RegionState,
    /// Unconsumed raw text, held back to detect tags split across deltas.
    pending: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum RegionState {
    #[default]
    Outside,
    Inside(&'static str),
}

const OPEN_THINK: &str = "<think>";
const OPEN_TOOL: &str = "<tool>";
const MAX_TAG_LEN: usize = 8; // len("</think>".."</tool>".."<think>") upper bound

impl Contents {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_mut(&mut self) -> Option<&mut Data> {
        self.data.last_mut()
    }

    /// Push a brand-new text entry and make it current (NewText).
    pub fn new_text(&mut self, text: &str) -> &Data {
        let id = uuid::Uuid::new_v4().to_string();
        let mut d = Data::text(id);
        d.bytes.push_str(text);
        self.data.push(d);
        self.data.last().unwrap()
    }

    /// Append to the current entry if it is text; otherwise start a new one
    /// (AppendText).
    pub fn append_text(&mut self, text: &str) -> &Data {
        let continues = matches!(self.data.last(), Some(d) if d.kind == FrameType::Text);
        if continues {
            self.current_mut().unwrap().bytes.push_str(text);
        } else {
            self.new_text(text);
        }
        self.data.last().unwrap()
    }

    /// Allocate a new tool-call entry from native function-calling deltas
    /// (NewTool).
    pub fn new_tool(&mut self, id: impl Into<String>, function: impl Into<String>) -> &Data {
        self.data.push(Data {
            kind: FrameType::Tool,
            id: Some(id.into()),
            bytes: String::new(),
            function: Some(function.into()),
            arguments: Some(String::new()),
            props: None,
        });
        self.data.last().unwrap()
    }

    /// Append an argument-delta fragment to the current tool entry
    /// (AppendTool). No-op if the current entry isn't a tool call.
    pub fn append_tool(&mut self, arguments_delta: &str) {
        if let Some(d) = self.current_mut() {
            if d.kind == FrameType::Tool {
                d.arguments.get_or_insert_with(String::new).push_str(arguments_delta);
            }
        }
    }

    /// Rewrite the current cursor's type and props (UpdateType) — used when
    /// a `<think>`/`<tool>` token region ends.
    pub fn update_type(&mut self, kind: FrameType, props: Option<serde_json::Value>) {
        if let Some(d) = self.current_mut() {
            d.kind = kind;
            d.props = props;
        }
    }

    /// Feed one raw text delta through the `<think>`/`<tool>` region scanner
    /// (ScanTokens), returning the wire frames this delta produces.
    ///
    /// Deltas inside an open region are accumulated into the region's `Data`
    /// silently (no frame emitted) until the closing tag is seen, at which
    /// point a single frame carrying the full inner text is emitted
    /// (matching `UpdateType`); plain text outside any region is streamed
    /// as individual text frames as it arrives.
    pub fn scan_tokens(&mut self, delta: &str) -> Vec<MessageFrame> {
        self.pending.push_str(delta);
        let mut frames = Vec::new();

        loop {
            match self.state {
                RegionState::Outside => {
                    let think_pos = self.pending.find(OPEN_THINK);
                    let tool_pos = self.pending.find(OPEN_TOOL);
                    let next = match (think_pos, tool_pos) {
                        (Some(t), Some(u)) => Some(if t <= u { (t, "think", OPEN_THINK) } else { (u, "tool", OPEN_TOOL) }),
                        (Some(t), None) => Some((t, "think", OPEN_THINK)),
                        (None, Some(u)) => Some((u, "tool", OPEN_TOOL)),
                        (None, None) => None,
                    };

                    match next {
                        Some((pos, name, tag)) => {
                            let before = self.pending[..pos].to_string();
                            if !before.is_empty() {
                                let d = self.append_text(&before);
                                frames.push(MessageFrame::text_delta(d.id.as_deref().unwrap_or_default(), before));
                            }
                            let id = uuid::Uuid::new_v4().to_string();
                            self.data.push(Data::text(id));
                            self.state = RegionState::Inside(name);
                            self.pending = self.pending[pos + tag.len()..].to_string();
                        }
                        None => {
                            // Hold back a tail that could be the prefix of an opening tag.
                            let keep = partial_tag_suffix_len(&self.pending, &[OPEN_THINK, OPEN_TOOL]);
                            let flush_len = self.pending.len() - keep;
                            if flush_len > 0 {
                                let flushed = self.pending[..flush_len].to_string();
                                let d = self.append_text(&flushed);
                                frames.push(MessageFrame::text_delta(d.id.as_deref().unwrap_or_default(), flushed));
                                self.pending = self.pending[flush_len..].to_string();
                            }
                            break;
                        }
                    }
                }
                RegionState::Inside(name) => {
                    let close_tag = format!("</{name}>");
                    match self.pending.find(&close_tag) {
                        Some(pos) => {
                            let inner = self.pending[..pos].to_string();
                            self.current_mut().unwrap().bytes.push_str(&inner);
                            let kind = if name == "think" { FrameType::Think } else { FrameType::Tool };
                            let full_text = self.current_mut().unwrap().bytes.clone();
                            self.update_type(kind, Some(serde_json::json!({ "text": full_text })));
                            let id = self.data.last().unwrap().id.clone().unwrap_or_default();
                            frames.push(MessageFrame::region(kind, &id, full_text));
                            self.pending = self.pending[pos + close_tag.len()..].to_string();
                            self.state = RegionState::Outside;
                        }
                        None => {
                            let keep = partial_tag_suffix_len(&self.pending, &[close_tag.as_str()]);
                            let flush_len = self.pending.len() - keep;
                            if flush_len > 0 {
                                let flushed = self.pending[..flush_len].to_string();
                                self.current_mut().unwrap().bytes.push_str(&flushed);
                                self.pending = self.pending[flush_len..].to_string();
                            }
                            break;
                        }
                    }
                }
            }
        }

        frames
    }

    /// Concatenation of every entry's final text, in order — the canonical
    /// stored-history representation.
    pub fn final_text(&self) -> String {
        self.data
            .iter()
            .map(|d| match d.kind {
                FrameType::Text | FrameType::Think | FrameType::Tool => d.bytes.clone(),
                _ => String::new(),
            })
            .collect()
    }

    /// Bodies of every `Tool` region the scanner found, in order — the raw
    /// text between `<tool>`/`</tool>` with the tags already stripped by
    /// `scan_tokens`, ready for `parse_tool_body` directly (the tags
    /// themselves are gone from `final_text`, so re-scanning for them there
    /// would never match).
    pub fn tool_bodies(&self) -> Vec<String> {
        self.data.iter().filter(|d| d.kind == FrameType::Tool).map(|d| d.bytes.clone()).collect()
    }

    /// Append an out-of-band frame (e.g. a hook's `Send(message, true)`) as
    /// a new entry, so it survives into `final_text`/stored history the
    /// same way scanned deltas do, instead of only ever reaching the live
    /// SSE sink.
    pub fn push_frame(&mut self, frame: &MessageFrame) {
        let Some(text) = frame.text.clone() else { return };
        let id = frame.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.data.push(Data {
            kind: frame.kind.unwrap_or(FrameType::Text),
            id: Some(id),
            bytes: text,
            function: None,
            arguments: None,
            props: frame.props.clone(),
        });
    }
}

/// Length of the longest suffix of `s` that is a strict prefix of any tag in
/// `tags` (bounded by `MAX_TAG_LEN`), i.e. text that must be held back
/// because it might still grow into a full tag with the next delta.
fn partial_tag_suffix_len(s: &str, tags: &[&str]) -> usize {
    let max_check = s.len().min(MAX_TAG_LEN);
    for n in (1..=max_check).rev() {
        let suffix = &s[s.len() - n..];
        if tags.iter().any(|t| t.starts_with(suffix) && suffix.len() < t.len()) {
            return n;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let mut c = Contents::new();
        let frames = c.scan_tokens("Hel");
        assert_eq!(frames.len(), 1);
        let frames2 = c.scan_tokens("lo.");
        assert_eq!(frames2.len(), 1);
        assert_eq!(c.final_text(), "Hello.");
    }

    #[test]
    fn think_region_is_suppressed_until_close() {
        let mut c = Contents::new();
        let f1 = c.scan_tokens("before <think>reasoning");
        // "before " emitted as text; region opened, no frame yet for partial reasoning
        assert_eq!(f1.len(), 1);
        assert_eq!(f1[0].text.as_deref(), Some("before "));

        let f2 = c.scan_tokens(" continues</think> after");
        // region closes: one think frame, then "after" text frame
        assert_eq!(f2.len(), 2);
        assert_eq!(f2[0].kind, Some(FrameType::Think));
        assert_eq!(f2[0].text.as_deref(), Some("reasoning continues"));
        assert_eq!(f2[1].text.as_deref(), Some(" after"));

        assert_eq!(c.final_text(), "before reasoning continues after");
    }

    #[test]
    fn tag_split_across_deltas_is_detected() {
        let mut c = Contents::new();
        let f1 = c.scan_tokens("hi <thi");
        assert_eq!(f1.len(), 1);
        assert_eq!(f1[0].text.as_deref(), Some("hi "));
        let f2 = c.scan_tokens("nk>x</think>");
        assert_eq!(f2.len(), 1);
        assert_eq!(f2[0].kind, Some(FrameType::Think));
        assert_eq!(f2[0].text.as_deref(), Some("x"));
    }

    #[test]
    fn second_opener_inside_region_is_literal() {
        let mut c = Contents::new();
        c.scan_tokens("<tool>a<think>b</tool>");
        assert_eq!(c.final_text(), "a<think>b");
        assert_eq!(c.data.last().unwrap().kind, FrameType::Tool);
    }

    #[test]
    fn new_tool_and_append_tool_accumulate_arguments() {
        let mut c = Contents::new();
        c.new_tool("id1", "add");
        c.append_tool("{\"a\":1,");
        c.append_tool("\"b\":2}");
        let d = c.data.last().unwrap();
        assert_eq!(d.arguments.as_deref(), Some("{\"a\":1,\"b\":2}"));
    }
}
