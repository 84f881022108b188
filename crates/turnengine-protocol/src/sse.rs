use crate::frame::MessageFrame;

/// Encode one `MessageFrame` as a single SSE `data:` event (§6).
///
/// Mirrors the flat `data: <json>\n\n` framing the gateway's other
/// streaming endpoints use; no `event:` line is sent since the frame's own
/// `type` field disambiguates it client-side.
pub fn encode(frame: &MessageFrame) -> String {
    let body = serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string());
    format!("data: {body}\n\n")
}

/// A thin sink abstraction over "somewhere frames go" — the orchestrator's
/// `FrameSink` (§9 design note) centralizes every SSE write behind this
/// trait so that silent delegated turns can swap in a no-op implementation
/// without touching the turn state machine.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: MessageFrame);
}

/// Forwards frames over a `tokio::sync::mpsc` channel — used by the
/// gateway's HTTP handler to bridge the orchestrator onto an axum SSE
/// stream.
pub struct ChannelSink(pub tokio::sync::mpsc::UnboundedSender<MessageFrame>);

impl FrameSink for ChannelSink {
    fn send(&self, frame: MessageFrame) {
        // Receiver gone (client disconnected) is not an error for the sender.
        let _ = self.0.send(frame);
    }
}

/// Drops every frame — used for silent delegated sub-calls (C9), which
/// still aggregate into `Contents`/history but never reach the caller's
/// SSE stream.
pub struct NullSink;

impl FrameSink for NullSink {
    fn send(&self, _frame: MessageFrame) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;

    #[test]
    fn encodes_as_single_data_line() {
        let f = MessageFrame::text_delta("id1", "hi");
        let out = encode(&f);
        assert!(out.starts_with("data: "));
        assert!(out.ends_with("\n\n"));
        let body = out.trim_start_matches("data: ").trim_end();
        let parsed: MessageFrame = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.kind, Some(FrameType::Text));
        assert_eq!(parsed.text.as_deref(), Some("hi"));
    }
}
