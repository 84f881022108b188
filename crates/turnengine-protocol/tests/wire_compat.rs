//! Wire-shape regression tests for `MessageFrame` (§3, §6): field names and
//! omission rules a client depends on, kept separate from the scanner unit
//! tests so a change here is a deliberate wire-compat decision.

use turnengine_protocol::{FrameType, MessageFrame};

#[test]
fn text_delta_field_names_and_omissions() {
    let frame = MessageFrame::text_delta("id1", "hello");
    let json = serde_json::to_value(&frame).unwrap();

    assert_eq!(json["type"], "text");
    assert_eq!(json["id"], "id1");
    assert_eq!(json["text"], "hello");
    assert_eq!(json["done"], false);
    assert!(json.get("role").is_none(), "absent fields must be omitted, not null");
    assert!(json.get("error").is_none());
    assert!(json.get("tool").is_none());
}

#[test]
fn done_frame_has_no_type_or_text() {
    let frame = MessageFrame::done();
    let json = serde_json::to_value(&frame).unwrap();

    assert_eq!(json["done"], true);
    assert!(json.get("type").is_none());
    assert!(json.get("text").is_none());
}

#[test]
fn error_frame_shape() {
    let frame = MessageFrame::error("boom");
    let json = serde_json::to_value(&frame).unwrap();

    assert_eq!(json["type"], "error");
    assert_eq!(json["error"], "boom");
    assert_eq!(json["done"], true);
}

#[test]
fn tool_result_embeds_function_and_output_under_tool() {
    let frame = MessageFrame::tool_result("t1", "add", serde_json::json!({"sum": 3}), false);
    let json = serde_json::to_value(&frame).unwrap();

    assert_eq!(json["type"], "tool");
    assert_eq!(json["tool"]["function"], "add");
    assert_eq!(json["tool"]["output"]["sum"], 3);
    assert!(json.get("error").is_none());
}

#[test]
fn frame_type_serializes_lowercase() {
    let json = serde_json::to_value(FrameType::Think).unwrap();
    assert_eq!(json, "think");
}

#[test]
fn round_trips_through_json() {
    let frame = MessageFrame::region(FrameType::Action, "a1", "clicked");
    let encoded = serde_json::to_string(&frame).unwrap();
    let decoded: MessageFrame = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.id.as_deref(), Some("a1"));
    assert_eq!(decoded.kind, Some(FrameType::Action));
}
