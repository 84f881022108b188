use serde_json::Value;

/// A successfully parsed `{function, arguments}` tool-call body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub function: String,
    pub arguments: Value,
}

/// Parse a tool-call body with tolerant repair (§4.7 steps 1-4):
/// strict parse → append one `}` → bracket-balancing repair pass → error.
pub fn parse_tool_body(raw: &str) -> Result<ParsedCall, String> {
    for candidate in [raw.to_string(), format!("{raw}}}"), balance_brackets(raw)] {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            if let Some(call) = to_call(&value) {
                return Ok(call);
            }
        }
    }
    Err(format!("Can not parse the tool call: unparsable JSON body --original-- {raw}"))
}

fn to_call(value: &Value) -> Option<ParsedCall> {
    let function = value.get("function")?.as_str()?.to_string();
    let arguments = value.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));
    Some(ParsedCall { function, arguments })
}

/// Append whatever closing brackets/braces/quotes are needed to balance
/// `raw`, tracking string/escape state so brackets inside string literals
/// are not counted, and stripping a single trailing comma before a closer.
fn balance_brackets(raw: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = raw.trim_end().trim_end_matches(',').to_string();
    if in_string {
        repaired.push('"');
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_succeeds() {
        let parsed = parse_tool_body(r#"{"function":"add","arguments":{"a":1,"b":2}}"#).unwrap();
        assert_eq!(parsed.function, "add");
        assert_eq!(parsed.arguments["a"], 1);
    }

    #[test]
    fn truncated_closing_brace_is_recovered() {
        let parsed = parse_tool_body(r#"{"function":"add","arguments":{"a":1}"#).unwrap();
        assert_eq!(parsed.function, "add");
    }

    #[test]
    fn unbalanced_nested_brackets_are_recovered() {
        let parsed = parse_tool_body(r#"{"function":"f","arguments":{"list":[1,2,3"#).unwrap();
        assert_eq!(parsed.function, "f");
        assert_eq!(parsed.arguments["list"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn trailing_comma_is_stripped() {
        let parsed = parse_tool_body(r#"{"function":"f","arguments":{"a":1,}"#).unwrap();
        assert_eq!(parsed.arguments["a"], 1);
    }

    #[test]
    fn unrecoverable_body_errors_with_original() {
        let err = parse_tool_body("not json at all").unwrap_err();
        assert!(err.contains("Can not parse the tool call"));
        assert!(err.contains("not json at all"));
    }
}
