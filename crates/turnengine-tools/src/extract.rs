/// Locate every `<tool>…</tool>` region in a completed content buffer
/// (§4.7). Matching is innermost: a `<tool>` is paired with the *next*
/// `</tool>`, so `<tool>a<tool>b</tool>` yields one block with body
/// `"a<tool>b"` rather than attempting to nest.
pub fn extract_tool_blocks(content: &str) -> Vec<String> {
    const OPEN: &str = "<tool>";
    const CLOSE: &str = "</tool>";
    let mut blocks = Vec::new();
    let mut rest = content;

    while let Some(open_pos) = rest.find(OPEN) {
        let after_open = &rest[open_pos + OPEN.len()..];
        let Some(close_pos) = after_open.find(CLOSE) else { break };
        blocks.push(after_open[..close_pos].trim().to_string());
        rest = &after_open[close_pos + CLOSE.len()..];
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_block() {
        let content = "before <tool>{\"function\":\"f\",\"arguments\":{}}</tool> after";
        let blocks = extract_tool_blocks(content);
        assert_eq!(blocks, vec!["{\"function\":\"f\",\"arguments\":{}}"]);
    }

    #[test]
    fn extracts_multiple_blocks_in_order() {
        let content = "<tool>one</tool> mid <tool>two</tool>";
        let blocks = extract_tool_blocks(content);
        assert_eq!(blocks, vec!["one", "two"]);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let content = "<tool>\n  {\"a\":1}  \n</tool>";
        let blocks = extract_tool_blocks(content);
        assert_eq!(blocks, vec!["{\"a\":1}"]);
    }

    #[test]
    fn unterminated_block_is_ignored() {
        let content = "<tool>{\"a\":1}";
        assert!(extract_tool_blocks(content).is_empty());
    }
}
