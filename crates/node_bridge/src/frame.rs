//! Wire frame codec.
//!
//! Frames look like `<[JS(42)[content]]>`. Content is not escaped, so a
//! candidate frame is bounded by the first `<[` and the first `]>` after it,
//! then validated structurally; candidates that fail validation are dropped
//! silently, since they may just as well be truncated input awaiting more
//! bytes.

use std::sync::LazyLock;

use regex::Regex;

/// Opening delimiter of a frame.
pub(crate) const OPEN: &str = "<[";
/// Closing delimiter scanned for when bounding a candidate.
pub(crate) const CLOSE: &str = "]>";
/// Full terminator of a well-formed frame (content close plus frame close).
pub(crate) const END: &str = "]]>";
/// Kind tag for script evaluation, the only kind the protocol defines.
pub(crate) const SCRIPT_KIND: &str = "JS";

static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<\[(\w*)\((\d*)\)\[(.*)\]\]>$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) kind: String,
    pub(crate) id: u64,
    pub(crate) content: String,
}

/// Renders a frame for the wire. The result is newline-free as long as
/// `content` is; the caller appends the line terminator.
pub(crate) fn encode(kind: &str, id: u64, content: &str) -> String {
    format!("{OPEN}{kind}({id})[{content}]{CLOSE}")
}

/// Structurally validates a complete candidate and splits it into its parts.
pub(crate) fn parse(candidate: &str) -> Option<Frame> {
    let caps = FRAME_RE.captures(candidate)?;
    let id = caps[2].parse().ok()?;

    Some(Frame {
        kind: caps[1].to_string(),
        id,
        content: caps[3].to_string(),
    })
}

/// Extracts the first complete frame from `buffer`, consuming exactly the
/// frame substring and leaving surrounding text in place for console routing.
///
/// A delimited candidate that fails structural validation is consumed and
/// dropped, and scanning resumes after it. Returns `None` once no complete
/// candidate remains in the buffer.
pub(crate) fn extract(buffer: &mut String) -> Option<Frame> {
    loop {
        let start = buffer.find(OPEN)?;
        let close = buffer[start..].find(CLOSE)?;
        let end = start + close + CLOSE.len();

        let frame = parse(&buffer[start..end]);
        buffer.replace_range(start..end, "");

        match frame {
            Some(frame) => return Some(frame),
            None => log::debug!("dropping malformed frame candidate ({} bytes)", end - start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_renders_the_wire_form() {
        assert_eq!(encode(SCRIPT_KIND, 7, "1 + 1;"), "<[JS(7)[1 + 1;]]>");
    }

    #[test]
    fn parse_accepts_a_well_formed_frame() {
        let frame = parse("<[JS(12)[{\"a\":1}]]>").unwrap();
        assert_eq!(frame.kind, "JS");
        assert_eq!(frame.id, 12);
        assert_eq!(frame.content, "{\"a\":1}");
    }

    #[test]
    fn parse_handles_content_with_nested_brackets() {
        let frame = parse("<[JS(3)[[1,[2]]]]>").unwrap();
        assert_eq!(frame.content, "[1,[2]]");
    }

    #[test]
    fn parse_rejects_structural_garbage() {
        assert!(parse("<[JS(1)[truncated]>").is_none());
        assert!(parse("<[JS(x)[bad id]]>").is_none());
        assert!(parse("console noise").is_none());
    }

    #[test]
    fn parse_allows_an_empty_kind_tag() {
        assert!(parse("<[(1)[no kind]]>").is_some());
    }

    #[test]
    fn extract_round_trips_with_surrounding_console_text() {
        let mut buffer = format!("some log line {} trailing text", encode("JS", 99, "402"));

        let frame = extract(&mut buffer).unwrap();
        assert_eq!(frame.id, 99);
        assert_eq!(frame.content, "402");
        assert_eq!(buffer, "some log line  trailing text");
    }

    #[test]
    fn extract_skips_a_malformed_candidate_and_keeps_scanning() {
        let mut buffer = "<[bad]> <[JS(7)[true]]>".to_string();

        let frame = extract(&mut buffer).unwrap();
        assert_eq!(frame.id, 7);
        assert_eq!(frame.content, "true");
        assert!(extract(&mut buffer).is_none());
    }

    #[test]
    fn extract_leaves_incomplete_input_untouched() {
        let mut buffer = "<[JS(1)[not finis".to_string();
        assert!(extract(&mut buffer).is_none());
        assert_eq!(buffer, "<[JS(1)[not finis");
    }
}
