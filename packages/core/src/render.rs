//! Human-readable rendering of contract call results.
//!
//! Payloads are opaque bytes on the wire. Most asset contracts return JSON
//! records or arrays, which are re-indented for display:
//!
//! ```text
//! {"ID":"asset13","Color":"yellow","Size":5}
//! ```
//!
//! becomes
//!
//! ```text
//! {
//!   "ID": "asset13",
//!   "Color": "yellow",
//!   "Size": 5
//! }
//! ```
//!
//! Anything that does not parse is shown as-is, and the parse failure is
//! returned alongside so the caller can log it. Rendering never fails.

use serde::de::IgnoredAny;
use serde::Deserialize;
use thiserror::Error;

/// Why a payload could not be pretty-printed. Never fatal.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("unable to pretty print result - parse error: {0}")]
pub struct PresentationError(pub String);

/// A rendered payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    /// Text to show the user.
    pub text: String,
    /// Set when the payload was not structured data and `text` is the raw
    /// payload.
    pub diagnostic: Option<PresentationError>,
}

impl Presentation {
    /// `true` when the payload was decoded and re-indented.
    pub fn is_structured(&self) -> bool {
        self.diagnostic.is_none()
    }
}

/// Render `raw` for display.
///
/// The payload is checked with `serde_json` and then re-indented token by
/// token: keys, strings and numbers are copied byte for byte, so key order,
/// duplicate keys and numbers of any size come out exactly as received. Only
/// a zero-length payload renders as empty text with no diagnostic, since
/// transactions such as `InitLedger` return nothing.
pub fn present(raw: &[u8]) -> Presentation {
    if raw.is_empty() {
        return Presentation {
            text: String::new(),
            diagnostic: None,
        };
    }

    match validate(raw) {
        Ok(text) => Presentation {
            text: reindent(text),
            diagnostic: None,
        },
        Err(reason) => Presentation {
            text: String::from_utf8_lossy(raw).into_owned(),
            diagnostic: Some(PresentationError(reason)),
        },
    }
}

/// Check that `raw` is exactly one JSON value and return it as text.
fn validate(raw: &[u8]) -> Result<&str, String> {
    let mut de = serde_json::Deserializer::from_slice(raw);
    IgnoredAny::deserialize(&mut de).map_err(|e| e.to_string())?;
    de.end().map_err(|e| e.to_string())?;
    std::str::from_utf8(raw).map_err(|e| e.to_string())
}

/// Two-space indentation of already-valid JSON text.
///
/// Whitespace between tokens is dropped and re-emitted; everything inside a
/// string literal is kept verbatim. Empty objects and arrays stay `{}`/`[]`.
fn reindent(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            ' ' | '\t' | '\n' | '\r' => {}
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' | '[' => {
                out.push(c);
                while chars.next_if(|n| n.is_ascii_whitespace()).is_some() {}
                if let Some(close) = chars.next_if(|&n| n == '}' || n == ']') {
                    out.push(close);
                } else {
                    depth += 1;
                    newline(&mut out, depth);
                }
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                newline(&mut out, depth);
                out.push(c);
            }
            ',' => {
                out.push(c);
                newline(&mut out, depth);
            }
            ':' => out.push_str(": "),
            _ => out.push(c),
        }
    }
    out
}

fn newline(out: &mut String, depth: usize) {
    out.push('\n');
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const ASSET: &str =
        r#"{"ID":"asset13","Color":"yellow","Size":5,"Owner":"Tom","AppraisedValue":1300}"#;

    #[test]
    fn indents_records() {
        let p = present(ASSET.as_bytes());
        assert!(p.is_structured());
        assert!(p.text.starts_with("{\n  \"ID\": \"asset13\",\n  \"Color\""));
    }

    #[test]
    fn keeps_key_order() {
        let p = present(ASSET.as_bytes());
        let id = p.text.find("\"ID\"").unwrap();
        let value = p.text.find("\"AppraisedValue\"").unwrap();
        assert!(id < value);
    }

    #[test]
    fn re_presenting_is_stable() {
        let once = present(ASSET.as_bytes());
        let twice = present(once.text.as_bytes());
        assert_eq!(once.text, twice.text);

        let a: Value = serde_json::from_str(ASSET).unwrap();
        let b: Value = serde_json::from_str(&twice.text).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn arrays_and_scalars_are_structured() {
        assert!(present(br#"[{"ID":"asset1"},{"ID":"asset2"}]"#).is_structured());
        let p = present(b"true");
        assert_eq!(p.text, "true");
        assert!(p.is_structured());
    }

    #[test]
    fn malformed_input_is_returned_verbatim() {
        let raw = "asset13 {broken";
        let p = present(raw.as_bytes());
        assert_eq!(p.text, raw);
        assert!(p.diagnostic.is_some());
        assert!(p.diagnostic.unwrap().to_string().contains("parse error"));
    }

    #[test]
    fn empty_payload_is_not_an_error() {
        let p = present(b"");
        assert_eq!(p.text, "");
        assert!(p.is_structured());
    }

    #[test]
    fn whitespace_payload_is_shown_raw() {
        let p = present(b"  \n");
        assert_eq!(p.text, "  \n");
        assert!(p.diagnostic.is_some());
    }

    #[test]
    fn big_integers_keep_every_digit() {
        let p = present(br#"{"AppraisedValue":123456789012345678901234567890}"#);
        assert!(p.is_structured());
        assert_eq!(p.text, "{\n  \"AppraisedValue\": 123456789012345678901234567890\n}");
    }

    #[test]
    fn duplicate_keys_are_all_kept() {
        let p = present(br#"{"ID":"asset1","ID":"asset2"}"#);
        assert!(p.is_structured());
        assert_eq!(p.text, "{\n  \"ID\": \"asset1\",\n  \"ID\": \"asset2\"\n}");
    }

    #[test]
    fn nested_and_empty_containers() {
        let p = present(br#"{"a":[],"b":{ },"c":[1,{"d":null}]}"#);
        assert_eq!(
            p.text,
            "{\n  \"a\": [],\n  \"b\": {},\n  \"c\": [\n    1,\n    {\n      \"d\": null\n    }\n  ]\n}"
        );
    }

    #[test]
    fn string_contents_are_untouched() {
        let p = present(br#"{"Owner":"Tom, \"the\" {owner}: [x]\\"}"#);
        assert_eq!(p.text, "{\n  \"Owner\": \"Tom, \\\"the\\\" {owner}: [x]\\\\\"\n}");
    }

    #[test]
    fn trailing_garbage_is_a_parse_error() {
        let p = present(br#"{"ID":"asset1"} extra"#);
        assert_eq!(p.text, r#"{"ID":"asset1"} extra"#);
        assert!(p.diagnostic.is_some());
    }
}
