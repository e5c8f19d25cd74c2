//! Decoding LLM replies into typed, validated values.
//!
//! Models wrap JSON in prose or code fences, and sometimes emit raw newlines
//! inside string values. [`decode`] cuts the outermost object or array out of
//! the reply, parses it with `serde_json`, and runs the type's own
//! [`Schema::check`]. Anything that fails is a [`DecodeError`]; nothing is
//! passed through as raw text.

use serde::de::DeserializeOwned;

use crate::utils::looks_truncated;

/// Top-level JSON shape a schema expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

/// A typed LLM output contract.
pub trait Schema: DeserializeOwned {
    /// Name used in errors and logs (usually the artifact name).
    const NAME: &'static str;
    const SHAPE: JsonShape;

    /// Validate and normalize after parsing.
    fn check(&mut self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no JSON {0:?} found in reply")]
    NotFound(JsonShape),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

impl DecodeError {
    /// The reply looks cut off mid-document (worth asking again).
    pub fn is_truncated(&self) -> bool {
        match self {
            Self::Json(e) => looks_truncated(e),
            _ => false,
        }
    }
}

/// Slice the outermost `{...}` out of `text`.
///
/// An opening brace with no closing brace returns the tail so the parser can
/// report EOF, which is how truncation is detected.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_between(text, '{', '}')
}

/// Slice the outermost `[...]` out of `text`.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_between(text, '[', ']')
}

fn extract_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    match text.rfind(close) {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

/// Replace raw line breaks with spaces; used when a model breaks a string
/// value across lines.
pub fn flatten_newlines(json: &str) -> String {
    json.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Decode a reply into `T`.
pub fn decode<T: Schema>(reply: &str) -> Result<T, DecodeError> {
    let slice = match T::SHAPE {
        JsonShape::Object => extract_json_object(reply),
        JsonShape::Array => extract_json_array(reply),
    }
    .ok_or(DecodeError::NotFound(T::SHAPE))?;

    let mut value: T = match serde_json::from_str(slice) {
        Ok(v) => v,
        Err(e) if looks_truncated(&e) => return Err(e.into()),
        Err(e) => serde_json::from_str(&flatten_newlines(slice)).map_err(|_| e)?,
    };
    value.check().map_err(DecodeError::Invalid)?;
    Ok(value)
}

/// Pull the first fenced ```json block out of a Markdown artifact.
pub fn fenced_json(markdown: &str) -> Option<&str> {
    let start = markdown.find("```json")? + "```json".len();
    let rest = &markdown[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Tags {
        tags: Vec<String>,
    }

    impl Schema for Tags {
        const NAME: &'static str = "tags";
        const SHAPE: JsonShape = JsonShape::Object;

        fn check(&mut self) -> Result<(), String> {
            if self.tags.is_empty() {
                return Err("no tags".into());
            }
            Ok(())
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(transparent)]
    struct Titles(Vec<String>);

    impl Schema for Titles {
        const NAME: &'static str = "titles";
        const SHAPE: JsonShape = JsonShape::Array;
    }

    #[test]
    fn extracts_object_from_prose_and_fences() {
        let reply = "Sure! Here you go:\n```json\n{\"tags\": [\"ai\"]}\n```\nThanks";
        let tags: Tags = decode(reply).unwrap();
        assert_eq!(tags.tags, vec!["ai"]);
    }

    #[test]
    fn raw_newlines_inside_strings_are_repaired() {
        let reply = "[\"first\ntitle\", \"second\"]";
        let titles: Titles = decode(reply).unwrap();
        assert_eq!(titles.0, vec!["first title", "second"]);
    }

    #[test]
    fn missing_json_is_not_found() {
        let err = decode::<Tags>("nothing useful").unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(JsonShape::Object)));
        assert!(!err.is_truncated());
    }

    #[test]
    fn cut_off_reply_is_truncated() {
        let err = decode::<Tags>("{\"tags\": [\"ai\", ").unwrap_err();
        assert!(err.is_truncated());
    }

    #[test]
    fn check_failures_are_invalid() {
        let err = decode::<Tags>("{\"tags\": []}").unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(ref m) if m == "no tags"));
    }

    #[test]
    fn fenced_json_reads_first_block() {
        let md = "# Plan\n\n## PART 1\n\n```json\n{\"a\": 1}\n```\n\n```json\n{\"b\": 2}\n```";
        assert_eq!(fenced_json(md), Some("{\"a\": 1}"));
        assert_eq!(fenced_json("no block"), None);
    }
}
