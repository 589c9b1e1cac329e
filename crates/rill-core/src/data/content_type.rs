//! Content types: compatibility, merging, encoding and decoding.
//!
//! A content type is a short string such as `json`, `text:utf-8` or
//! `cloudpickle`. Families with a payload (`text:<encoding>`,
//! `mime:<type>`) are refinements of their bare prefix.

use crate::error::{Error, Result};

use super::value::{Value, decode_native, encode_native};

/// Native codec, older name.
pub const PICKLE: &str = "pickle";
/// Native codec. Wins when merged with [`PICKLE`].
pub const CLOUDPICKLE: &str = "cloudpickle";
pub const JSON: &str = "json";
pub const TEXT: &str = "text";
/// Content type given to auto-encoded strings.
pub const TEXT_UTF8: &str = "text:utf-8";
pub const DIRECTORY: &str = "dir";

/// Content types without a payload.
const SIMPLE_TYPES: &[&str] = &[
    PICKLE,
    CLOUDPICKLE,
    JSON,
    TEXT,
    "mime",
    "cbor",
    "arrow",
    "protobuf",
    DIRECTORY,
];

/// Families that accept a `:<payload>` suffix.
const PARAMETRIC_TYPES: &[&str] = &[TEXT, "mime"];

/// Whether `content_type` is a recognized content type.
pub fn is_known(content_type: &str) -> bool {
    match content_type.split_once(':') {
        Some((family, payload)) => !payload.is_empty() && PARAMETRIC_TYPES.contains(&family),
        None => SIMPLE_TYPES.contains(&content_type),
    }
}

/// Whether `specific` refines `general` (`text:utf-8` refines `text`).
fn refines(specific: &str, general: &str) -> bool {
    specific
        .strip_prefix(general)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Merge two content types describing the same data.
///
/// `None` defers to the other side, equal types merge to themselves,
/// `pickle` and `cloudpickle` merge to `cloudpickle`, and a refinement wins
/// over its prefix. Anything else is a [`Error::ContentTypeMismatch`].
pub fn merge(left: Option<&str>, right: Option<&str>) -> Result<Option<String>> {
    let (left, right) = match (left, right) {
        (None, other) | (other, None) => return Ok(other.map(str::to_string)),
        (Some(left), Some(right)) => (left, right),
    };

    if left == right {
        return Ok(Some(left.to_string()));
    }
    if (left == PICKLE && right == CLOUDPICKLE) || (left == CLOUDPICKLE && right == PICKLE) {
        return Ok(Some(CLOUDPICKLE.to_string()));
    }
    if refines(left, right) {
        return Ok(Some(left.to_string()));
    }
    if refines(right, left) {
        return Ok(Some(right.to_string()));
    }

    Err(Error::ContentTypeMismatch {
        left: left.to_string(),
        right: right.to_string(),
    })
}

/// Text encoding named by a `text` content type, if this executor supports it.
fn text_encoding(content_type: &str) -> Option<&str> {
    match content_type {
        TEXT => Some("utf-8"),
        _ => content_type
            .strip_prefix("text:")
            .filter(|enc| enc.eq_ignore_ascii_case("utf-8") || enc.eq_ignore_ascii_case("utf8")),
    }
}

/// Decode raw bytes according to `content_type`.
pub fn decode(bytes: &[u8], content_type: Option<&str>) -> Result<Value> {
    let content_type = content_type.ok_or_else(|| {
        Error::UnsupportedContentType("object has no content type and cannot be loaded".to_string())
    })?;

    match content_type {
        PICKLE | CLOUDPICKLE => decode_native(bytes),
        JSON => serde_json::from_slice(bytes)
            .map(Value::from_json)
            .map_err(|e| Error::Deserialization(format!("invalid JSON: {}", e))),
        ct if text_encoding(ct).is_some() => String::from_utf8(bytes.to_vec())
            .map(Value::Str)
            .map_err(|e| Error::Deserialization(format!("invalid UTF-8 text: {}", e))),
        other => Err(Error::UnsupportedContentType(format!(
            "content type {:?} cannot be loaded by this executor",
            other
        ))),
    }
}

/// Encode a value into bytes of the given content type.
pub fn encode(value: &Value, content_type: &str) -> Result<Vec<u8>> {
    match content_type {
        PICKLE | CLOUDPICKLE => encode_native(value),
        JSON => {
            let json = value.to_json()?;
            serde_json::to_vec(&json)
                .map_err(|e| Error::Serialization(format!("failed to write JSON: {}", e)))
        }
        ct if text_encoding(ct).is_some() => match value {
            Value::Str(s) => Ok(s.as_bytes().to_vec()),
            other => Err(Error::OutputType(format!(
                "content type {:?} needs a str value, got {}",
                ct,
                other.type_name()
            ))),
        },
        other => Err(Error::UnsupportedContentType(format!(
            "content type {:?} cannot be produced by this executor",
            other
        ))),
    }
}
