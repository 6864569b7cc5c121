//! URI scheme, path guard, and tag grammar (external interfaces, see
//! the top-level module docs for the scheme shape).

use crate::error::{EngineError, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use unicode_normalization::UnicodeNormalization;

pub const SCHEME: &str = "ctx";

const SENSITIVE_FIRST_SEGMENTS: &[&str] = &[".ssh", ".gnupg", ".aws", ".config", ".git", "node_modules"];

const ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'?').add(b'#').add(b'%');

/// Normalizes a collection name: NFC-fold, trim, lowercase.
pub fn normalize_collection(name: &str) -> String {
    name.trim().nfc().collect::<String>().to_lowercase()
}

/// Validates a relative path against the path guard in the external
/// interfaces section: non-absolute, no NUL, no backslashes, no `..`
/// segments after normalization, no leading `..` or `/`, and a first
/// segment that isn't a sensitive directory.
pub fn validate_rel_path(rel_path: &str) -> Result<()> {
    if rel_path.is_empty() {
        return Err(EngineError::invalid_path("relPath must not be empty"));
    }
    if rel_path.contains('\0') {
        return Err(EngineError::invalid_path("relPath contains a NUL byte"));
    }
    if rel_path.contains('\\') {
        return Err(EngineError::invalid_path("relPath contains a backslash"));
    }
    if rel_path.starts_with('/') {
        return Err(EngineError::invalid_path("relPath must not be absolute"));
    }
    let mut segments = rel_path.split('/').peekable();
    let first = segments.peek().copied().unwrap_or("");
    if first.is_empty() {
        return Err(EngineError::invalid_path("relPath has an empty first segment"));
    }
    if SENSITIVE_FIRST_SEGMENTS.contains(&first) {
        return Err(EngineError::invalid_path(format!(
            "relPath's first segment '{first}' is not allowed"
        )));
    }
    for seg in rel_path.split('/') {
        if seg.is_empty() {
            return Err(EngineError::invalid_path("relPath has an empty segment"));
        }
        if seg == ".." {
            return Err(EngineError::invalid_path("relPath contains a '..' segment"));
        }
    }
    Ok(())
}

/// Builds the canonical `scheme://collection/relPath` form. `collection`
/// must already be normalized; `relPath` must already pass the path
/// guard.
pub fn build_uri(collection: &str, rel_path: &str) -> String {
    let encoded_segments: Vec<String> = rel_path
        .split('/')
        .map(|seg| utf8_percent_encode(seg, ENCODE_SET).to_string())
        .collect();
    format!("{SCHEME}://{collection}/{}", encoded_segments.join("/"))
}

/// Parses a canonical URI back into `(collection, relPath)`, decoding
/// percent-encoding and re-validating the path guard.
pub fn parse_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .strip_prefix(&format!("{SCHEME}://"))
        .ok_or_else(|| EngineError::invalid_input(format!("uri has unrecognized scheme: {uri}")))?;
    let (collection, path_part) = rest
        .split_once('/')
        .ok_or_else(|| EngineError::invalid_input("uri is missing a relPath"))?;
    let decoded = percent_decode_str(path_part)
        .decode_utf8()
        .map_err(|e| EngineError::invalid_input(format!("uri relPath is not valid UTF-8: {e}")))?
        .into_owned();
    validate_rel_path(&decoded)?;
    Ok((collection.to_string(), decoded))
}

/// Validates the tag grammar: `/`-separated hierarchical segments, each
/// starting with a lowercase/caseless letter or digit, followed by
/// lowercase/caseless letters, digits, `-`, or `.`. No leading/trailing
/// `/`, no empty segments.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || tag.starts_with('/') || tag.ends_with('/') {
        return Err(EngineError::invalid_input(format!("tag '{tag}' has invalid slashes")));
    }
    for segment in tag.split('/') {
        if segment.is_empty() {
            return Err(EngineError::invalid_input(format!("tag '{tag}' has an empty segment")));
        }
        let mut chars = segment.chars();
        let first = chars.next().unwrap();
        if !(first.is_lowercase() || (first.is_alphabetic() && !first.is_uppercase()) || first.is_ascii_digit()) {
            return Err(EngineError::invalid_input(format!(
                "tag segment '{segment}' must start with a lowercase letter or digit"
            )));
        }
        for c in chars {
            let ok = c.is_lowercase()
                || (c.is_alphabetic() && !c.is_uppercase())
                || c.is_ascii_digit()
                || c == '-'
                || c == '.';
            if !ok {
                return Err(EngineError::invalid_input(format!(
                    "tag segment '{segment}' contains disallowed character '{c}'"
                )));
            }
        }
    }
    Ok(())
}

/// Normalizes a tag for matching: NFC-fold + lowercase + trim each
/// segment. `validate_tag(normalize_tag(t))` is idempotent for any
/// valid `t`.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim()
        .nfc()
        .collect::<String>()
        .to_lowercase()
        .split('/')
        .map(|s| s.trim())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_round_trips() {
        let collection = normalize_collection("Notes");
        let rel = "sub/hello world.md";
        validate_rel_path(rel).unwrap();
        let uri = build_uri(&collection, rel);
        let (c, p) = parse_uri(&uri).unwrap();
        assert_eq!(c, collection);
        assert_eq!(p, rel);
    }

    #[test]
    fn rejects_dotdot_after_normalization() {
        assert!(validate_rel_path("../evil.md").is_err());
        assert!(validate_rel_path("a/../../evil.md").is_err());
    }

    #[test]
    fn rejects_sensitive_first_segment() {
        assert!(validate_rel_path(".ssh/id").is_err());
        assert!(validate_rel_path(".git/config").is_err());
    }

    #[test]
    fn rejects_absolute_and_nul_and_backslash() {
        assert!(validate_rel_path("/etc/passwd").is_err());
        assert!(validate_rel_path("a\0b").is_err());
        assert!(validate_rel_path("a\\b").is_err());
    }

    #[test]
    fn tag_grammar_accepts_hierarchy() {
        validate_tag("project/rust-lang").unwrap();
        validate_tag("a.b").unwrap();
        assert!(validate_tag("/leading").is_err());
        assert!(validate_tag("trailing/").is_err());
        assert!(validate_tag("Uppercase").is_err());
        assert!(validate_tag("a//b").is_err());
    }

    #[test]
    fn normalize_tag_is_idempotent() {
        let t = "  Project/Rust-Lang  ";
        let normalized = normalize_tag(t);
        validate_tag(&normalized).unwrap();
        assert_eq!(normalize_tag(&normalized), normalized);
    }
}
