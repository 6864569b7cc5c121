//! Parsing, normalization, and resolution of outgoing document links.
//!
//! Two kinds are recognized in canonical Markdown: wiki links
//! (`[[target]]`, `[[target|alias]]`, `[[collection:target]]`) and
//! Markdown inline links (`[text](url)`, excluding image links). Both
//! kinds skip any match that falls inside an excluded range: fenced
//! code blocks, inline code spans, frontmatter, or HTML comments.

use crate::models::{DocLink, LinkType};
use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Normalizes a wiki target or a basename for resolution matching:
/// NFC-fold, lowercase, trim. `validateTag`-style grammar is not
/// enforced here — link targets are free text, only matching is
/// normalized.
pub fn normalize_link_target(target: &str) -> String {
    target.trim().nfc().collect::<String>().to_lowercase()
}

fn wiki_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]\|#]+)(?:\|([^\[\]#]*))?(?:#([^\[\]]*))?\]\]").unwrap())
}

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(!)?\[([^\[\]]*)\]\(([^()\s]+)(?:\s+\"[^\"]*\")?\)").unwrap())
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?ms)^(```|~~~).*?^\1").unwrap())
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`\n]+`").unwrap())
}

fn html_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap())
}

fn frontmatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\A(---|\+\+\+)\n.*?\n\1\n?").unwrap())
}

fn excluded_ranges(text: &str) -> Vec<Span> {
    let mut ranges = Vec::new();
    for m in frontmatter_re().find_iter(text) {
        ranges.push(Span { start: m.start(), end: m.end() });
    }
    for m in fence_re().find_iter(text) {
        ranges.push(Span { start: m.start(), end: m.end() });
    }
    for m in html_comment_re().find_iter(text) {
        ranges.push(Span { start: m.start(), end: m.end() });
    }
    for m in inline_code_re().find_iter(text) {
        let inside_fence = ranges.iter().any(|r| r.start <= m.start() && m.end() <= r.end());
        if !inside_fence {
            ranges.push(Span { start: m.start(), end: m.end() });
        }
    }
    ranges
}

fn in_excluded(ranges: &[Span], start: usize, end: usize) -> bool {
    ranges.iter().any(|r| start < r.end && end > r.start)
}

/// Converts a byte offset to 1-based (line, col).
fn line_col(text: &str, byte_offset: usize) -> (i64, i64) {
    let mut line = 1i64;
    let mut last_newline = None;
    for (i, c) in text.char_indices() {
        if i >= byte_offset {
            break;
        }
        if c == '\n' {
            line += 1;
            last_newline = Some(i);
        }
    }
    let col = match last_newline {
        Some(nl) => (byte_offset - nl) as i64,
        None => byte_offset as i64 + 1,
    };
    (line, col)
}

const EXTERNAL_SCHEMES: &[&str] = &["http:", "https:", "mailto:", "tel:", "ftp:"];

enum UrlResolution {
    External,
    Rejected,
    Internal(String),
}

/// Applies the Markdown-link URL handling rules: external schemes and
/// protocol-relative URLs are not stored; backslashes reject; safe
/// percent-codes decode, unsafe ones are kept verbatim (and so will
/// never resolve — preserved intentionally, not "corrected"); the
/// remaining path is resolved POSIX-relative to `source_rel_path` and
/// rejected if it escapes the root.
fn resolve_markdown_url(url: &str, source_rel_path: &str) -> UrlResolution {
    if url.starts_with("//") {
        return UrlResolution::External;
    }
    if EXTERNAL_SCHEMES.iter().any(|s| url.to_lowercase().starts_with(s)) {
        return UrlResolution::External;
    }
    if url.contains('\\') {
        return UrlResolution::Rejected;
    }

    let (path_part, _anchor) = url.split_once('#').unwrap_or((url, ""));
    let decoded = decode_percent_preserving_unsafe(path_part);

    let base_dir = std::path::Path::new(source_rel_path).parent().unwrap_or_else(|| std::path::Path::new(""));
    let joined = base_dir.join(&decoded);
    let normalized = normalize_posix_path(&joined.to_string_lossy());

    match normalized {
        Some(p) => UrlResolution::Internal(p),
        None => UrlResolution::Rejected,
    }
}

/// Decodes `%20`, `%28`, `%29`; leaves `%2F`, `%5C`, `%00` (and any
/// other code that decodes to `/`, `\`, or NUL) verbatim. Decoding
/// happens over raw bytes and the whole buffer is re-assembled as UTF-8
/// once at the end, so a multi-byte character split across consecutive
/// percent-codes (or left as raw UTF-8 bytes in the input) comes back
/// out intact instead of one mangled codepoint per byte.
fn decode_percent_preserving_unsafe(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    if byte == b'/' || byte == b'\\' || byte == 0 {
                        out.extend_from_slice(&bytes[i..i + 3]);
                    } else {
                        out.push(byte);
                    }
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Resolves `.`/`..` segments; returns `None` if the result would
/// escape the root (a leading `..` or become absolute).
fn normalize_posix_path(path: &str) -> Option<String> {
    if path.starts_with('/') {
        return None;
    }
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return None;
                }
            }
            s => stack.push(s),
        }
    }
    Some(stack.join("/"))
}

/// Parses every outgoing link in `canonical_markdown`, sourced against
/// `source_docid` and positioned relative to `original_source` (the
/// pre-canonicalization text, per the spec's position contract).
pub fn parse_links(
    source_docid: &str,
    original_source: &str,
    source_rel_path: &str,
    default_collection: &str,
) -> Vec<DocLink> {
    let ranges = excluded_ranges(original_source);
    let mut links = Vec::new();

    for cap in wiki_re().captures_iter(original_source) {
        let m = cap.get(0).unwrap();
        if in_excluded(&ranges, m.start(), m.end()) {
            continue;
        }
        let raw_target = cap.get(1).map(|g| g.as_str().trim()).unwrap_or("");
        let alias = cap.get(2).map(|g| g.as_str().trim().to_string()).filter(|s| !s.is_empty());
        let anchor = cap.get(3).map(|g| g.as_str().trim().to_string()).filter(|s| !s.is_empty());

        let (target_collection, target_ref) = match raw_target.split_once(':') {
            Some((c, t)) => (Some(normalize_link_target(c)), t.trim().to_string()),
            None => (None, raw_target.to_string()),
        };

        let (start_line, start_col) = line_col(original_source, m.start());
        let (end_line, end_col) = line_col(original_source, m.end());

        links.push(DocLink {
            source_docid: source_docid.to_string(),
            link_type: LinkType::Wiki,
            target_ref: target_ref.clone(),
            target_ref_norm: normalize_link_target(&target_ref),
            target_collection,
            target_anchor: anchor,
            link_text: alias,
            start_line,
            start_col,
            end_line,
            end_col,
        });
    }

    for cap in markdown_link_re().captures_iter(original_source) {
        let m = cap.get(0).unwrap();
        if cap.get(1).is_some() {
            continue; // image link: `![alt](...)`
        }
        if in_excluded(&ranges, m.start(), m.end()) {
            continue;
        }
        let text = cap.get(2).map(|g| g.as_str().to_string()).filter(|s| !s.is_empty());
        let url = cap.get(3).map(|g| g.as_str()).unwrap_or("");

        let resolved = resolve_markdown_url(url, source_rel_path);
        let internal_target = match resolved {
            UrlResolution::External | UrlResolution::Rejected => continue,
            UrlResolution::Internal(p) => p,
        };

        let (start_line, start_col) = line_col(original_source, m.start());
        let (end_line, end_col) = line_col(original_source, m.end());

        links.push(DocLink {
            source_docid: source_docid.to_string(),
            link_type: LinkType::Markdown,
            target_ref: internal_target.clone(),
            target_ref_norm: normalize_link_target(&internal_target),
            target_collection: Some(default_collection.to_string()),
            target_anchor: None,
            link_text: text,
            start_line,
            start_col,
            end_line,
            end_col,
        });
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_wiki_link() {
        let links = parse_links("a", "See [[B]] for more.", "a.md", "notes");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_ref, "B");
        assert_eq!(links[0].target_ref_norm, "b");
        assert_eq!(links[0].link_type, LinkType::Wiki);
    }

    #[test]
    fn parses_alias_and_collection_prefix() {
        let links = parse_links("a", "[[other:Target|shown text]]", "a.md", "notes");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_collection.as_deref(), Some("other"));
        assert_eq!(links[0].target_ref, "Target");
        assert_eq!(links[0].link_text.as_deref(), Some("shown text"));
    }

    #[test]
    fn excludes_links_inside_fenced_code() {
        let text = "before\n```\n[[X]]\n```\nafter";
        let links = parse_links("a", text, "a.md", "notes");
        assert!(links.is_empty());
    }

    #[test]
    fn excludes_links_inside_frontmatter() {
        let text = "---\ntitle: [[X]]\n---\nbody";
        let links = parse_links("a", text, "a.md", "notes");
        assert!(links.is_empty());
    }

    #[test]
    fn ignores_image_links() {
        let links = parse_links("a", "![alt](pic.png)", "a.md", "notes");
        assert!(links.is_empty());
    }

    #[test]
    fn ignores_external_and_protocol_relative_urls() {
        let links = parse_links("a", "[x](https://example.com) and [y](//cdn.example.com/a)", "a.md", "notes");
        assert!(links.is_empty());
    }

    #[test]
    fn resolves_relative_markdown_link() {
        let links = parse_links("a", "[x](../sibling/doc.md)", "notes/sub/a.md", "notes");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_ref, "notes/sibling/doc.md");
    }

    #[test]
    fn rejects_escaping_relative_link() {
        let links = parse_links("a", "[x](../../escape.md)", "a.md", "notes");
        assert!(links.is_empty());
    }

    #[test]
    fn rejects_backslash_in_url() {
        let links = parse_links("a", "[x](..\\evil.md)", "a.md", "notes");
        assert!(links.is_empty());
    }

    #[test]
    fn decodes_safe_percent_codes_but_preserves_unsafe_ones() {
        let links = parse_links("a", "[x](my%20doc.md)", "a.md", "notes");
        assert_eq!(links[0].target_ref, "my doc.md");

        let unsafe_links = parse_links("a", "[x](a%2Fb.md)", "a.md", "notes");
        assert_eq!(unsafe_links[0].target_ref, "a%2Fb.md");
    }

    #[test]
    fn normalize_is_nfc_lowercase_trim() {
        assert_eq!(normalize_link_target("  Héllo  "), "héllo");
    }

    #[test]
    fn non_ascii_link_targets_survive_percent_decoding() {
        let links = parse_links("a", "[x](caf%C3%A9.md)", "a.md", "notes");
        assert_eq!(links[0].target_ref, "café.md");

        let literal = parse_links("a", "[x](café.md)", "a.md", "notes");
        assert_eq!(literal[0].target_ref, "café.md");
    }
}
