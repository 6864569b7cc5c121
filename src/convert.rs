//! The Converter contract and its registry.
//!
//! Real format converters (PDF, DOCX, PPTX, …) are out of scope; this
//! module specifies the contract they must satisfy and ships the two
//! converters the engine can provide without an external dependency:
//! Markdown passthrough and plain-text wrapping.

use crate::error::{EngineError, Result};

pub struct ConvertInput<'a> {
    pub bytes: &'a [u8],
    pub relative_path: &'a str,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ConvertMeta {
    pub converter_id: String,
    pub converter_version: String,
    pub source_mime: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConvertOutput {
    pub markdown: String,
    pub title: Option<String>,
    pub meta: ConvertMeta,
}

/// `canHandle(mime, ext) -> bool`, `convert(input) -> Result<...>`.
/// Implementations must not retain or mutate `input`, and must not
/// canonicalize their own output — that pass belongs to the Ingestor.
pub trait Converter: Send + Sync {
    fn id(&self) -> &'static str;
    fn version(&self) -> &'static str;
    fn can_handle(&self, mime: &str, ext: &str) -> bool;
    fn convert(&self, input: &ConvertInput<'_>) -> Result<ConvertOutput>;
}

/// First-match-wins dispatch in declaration order.
pub struct ConverterRegistry {
    converters: Vec<Box<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self { converters: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MarkdownConverter));
        registry.register(Box::new(PlainTextConverter));
        registry
    }

    pub fn register(&mut self, converter: Box<dyn Converter>) {
        self.converters.push(converter);
    }

    pub fn find(&self, mime: &str, ext: &str) -> Option<&dyn Converter> {
        self.converters.iter().find(|c| c.can_handle(mime, ext)).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn check_size(input: &ConvertInput<'_>) -> Result<()> {
    if input.bytes.len() > input.max_bytes {
        return Err(EngineError::too_large(format!(
            "input is {} bytes, exceeds limit of {} for {}",
            input.bytes.len(),
            input.max_bytes,
            input.relative_path
        )));
    }
    Ok(())
}

/// Converter output is untrusted text: strips C0/C1 control characters
/// outside the Markdown line vocabulary (`\n`, `\t`), so a stray
/// control byte in the source file never reaches the chunker, the FTS
/// index, or a terminal rendering search results.
fn strip_control_characters(text: &str) -> String {
    text.chars().filter(|&c| c == '\n' || c == '\t' || !c.is_control()).collect()
}

fn extract_title(markdown: &str) -> Option<String> {
    markdown.lines().find_map(|line| {
        let trimmed = line.trim_start();
        trimmed.strip_prefix("# ").map(|t| t.trim().to_string())
    })
}

pub struct MarkdownConverter;

impl Converter for MarkdownConverter {
    fn id(&self) -> &'static str {
        "builtin.markdown"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn can_handle(&self, mime: &str, ext: &str) -> bool {
        mime == "text/markdown" || ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown")
    }

    fn convert(&self, input: &ConvertInput<'_>) -> Result<ConvertOutput> {
        check_size(input)?;
        let raw = std::str::from_utf8(input.bytes)
            .map_err(|e| EngineError::corrupt(format!("{} is not valid UTF-8: {e}", input.relative_path)))?;
        if raw.trim().is_empty() {
            return Err(EngineError::corrupt(format!("{} converted to empty output", input.relative_path)));
        }
        let text = strip_control_characters(raw);
        Ok(ConvertOutput {
            title: extract_title(&text),
            markdown: text,
            meta: ConvertMeta {
                converter_id: self.id().to_string(),
                converter_version: self.version().to_string(),
                source_mime: "text/markdown".to_string(),
                warnings: Vec::new(),
            },
        })
    }
}

pub struct PlainTextConverter;

impl Converter for PlainTextConverter {
    fn id(&self) -> &'static str {
        "builtin.plaintext"
    }

    fn version(&self) -> &'static str {
        "1"
    }

    fn can_handle(&self, mime: &str, ext: &str) -> bool {
        mime == "text/plain" || ext.eq_ignore_ascii_case("txt")
    }

    fn convert(&self, input: &ConvertInput<'_>) -> Result<ConvertOutput> {
        check_size(input)?;
        let raw = std::str::from_utf8(input.bytes)
            .map_err(|e| EngineError::corrupt(format!("{} is not valid UTF-8: {e}", input.relative_path)))?;
        if raw.trim().is_empty() {
            return Err(EngineError::corrupt(format!("{} converted to empty output", input.relative_path)));
        }
        let text = strip_control_characters(raw);
        Ok(ConvertOutput {
            title: None,
            markdown: text,
            meta: ConvertMeta {
                converter_id: self.id().to_string(),
                converter_version: self.version().to_string(),
                source_mime: "text/plain".to_string(),
                warnings: Vec::new(),
            },
        })
    }
}
