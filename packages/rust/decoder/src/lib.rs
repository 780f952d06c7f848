//! Content classifier for fetched subscription files.
//!
//! Raw bytes go through a cascade of format stages, first success wins:
//!
//! 1. a structured document with a `proxies` sequence,
//! 2. line-delimited share URIs dispatched by scheme,
//! 3. Base64-wrapped content, decoded and fed back into stage 1.
//!
//! Nothing here performs I/O; classification is pure and can run on any
//! number of files in parallel.

pub mod b64;
pub mod encode;
pub mod schemes;
pub mod structured;

use std::sync::LazyLock;

use nodeharvest_shared::{NodeDescriptor, ParseOutcome, SourceFormat};
use tracing::debug;

pub use encode::to_uri;
pub use schemes::{DecoderRegistry, LineResult, SchemeDecoder};
pub use structured::{parse_document, render_document, to_mapping};

/// How many Base64 layers are unwrapped before giving up.
pub const MAX_BASE64_NESTING: usize = 2;

const UNRECOGNIZED: &str = "unrecognized format";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What the cascade made of one file.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Stage that produced the nodes; `None` when nothing was recognized.
    pub format: Option<SourceFormat>,
    pub nodes: Vec<NodeDescriptor>,
    /// Lines with a known scheme that failed to decode, across all layers.
    pub line_failures: usize,
}

/// The detection cascade over a scheme decoder registry.
pub struct Classifier {
    registry: DecoderRegistry,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            registry: DecoderRegistry::new(),
        }
    }

    /// Classify raw file content. Invalid UTF-8 is replaced, a BOM is dropped.
    pub fn classify_and_parse(&self, raw: &[u8]) -> Classification {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_start_matches('\u{feff}');
        self.classify_text(text, 0)
    }

    /// Classify and wrap the result as a per-link outcome.
    pub fn parse_outcome(&self, source: &str, raw: &[u8]) -> ParseOutcome {
        let classification = self.classify_and_parse(raw);
        match classification.format {
            Some(format) if !classification.nodes.is_empty() => ParseOutcome {
                source: source.to_string(),
                format: Some(format),
                nodes: classification.nodes,
                failure: None,
                line_failures: classification.line_failures,
            },
            _ => ParseOutcome {
                line_failures: classification.line_failures,
                ..ParseOutcome::failed(source, UNRECOGNIZED)
            },
        }
    }

    fn classify_text(&self, text: &str, depth: usize) -> Classification {
        if let Some(nodes) = structured::parse_document(text).filter(|n| !n.is_empty()) {
            return Classification {
                format: Some(SourceFormat::Structured),
                nodes,
                line_failures: 0,
            };
        }

        let uri_list = self.parse_lines(text);
        if !uri_list.nodes.is_empty() {
            return uri_list;
        }

        if b64::looks_like_base64(text) {
            if depth >= MAX_BASE64_NESTING {
                debug!(depth, "base64 nesting ceiling reached");
            } else if let Some(decoded) = b64::decode_text(text) {
                let inner = self.classify_text(&decoded, depth + 1);
                return Classification {
                    format: inner.format.map(|_| SourceFormat::Base64),
                    nodes: inner.nodes,
                    line_failures: uri_list.line_failures + inner.line_failures,
                };
            }
        }

        Classification {
            format: None,
            nodes: Vec::new(),
            line_failures: uri_list.line_failures,
        }
    }

    fn parse_lines(&self, text: &str) -> Classification {
        let mut result = Classification::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.registry.decode_line(line) {
                LineResult::Node(node) => result.nodes.push(node),
                LineResult::Failed(e) => {
                    debug!(error = %e, "share URI failed to decode");
                    result.line_failures += 1;
                }
                LineResult::NotANode => {}
            }
        }
        if !result.nodes.is_empty() {
            result.format = Some(SourceFormat::UriList);
        }
        result
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

static CLASSIFIER: LazyLock<Classifier> = LazyLock::new(Classifier::new);

/// Classify with a shared default [`Classifier`].
pub fn classify_and_parse(raw: &[u8]) -> Classification {
    CLASSIFIER.classify_and_parse(raw)
}

/// [`Classifier::parse_outcome`] with a shared default classifier.
pub fn parse_outcome(source: &str, raw: &[u8]) -> ParseOutcome {
    CLASSIFIER.parse_outcome(source, raw)
}
