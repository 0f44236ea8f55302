// src/extract.rs
//! Signal extraction: page content → `Signal`. Total over any input; content
//! that cannot be understood degrades to "unavailable" / no items.

use std::collections::BTreeSet;

use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};

use crate::signal::{ContentDigest, ItemId, ObservationSet, Signal, SignalMode};

/// One candidate opportunity recognized in a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedItem {
    pub label: String,
    pub text: String,
}

/// Finds discrete items (calendar chips, slot buttons, ...) in page content.
pub trait ItemRecognizer: Send + Sync {
    fn recognize(&self, content: &str) -> Vec<RecognizedItem>;
}

/// Recognizes every element matching a CSS selector. The label comes from
/// `label_attr` (when present on the element), the text from its text nodes.
#[derive(Debug, Clone)]
pub struct SelectorRecognizer {
    selector: Selector,
    label_attr: Option<String>,
}

impl SelectorRecognizer {
    pub fn new(selector: &str, label_attr: Option<String>) -> Result<Self, String> {
        let selector = Selector::parse(selector).map_err(|e| e.to_string())?;
        Ok(Self {
            selector,
            label_attr,
        })
    }
}

impl ItemRecognizer for SelectorRecognizer {
    fn recognize(&self, content: &str) -> Vec<RecognizedItem> {
        let doc = Html::parse_document(content);
        doc.select(&self.selector)
            .map(|el| {
                let label = self
                    .label_attr
                    .as_deref()
                    .and_then(|attr| el.value().attr(attr))
                    .map(normalize_text)
                    .unwrap_or_default();
                let text = normalize_text(&el.text().collect::<Vec<_>>().join(" "));
                RecognizedItem { label, text }
            })
            .collect()
    }
}

/// Extraction settings, built once from `Config`.
pub struct Extractor {
    mode: SignalMode,
    absence_markers: Vec<String>,
    negative_keywords: Vec<String>,
    recognizer: Option<Box<dyn ItemRecognizer>>,
}

impl Extractor {
    pub fn boolean(absence_markers: Vec<String>) -> Self {
        Self {
            mode: SignalMode::Boolean,
            absence_markers,
            negative_keywords: Vec::new(),
            recognizer: None,
        }
    }

    pub fn digest() -> Self {
        Self {
            mode: SignalMode::Digest,
            absence_markers: Vec::new(),
            negative_keywords: Vec::new(),
            recognizer: None,
        }
    }

    pub fn set(recognizer: Box<dyn ItemRecognizer>, negative_keywords: Vec<String>) -> Self {
        Self {
            mode: SignalMode::Set,
            absence_markers: Vec::new(),
            negative_keywords: negative_keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .collect(),
            recognizer: Some(recognizer),
        }
    }

    pub fn mode(&self) -> SignalMode {
        self.mode
    }

    pub fn extract(&self, observations: &ObservationSet) -> Signal {
        match self.mode {
            SignalMode::Boolean => Signal::Boolean {
                available: !available_sources(observations, &self.absence_markers).is_empty(),
            },
            SignalMode::Digest => Signal::Digest {
                hash: combined_digest(observations),
            },
            SignalMode::Set => Signal::Set {
                items: self.collect_items(observations),
            },
        }
    }

    fn collect_items(&self, observations: &ObservationSet) -> BTreeSet<ItemId> {
        let Some(recognizer) = self.recognizer.as_deref() else {
            return BTreeSet::new();
        };
        let mut items = BTreeSet::new();
        for obs in observations {
            let Some(content) = obs.content.as_deref() else {
                continue;
            };
            for item in recognizer.recognize(content) {
                if self.is_negative(&item) {
                    tracing::trace!(url = %obs.source_url, text = %item.text, "item dropped by negative keyword");
                    continue;
                }
                let text = if item.text.is_empty() {
                    &item.label
                } else {
                    &item.text
                };
                if text.is_empty() {
                    continue;
                }
                items.insert(ItemId::new(&obs.source_url, text));
            }
        }
        items
    }

    fn is_negative(&self, item: &RecognizedItem) -> bool {
        let label = item.label.to_lowercase();
        let text = item.text.to_lowercase();
        self.negative_keywords
            .iter()
            .any(|k| !k.is_empty() && (label.contains(k) || text.contains(k)))
    }
}

/// URLs whose visible text contains none of the absence markers. Sources
/// without content never count as available.
pub fn available_sources(observations: &ObservationSet, absence_markers: &[String]) -> Vec<String> {
    observations
        .iter()
        .filter_map(|obs| {
            let content = obs.content.as_deref()?;
            let text = visible_text(content);
            let absent = absence_markers
                .iter()
                .any(|m| !m.is_empty() && text.contains(m.as_str()));
            (!absent).then(|| obs.source_url.clone())
        })
        .collect()
}

/// SHA-256 over all fetched contents concatenated in source order; `None` if
/// no source returned content.
pub fn combined_digest(observations: &ObservationSet) -> Option<ContentDigest> {
    let mut corpus = String::new();
    let mut any = false;
    for content in observations.iter().filter_map(|o| o.content.as_deref()) {
        corpus.push_str(content);
        any = true;
    }
    any.then(|| ContentDigest::of(corpus.as_bytes()))
}

/// Text nodes of an HTML document, concatenated as-is. Plain text passes
/// through unchanged.
pub fn visible_text(content: &str) -> String {
    let doc = Html::parse_document(content);
    doc.root_element().text().collect()
}

/// Decode entities, strip stray tags, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));

    let decoded = html_escape::decode_html_entities(s);
    let stripped = re_tags.replace_all(&decoded, " ");
    re_ws.replace_all(&stripped, " ").trim().to_string()
}
