//! signal.rs — normalized observation types shared by extraction, reconciliation
//! and the state store.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::FetchError;

/// How a run turns page content into a signal. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    Boolean,
    Digest,
    Set,
}

impl SignalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalMode::Boolean => "boolean",
            SignalMode::Digest => "digest",
            SignalMode::Set => "set",
        }
    }
}

impl std::str::FromStr for SignalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(SignalMode::Boolean),
            "digest" | "hash" => Ok(SignalMode::Digest),
            "set" | "items" => Ok(SignalMode::Set),
            other => Err(format!("unknown signal mode `{other}`")),
        }
    }
}

/// Lowercase hex SHA-256 of the combined page corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex_sha256(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of one discrete opportunity (e.g. a calendar event chip).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Built from the source URL and the normalized item text.
    pub fn new(source_url: &str, text: &str) -> Self {
        Self(format!("{source_url} :: {text}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What one run observed across all monitored sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    Boolean {
        available: bool,
    },
    /// `hash` is `None` when no source returned content.
    Digest {
        hash: Option<ContentDigest>,
    },
    Set {
        items: BTreeSet<ItemId>,
    },
}

impl Signal {
    pub fn mode(&self) -> SignalMode {
        match self {
            Signal::Boolean { .. } => SignalMode::Boolean,
            Signal::Digest { .. } => SignalMode::Digest,
            Signal::Set { .. } => SignalMode::Set,
        }
    }

    /// The "nothing observed" value for a mode.
    pub fn empty(mode: SignalMode) -> Self {
        match mode {
            SignalMode::Boolean => Signal::Boolean { available: false },
            SignalMode::Digest => Signal::Digest { hash: None },
            SignalMode::Set => Signal::Set {
                items: BTreeSet::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Signal::Boolean { available } => !available,
            Signal::Digest { hash } => hash.is_none(),
            Signal::Set { items } => items.is_empty(),
        }
    }
}

/// Outcome of fetching one monitored URL.
#[derive(Debug, Clone)]
pub struct SourceResult {
    pub source_url: String,
    pub content: Option<String>,
    pub error: Option<FetchError>,
}

impl SourceResult {
    pub fn ok(source_url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failed(source_url: impl Into<String>, error: FetchError) -> Self {
        Self {
            source_url: source_url.into(),
            content: None,
            error: Some(error),
        }
    }
}

/// All source results of one run, in configured source order.
pub type ObservationSet = Vec<SourceResult>;

/// The record kept between runs under one state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub signal: Signal,
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
}

/// Why a run did or did not notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NoChange,
    NewAvailability,
    NewItems(usize),
    FirstRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub should_notify: bool,
    pub reason: DecisionReason,
    /// Newly seen items, sorted. Empty outside set mode.
    pub new_items: Vec<ItemId>,
}

impl Decision {
    pub fn suppress() -> Self {
        Self {
            should_notify: false,
            reason: DecisionReason::NoChange,
            new_items: Vec::new(),
        }
    }

    pub fn notify(reason: DecisionReason) -> Self {
        Self {
            should_notify: true,
            reason,
            new_items: Vec::new(),
        }
    }
}

/// Identity under which one watch is stored: mode plus the ordered URL list.
/// Source order is part of the key because digest signals depend on it.
pub fn state_key(mode: SignalMode, urls: &[String]) -> String {
    let joined = urls.join("\n");
    let digest = hex_sha256(joined.as_bytes());
    format!("{}:{}", mode.as_str(), &digest[..16])
}

pub(crate) fn hex_sha256(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
