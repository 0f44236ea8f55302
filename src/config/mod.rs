// src/config/mod.rs
//! Startup configuration. Built once from the environment (optionally seeded
//! by a watch file) and passed explicitly to every component; nothing else in
//! the crate reads the environment.

pub mod watch;

use std::path::PathBuf;
use std::time::Duration;

use lettre::message::Mailbox;
use thiserror::Error;

use crate::signal::SignalMode;
use watch::WatchFile;

pub const DEFAULT_ABSENCE_MARKER: &str = "No appointments available";
pub const DEFAULT_NEGATIVE_KEYWORDS: &[&str] = &["no events", "booked"];
pub const DEFAULT_STATE_PATH: &str = "state/watch_state.json";
pub const DEFAULT_SUBJECT: &str = "Appointment slot available!";
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOCK_STALE_SECS: u64 = 900;
/// Headroom on top of the fetch timeout for extraction, the SMTP exchange and
/// the state write. A lock younger than this plus the fetch timeout may still
/// belong to a live run.
pub const LOCK_RUN_MARGIN_SECS: u64 = 120;
pub const DEFAULT_BROWSER_BIN: &str = "chromium";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("watch file: {0:#}")]
    File(anyhow::Error),
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchBackend {
    Http,
    Browser { binary: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateBackend {
    File(PathBuf),
    Ephemeral,
}

/// What happens to the state commit when a positive decision fails to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryFailurePolicy {
    /// Commit anyway. The event is lost unless the signal differs again later.
    #[default]
    Commit,
    /// Keep the previous state so the next run re-derives and re-sends.
    Retain,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub from: Mailbox,
    pub to: Mailbox,
}

#[derive(Debug, Clone)]
pub enum NotifyTarget {
    DryRun,
    Email(SmtpSettings),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub urls: Vec<String>,
    pub mode: SignalMode,
    pub absence_markers: Vec<String>,
    pub item_selector: Option<String>,
    pub item_label_attr: Option<String>,
    pub negative_keywords: Vec<String>,
    pub fetch_backend: FetchBackend,
    pub fetch_timeout: Duration,
    pub state: StateBackend,
    pub lock_stale_after: Duration,
    pub on_delivery_failure: DeliveryFailurePolicy,
    pub notify: NotifyTarget,
    pub subject: String,
}

impl Config {
    /// Process environment plus the optional watch file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |k: &str| std::env::var(k).ok();
        let file = watch::load_watch_file_default(lookup).map_err(ConfigError::File)?;
        Self::from_lookup(lookup, file.unwrap_or_default())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F, file: WatchFile) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let urls: Vec<String> = match get("CHECK_URLS") {
            Some(raw) => split_list(&raw, ','),
            None => clean_list(file.urls.unwrap_or_default()),
        };
        if urls.is_empty() {
            return Err(ConfigError::Missing("CHECK_URLS"));
        }
        for u in &urls {
            reqwest::Url::parse(u).map_err(|e| invalid("CHECK_URLS", format!("{u}: {e}")))?;
        }

        let mode = match get("SIGNAL_MODE").or(file.signal_mode) {
            Some(raw) => raw
                .parse::<SignalMode>()
                .map_err(|e| invalid("SIGNAL_MODE", e))?,
            None => SignalMode::Boolean,
        };

        let absence_markers = get("ABSENCE_MARKERS")
            .map(|raw| split_list(&raw, '|'))
            .or_else(|| file.absence_markers.map(clean_list))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_ABSENCE_MARKER.to_string()]);

        let item_selector = get("ITEM_SELECTOR").or(file.item_selector);
        if mode == SignalMode::Set && item_selector.is_none() {
            return Err(ConfigError::Missing("ITEM_SELECTOR"));
        }
        let item_label_attr = get("ITEM_LABEL_ATTR")
            .or(file.item_label_attr)
            .or_else(|| Some("aria-label".to_string()));
        let negative_keywords = get("NEGATIVE_KEYWORDS")
            .map(|raw| split_list(&raw, '|'))
            .or_else(|| file.negative_keywords.map(clean_list))
            .unwrap_or_else(|| DEFAULT_NEGATIVE_KEYWORDS.iter().map(|s| s.to_string()).collect());

        let fetch_backend = match get("FETCH_BACKEND")
            .or(file.fetch_backend)
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("http") => FetchBackend::Http,
            Some("browser") => FetchBackend::Browser {
                binary: get("BROWSER_BIN")
                    .or(file.browser_bin)
                    .unwrap_or_else(|| DEFAULT_BROWSER_BIN.to_string()),
            },
            Some(other) => return Err(invalid("FETCH_BACKEND", format!("unknown backend `{other}`"))),
        };

        let fetch_timeout_secs = parse_num(get("FETCH_TIMEOUT_SECS"), "FETCH_TIMEOUT_SECS")?
            .or(file.fetch_timeout_secs)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        if fetch_timeout_secs == 0 {
            return Err(invalid("FETCH_TIMEOUT_SECS", "must be positive"));
        }

        let ephemeral = match get("STATE_EPHEMERAL") {
            Some(v) => is_truthy(&v),
            None => file.state_ephemeral.unwrap_or(false),
        };
        let state = if ephemeral {
            StateBackend::Ephemeral
        } else {
            StateBackend::File(PathBuf::from(
                get("STATE_PATH")
                    .or(file.state_path)
                    .unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
            ))
        };
        let lock_stale_secs = parse_num(get("LOCK_STALE_SECS"), "LOCK_STALE_SECS")?
            .or(file.lock_stale_secs)
            .unwrap_or(DEFAULT_LOCK_STALE_SECS);
        let min_stale = fetch_timeout_secs.saturating_add(LOCK_RUN_MARGIN_SECS);
        if lock_stale_secs <= min_stale {
            return Err(invalid(
                "LOCK_STALE_SECS",
                format!("must exceed FETCH_TIMEOUT_SECS + {LOCK_RUN_MARGIN_SECS} ({min_stale}), got {lock_stale_secs}"),
            ));
        }

        let on_delivery_failure = match get("ON_DELIVERY_FAILURE")
            .or(file.on_delivery_failure)
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("commit") => DeliveryFailurePolicy::Commit,
            Some("retain") => DeliveryFailurePolicy::Retain,
            Some(other) => {
                return Err(invalid(
                    "ON_DELIVERY_FAILURE",
                    format!("expected commit|retain, got `{other}`"),
                ))
            }
        };

        let dry_run = match get("DRY_RUN") {
            Some(v) => is_truthy(&v),
            None => file.dry_run.unwrap_or(false),
        };
        let notify = if dry_run {
            NotifyTarget::DryRun
        } else {
            let user = get("EMAIL_USER").ok_or(ConfigError::Missing("EMAIL_USER"))?;
            let pass = get("EMAIL_PASS").ok_or(ConfigError::Missing("EMAIL_PASS"))?;
            let to_raw = get("EMAIL_TO")
                .or(file.email_to)
                .ok_or(ConfigError::Missing("EMAIL_TO"))?;
            let from_raw = get("EMAIL_FROM")
                .or(file.email_from)
                .unwrap_or_else(|| user.clone());
            let to: Mailbox = to_raw
                .parse()
                .map_err(|e| invalid("EMAIL_TO", format!("{to_raw}: {e}")))?;
            let from: Mailbox = from_raw
                .parse()
                .map_err(|e| invalid("EMAIL_FROM", format!("{from_raw}: {e}")))?;
            let port = parse_num(get("SMTP_PORT"), "SMTP_PORT")?
                .or(file.smtp_port)
                .unwrap_or(DEFAULT_SMTP_PORT);
            NotifyTarget::Email(SmtpSettings {
                host: get("SMTP_HOST")
                    .or(file.smtp_host)
                    .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                port,
                user,
                pass,
                from,
                to,
            })
        };

        let subject = get("NOTIFY_SUBJECT")
            .or(file.subject)
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        Ok(Self {
            urls,
            mode,
            absence_markers,
            item_selector,
            item_label_attr,
            negative_keywords,
            fetch_backend,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            state,
            lock_stale_after: Duration::from_secs(lock_stale_secs),
            on_delivery_failure,
            notify,
            subject,
        })
    }
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    clean_list(raw.split(sep).map(str::to_string).collect())
}

/// Trim entries and drop blanks and repeats, keeping first-seen order.
/// Order matters: it fixes the digest corpus and the state key.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

fn parse_num<T: std::str::FromStr>(
    raw: Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|s| s.parse::<T>().map_err(|e| invalid(key, format!("{s}: {e}"))))
        .transpose()
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
