// src/config/watch.rs
//! Optional TOML watch file holding the non-secret settings. Every key is
//! optional; environment variables override whatever the file sets.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_WATCH_CONFIG_PATH: &str = "WATCH_CONFIG_PATH";
pub const DEFAULT_WATCH_CONFIG_PATH: &str = "config/watch.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WatchFile {
    pub urls: Option<Vec<String>>,
    pub signal_mode: Option<String>,
    pub absence_markers: Option<Vec<String>>,
    pub item_selector: Option<String>,
    pub item_label_attr: Option<String>,
    pub negative_keywords: Option<Vec<String>>,
    pub fetch_backend: Option<String>,
    pub browser_bin: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub state_path: Option<String>,
    pub state_ephemeral: Option<bool>,
    pub lock_stale_secs: Option<u64>,
    pub on_delivery_failure: Option<String>,
    pub dry_run: Option<bool>,
    pub email_to: Option<String>,
    pub email_from: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub subject: Option<String>,
}

pub fn load_watch_file_from(path: &Path) -> Result<WatchFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading watch config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing watch config {}", path.display()))
}

/// Resolve the watch file:
/// 1) $WATCH_CONFIG_PATH (must exist)
/// 2) config/watch.toml relative to the working directory, if present
/// 3) none
pub fn load_watch_file_default<F>(lookup: F) -> Result<Option<WatchFile>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(p) = lookup(ENV_WATCH_CONFIG_PATH).filter(|p| !p.trim().is_empty()) {
        let pb = PathBuf::from(p.trim());
        if !pb.exists() {
            return Err(anyhow!(
                "{ENV_WATCH_CONFIG_PATH} points to non-existent path {}",
                pb.display()
            ));
        }
        return load_watch_file_from(&pb).map(Some);
    }
    let fallback = PathBuf::from(DEFAULT_WATCH_CONFIG_PATH);
    if fallback.exists() {
        return load_watch_file_from(&fallback).map(Some);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("watch.toml");
        fs::write(
            &p,
            r#"
urls = ["https://a.test/cal"]
signal_mode = "set"
item_selector = "div.chip"
fetch_timeout_secs = 12
"#,
        )
        .unwrap();
        let wf = load_watch_file_from(&p).unwrap();
        assert_eq!(wf.urls, Some(vec!["https://a.test/cal".to_string()]));
        assert_eq!(wf.signal_mode.as_deref(), Some("set"));
        assert_eq!(wf.fetch_timeout_secs, Some(12));
        assert_eq!(wf.state_path, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("watch.toml");
        fs::write(&p, "email_pass = \"hunter2\"\n").unwrap();
        assert!(load_watch_file_from(&p).is_err());
    }

    #[test]
    fn env_path_must_exist() {
        let lookup = |k: &str| {
            (k == ENV_WATCH_CONFIG_PATH).then(|| "/nonexistent/watch.toml".to_string())
        };
        assert!(load_watch_file_default(lookup).is_err());
    }

    #[test]
    fn env_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("w.toml");
        fs::write(&p, "subject = \"Hi\"\n").unwrap();
        let path = p.display().to_string();
        let lookup = move |k: &str| (k == ENV_WATCH_CONFIG_PATH).then(|| path.clone());
        let wf = load_watch_file_default(lookup).unwrap().unwrap();
        assert_eq!(wf.subject.as_deref(), Some("Hi"));
    }
}
