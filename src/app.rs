// src/app.rs
//! Wires concrete adapters from `Config` and runs one guarded pass.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::config::{Config, ConfigError, FetchBackend, NotifyTarget, StateBackend};
use crate::fetch::{BrowserFetcher, Fetcher, HttpFetcher};
use crate::notify::{EmailNotifier, LogNotifier, Notifier};
use crate::pipeline::{Pipeline, RunReport};
use crate::store::{JsonFileStore, MemoryStore, RunLock, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    /// 2 for configuration problems, 1 for unrecoverable store errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) => 2,
            AppError::Store(_) => 1,
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run held the state lock.
    Skipped,
}

pub fn build_fetcher(config: &Config) -> Result<Arc<dyn Fetcher>, ConfigError> {
    let fetcher: Arc<dyn Fetcher> = match &config.fetch_backend {
        FetchBackend::Http => Arc::new(HttpFetcher::new(config.fetch_timeout).map_err(|e| {
            ConfigError::Invalid {
                key: "FETCH_BACKEND",
                reason: e.to_string(),
            }
        })?),
        FetchBackend::Browser { binary } => {
            Arc::new(BrowserFetcher::new(binary.clone(), config.fetch_timeout))
        }
    };
    Ok(fetcher)
}

pub fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>, ConfigError> {
    let notifier: Arc<dyn Notifier> = match &config.notify {
        NotifyTarget::DryRun => Arc::new(LogNotifier),
        NotifyTarget::Email(smtp) => {
            Arc::new(EmailNotifier::new(smtp).map_err(|e| ConfigError::Invalid {
                key: "SMTP_HOST",
                reason: e.to_string(),
            })?)
        }
    };
    Ok(notifier)
}

pub fn build_store(config: &Config) -> Arc<dyn StateStore> {
    let store: Arc<dyn StateStore> = match &config.state {
        StateBackend::File(path) => Arc::new(JsonFileStore::new(path.clone())),
        StateBackend::Ephemeral => Arc::new(MemoryStore::new()),
    };
    store
}

/// Build every component, take the run lock (file state only) and run once.
pub async fn run(config: &Config) -> Result<RunOutcome, AppError> {
    let pipeline = Pipeline::new(
        config,
        build_fetcher(config)?,
        build_store(config),
        build_notifier(config)?,
    )?;

    let _lock = match &config.state {
        StateBackend::File(path) => {
            match RunLock::acquire(RunLock::lock_path_for(path), config.lock_stale_after) {
                Ok(lock) => Some(lock),
                Err(StoreError::Locked(p)) => {
                    tracing::warn!(lock = %p.display(), "another run is in progress, skipping");
                    return Ok(RunOutcome::Skipped);
                }
                Err(e) => return Err(e.into()),
            }
        }
        StateBackend::Ephemeral => {
            tracing::info!("ephemeral state: every run behaves as a first run");
            None
        }
    };

    tracing::info!(
        key = pipeline.state_key(),
        sources = config.urls.len(),
        mode = config.mode.as_str(),
        "run started"
    );
    let report = pipeline.run_once(Utc::now()).await;
    Ok(RunOutcome::Completed(report))
}
