// src/pipeline.rs
//! One linear pass per invocation:
//! load state → fetch all sources → extract → reconcile → notify → save.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{Config, ConfigError, DeliveryFailurePolicy};
use crate::extract::{available_sources, Extractor, SelectorRecognizer};
use crate::fetch::{fetch_all, Fetcher};
use crate::notify::{render, Notifier};
use crate::reconcile::reconcile;
use crate::signal::{state_key, Decision, SignalMode};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    NotSent,
    Delivered,
    Failed(String),
}

/// What one run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub decision: Decision,
    pub delivery: Delivery,
    pub committed: bool,
    pub sources_ok: usize,
    pub sources_failed: usize,
}

pub struct Pipeline {
    urls: Vec<String>,
    key: String,
    subject: String,
    absence_markers: Vec<String>,
    fetch_timeout: Duration,
    on_delivery_failure: DeliveryFailurePolicy,
    extractor: Extractor,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
}

/// Extraction settings for the configured mode. Rejects an unparsable selector.
pub fn build_extractor(config: &Config) -> Result<Extractor, ConfigError> {
    Ok(match config.mode {
        SignalMode::Boolean => Extractor::boolean(config.absence_markers.clone()),
        SignalMode::Digest => Extractor::digest(),
        SignalMode::Set => {
            let selector = config
                .item_selector
                .as_deref()
                .ok_or(ConfigError::Missing("ITEM_SELECTOR"))?;
            let recognizer = SelectorRecognizer::new(selector, config.item_label_attr.clone())
                .map_err(|reason| ConfigError::Invalid {
                    key: "ITEM_SELECTOR",
                    reason,
                })?;
            Extractor::set(Box::new(recognizer), config.negative_keywords.clone())
        }
    })
}

impl Pipeline {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            urls: config.urls.clone(),
            key: state_key(config.mode, &config.urls),
            subject: config.subject.clone(),
            absence_markers: config.absence_markers.clone(),
            fetch_timeout: config.fetch_timeout,
            on_delivery_failure: config.on_delivery_failure,
            extractor: build_extractor(config)?,
            fetcher,
            store,
            notifier,
        })
    }

    pub fn state_key(&self) -> &str {
        &self.key
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> RunReport {
        let previous = self.store.load(&self.key).await;
        if previous.is_none() {
            tracing::info!(key = %self.key, "no prior state, treating as first run");
        }

        let observations = fetch_all(self.fetcher.as_ref(), &self.urls, self.fetch_timeout).await;
        let sources_ok = observations.iter().filter(|o| o.content.is_some()).count();
        let sources_failed = observations.len() - sources_ok;
        if sources_ok == 0 {
            tracing::warn!(
                sources = observations.len(),
                "every source failed; recording an empty observation"
            );
        }

        let signal = self.extractor.extract(&observations);
        let (decision, mut next) = reconcile(previous.as_ref(), signal, now);
        tracing::info!(
            mode = self.extractor.mode().as_str(),
            notify = decision.should_notify,
            reason = ?decision.reason,
            sources_ok,
            sources_failed,
            "reconciled"
        );

        let mut delivery = Delivery::NotSent;
        if decision.should_notify {
            let available = if self.extractor.mode() == SignalMode::Boolean {
                available_sources(&observations, &self.absence_markers)
            } else {
                Vec::new()
            };
            let msg = render(&self.subject, &decision, &available, &self.urls);
            delivery = match self.notifier.send(&msg).await {
                Ok(()) => {
                    tracing::info!(notifier = self.notifier.name(), "notification delivered");
                    Delivery::Delivered
                }
                Err(e) => {
                    tracing::error!(notifier = self.notifier.name(), "notification failed: {e}");
                    Delivery::Failed(e.to_string())
                }
            };
        }

        if matches!(delivery, Delivery::Failed(_)) {
            match self.on_delivery_failure {
                DeliveryFailurePolicy::Retain => {
                    tracing::warn!("keeping previous state so the next run retries delivery");
                    return RunReport {
                        decision,
                        delivery,
                        committed: false,
                        sources_ok,
                        sources_failed,
                    };
                }
                DeliveryFailurePolicy::Commit => {
                    // Nothing reached the recipient.
                    next.last_notified_at = previous.as_ref().and_then(|p| p.last_notified_at);
                }
            }
        }

        let committed = match self.store.save(&self.key, &next).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %self.key, "state save failed, next run re-derives from sources: {e}");
                false
            }
        };

        RunReport {
            decision,
            delivery,
            committed,
            sources_ok,
            sources_failed,
        }
    }
}
