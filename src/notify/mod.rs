// src/notify/mod.rs
//! Notification delivery: one `Notifier` per run, plus message rendering.

pub mod email;

use async_trait::async_trait;
use thiserror::Error;

use crate::signal::{Decision, DecisionReason};

pub use email::EmailNotifier;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("build message: {0}")]
    Build(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// A rendered, plain-text notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, msg: &Message) -> Result<(), DeliveryError>;
    fn name(&self) -> &'static str;
}

/// Dry-run notifier: logs the message instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, msg: &Message) -> Result<(), DeliveryError> {
        tracing::info!(subject = %msg.subject, "dry run, not sending:\n{}", msg.body);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Build the notification for a positive decision.
/// `available` lists the sources judged available (boolean mode); `watched`
/// is the full monitored URL list.
pub fn render(subject: &str, decision: &Decision, available: &[String], watched: &[String]) -> Message {
    let mut body = String::new();
    match decision.reason {
        DecisionReason::NewItems(n) => {
            body.push_str(&format!("{n} new slot(s) found:\n"));
            for item in &decision.new_items {
                body.push_str(&format!("  - {item}\n"));
            }
        }
        DecisionReason::NewAvailability if !available.is_empty() => {
            for url in available {
                body.push_str(&format!("New slot available! Check this link: {url}\n"));
            }
        }
        DecisionReason::FirstRun => {
            body.push_str("Started watching; current content recorded for:\n");
            for url in watched {
                body.push_str(&format!("  - {url}\n"));
            }
        }
        _ => {
            body.push_str("Monitored page content changed:\n");
            for url in watched {
                body.push_str(&format!("  - {url}\n"));
            }
        }
    }
    Message {
        subject: subject.to_string(),
        body,
    }
}
