//! slot-watcher — binary entrypoint.
//! Runs exactly one check per invocation; schedule it with cron or a host timer.
//!
//! Exit status: 0 when the run completed (notified or not) or was skipped
//! because another run held the lock, 2 on configuration errors, 1 on
//! unrecoverable state-store errors.

use std::process::ExitCode;

use slot_watcher::app::{self, RunOutcome};
use slot_watcher::{logging, Config, Delivery};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();

    let rust_log = std::env::var("RUST_LOG").ok();
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));
    logging::init(rust_log.as_deref(), json);

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    match app::run(&config).await {
        Ok(RunOutcome::Completed(report)) => {
            match &report.delivery {
                Delivery::Delivered => tracing::info!(reason = ?report.decision.reason, "notified"),
                Delivery::Failed(e) => tracing::warn!("run completed, notification failed: {e}"),
                Delivery::NotSent => tracing::info!("no new availability"),
            }
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Skipped) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
