//! Telemetry Queue - `telemetry-drain` binary
//!
//! Opens the persisted backlog of one project token and sends it to the
//! backend until nothing is left or a flush cycle fails.
//!
//! Configuration comes from the environment (see
//! [`ClientConfig::from_env`]); `TELEMETRY_DATA_DIR` must point at the state
//! directory the embedding app uses. Ctrl+C archives state and stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_queue::{Client, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let config = ClientConfig::from_env()?;
    if config.data_dir.is_none() {
        warn!("TELEMETRY_DATA_DIR is not set, there is no backlog to drain");
        return Ok(());
    }

    let client = Arc::new(Client::new(config)?);
    info!(
        version = telemetry_queue::VERSION,
        server_url = %client.config().server_url,
        pending_events = client.event_store().len(),
        pending_people = client.people_store().len(),
        "telemetry-drain starting"
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let client = client.clone();
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            client.scheduler().suspend();
            match client.archive() {
                Ok(()) => info!("Interrupted, state archived"),
                Err(e) => error!(error = %e, "Interrupted, failed to archive state"),
            }
        })?;
    }

    let mut failed = false;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }

        let pending = client.event_store().len() + client.people_store().len();
        if pending == 0 {
            info!("Backlog empty");
            break;
        }

        let report = client.flush().await;
        if !report.success() {
            warn!(
                events_error = ?report.events.error,
                people_error = ?report.people.error,
                suspended = report.suspended,
                "Flush cycle failed, stopping"
            );
            failed = true;
            break;
        }

        let remaining = client.event_store().len() + client.people_store().len();
        if remaining >= pending {
            warn!(remaining, vetoed = report.vetoed, "Flush made no progress, stopping");
            break;
        }
    }

    client.archive()?;
    info!(
        pending_events = client.event_store().len(),
        pending_people = client.people_store().len(),
        "telemetry-drain finished"
    );

    if failed {
        return Err("flush failed, backlog kept for the next run".into());
    }
    Ok(())
}
