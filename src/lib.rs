//! Telemetry Queue
//!
//! Client-side analytics queue: records events and user-profile mutations,
//! keeps them durably on the local device, and sends them to an analytics
//! backend in batches, surviving flaky connectivity and app suspension.
//!
//! # Modules
//!
//! - `types`: Property values, event records, profile mutations
//! - `identity`: Distinct id, aliases, super properties, event timers
//! - `store`: Bounded, journaled event and people queues
//! - `flush`: Batch encoding, transport, flush cycle
//! - `scheduler`: Periodic and lifecycle-driven flushes, request coalescing
//! - `client`: The `Client` façade, people API and token registry
//! - `config`: Client configuration
//! - `error`: Error types
//! - `utils`: Atomic file writes and time helpers
//!
//! # Example
//!
//! ```no_run
//! use telemetry_queue::{registry, ClientConfig, Properties};
//!
//! #[tokio::main]
//! async fn main() -> telemetry_queue::TelemetryResult<()> {
//!     let config = ClientConfig::new("project-token").with_data_dir("/var/lib/telemetry");
//!     let client = registry().initialize(config)?;
//!
//!     client.identify("user-42");
//!     client.track_with("Signed Up", Properties::new().with("plan", "pro"));
//!     client.people().set_one("name", "Ada");
//!
//!     let report = client.flush().await;
//!     println!("sent {} record(s)", report.records_sent());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod flush;
pub mod identity;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use client::{registry, Client, People, Registry};
pub use config::ClientConfig;
pub use error::{TelemetryError, TelemetryResult, TransportError, TransportResult};
pub use flush::{BatchOutcome, Endpoint, FlushReport, HttpTransport, StoreFlushReport, Transport};
pub use scheduler::{AlwaysFlush, FlushDelegate, LifecycleEvent, SchedulerState};
pub use types::{EventRecord, ProfileMutation, ProfileOperation, Properties, PropertyValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
