//! Host application lifecycle notifications

use serde::{Deserialize, Serialize};

/// Lifecycle transition reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The app came to the foreground
    BecameActive,
    /// The app moved to the background
    EnteredBackground,
    /// The process is about to exit
    WillTerminate,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleEvent::BecameActive => "became_active",
            LifecycleEvent::EnteredBackground => "entered_background",
            LifecycleEvent::WillTerminate => "will_terminate",
        };
        f.write_str(name)
    }
}
