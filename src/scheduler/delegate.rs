//! Flush veto hook

/// Consulted before every flush cycle
///
/// Returning false skips the cycle without touching the network; queued
/// records stay where they are.
pub trait FlushDelegate: Send + Sync {
    fn should_flush(&self) -> bool;
}

/// Delegate used when the host installs none
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFlush;

impl FlushDelegate for AlwaysFlush {
    fn should_flush(&self) -> bool {
        true
    }
}

impl<F> FlushDelegate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_flush(&self) -> bool {
        self()
    }
}
