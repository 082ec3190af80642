//! Default distinct id policy
//!
//! Used whenever no distinct id is known: at first launch and after `reset`.
//! A host-supplied device identifier wins; otherwise one random UUID is
//! generated per process and reused. Once written to the identity archive
//! the id is also stable across restarts.

use std::sync::OnceLock;

use uuid::Uuid;

static PROCESS_RANDOM_ID: OnceLock<String> = OnceLock::new();

/// Resolves the default distinct id
#[derive(Debug, Clone, Default)]
pub struct DefaultIdentityPolicy {
    device_id: Option<String>,
}

impl DefaultIdentityPolicy {
    pub fn new(device_id: Option<String>) -> Self {
        let device_id = device_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        Self { device_id }
    }

    pub fn resolve(&self) -> String {
        match &self.device_id {
            Some(id) => id.clone(),
            None => process_random_id().to_string(),
        }
    }
}

fn process_random_id() -> &'static str {
    PROCESS_RANDOM_ID.get_or_init(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_wins() {
        let policy = DefaultIdentityPolicy::new(Some(" ifv-123 ".to_string()));
        assert_eq!(policy.resolve(), "ifv-123");
    }

    #[test]
    fn test_random_id_is_cached() {
        let policy = DefaultIdentityPolicy::new(None);
        let first = policy.resolve();
        assert!(!first.is_empty());
        assert_eq!(first, DefaultIdentityPolicy::new(Some("  ".to_string())).resolve());
    }
}
