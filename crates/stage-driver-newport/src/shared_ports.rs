//! Shared link management for SMC100 daisy chains.
//!
//! Several stages can be built on controllers of the same chain (two XY
//! stages on four controllers, for instance). This module keeps a static
//! registry so they reuse one open link per serial port.

use crate::link::Smc100Link;
use parking_lot::RwLock;
use stage_core::error::StageResult;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Module-local registry for shared links.
static SHARED_LINKS: OnceLock<RwLock<HashMap<String, Smc100Link>>> = OnceLock::new();

fn link_registry() -> &'static RwLock<HashMap<String, Smc100Link>> {
    SHARED_LINKS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Get an existing link if one is already open for the given path.
pub fn get_existing_link(port_path: &str) -> Option<Smc100Link> {
    link_registry().read().get(port_path).cloned()
}

/// Register a link in the shared registry.
pub fn register_link(port_path: &str, link: Smc100Link) {
    link_registry().write().insert(port_path.to_string(), link);
    tracing::info!(port = port_path, "Registered SMC100 shared link");
}

/// Remove a link from the registry (e.g., when it becomes stale).
pub fn remove_link(port_path: &str) -> bool {
    let removed = link_registry().write().remove(port_path).is_some();
    if removed {
        tracing::info!(port = port_path, "Removed stale SMC100 shared link");
    }
    removed
}

/// Get or open the link for the given path.
///
/// An existing link is health checked with a flush before being reused.
pub async fn get_or_open_link(
    port_path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> StageResult<Smc100Link> {
    if let Some(link) = get_existing_link(port_path) {
        let health_check = async {
            let mut guard = link.port().lock().await;
            guard.get_mut().flush().await
        };

        match tokio::time::timeout(Duration::from_millis(100), health_check).await {
            Ok(Ok(())) => {
                tracing::debug!(port = port_path, "Reusing healthy SMC100 shared link");
                return Ok(link);
            }
            Ok(Err(e)) => {
                tracing::warn!(port = port_path, error = %e, "SMC100 shared link health check failed, reopening");
                remove_link(port_path);
            }
            Err(_) => {
                tracing::warn!(
                    port = port_path,
                    "SMC100 shared link health check timed out, reopening"
                );
                remove_link(port_path);
            }
        }
    }

    let link = Smc100Link::open(port_path, baud_rate, timeout).await?;
    register_link(port_path, link.clone());
    Ok(link)
}

/// Close all shared links (for cleanup/testing).
pub fn close_all_links() {
    if let Some(registry) = SHARED_LINKS.get() {
        let mut guard = registry.write();
        let count = guard.len();
        guard.clear();
        tracing::info!(count, "Closed all shared SMC100 links");
    }
}

/// Number of currently registered links.
pub fn link_count() -> usize {
    SHARED_LINKS.get().map(|r| r.read().len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::serial::wrap_shared;

    #[tokio::test]
    async fn test_registered_link_is_reused() {
        let (_device, host) = tokio::io::duplex(64);
        let link = Smc100Link::new(wrap_shared(Box::new(host)), Duration::from_millis(100));
        register_link("test-reuse", link.clone());

        let reused = get_or_open_link("test-reuse", 57600, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(reused.same_line(&link));
        assert!(link_count() >= 1);

        assert!(remove_link("test-reuse"));
        assert!(!remove_link("test-reuse"));
        assert!(get_existing_link("test-reuse").is_none());
    }
}
