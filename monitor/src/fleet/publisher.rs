use super::status::Snapshot;

/// Fan-out of fleet snapshots to whoever watches the fleet.
#[async_trait::async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Called once per poll cycle with the complete fleet.
    async fn publish_snapshot(&self, snapshot: Snapshot);
}
