//! Channel manager: a registry of independent channels driven as a group.

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, info, warn};

use agentwire_core::{ChannelId, ChannelResult};

use crate::channel::Channel;
use crate::stats::StatsSnapshot;

#[derive(Default)]
pub struct ChannelManager {
    channels: DashMap<ChannelId, Channel>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel and return its id
    pub fn add(&self, channel: Channel) -> ChannelId {
        let id = channel.id();
        debug!(channel = %id, transport = %channel.transport_type(), "Channel registered");
        self.channels.insert(id, channel);
        id
    }

    pub fn get(&self, id: &ChannelId) -> Option<Channel> {
        self.channels.get(id).map(|entry| entry.value().clone())
    }

    /// Unregister a channel after disconnecting it
    pub async fn remove(&self, id: &ChannelId) -> Option<Channel> {
        let (_, channel) = self.channels.remove(id)?;
        channel.disconnect().await;
        debug!(channel = %id, "Channel removed");
        Some(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|entry| *entry.key()).collect()
    }

    // Clones out of the map so no shard lock is held across an await
    fn snapshot(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Connect every channel concurrently
    ///
    /// One channel failing does not stop the others; each outcome is reported.
    pub async fn connect_all(&self) -> Vec<(ChannelId, ChannelResult<()>)> {
        let channels = self.snapshot();
        let results = join_all(channels.iter().map(|channel| async move {
            (channel.id(), channel.connect().await)
        }))
        .await;

        let failed = results.iter().filter(|(_, result)| result.is_err()).count();
        if failed > 0 {
            warn!(total = results.len(), failed, "Some channels failed to connect");
        } else {
            info!(total = results.len(), "All channels connected");
        }
        results
    }

    pub async fn disconnect_all(&self) {
        let channels = self.snapshot();
        join_all(channels.iter().map(Channel::disconnect)).await;
        info!(total = channels.len(), "All channels disconnected");
    }

    pub fn connected_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().is_connected())
            .count()
    }

    pub fn stats(&self) -> Vec<(ChannelId, StatsSnapshot)> {
        self.channels
            .iter()
            .map(|entry| (*entry.key(), entry.value().stats()))
            .collect()
    }
}
