use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;

/// Redis channels carrying lifecycle events for external consumers
/// (notification and analytics workers live outside this repo).
pub const CHANNEL_OFFER_ACCEPTED: &str = "offers.accepted";
pub const CHANNEL_OFFER_DECLINED: &str = "offers.declined";
pub const CHANNEL_ORDER_STATUS: &str = "orders.status";

#[derive(Clone)]
pub struct EventBus {
    client: Client,
}

impl EventBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish<T: Serialize>(&self, channel: &str, event: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(event)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}
