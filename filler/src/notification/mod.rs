use async_trait::async_trait;
use atomic_common::{chain::BlockPosition, config::CHANNEL_PREFIX};
use log::{error, trace};
use redis::AsyncCommands;
use serde_json::{json, Value};
use thiserror::Error;

pub mod topics {
    pub const ASSETS: &str = "assets";
    pub const OFFERS: &str = "offers";
    pub const TRANSFERS: &str = "transfers";
    pub const COLLECTIONS: &str = "collections";
    pub const SCHEMAS: &str = "schemas";
    pub const TEMPLATES: &str = "templates";
    pub const SALES: &str = "sales";
    pub const AUCTIONS: &str = "auctions";
    pub const BUYOFFERS: &str = "buyoffers";
    pub const BIDS: &str = "bids";
    pub const CHAIN: &str = "chain";
}

pub mod actions {
    pub const CREATE: &str = "create";
    pub const MINT: &str = "mint";
    pub const BURN: &str = "burn";
    pub const BACK: &str = "back";
    pub const UPDATE: &str = "update";
    pub const STATE_CHANGE: &str = "state_change";
    pub const FORK: &str = "fork";
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Sink for published channel messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotificationError>;
}

/// Redis pub/sub publisher behind a reconnecting connection manager.
pub struct RedisPublisher {
    connection: redis::aio::ConnectionManager,
}

impl RedisPublisher {
    pub async fn connect(dsn: &str) -> Result<Self, NotificationError> {
        let client = redis::Client::open(dsn)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotificationError> {
        let mut connection = self.connection.clone();
        connection.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

/// One staged change event, held by its handler until the block's database
/// transaction commits.
#[derive(Debug, Clone)]
pub struct Notification {
    pub handler: &'static str,
    pub contract: String,
    pub topic: &'static str,
    pub action: &'static str,
    pub data: Value,
    pub block: BlockPosition,
    pub txid: Option<String>,
}

/// Fans change events out on named channels.
///
/// Channel names follow
/// `eosio-contract-api:<chain>:<reader>:<handler>:<contract>:<topic>`.
/// Publish failures are logged and swallowed: they can never roll back
/// committed data.
pub struct NotificationBus {
    publisher: Box<dyn Publisher>,
    chain: String,
    reader: String,
}

impl NotificationBus {
    pub fn new(publisher: Box<dyn Publisher>, chain: &str, reader: &str) -> Self {
        Self {
            publisher,
            chain: chain.to_string(),
            reader: reader.to_string(),
        }
    }

    pub fn channel(&self, handler: &str, contract: &str, topic: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            CHANNEL_PREFIX, self.chain, self.reader, handler, contract, topic
        )
    }

    pub async fn publish(&self, notification: &Notification) {
        let channel = self.channel(
            notification.handler,
            &notification.contract,
            notification.topic,
        );

        let mut payload = json!({
            "action": notification.action,
            "data": notification.data,
            "block": {
                "block_num": notification.block.block_num,
                "block_id": notification.block.block_id,
            },
        });
        if let Some(txid) = &notification.txid {
            payload["transaction"] = json!({ "id": txid });
        }

        trace!("Publishing {} -> {}", notification.action, channel);
        if let Err(e) = self.publisher.publish(&channel, &payload.to_string()).await {
            error!("Failed to publish notification on {}: {}", channel, e);
        }
    }

    /// Chain-level events (forks) go out on a reader-wide channel.
    pub async fn publish_chain(&self, action: &str, data: Value) {
        let channel = format!("{}:{}:{}:chain", CHANNEL_PREFIX, self.chain, self.reader);
        let payload = json!({ "action": action, "data": data });
        if let Err(e) = self.publisher.publish(&channel, &payload.to_string()).await {
            error!("Failed to publish chain event on {}: {}", channel, e);
        }
    }

    /// Flush a handler's staged notifications in enqueue order.
    pub async fn flush(&self, staged: Vec<Notification>) {
        for notification in staged {
            self.publish(&notification).await;
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Publisher collecting everything in memory, for assertions.
    #[derive(Default, Clone)]
    pub struct CollectingPublisher {
        messages: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl CollectingPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn messages(&self) -> Vec<(String, String)> {
            self.messages.lock().expect("collector lock").clone()
        }
    }

    #[async_trait]
    impl Publisher for CollectingPublisher {
        async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotificationError> {
            self.messages
                .lock()
                .expect("collector lock")
                .push((channel.to_string(), payload.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_support::CollectingPublisher, *};

    #[tokio::test]
    async fn test_channel_scheme_and_payload() {
        let collector = CollectingPublisher::new();
        let bus = NotificationBus::new(Box::new(collector.clone()), "wax", "atomic-1");

        bus.publish(&Notification {
            handler: "atomicassets",
            contract: "atomicassets".to_string(),
            topic: topics::ASSETS,
            action: actions::MINT,
            data: json!({"asset_id": "42"}),
            block: BlockPosition {
                block_num: 100,
                block_id: "00aa".to_string(),
            },
            txid: Some("beef".to_string()),
        })
        .await;

        let messages = collector.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].0,
            "eosio-contract-api:wax:atomic-1:atomicassets:atomicassets:assets"
        );

        let payload: Value = serde_json::from_str(&messages[0].1).unwrap();
        assert_eq!(payload["action"], "mint");
        assert_eq!(payload["block"]["block_num"], 100);
        assert_eq!(payload["transaction"]["id"], "beef");
    }
}
