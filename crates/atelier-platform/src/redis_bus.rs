use anyhow::Result;
use async_trait::async_trait;
use atelier_core::{ChangeFeed, ContractChanged, EmailSink};
use redis::{AsyncCommands, Client};
use serde::Serialize;

use crate::contracts::OutboundMail;

/// Committed contract changes, for live views and worker wake-ups.
pub const CONTRACTS_CHANGED_CHANNEL: &str = "contracts.changed";
/// Outbound e-mail, consumed by the mail relay.
pub const MAIL_OUTBOUND_CHANNEL: &str = "mail.outbound";

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for RedisBus {
    async fn publish(&self, change: &ContractChanged) -> Result<()> {
        self.publish_json(CONTRACTS_CHANGED_CHANNEL, change).await
    }
}

#[async_trait]
impl EmailSink for RedisBus {
    async fn send_notification_email(
        &self,
        to: &str,
        subject: &str,
        message: &str,
        link: Option<&str>,
    ) -> Result<()> {
        let mail = OutboundMail {
            to: to.to_string(),
            subject: subject.to_string(),
            message: message.to_string(),
            link: link.map(str::to_string),
        };
        self.publish_json(MAIL_OUTBOUND_CHANNEL, &mail).await
    }
}
