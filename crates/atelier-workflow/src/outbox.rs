use std::{cmp::min, sync::Arc};

use anyhow::Context;
use atelier_core::{
    EmailSink, Notification, NotificationStore, OutboxChannel, OutboxEntry, OutboxStore,
    StoreError,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{error, warn};

/// Exponential backoff for outbox deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::seconds(30),
            max_delay: Duration::hours(1),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from configured wall-clock durations.
    pub fn from_std(
        max_attempts: i32,
        base_delay: std::time::Duration,
        max_delay: std::time::Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            max_attempts,
            base_delay: Duration::from_std(base_delay).context("base delay is out of range")?,
            max_delay: Duration::from_std(max_delay).context("max delay is out of range")?,
        })
    }

    /// Delay before the attempt following attempt number `attempts`.
    pub fn delay_after(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 20) as u32;
        let millis = self
            .base_delay
            .num_milliseconds()
            .saturating_mul(1_i64 << exponent);
        min(Duration::milliseconds(millis), self.max_delay)
    }

    /// `None` once the attempts are used up.
    pub fn next_attempt(&self, attempts: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            None
        } else {
            Some(now + self.delay_after(attempts))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Drains the notification outbox: in-app entries become notifications,
/// e-mail entries go to the [`EmailSink`].
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxStore>,
    notifications: Arc<dyn NotificationStore>,
    email: Arc<dyn EmailSink>,
    policy: RetryPolicy,
    batch_size: i64,
    lease: Duration,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        notifications: Arc<dyn NotificationStore>,
        email: Arc<dyn EmailSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            outbox,
            notifications,
            email,
            policy,
            batch_size: 50,
            lease: Duration::minutes(2),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Processes one claimed batch.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchReport, StoreError> {
        let batch = self.outbox.claim_due(now, self.lease, self.batch_size).await?;
        let mut report = DispatchReport {
            claimed: batch.len(),
            ..DispatchReport::default()
        };

        for entry in batch {
            match self.deliver(&entry).await {
                Ok(()) => {
                    self.outbox.mark_delivered(entry.id, Utc::now()).await?;
                    report.delivered += 1;
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    match self.policy.next_attempt(entry.attempts, now) {
                        Some(next_attempt_at) => {
                            warn!(
                                "outbox entry {} ({}) failed on attempt {}: {reason}",
                                entry.id,
                                entry.channel.as_str(),
                                entry.attempts
                            );
                            self.outbox
                                .reschedule(entry.id, next_attempt_at, &reason)
                                .await?;
                            report.retried += 1;
                        }
                        None => {
                            error!(
                                "outbox entry {} ({}) given up after {} attempts: {reason}",
                                entry.id,
                                entry.channel.as_str(),
                                entry.attempts
                            );
                            self.outbox.mark_dead(entry.id, &reason).await?;
                            report.dead += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Keeps claiming until a batch comes back short.
    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DispatchReport, StoreError> {
        let mut total = DispatchReport::default();
        loop {
            let report = self.run_once(now).await?;
            total.claimed += report.claimed;
            total.delivered += report.delivered;
            total.retried += report.retried;
            total.dead += report.dead;
            if (report.claimed as i64) < self.batch_size {
                return Ok(total);
            }
        }
    }

    async fn deliver(&self, entry: &OutboxEntry) -> anyhow::Result<()> {
        match entry.channel {
            OutboxChannel::InApp => {
                // The entry id doubles as the notification id so a redelivery
                // after a lost acknowledgement does not duplicate it.
                let notification = Notification {
                    id: entry.id,
                    user_id: entry.recipient_id,
                    title: entry.title.clone(),
                    message: entry.message.clone(),
                    kind: entry.kind.clone(),
                    related_id: entry.related_id,
                    link: entry.link.clone(),
                    read: false,
                    created_at: entry.created_at,
                };
                self.notifications.insert_notification(&notification).await?;
            }
            OutboxChannel::Email => {
                let to = entry
                    .recipient_email
                    .as_deref()
                    .context("recipient has no e-mail address")?;
                self.email
                    .send_notification_email(to, &entry.title, &entry.message, entry.link.as_deref())
                    .await?;
            }
        }
        Ok(())
    }
}
