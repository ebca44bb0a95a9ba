use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{ContractChanged, OutboxEntry};
use crate::models::{
    AuditEntry, Contract, DeletionRequest, DeletionStatus, Notification, UserProfile,
};
use crate::state::ContractState;

#[derive(Debug, Clone)]
pub enum ContractWrite {
    Insert(Contract),
    /// Compare-and-swap: succeeds only while the stored row is still at
    /// `expected_version`. The stored version becomes `contract.version`.
    Update {
        contract: Contract,
        expected_version: i64,
    },
}

impl ContractWrite {
    pub fn contract(&self) -> &Contract {
        match self {
            Self::Insert(contract) => contract,
            Self::Update { contract, .. } => contract,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DeletionRequestWrite {
    /// Rejected with [`StoreError::Duplicate`] while another request for the
    /// same contract is pending.
    Insert(DeletionRequest),
    /// Applies only while the stored request is still pending.
    Resolve(DeletionRequest),
}

/// Everything one transition writes, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub contract: Option<ContractWrite>,
    pub deletion_request: Option<DeletionRequestWrite>,
    pub audit: Vec<AuditEntry>,
    pub outbox: Vec<OutboxEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ContractFilter {
    pub client_id: Option<Uuid>,
    pub affiliate_id: Option<Uuid>,
    pub state: Option<ContractState>,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractSummary {
    pub contracts_total: i64,
    pub draft: i64,
    pub pending_signature: i64,
    pub pending_payment_proof: i64,
    pub pending_verification: i64,
    pub active: i64,
    pub cancelled: i64,
    pub deletion_requests_pending: i64,
    pub active_value: Decimal,
    pub deposits_collected: Decimal,
}

impl ContractSummary {
    /// Folds live (non-tombstoned) contracts into the dashboard counters.
    pub fn tally<'a>(
        contracts: impl IntoIterator<Item = &'a Contract>,
        deletion_requests_pending: i64,
    ) -> Self {
        let mut summary = Self {
            deletion_requests_pending,
            ..Self::default()
        };
        for contract in contracts.into_iter().filter(|c| !c.is_deleted()) {
            summary.contracts_total += 1;
            match contract.state {
                ContractState::Draft => summary.draft += 1,
                ContractState::PendingAdminSignature | ContractState::PendingClientSignature => {
                    summary.pending_signature += 1
                }
                ContractState::PendingPaymentProof => summary.pending_payment_proof += 1,
                ContractState::PendingVerification => summary.pending_verification += 1,
                ContractState::Active => {
                    summary.active += 1;
                    summary.active_value += contract.total_amount;
                }
                ContractState::Cancelled => summary.cancelled += 1,
            }
            if contract.deposit_collected() {
                summary.deposits_collected += contract.deposit_amount;
            }
        }
        summary
    }
}

#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError>;

    /// Returns tombstoned contracts too; callers decide how to treat them.
    async fn contract(&self, id: Uuid) -> Result<Option<Contract>, StoreError>;

    async fn contract_by_share_token(&self, token: &str) -> Result<Option<Contract>, StoreError>;

    /// Newest first, tombstoned contracts excluded.
    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, StoreError>;

    /// Oldest first.
    async fn contract_history(&self, contract_id: Uuid) -> Result<Vec<AuditEntry>, StoreError>;

    async fn deletion_request(&self, id: Uuid) -> Result<Option<DeletionRequest>, StoreError>;

    async fn list_deletion_requests(
        &self,
        status: Option<DeletionStatus>,
        requested_by: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<DeletionRequest>, StoreError>;

    async fn summary(&self) -> Result<ContractSummary, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Rejected with [`StoreError::Duplicate`] when the e-mail is taken.
    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError>;

    async fn user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError>;

    async fn admins(&self) -> Result<Vec<UserProfile>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    async fn notifications_for(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Returns `false` when the notification does not belong to `user_id`.
    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<bool, StoreError>;

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` pending entries due at `now`. Each claimed entry
    /// has its attempt counter bumped and is hidden for `lease` so a crashed
    /// worker's batch becomes due again.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn reschedule(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError>;

    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<(), StoreError>;
}

/// Outbound e-mail boundary.
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn send_notification_email(
        &self,
        to: &str,
        subject: &str,
        message: &str,
        link: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Best-effort publication of committed changes for live UI refresh.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn publish(&self, change: &ContractChanged) -> anyhow::Result<()>;
}

/// A feed that drops everything; used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChangeFeed;

#[async_trait]
impl ChangeFeed for NoopChangeFeed {
    async fn publish(&self, _change: &ContractChanged) -> anyhow::Result<()> {
        Ok(())
    }
}
