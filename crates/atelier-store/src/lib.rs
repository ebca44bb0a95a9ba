use std::collections::HashMap;

use async_trait::async_trait;
use atelier_core::{
    AuditEntry, ChangeSet, Contract, ContractFilter, ContractStore, ContractSummary,
    ContractWrite, DeletionRequest, DeletionRequestWrite, DeletionStatus, Notification,
    NotificationStore, OutboxEntry, OutboxStatus, OutboxStore, Role, StoreError, UserProfile,
    UserStore,
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserProfile>,
    contracts: HashMap<Uuid, Contract>,
    deletion_requests: HashMap<Uuid, DeletionRequest>,
    audit: Vec<AuditEntry>,
    notifications: HashMap<Uuid, Notification>,
    outbox: HashMap<Uuid, OutboxEntry>,
}

/// Process-local store behind one lock, so every [`ChangeSet`] lands
/// atomically. Used by tests and by the gateway's `memory` mode.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox entry regardless of status, oldest first.
    pub async fn outbox_snapshot(&self) -> Vec<OutboxEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<OutboxEntry> = state.outbox.values().cloned().collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }
}

impl State {
    /// Rejects the change set without touching anything.
    fn check(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        match &changes.contract {
            Some(ContractWrite::Insert(contract)) => {
                if self.contracts.contains_key(&contract.id) {
                    return Err(StoreError::Duplicate(format!(
                        "contract {} already exists",
                        contract.id
                    )));
                }
                if self
                    .contracts
                    .values()
                    .any(|stored| stored.share_token == contract.share_token)
                {
                    return Err(StoreError::Duplicate("share token already in use".to_string()));
                }
            }
            Some(ContractWrite::Update {
                contract,
                expected_version,
            }) => {
                let stored = self
                    .contracts
                    .get(&contract.id)
                    .ok_or(StoreError::NotFound)?;
                if stored.version != *expected_version {
                    return Err(StoreError::VersionConflict {
                        contract_id: contract.id,
                        expected: *expected_version,
                    });
                }
            }
            None => {}
        }

        match &changes.deletion_request {
            Some(DeletionRequestWrite::Insert(request)) => {
                let pending = self.deletion_requests.values().any(|stored| {
                    stored.contract_id == request.contract_id
                        && stored.status == DeletionStatus::Pending
                });
                if pending {
                    return Err(StoreError::Duplicate(
                        "a deletion request for this contract is already pending".to_string(),
                    ));
                }
            }
            Some(DeletionRequestWrite::Resolve(request)) => {
                let stored = self
                    .deletion_requests
                    .get(&request.id)
                    .ok_or(StoreError::NotFound)?;
                if stored.status != DeletionStatus::Pending {
                    return Err(StoreError::AlreadyResolved(request.id));
                }
            }
            None => {}
        }

        Ok(())
    }

    fn outbox_entry(&mut self, id: Uuid) -> Result<&mut OutboxEntry, StoreError> {
        self.outbox.get_mut(&id).ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl ContractStore for InMemoryStore {
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check(&changes)?;

        if let Some(write) = changes.contract {
            let contract = match write {
                ContractWrite::Insert(contract) => contract,
                ContractWrite::Update { contract, .. } => contract,
            };
            state.contracts.insert(contract.id, contract);
        }
        if let Some(write) = changes.deletion_request {
            let request = match write {
                DeletionRequestWrite::Insert(request) => request,
                DeletionRequestWrite::Resolve(request) => request,
            };
            state.deletion_requests.insert(request.id, request);
        }
        state.audit.extend(changes.audit);
        for entry in changes.outbox {
            state.outbox.insert(entry.id, entry);
        }
        Ok(())
    }

    async fn contract(&self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        Ok(self.state.read().await.contracts.get(&id).cloned())
    }

    async fn contract_by_share_token(&self, token: &str) -> Result<Option<Contract>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .contracts
            .values()
            .find(|contract| contract.share_token == token)
            .cloned())
    }

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, StoreError> {
        let state = self.state.read().await;
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|contract| !contract.is_deleted())
            .filter(|contract| filter.client_id.is_none_or(|id| contract.client_id == id))
            .filter(|contract| {
                filter
                    .affiliate_id
                    .is_none_or(|id| contract.affiliate_id == Some(id))
            })
            .filter(|contract| filter.state.is_none_or(|state| contract.state == state))
            .cloned()
            .collect();
        contracts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        contracts.truncate(filter.limit.max(0) as usize);
        Ok(contracts)
    }

    async fn contract_history(&self, contract_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<AuditEntry> = state
            .audit
            .iter()
            .filter(|entry| entry.contract_id == contract_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.occurred_at);
        Ok(entries)
    }

    async fn deletion_request(&self, id: Uuid) -> Result<Option<DeletionRequest>, StoreError> {
        Ok(self.state.read().await.deletion_requests.get(&id).cloned())
    }

    async fn list_deletion_requests(
        &self,
        status: Option<DeletionStatus>,
        requested_by: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<DeletionRequest>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<DeletionRequest> = state
            .deletion_requests
            .values()
            .filter(|request| status.is_none_or(|status| request.status == status))
            .filter(|request| requested_by.is_none_or(|id| request.requested_by == id))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests.truncate(limit.max(0) as usize);
        Ok(requests)
    }

    async fn summary(&self) -> Result<ContractSummary, StoreError> {
        let state = self.state.read().await;
        let pending = state
            .deletion_requests
            .values()
            .filter(|request| request.status == DeletionStatus::Pending)
            .count() as i64;
        Ok(ContractSummary::tally(state.contracts.values(), pending))
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let taken = state
            .users
            .values()
            .any(|existing| existing.id == user.id || existing.email.eq_ignore_ascii_case(&user.email));
        if taken {
            return Err(StoreError::Duplicate(format!(
                "{} is already registered",
                user.email
            )));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn admins(&self) -> Result<Vec<UserProfile>, StoreError> {
        let state = self.state.read().await;
        let mut admins: Vec<UserProfile> = state
            .users
            .values()
            .filter(|user| user.role == Role::Admin)
            .cloned()
            .collect();
        admins.sort_by_key(|user| user.created_at);
        Ok(admins)
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .notifications
            .entry(notification.id)
            .or_insert_with(|| notification.clone());
        Ok(())
    }

    async fn notifications_for(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.read().await;
        let mut notifications: Vec<Notification> = state
            .notifications
            .values()
            .filter(|notification| notification.user_id == user_id)
            .filter(|notification| !unread_only || !notification.read)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        notifications.truncate(limit.max(0) as usize);
        Ok(notifications)
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.notifications.get_mut(&notification_id) {
            Some(notification) if notification.user_id == user_id => {
                notification.read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for notification in state.notifications.values_mut() {
            if notification.user_id == user_id && !notification.read {
                notification.read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut state = self.state.write().await;
        let mut due: Vec<(DateTime<Utc>, Uuid)> = state
            .outbox
            .values()
            .filter(|entry| entry.status == OutboxStatus::Pending && entry.next_attempt_at <= now)
            .map(|entry| (entry.next_attempt_at, entry.id))
            .collect();
        due.sort();
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            let entry = state.outbox_entry(id)?;
            entry.attempts += 1;
            entry.next_attempt_at = now + lease;
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state.outbox_entry(id)?;
        entry.status = OutboxStatus::Delivered;
        entry.delivered_at = Some(at);
        entry.last_error = None;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state.outbox_entry(id)?;
        entry.next_attempt_at = next_attempt_at;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state.outbox_entry(id)?;
        entry.status = OutboxStatus::Dead;
        entry.last_error = Some(error.to_string());
        Ok(())
    }
}
