use std::sync::Arc;

use atelier_core::{
    Actor, AuditEntry, ChangeFeed, ChangeSet, Contract, ContractChanged, ContractEventKind,
    ContractFilter, ContractState, ContractStore, ContractSummary, DeletionRequest,
    DeletionRequestWrite, DeletionStatus, Notification, NotificationStore, OutboxEntry,
    ReviewDecision, Role, StoreError, UserProfile, UserStore, WorkflowError,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::deletion::{self, DeletionResolution};
use crate::fanout::{notice_for, outbox_entries};
use crate::payment::{self, ProofUpload};
use crate::transitions::{self, DraftInput, Transition, non_blank};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Base of the links carried by notifications.
    pub public_base_url: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

/// The people named on a contract, for document rendering.
#[derive(Debug, Clone)]
pub struct ContractParties {
    pub client: UserProfile,
    pub affiliate: Option<UserProfile>,
}

/// Entry point for every portal operation: loads state, runs the pure
/// transition, and commits the result together with its audit and outbox
/// entries.
#[derive(Clone)]
pub struct ContractService {
    contracts: Arc<dyn ContractStore>,
    users: Arc<dyn UserStore>,
    notifications: Arc<dyn NotificationStore>,
    feed: Arc<dyn ChangeFeed>,
    settings: ServiceSettings,
}

impl ContractService {
    pub fn new<S>(store: Arc<S>, feed: Arc<dyn ChangeFeed>, settings: ServiceSettings) -> Self
    where
        S: ContractStore + UserStore + NotificationStore + 'static,
    {
        Self {
            contracts: store.clone(),
            users: store.clone(),
            notifications: store,
            feed,
            settings,
        }
    }

    /// Resolves the caller named by the request, if any.
    pub async fn authenticate(&self, user_id: Option<Uuid>) -> Result<Actor, WorkflowError> {
        let user_id = user_id.ok_or(WorkflowError::Unauthenticated)?;
        let user = self
            .users
            .user(user_id)
            .await?
            .ok_or(WorkflowError::Unauthenticated)?;
        Ok(Actor::from(&user))
    }

    pub async fn me(&self, actor: &Actor) -> Result<UserProfile, WorkflowError> {
        self.users
            .user(actor.user_id)
            .await?
            .ok_or(WorkflowError::Unauthenticated)
    }

    pub async fn register_user(
        &self,
        actor: &Actor,
        new_user: NewUser,
    ) -> Result<UserProfile, WorkflowError> {
        require_admin(actor, "only admins can register users")?;
        let user = profile(new_user, Utc::now())?;
        self.users.insert_user(&user).await?;
        info!("registered {} {} ({})", user.role, user.id, user.email);
        Ok(user)
    }

    /// Creates the first admin on an empty installation. Returns `None`
    /// when an admin already exists.
    pub async fn bootstrap_admin(
        &self,
        email: &str,
        full_name: &str,
    ) -> Result<Option<UserProfile>, WorkflowError> {
        if !self.users.admins().await?.is_empty() {
            return Ok(None);
        }
        let user = profile(
            NewUser {
                email: email.to_string(),
                full_name: full_name.to_string(),
                role: Role::Admin,
            },
            Utc::now(),
        )?;
        self.users.insert_user(&user).await?;
        info!("bootstrapped admin {} ({})", user.id, user.email);
        Ok(Some(user))
    }

    pub async fn create_contract(
        &self,
        actor: &Actor,
        input: DraftInput,
    ) -> Result<Contract, WorkflowError> {
        if actor.role == Role::Client {
            return Err(WorkflowError::forbidden("clients cannot create contracts"));
        }
        self.require_role(input.client_id, Role::Client, "client_id")
            .await?;
        if actor.is_admin() {
            if let Some(affiliate_id) = input.affiliate_id {
                self.require_role(affiliate_id, Role::Affiliate, "affiliate_id")
                    .await?;
            }
        }

        let transition = transitions::draft_contract(input, actor, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn contract(&self, actor: &Actor, id: Uuid) -> Result<Contract, WorkflowError> {
        let contract = self
            .contracts
            .contract(id)
            .await?
            .filter(|contract| !contract.is_deleted())
            .ok_or(WorkflowError::NotFound("contract"))?;
        if !contract.is_visible_to(actor) {
            return Err(WorkflowError::forbidden("contract belongs to another party"));
        }
        Ok(contract)
    }

    pub async fn shared_contract(&self, token: &str) -> Result<Contract, WorkflowError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(WorkflowError::NotFound("contract"));
        }
        self.contracts
            .contract_by_share_token(token)
            .await?
            .filter(|contract| !contract.is_deleted())
            .ok_or(WorkflowError::NotFound("contract"))
    }

    pub async fn list_contracts(
        &self,
        actor: &Actor,
        state: Option<ContractState>,
        limit: Option<i64>,
    ) -> Result<Vec<Contract>, WorkflowError> {
        let mut filter = ContractFilter {
            state,
            limit: clamp_limit(limit),
            ..ContractFilter::default()
        };
        match actor.role {
            Role::Admin => {}
            Role::Client => filter.client_id = Some(actor.user_id),
            Role::Affiliate => filter.affiliate_id = Some(actor.user_id),
        }
        Ok(self.contracts.list_contracts(&filter).await?)
    }

    /// Audit trail, oldest first. Stays readable after the contract is
    /// tombstoned.
    pub async fn contract_history(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Vec<AuditEntry>, WorkflowError> {
        require_admin(actor, "only admins can read contract history")?;
        if self.contracts.contract(id).await?.is_none() {
            return Err(WorkflowError::NotFound("contract"));
        }
        Ok(self.contracts.contract_history(id).await?)
    }

    pub async fn contract_parties(
        &self,
        contract: &Contract,
    ) -> Result<ContractParties, WorkflowError> {
        let client = self
            .users
            .user(contract.client_id)
            .await?
            .ok_or(WorkflowError::NotFound("client"))?;
        let affiliate = match contract.affiliate_id {
            Some(id) => self.users.user(id).await?,
            None => None,
        };
        Ok(ContractParties { client, affiliate })
    }

    pub async fn submit_for_signature(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.contract(actor, id).await?;
        let transition = transitions::submit_for_signature(&contract, actor, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn sign_as_admin(
        &self,
        actor: &Actor,
        id: Uuid,
        signature: &str,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.contract(actor, id).await?;
        let transition = transitions::sign_as_admin(&contract, actor, signature, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn sign_as_client(
        &self,
        actor: &Actor,
        id: Uuid,
        signature: &str,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.contract(actor, id).await?;
        let transition = transitions::sign_as_client(&contract, actor, signature, Utc::now())?;
        self.commit(transition).await
    }

    /// Client signature through the share link; the token stands in for
    /// the client's session.
    pub async fn sign_shared(&self, token: &str, signature: &str) -> Result<Contract, WorkflowError> {
        let contract = self.shared_contract(token).await?;
        let actor = Actor::new(contract.client_id, Role::Client);
        let transition = transitions::sign_as_client(&contract, &actor, signature, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn cancel(
        &self,
        actor: &Actor,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.contract(actor, id).await?;
        let transition = transitions::cancel(&contract, actor, reason, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn upload_payment_proof(
        &self,
        actor: &Actor,
        id: Uuid,
        upload: &ProofUpload,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.contract(actor, id).await?;
        let transition = payment::upload_payment_proof(&contract, actor, upload, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn upload_shared_payment_proof(
        &self,
        token: &str,
        upload: &ProofUpload,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.shared_contract(token).await?;
        let actor = Actor::new(contract.client_id, Role::Client);
        let transition = payment::upload_payment_proof(&contract, &actor, upload, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn verify_payment(
        &self,
        actor: &Actor,
        id: Uuid,
        decision: ReviewDecision,
        notes: Option<&str>,
    ) -> Result<Contract, WorkflowError> {
        let contract = self.contract(actor, id).await?;
        let transition = payment::verify_payment(&contract, actor, decision, notes, Utc::now())?;
        self.commit(transition).await
    }

    pub async fn request_deletion(
        &self,
        actor: &Actor,
        contract_id: Uuid,
        reason: &str,
    ) -> Result<DeletionRequest, WorkflowError> {
        let contract = self.contract(actor, contract_id).await?;
        let now = Utc::now();
        let request = deletion::request_deletion(&contract, actor, reason, now)?;

        let kind = ContractEventKind::DeletionRequested;
        let recipients = self.users.admins().await?;
        let changes = ChangeSet {
            contract: None,
            deletion_request: Some(DeletionRequestWrite::Insert(request.clone())),
            audit: vec![audit_without_transition(
                &contract,
                kind,
                actor,
                Some(request.reason.clone()),
                now,
            )],
            outbox: self.fan_out(&recipients, kind, &contract, Some(&request.reason), now),
        };
        self.persist(changes, &contract, kind, actor.user_id).await?;
        Ok(request)
    }

    pub async fn list_deletion_requests(
        &self,
        actor: &Actor,
        status: Option<DeletionStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<DeletionRequest>, WorkflowError> {
        let requested_by = match actor.role {
            Role::Admin => None,
            Role::Affiliate => Some(actor.user_id),
            Role::Client => {
                return Err(WorkflowError::forbidden(
                    "clients have no deletion requests",
                ));
            }
        };
        Ok(self
            .contracts
            .list_deletion_requests(status, requested_by, clamp_limit(limit))
            .await?)
    }

    pub async fn resolve_deletion(
        &self,
        actor: &Actor,
        request_id: Uuid,
        decision: ReviewDecision,
        notes: Option<&str>,
    ) -> Result<DeletionRequest, WorkflowError> {
        require_admin(actor, "only admins can resolve deletion requests")?;
        let request = self
            .contracts
            .deletion_request(request_id)
            .await?
            .ok_or(WorkflowError::NotFound("deletion request"))?;
        let contract = self
            .contracts
            .contract(request.contract_id)
            .await?
            .ok_or(WorkflowError::NotFound("contract"))?;

        let now = Utc::now();
        let DeletionResolution { request, tombstone } =
            deletion::resolve_deletion(&request, &contract, actor, decision, notes, now)?;

        let requester = self.users.user(request.requested_by).await?;
        let recipients: Vec<UserProfile> = requester.into_iter().collect();
        let note = request.review_notes.clone();

        let (changes, after, kind) = match tombstone {
            Some(transition) => {
                let kind = transition.kind;
                let changes = ChangeSet {
                    contract: Some(transition.write()),
                    deletion_request: Some(DeletionRequestWrite::Resolve(request.clone())),
                    audit: vec![transition.audit_entry()],
                    outbox: self.fan_out(&recipients, kind, &transition.contract, None, now),
                };
                (changes, transition.contract, kind)
            }
            None => {
                let kind = ContractEventKind::DeletionRejected;
                let changes = ChangeSet {
                    contract: None,
                    deletion_request: Some(DeletionRequestWrite::Resolve(request.clone())),
                    audit: vec![audit_without_transition(&contract, kind, actor, note.clone(), now)],
                    outbox: self.fan_out(&recipients, kind, &contract, note.as_deref(), now),
                };
                (changes, contract, kind)
            }
        };

        self.persist(changes, &after, kind, actor.user_id).await?;
        Ok(request)
    }

    pub async fn notifications(
        &self,
        actor: &Actor,
        unread_only: bool,
        limit: Option<i64>,
    ) -> Result<Vec<Notification>, WorkflowError> {
        Ok(self
            .notifications
            .notifications_for(actor.user_id, unread_only, clamp_limit(limit))
            .await?)
    }

    pub async fn mark_notification_read(
        &self,
        actor: &Actor,
        notification_id: Uuid,
    ) -> Result<(), WorkflowError> {
        if self
            .notifications
            .mark_read(actor.user_id, notification_id)
            .await?
        {
            Ok(())
        } else {
            Err(WorkflowError::NotFound("notification"))
        }
    }

    pub async fn mark_all_notifications_read(&self, actor: &Actor) -> Result<u64, WorkflowError> {
        Ok(self.notifications.mark_all_read(actor.user_id).await?)
    }

    pub async fn dashboard_summary(&self, actor: &Actor) -> Result<ContractSummary, WorkflowError> {
        require_admin(actor, "only admins can read the dashboard")?;
        Ok(self.contracts.summary().await?)
    }

    async fn commit(&self, transition: Transition) -> Result<Contract, WorkflowError> {
        let kind = transition.kind;
        let recipients = self.recipients(kind, &transition.contract).await?;
        let changes = ChangeSet {
            contract: Some(transition.write()),
            deletion_request: None,
            audit: vec![transition.audit_entry()],
            outbox: self.fan_out(
                &recipients,
                kind,
                &transition.contract,
                transition.note.as_deref(),
                transition.occurred_at,
            ),
        };
        self.persist(changes, &transition.contract, kind, transition.actor_id)
            .await?;
        Ok(transition.contract)
    }

    async fn persist(
        &self,
        changes: ChangeSet,
        contract: &Contract,
        kind: ContractEventKind,
        actor_id: Uuid,
    ) -> Result<(), WorkflowError> {
        if let Some(write) = &changes.contract {
            // A violation here is a bug in a transition, not caller input.
            write.contract().check_invariants().map_err(|reason| {
                WorkflowError::Store(StoreError::Backend(anyhow::anyhow!(
                    "refusing to persist contract {}: {reason}",
                    contract.id
                )))
            })?;
        }

        self.contracts.apply(changes).await?;
        info!(
            "contract {} {} by {} (state {}, version {})",
            contract.contract_number,
            kind.tag(),
            actor_id,
            contract.state,
            contract.version
        );

        let change = ContractChanged {
            contract_id: contract.id,
            client_id: contract.client_id,
            affiliate_id: contract.affiliate_id,
            kind,
            state: contract.state,
            version: contract.version,
            deleted: contract.is_deleted(),
            occurred_at: Utc::now(),
        };
        if let Err(err) = self.feed.publish(&change).await {
            warn!("failed to publish change for contract {}: {err:#}", contract.id);
        }
        Ok(())
    }

    async fn recipients(
        &self,
        kind: ContractEventKind,
        contract: &Contract,
    ) -> Result<Vec<UserProfile>, WorkflowError> {
        let mut recipients = Vec::new();
        let include_client = !matches!(
            kind,
            ContractEventKind::Created | ContractEventKind::SubmittedForSignature
        );
        if include_client {
            if let Some(client) = self.users.user(contract.client_id).await? {
                recipients.push(client);
            }
        }
        if let Some(affiliate_id) = contract.affiliate_id {
            if let Some(affiliate) = self.users.user(affiliate_id).await? {
                recipients.push(affiliate);
            }
        }
        recipients.extend(self.users.admins().await?);
        Ok(recipients)
    }

    fn fan_out(
        &self,
        recipients: &[UserProfile],
        kind: ContractEventKind,
        contract: &Contract,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<OutboxEntry> {
        let notice = notice_for(kind, contract, note);
        outbox_entries(
            recipients,
            &notice,
            kind,
            contract,
            &self.settings.public_base_url,
            now,
        )
    }

    async fn require_role(
        &self,
        user_id: Uuid,
        role: Role,
        field: &str,
    ) -> Result<(), WorkflowError> {
        match self.users.user(user_id).await? {
            Some(user) if user.role == role => Ok(()),
            Some(user) => Err(WorkflowError::validation(format!(
                "{field} refers to a {} account, expected {role}",
                user.role
            ))),
            None => Err(WorkflowError::validation(format!(
                "{field} does not refer to a known user"
            ))),
        }
    }
}

fn require_admin(actor: &Actor, message: &str) -> Result<(), WorkflowError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(message))
    }
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT)
}

fn profile(new_user: NewUser, now: DateTime<Utc>) -> Result<UserProfile, WorkflowError> {
    let email = normalize_email(&new_user.email)?;
    let full_name = non_blank(Some(&new_user.full_name))
        .ok_or_else(|| WorkflowError::validation("full_name is required"))?;
    Ok(UserProfile {
        id: Uuid::new_v4(),
        email,
        full_name,
        role: new_user.role,
        created_at: now,
    })
}

fn normalize_email(value: &str) -> Result<String, WorkflowError> {
    let email = value.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(WorkflowError::validation("email is not a valid address")),
    }
}

fn audit_without_transition(
    contract: &Contract,
    kind: ContractEventKind,
    actor: &Actor,
    note: Option<String>,
    now: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4(),
        contract_id: contract.id,
        action: kind.tag().to_string(),
        actor_id: actor.user_id,
        from_state: Some(contract.state),
        to_state: contract.state,
        note,
        occurred_at: now,
    }
}
