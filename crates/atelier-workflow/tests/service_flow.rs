use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use atelier_core::{
    Actor, AuditEntry, ChangeFeed, ChangeSet, Contract, ContractChanged, ContractEventKind,
    ContractFilter, ContractState, ContractStore, ContractSummary, DeletionRequest,
    DeletionStatus, Notification, NotificationStore, OutboxChannel, PaymentMethod, PaymentStatus,
    ReviewDecision, Role, StoreError, UserProfile, UserStore, WorkflowError,
};
use atelier_store::InMemoryStore;
use atelier_workflow::{ContractService, DraftInput, NewUser, ProofUpload, ServiceSettings};
use rust_decimal::Decimal;
use tokio::sync::Barrier;
use uuid::Uuid;

const SIGNATURE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==";

#[derive(Default)]
struct RecordingFeed {
    changes: Mutex<Vec<ContractChanged>>,
}

#[async_trait]
impl ChangeFeed for RecordingFeed {
    async fn publish(&self, change: &ContractChanged) -> anyhow::Result<()> {
        self.changes.lock().unwrap().push(change.clone());
        Ok(())
    }
}

struct FailingFeed;

#[async_trait]
impl ChangeFeed for FailingFeed {
    async fn publish(&self, _change: &ContractChanged) -> anyhow::Result<()> {
        anyhow::bail!("broker unreachable")
    }
}

struct Portal {
    store: Arc<InMemoryStore>,
    feed: Arc<RecordingFeed>,
    service: ContractService,
    admin: Actor,
    client: Actor,
    affiliate: Actor,
}

async fn register(service: &ContractService, admin: &Actor, email: &str, role: Role) -> Actor {
    let user = service
        .register_user(
            admin,
            NewUser {
                email: email.to_string(),
                full_name: email.split('@').next().unwrap().to_string(),
                role,
            },
        )
        .await
        .expect("register user");
    Actor::from(&user)
}

async fn portal_with_feed(feed: Arc<dyn ChangeFeed>) -> (Arc<InMemoryStore>, ContractService) {
    let store = Arc::new(InMemoryStore::new());
    let service = ContractService::new(
        store.clone(),
        feed,
        ServiceSettings {
            public_base_url: "https://portal.example.com".to_string(),
        },
    );
    (store, service)
}

async fn portal() -> Portal {
    let feed = Arc::new(RecordingFeed::default());
    let (store, service) = portal_with_feed(feed.clone()).await;
    let admin = service
        .bootstrap_admin("owner@atelier.example.com", "Agency Owner")
        .await
        .expect("bootstrap")
        .expect("first admin");
    let admin = Actor::from(&admin);
    let client = register(&service, &admin, "client@example.com", Role::Client).await;
    let affiliate = register(&service, &admin, "broker@example.com", Role::Affiliate).await;

    Portal {
        store,
        feed,
        service,
        admin,
        client,
        affiliate,
    }
}

fn draft_input(portal: &Portal, deposit_proof_required: bool) -> DraftInput {
    DraftInput {
        title: "Showroom interior design".to_string(),
        client_id: portal.client.user_id,
        affiliate_id: Some(portal.affiliate.user_id),
        total_amount: Decimal::new(100_000, 0),
        deposit_amount: Some(Decimal::new(50_000, 0)),
        currency: "USD".to_string(),
        payment_method: PaymentMethod::BankTransfer,
        terms: vec!["Concept".to_string(), "Execution".to_string()],
        deposit_proof_required,
        commission_amount: Some(Decimal::new(2_500, 0)),
    }
}

fn proof() -> ProofUpload {
    ProofUpload {
        proof_ref: "uploads/deposit.jpg".to_string(),
        method: PaymentMethod::BankTransfer,
        notes: None,
    }
}

async fn fully_signed(portal: &Portal, deposit_proof_required: bool) -> Uuid {
    let contract = portal
        .service
        .create_contract(&portal.admin, draft_input(portal, deposit_proof_required))
        .await
        .expect("create");
    portal
        .service
        .sign_as_admin(&portal.admin, contract.id, SIGNATURE)
        .await
        .expect("admin signs");
    portal
        .service
        .sign_as_client(&portal.client, contract.id, SIGNATURE)
        .await
        .expect("client signs");
    contract.id
}

#[tokio::test]
async fn remaining_amount_is_persisted_at_creation() {
    let portal = portal().await;
    let created = portal
        .service
        .create_contract(&portal.admin, draft_input(&portal, false))
        .await
        .expect("create");

    let stored = portal
        .service
        .contract(&portal.client, created.id)
        .await
        .expect("client reads own contract");
    assert_eq!(stored.remaining_amount, Decimal::new(50_000, 0));
    assert_eq!(stored.deposit_amount + stored.remaining_amount, stored.total_amount);
}

#[tokio::test]
async fn admin_signature_then_second_admin_signature_is_rejected() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.admin, draft_input(&portal, false))
        .await
        .expect("create");

    let signed = portal
        .service
        .sign_as_admin(&portal.admin, contract.id, SIGNATURE)
        .await
        .expect("admin signs");
    assert_eq!(signed.state, ContractState::PendingClientSignature);
    assert_eq!(signed.workflow_status().as_str(), "pending_client_signature");

    let err = portal
        .service
        .sign_as_admin(&portal.admin, contract.id, SIGNATURE)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Precondition(_)));
}

#[tokio::test]
async fn both_signatures_complete_and_activate() {
    let portal = portal().await;
    let id = fully_signed(&portal, false).await;

    let contract = portal.service.contract(&portal.admin, id).await.expect("read");
    assert_eq!(contract.workflow_status().as_str(), "completed");
    assert_eq!(contract.state.status().as_str(), "active");

    let history = portal
        .service
        .contract_history(&portal.admin, id)
        .await
        .expect("history");
    let actions: Vec<&str> = history.iter().map(|entry| entry.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["contract_created", "contract_admin_signed", "contract_client_signed"]
    );

    let kinds: Vec<ContractEventKind> = portal
        .feed
        .changes
        .lock()
        .unwrap()
        .iter()
        .map(|change| change.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ContractEventKind::Created,
            ContractEventKind::AdminSigned,
            ContractEventKind::ClientSigned
        ]
    );
}

#[tokio::test]
async fn client_cannot_sign_before_the_agency() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.affiliate, draft_input(&portal, false))
        .await
        .expect("create");
    portal
        .service
        .submit_for_signature(&portal.affiliate, contract.id)
        .await
        .expect("submit");

    let err = portal
        .service
        .sign_as_client(&portal.client, contract.id, SIGNATURE)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Precondition(_)));
}

#[tokio::test]
async fn transitions_fan_out_to_every_party() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.admin, draft_input(&portal, false))
        .await
        .expect("create");
    portal
        .service
        .sign_as_admin(&portal.admin, contract.id, SIGNATURE)
        .await
        .expect("admin signs");

    let signed_entries: Vec<_> = portal
        .store
        .outbox_snapshot()
        .await
        .into_iter()
        .filter(|entry| entry.kind == "contract_admin_signed")
        .collect();
    let in_app: Vec<Uuid> = signed_entries
        .iter()
        .filter(|entry| entry.channel == OutboxChannel::InApp)
        .map(|entry| entry.recipient_id)
        .collect();
    assert_eq!(in_app.len(), 3);
    for party in [portal.admin, portal.client, portal.affiliate] {
        assert!(in_app.contains(&party.user_id));
    }
    let emails = signed_entries
        .iter()
        .filter(|entry| entry.channel == OutboxChannel::Email)
        .count();
    assert_eq!(emails, 3);
}

#[tokio::test]
async fn share_link_signs_and_uploads_as_the_client() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.admin, draft_input(&portal, true))
        .await
        .expect("create");
    portal
        .service
        .sign_as_admin(&portal.admin, contract.id, SIGNATURE)
        .await
        .expect("admin signs");

    let signed = portal
        .service
        .sign_shared(&contract.share_token, SIGNATURE)
        .await
        .expect("sign via link");
    assert_eq!(signed.state, ContractState::PendingPaymentProof);
    assert_eq!(
        signed.client_signature.as_ref().map(|s| s.signer_id),
        Some(portal.client.user_id)
    );

    let uploaded = portal
        .service
        .upload_shared_payment_proof(&contract.share_token, &proof())
        .await
        .expect("upload via link");
    assert_eq!(uploaded.state, ContractState::PendingVerification);

    assert!(matches!(
        portal.service.shared_contract("not-a-token").await,
        Err(WorkflowError::NotFound(_))
    ));
}

#[tokio::test]
async fn rejected_proof_returns_to_awaiting_proof() {
    let portal = portal().await;
    let id = fully_signed(&portal, true).await;
    portal
        .service
        .upload_payment_proof(&portal.client, id, &proof())
        .await
        .expect("upload");

    let err = portal
        .service
        .verify_payment(&portal.admin, id, ReviewDecision::Reject, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));

    let rejected = portal
        .service
        .verify_payment(
            &portal.admin,
            id,
            ReviewDecision::Reject,
            Some("transfer reference missing"),
        )
        .await
        .expect("reject");
    assert_eq!(rejected.state, ContractState::PendingPaymentProof);
    assert!(rejected.payment_proof.is_none());
    assert_eq!(rejected.payment_status(), PaymentStatus::Rejected);

    portal
        .service
        .upload_payment_proof(&portal.client, id, &proof())
        .await
        .expect("re-upload");
    let active = portal
        .service
        .verify_payment(&portal.admin, id, ReviewDecision::Approve, None)
        .await
        .expect("approve");
    assert_eq!(active.state, ContractState::Active);

    let summary = portal
        .service
        .dashboard_summary(&portal.admin)
        .await
        .expect("summary");
    assert_eq!(summary.active, 1);
    assert_eq!(summary.deposits_collected, Decimal::new(50_000, 0));
}

#[tokio::test]
async fn second_pending_deletion_request_conflicts() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.affiliate, draft_input(&portal, false))
        .await
        .expect("create");

    portal
        .service
        .request_deletion(&portal.affiliate, contract.id, "duplicate of an older contract")
        .await
        .expect("first request");
    let err = portal
        .service
        .request_deletion(&portal.affiliate, contract.id, "still a duplicate")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let pending = portal
        .service
        .list_deletion_requests(&portal.admin, Some(DeletionStatus::Pending), None)
        .await
        .expect("list");
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn approved_deletion_hides_the_contract_but_keeps_its_history() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.affiliate, draft_input(&portal, false))
        .await
        .expect("create");
    let request = portal
        .service
        .request_deletion(&portal.affiliate, contract.id, "client withdrew")
        .await
        .expect("request");

    assert!(matches!(
        portal
            .service
            .resolve_deletion(&portal.affiliate, request.id, ReviewDecision::Approve, None)
            .await,
        Err(WorkflowError::Forbidden(_))
    ));

    let resolved = portal
        .service
        .resolve_deletion(&portal.admin, request.id, ReviewDecision::Approve, None)
        .await
        .expect("approve");
    assert_eq!(resolved.status, DeletionStatus::Approved);

    assert!(matches!(
        portal.service.contract(&portal.admin, contract.id).await,
        Err(WorkflowError::NotFound(_))
    ));
    assert!(
        portal
            .service
            .list_contracts(&portal.admin, None, None)
            .await
            .expect("list")
            .is_empty()
    );
    let history = portal
        .service
        .contract_history(&portal.admin, contract.id)
        .await
        .expect("history survives");
    assert_eq!(
        history.last().map(|entry| entry.action.as_str()),
        Some("deletion_approved")
    );

    assert!(matches!(
        portal
            .service
            .resolve_deletion(&portal.admin, request.id, ReviewDecision::Reject, Some("late"))
            .await,
        Err(WorkflowError::Precondition(_))
    ));
}

#[tokio::test]
async fn parties_only_see_their_own_contracts() {
    let portal = portal().await;
    let contract = portal
        .service
        .create_contract(&portal.admin, draft_input(&portal, false))
        .await
        .expect("create");
    let stranger = register(&portal.service, &portal.admin, "other@example.com", Role::Client).await;

    assert!(matches!(
        portal.service.contract(&stranger, contract.id).await,
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(
        portal
            .service
            .list_contracts(&stranger, None, None)
            .await
            .expect("list")
            .is_empty()
    );
    assert_eq!(
        portal
            .service
            .list_contracts(&portal.client, None, Some(500))
            .await
            .expect("list")
            .len(),
        1
    );
    assert!(matches!(
        portal.service.authenticate(None).await,
        Err(WorkflowError::Unauthenticated)
    ));
    assert!(matches!(
        portal.service.authenticate(Some(Uuid::new_v4())).await,
        Err(WorkflowError::Unauthenticated)
    ));
}

#[tokio::test]
async fn contracts_need_real_parties() {
    let portal = portal().await;
    let mut input = draft_input(&portal, false);
    input.client_id = portal.affiliate.user_id;
    assert!(matches!(
        portal.service.create_contract(&portal.admin, input).await,
        Err(WorkflowError::Validation(_))
    ));

    assert!(matches!(
        portal
            .service
            .create_contract(&portal.client, draft_input(&portal, false))
            .await,
        Err(WorkflowError::Forbidden(_))
    ));

    let err = portal
        .service
        .register_user(
            &portal.admin,
            NewUser {
                email: "CLIENT@example.com".to_string(),
                full_name: "Twin".to_string(),
                role: Role::Client,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));
}

/// Holds the next `readers` contract loads at a barrier so both callers
/// act on the same version.
struct LockstepStore {
    inner: Arc<InMemoryStore>,
    readers: AtomicUsize,
    barrier: Barrier,
}

impl LockstepStore {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            readers: AtomicUsize::new(0),
            barrier: Barrier::new(2),
        }
    }

    fn hold_next_two_reads(&self) {
        self.readers.store(2, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContractStore for LockstepStore {
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.inner.apply(changes).await
    }

    async fn contract(&self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        let contract = self.inner.contract(id).await?;
        let held = self
            .readers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if held {
            self.barrier.wait().await;
        }
        Ok(contract)
    }

    async fn contract_by_share_token(&self, token: &str) -> Result<Option<Contract>, StoreError> {
        self.inner.contract_by_share_token(token).await
    }

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, StoreError> {
        self.inner.list_contracts(filter).await
    }

    async fn contract_history(&self, contract_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.contract_history(contract_id).await
    }

    async fn deletion_request(&self, id: Uuid) -> Result<Option<DeletionRequest>, StoreError> {
        self.inner.deletion_request(id).await
    }

    async fn list_deletion_requests(
        &self,
        status: Option<DeletionStatus>,
        requested_by: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<DeletionRequest>, StoreError> {
        self.inner
            .list_deletion_requests(status, requested_by, limit)
            .await
    }

    async fn summary(&self) -> Result<ContractSummary, StoreError> {
        self.inner.summary().await
    }
}

#[async_trait]
impl UserStore for LockstepStore {
    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.inner.insert_user(user).await
    }

    async fn user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        self.inner.user(id).await
    }

    async fn admins(&self) -> Result<Vec<UserProfile>, StoreError> {
        self.inner.admins().await
    }
}

#[async_trait]
impl NotificationStore for LockstepStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.inner.insert_notification(notification).await
    }

    async fn notifications_for(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        self.inner
            .notifications_for(user_id, unread_only, limit)
            .await
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<bool, StoreError> {
        self.inner.mark_read(user_id, notification_id).await
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.mark_all_read(user_id).await
    }
}

#[tokio::test]
async fn concurrent_admin_signatures_never_overwrite() {
    let store = Arc::new(LockstepStore::new(Arc::new(InMemoryStore::new())));
    let service = ContractService::new(
        store.clone(),
        Arc::new(RecordingFeed::default()),
        ServiceSettings::default(),
    );
    let admin = service
        .bootstrap_admin("owner@atelier.example.com", "Agency Owner")
        .await
        .expect("bootstrap")
        .expect("first admin");
    let admin = Actor::from(&admin);
    let second_admin = register(&service, &admin, "partner@atelier.example.com", Role::Admin).await;
    let client = register(&service, &admin, "client@example.com", Role::Client).await;
    let contract = service
        .create_contract(
            &admin,
            DraftInput {
                title: "Brand refresh".to_string(),
                client_id: client.user_id,
                affiliate_id: None,
                total_amount: Decimal::new(4_000, 0),
                deposit_amount: None,
                currency: "USD".to_string(),
                payment_method: PaymentMethod::BankTransfer,
                terms: Vec::new(),
                deposit_proof_required: false,
                commission_amount: None,
            },
        )
        .await
        .expect("create");

    const OTHER_SIGNATURE: &str = "data:image/png;base64,AAAA";
    store.hold_next_two_reads();
    let (first, second) = tokio::join!(
        service.sign_as_admin(&admin, contract.id, SIGNATURE),
        service.sign_as_admin(&second_admin, contract.id, OTHER_SIGNATURE),
    );

    let (winner, signature, loser) = match (first, second) {
        (Ok(_), Err(err)) => (admin, SIGNATURE, err),
        (Err(err), Ok(_)) => (second_admin, OTHER_SIGNATURE, err),
        other => panic!("expected exactly one signature to land, got {other:?}"),
    };
    assert!(
        matches!(loser, WorkflowError::Conflict(_)),
        "loser should hit the version check, got {loser:?}"
    );

    let stored = service.contract(&admin, contract.id).await.expect("read");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.state, ContractState::PendingClientSignature);
    let recorded = stored.admin_signature.expect("admin signature");
    assert_eq!(recorded.signer_id, winner.user_id);
    assert_eq!(recorded.data, signature);
}

#[tokio::test]
async fn feed_failures_do_not_fail_the_transition() {
    let (_, service) = portal_with_feed(Arc::new(FailingFeed)).await;
    let admin = service
        .bootstrap_admin("owner@atelier.example.com", "Owner")
        .await
        .expect("bootstrap")
        .expect("admin");
    let admin = Actor::from(&admin);
    let client = register(&service, &admin, "client@example.com", Role::Client).await;

    let created = service
        .create_contract(
            &admin,
            DraftInput {
                title: "Logo".to_string(),
                client_id: client.user_id,
                affiliate_id: None,
                total_amount: Decimal::new(900, 0),
                deposit_amount: None,
                currency: "usd".to_string(),
                payment_method: PaymentMethod::Cash,
                terms: Vec::new(),
                deposit_proof_required: false,
                commission_amount: None,
            },
        )
        .await
        .expect("created despite feed failure");
    assert_eq!(created.deposit_amount, Decimal::new(450, 0));

    assert!(
        service
            .bootstrap_admin("second@atelier.example.com", "Second")
            .await
            .expect("bootstrap")
            .is_none()
    );
}

#[tokio::test]
async fn notifications_are_read_per_user() {
    let portal = portal().await;
    let notification = atelier_core::Notification {
        id: Uuid::new_v4(),
        user_id: portal.client.user_id,
        title: "Contract signed by the agency".to_string(),
        message: "Please sign.".to_string(),
        kind: "contract_admin_signed".to_string(),
        related_id: None,
        link: None,
        read: false,
        created_at: chrono::Utc::now(),
    };
    atelier_core::NotificationStore::insert_notification(portal.store.as_ref(), &notification)
        .await
        .expect("insert");

    assert!(matches!(
        portal
            .service
            .mark_notification_read(&portal.affiliate, notification.id)
            .await,
        Err(WorkflowError::NotFound(_))
    ));
    portal
        .service
        .mark_notification_read(&portal.client, notification.id)
        .await
        .expect("own notification");
    let unread = portal
        .service
        .notifications(&portal.client, true, None)
        .await
        .expect("inbox");
    assert!(unread.is_empty());
}
