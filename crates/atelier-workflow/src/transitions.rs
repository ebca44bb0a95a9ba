//! Contract creation and the signature step.
//!
//! Every function here is pure: it validates the caller and the current
//! state, then returns the next version of the contract wrapped in a
//! [`Transition`]. Persisting it (and losing a race) is the service's job.

use atelier_core::{
    Actor, AuditEntry, CommissionStatus, Contract, ContractEventKind, ContractState,
    ContractWrite, PaymentMethod, Role, Signature, WorkflowError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::amounts::split_deposit;

const MAX_SIGNATURE_BYTES: usize = 512 * 1024;
const MAX_TITLE_CHARS: usize = 200;

/// A validated change to one contract, ready to be written.
#[derive(Debug, Clone)]
pub struct Transition {
    pub contract: Contract,
    pub kind: ContractEventKind,
    pub from: Option<ContractState>,
    /// `None` when the contract is new.
    pub expected_version: Option<i64>,
    pub actor_id: Uuid,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Transition {
    pub(crate) fn created(contract: Contract, actor: &Actor, now: DateTime<Utc>) -> Self {
        Self {
            contract,
            kind: ContractEventKind::Created,
            from: None,
            expected_version: None,
            actor_id: actor.user_id,
            note: None,
            occurred_at: now,
        }
    }

    pub(crate) fn advance(
        previous: &Contract,
        mut next: Contract,
        kind: ContractEventKind,
        actor: &Actor,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        next.version = previous.version + 1;
        next.updated_at = now;

        Self {
            contract: next,
            kind,
            from: Some(previous.state),
            expected_version: Some(previous.version),
            actor_id: actor.user_id,
            note,
            occurred_at: now,
        }
    }

    pub fn write(&self) -> ContractWrite {
        match self.expected_version {
            None => ContractWrite::Insert(self.contract.clone()),
            Some(expected_version) => ContractWrite::Update {
                contract: self.contract.clone(),
                expected_version,
            },
        }
    }

    pub fn audit_entry(&self) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            contract_id: self.contract.id,
            action: self.kind.tag().to_string(),
            actor_id: self.actor_id,
            from_state: self.from,
            to_state: self.contract.state,
            note: self.note.clone(),
            occurred_at: self.occurred_at,
        }
    }
}

/// Caller-supplied terms for a new contract. Party existence is checked by
/// the service before this reaches [`draft_contract`].
#[derive(Debug, Clone)]
pub struct DraftInput {
    pub title: String,
    pub client_id: Uuid,
    pub affiliate_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub deposit_amount: Option<Decimal>,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub terms: Vec<String>,
    pub deposit_proof_required: bool,
    pub commission_amount: Option<Decimal>,
}

pub fn draft_contract(
    input: DraftInput,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    let affiliate_id = match actor.role {
        Role::Admin => input.affiliate_id,
        Role::Affiliate => Some(actor.user_id),
        Role::Client => return Err(WorkflowError::forbidden("clients cannot create contracts")),
    };

    let title = input.title.trim();
    if title.is_empty() {
        return Err(WorkflowError::validation("title is required"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(WorkflowError::validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }

    let currency = normalize_currency(&input.currency)?;
    let split = split_deposit(input.total_amount, input.deposit_amount)?;

    let commission_amount = input.commission_amount.map(|value| value.round_dp(2));
    if let Some(commission) = commission_amount {
        if affiliate_id.is_none() {
            return Err(WorkflowError::validation(
                "commission_amount requires an affiliate",
            ));
        }
        if commission < Decimal::ZERO || commission > split.total {
            return Err(WorkflowError::validation(
                "commission_amount must lie between zero and total_amount",
            ));
        }
    }

    let terms = input
        .terms
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect();

    let id = Uuid::new_v4();
    let contract = Contract {
        id,
        contract_number: contract_number(id, now),
        share_token: Uuid::new_v4().simple().to_string(),
        title: title.to_string(),
        client_id: input.client_id,
        affiliate_id,
        total_amount: split.total,
        deposit_amount: split.deposit,
        remaining_amount: split.remaining,
        currency,
        payment_method: input.payment_method,
        terms,
        deposit_proof_required: input.deposit_proof_required,
        commission_amount,
        commission_status: commission_amount.map(|_| CommissionStatus::Pending),
        state: ContractState::Draft,
        admin_signature: None,
        client_signature: None,
        payment_proof: None,
        last_rejection: None,
        version: 1,
        created_by: actor.user_id,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    Ok(Transition::created(contract, actor, now))
}

/// Hands a draft to the agency for signature.
pub fn submit_for_signature(
    contract: &Contract,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    let owns_as_affiliate =
        actor.role == Role::Affiliate && contract.affiliate_id == Some(actor.user_id);
    if !actor.is_admin() && !owns_as_affiliate {
        return Err(WorkflowError::forbidden(
            "only admins or the contract's affiliate can submit it",
        ));
    }
    if contract.state != ContractState::Draft {
        return Err(WorkflowError::precondition(format!(
            "only draft contracts can be submitted, contract is {}",
            contract.state
        )));
    }

    let mut next = contract.clone();
    next.state = ContractState::PendingAdminSignature;
    Ok(Transition::advance(
        contract,
        next,
        ContractEventKind::SubmittedForSignature,
        actor,
        None,
        now,
    ))
}

pub fn sign_as_admin(
    contract: &Contract,
    actor: &Actor,
    signature_data: &str,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if !actor.is_admin() {
        return Err(WorkflowError::forbidden(
            "only admins can sign on behalf of the agency",
        ));
    }
    if contract.admin_signature.is_some() {
        return Err(WorkflowError::precondition(
            "contract is already signed by the agency",
        ));
    }
    if !matches!(
        contract.state,
        ContractState::Draft | ContractState::PendingAdminSignature
    ) {
        return Err(WorkflowError::precondition(format!(
            "contract cannot be signed while {}",
            contract.state
        )));
    }
    let data = validate_signature_data(signature_data)?;

    let mut next = contract.clone();
    next.admin_signature = Some(Signature {
        data,
        signed_at: now,
        signer_id: actor.user_id,
    });
    // The client can never have signed first, so the admin signature always
    // hands the contract over to the client.
    next.state = ContractState::PendingClientSignature;

    Ok(Transition::advance(
        contract,
        next,
        ContractEventKind::AdminSigned,
        actor,
        None,
        now,
    ))
}

pub fn sign_as_client(
    contract: &Contract,
    actor: &Actor,
    signature_data: &str,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if actor.role != Role::Client || contract.client_id != actor.user_id {
        return Err(WorkflowError::forbidden(
            "only the contract's client can sign as client",
        ));
    }
    if contract.state == ContractState::Cancelled {
        return Err(WorkflowError::precondition("contract is cancelled"));
    }
    if contract.client_signature.is_some() {
        return Err(WorkflowError::precondition(
            "contract is already signed by the client",
        ));
    }
    if contract.admin_signature.is_none() {
        return Err(WorkflowError::precondition(
            "the agency must sign the contract before the client",
        ));
    }
    let data = validate_signature_data(signature_data)?;

    let mut next = contract.clone();
    next.client_signature = Some(Signature {
        data,
        signed_at: now,
        signer_id: actor.user_id,
    });
    if next.deposit_proof_required {
        next.state = ContractState::PendingPaymentProof;
    } else {
        activate(&mut next);
    }

    Ok(Transition::advance(
        contract,
        next,
        ContractEventKind::ClientSigned,
        actor,
        None,
        now,
    ))
}

pub fn cancel(
    contract: &Contract,
    actor: &Actor,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if !actor.is_admin() {
        return Err(WorkflowError::forbidden("only admins can cancel contracts"));
    }
    if !contract.state.is_cancellable() {
        return Err(WorkflowError::precondition(format!(
            "contract cannot be cancelled while {}",
            contract.state
        )));
    }

    let mut next = contract.clone();
    next.state = ContractState::Cancelled;
    Ok(Transition::advance(
        contract,
        next,
        ContractEventKind::Cancelled,
        actor,
        non_blank(reason),
        now,
    ))
}

/// Moves a fully signed contract into force.
pub(crate) fn activate(contract: &mut Contract) {
    contract.state = ContractState::Active;
    if contract.commission_status.is_some() {
        contract.commission_status = Some(CommissionStatus::Payable);
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn validate_signature_data(value: &str) -> Result<String, WorkflowError> {
    let data = value.trim();
    if data.is_empty() {
        return Err(WorkflowError::validation("signature is required"));
    }
    if !data.starts_with("data:image/") {
        return Err(WorkflowError::validation(
            "signature must be an image data URL",
        ));
    }
    if data.len() > MAX_SIGNATURE_BYTES {
        return Err(WorkflowError::validation("signature image is too large"));
    }
    Ok(data.to_string())
}

fn normalize_currency(value: &str) -> Result<String, WorkflowError> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(WorkflowError::validation("currency must be a 3-letter code"));
    }
    Ok(normalized)
}

fn contract_number(id: Uuid, now: DateTime<Utc>) -> String {
    let suffix = id.simple().to_string()[..10].to_ascii_uppercase();
    format!("CTR-{}-{suffix}", now.format("%Y%m%d"))
}
