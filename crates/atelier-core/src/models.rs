use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseEnumError;
use crate::state::{ContractState, PaymentStatus, WorkflowStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Client,
    Affiliate,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Client => "client",
            Self::Affiliate => "affiliate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "client" => Ok(Self::Client),
            "affiliate" => Ok(Self::Affiliate),
            _ => Err(ParseEnumError::new("role", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// The authenticated party behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&UserProfile> for Actor {
    fn from(user: &UserProfile) -> Self {
        Self::new(user.id, user.role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    /// Opaque image payload, a `data:image/...` URL in practice.
    pub data: String,
    pub signed_at: DateTime<Utc>,
    pub signer_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Cash,
    Card,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BankTransfer => "bank_transfer",
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Cheque => "cheque",
            Self::Other => "other",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bank_transfer" => Ok(Self::BankTransfer),
            "cash" => Ok(Self::Cash),
            "card" => Ok(Self::Card),
            "cheque" => Ok(Self::Cheque),
            "other" => Ok(Self::Other),
            _ => Err(ParseEnumError::new("payment method", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentProof {
    pub proof_ref: String,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<Uuid>,
    pub verifier_notes: Option<String>,
}

impl PaymentProof {
    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }
}

/// The last proof an admin turned down; kept so the client knows why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofRejection {
    pub proof_ref: String,
    pub notes: String,
    pub rejected_at: DateTime<Utc>,
    pub rejected_by: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Payable,
}

impl CommissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Payable => "payable",
        }
    }
}

impl FromStr for CommissionStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "payable" => Ok(Self::Payable),
            _ => Err(ParseEnumError::new("commission status", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contract {
    pub id: Uuid,
    pub contract_number: String,
    pub share_token: String,
    pub title: String,
    pub client_id: Uuid,
    pub affiliate_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub deposit_amount: Decimal,
    pub remaining_amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub terms: Vec<String>,
    pub deposit_proof_required: bool,
    pub commission_amount: Option<Decimal>,
    pub commission_status: Option<CommissionStatus>,
    pub state: ContractState,
    pub admin_signature: Option<Signature>,
    pub client_signature: Option<Signature>,
    pub payment_proof: Option<PaymentProof>,
    pub last_rejection: Option<ProofRejection>,
    pub version: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contract {
    pub fn fully_signed(&self) -> bool {
        self.admin_signature.is_some() && self.client_signature.is_some()
    }

    pub fn workflow_status(&self) -> WorkflowStatus {
        self.state.workflow_status()
    }

    pub fn payment_status(&self) -> PaymentStatus {
        match &self.payment_proof {
            Some(proof) if proof.is_verified() => PaymentStatus::Verified,
            Some(_) => PaymentStatus::PendingVerification,
            None if self.last_rejection.is_some() => PaymentStatus::Rejected,
            None => PaymentStatus::NoProof,
        }
    }

    /// Active contracts whose deposit was verified, or never needed a proof.
    pub fn deposit_collected(&self) -> bool {
        self.state == ContractState::Active
            && (!self.deposit_proof_required
                || self
                    .payment_proof
                    .as_ref()
                    .is_some_and(PaymentProof::is_verified))
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `actor` is one of the contract's parties (admins always are).
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        match actor.role {
            Role::Admin => true,
            Role::Client => self.client_id == actor.user_id,
            Role::Affiliate => self.affiliate_id == Some(actor.user_id),
        }
    }

    /// Checks the record-level invariants every persisted contract holds.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.deposit_amount + self.remaining_amount != self.total_amount {
            return Err(format!(
                "deposit {} + remaining {} does not equal total {}",
                self.deposit_amount, self.remaining_amount, self.total_amount
            ));
        }
        if self.deposit_amount < Decimal::ZERO || self.deposit_amount > self.total_amount {
            return Err("deposit must lie between zero and the total".to_string());
        }
        if self.state.is_fully_signed() != self.fully_signed() {
            return Err(format!(
                "state {} disagrees with signature presence",
                self.state
            ));
        }
        if self.client_signature.is_some() && self.admin_signature.is_none() {
            return Err("client signature present without admin signature".to_string());
        }
        match self.state {
            ContractState::PendingVerification if self.payment_proof.is_none() => {
                Err("pending verification without a proof".to_string())
            }
            ContractState::PendingPaymentProof if self.payment_proof.is_some() => {
                Err("awaiting proof while a proof is on file".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Pending,
    Approved,
    Rejected,
}

impl DeletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for DeletionStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseEnumError::new("deletion status", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub requested_by: Uuid,
    pub reason: String,
    pub status: DeletionStatus,
    pub reviewed_by: Option<Uuid>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub related_id: Option<Uuid>,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Retained record of one contract transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub action: String,
    pub actor_id: Uuid,
    pub from_state: Option<ContractState>,
    pub to_state: ContractState,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// An admin's verdict on a payment proof or a deletion request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}
