use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// The single authoritative lifecycle of a contract.
///
/// The portal historically tracked a coarse `status` and a fine-grained
/// `workflow_status` side by side. Both are now projections of this enum
/// (see [`ContractState::workflow_status`] and [`ContractState::status`]) so
/// they can never drift apart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Draft,
    PendingAdminSignature,
    PendingClientSignature,
    /// Both parties signed; the deposit proof has not been uploaded yet.
    PendingPaymentProof,
    /// Both parties signed; a proof awaits an admin's verdict.
    PendingVerification,
    Active,
    Cancelled,
}

impl ContractState {
    pub const ALL: [ContractState; 7] = [
        ContractState::Draft,
        ContractState::PendingAdminSignature,
        ContractState::PendingClientSignature,
        ContractState::PendingPaymentProof,
        ContractState::PendingVerification,
        ContractState::Active,
        ContractState::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingAdminSignature => "pending_admin_signature",
            Self::PendingClientSignature => "pending_client_signature",
            Self::PendingPaymentProof => "pending_payment_proof",
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    /// True once both signatures are in place.
    pub fn is_fully_signed(self) -> bool {
        matches!(
            self,
            Self::PendingPaymentProof | Self::PendingVerification | Self::Active
        )
    }

    /// Cancellation is only possible while the signing step is still open.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Draft | Self::PendingAdminSignature | Self::PendingClientSignature
        )
    }

    pub fn workflow_status(self) -> WorkflowStatus {
        match self {
            Self::Draft => WorkflowStatus::Draft,
            Self::PendingAdminSignature => WorkflowStatus::PendingAdminSignature,
            Self::PendingClientSignature => WorkflowStatus::PendingClientSignature,
            Self::PendingPaymentProof | Self::PendingVerification | Self::Active => {
                WorkflowStatus::Completed
            }
            Self::Cancelled => WorkflowStatus::Cancelled,
        }
    }

    pub fn status(self) -> ContractStatus {
        match self {
            Self::Draft => ContractStatus::Draft,
            Self::PendingAdminSignature | Self::PendingClientSignature => {
                ContractStatus::PendingSignature
            }
            Self::PendingPaymentProof => ContractStatus::PendingPaymentProof,
            Self::PendingVerification => ContractStatus::PendingVerification,
            Self::Active => ContractStatus::Active,
            Self::Cancelled => ContractStatus::Cancelled,
        }
    }
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractState {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("contract state", value))
    }
}

/// Signing sub-state label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    PendingAdminSignature,
    PendingClientSignature,
    Completed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingAdminSignature => "pending_admin_signature",
            Self::PendingClientSignature => "pending_client_signature",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Coarse commercial status label shown in listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    PendingSignature,
    PendingPaymentProof,
    PendingVerification,
    Active,
    Cancelled,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingSignature => "pending_signature",
            Self::PendingPaymentProof => "pending_payment_proof",
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Where the deposit proof stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NoProof,
    PendingVerification,
    Verified,
    Rejected,
}
