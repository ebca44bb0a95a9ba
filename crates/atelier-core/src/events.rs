use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseEnumError;
use crate::state::ContractState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContractEventKind {
    Created,
    SubmittedForSignature,
    AdminSigned,
    ClientSigned,
    Cancelled,
    PaymentProofUploaded,
    PaymentVerified,
    PaymentRejected,
    DeletionRequested,
    DeletionApproved,
    DeletionRejected,
}

impl ContractEventKind {
    /// Notification type tag stored alongside in-app notifications.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Created => "contract_created",
            Self::SubmittedForSignature => "contract_submitted",
            Self::AdminSigned => "contract_admin_signed",
            Self::ClientSigned => "contract_client_signed",
            Self::Cancelled => "contract_cancelled",
            Self::PaymentProofUploaded => "payment_proof_uploaded",
            Self::PaymentVerified => "payment_verified",
            Self::PaymentRejected => "payment_rejected",
            Self::DeletionRequested => "deletion_requested",
            Self::DeletionApproved => "deletion_approved",
            Self::DeletionRejected => "deletion_rejected",
        }
    }
}

/// Change-feed message published after every committed contract write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractChanged {
    pub contract_id: Uuid,
    pub client_id: Uuid,
    pub affiliate_id: Option<Uuid>,
    pub kind: ContractEventKind,
    pub state: ContractState,
    pub version: i64,
    pub deleted: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutboxChannel {
    InApp,
    Email,
}

impl OutboxChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Email => "email",
        }
    }
}

impl FromStr for OutboxChannel {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in_app" => Ok(Self::InApp),
            "email" => Ok(Self::Email),
            _ => Err(ParseEnumError::new("outbox channel", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "dead" => Ok(Self::Dead),
            _ => Err(ParseEnumError::new("outbox status", value)),
        }
    }
}

/// One pending side-channel delivery, written in the same atomic change as
/// the transition that caused it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub channel: OutboxChannel,
    pub recipient_id: Uuid,
    pub recipient_email: Option<String>,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub related_id: Option<Uuid>,
    pub link: Option<String>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}
