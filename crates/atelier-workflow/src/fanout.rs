use std::collections::HashSet;

use atelier_core::{
    Contract, ContractEventKind, ContractState, OutboxChannel, OutboxEntry, OutboxStatus, Role,
    UserProfile,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

/// Human-readable title and body for a contract event.
pub fn notice_for(kind: ContractEventKind, contract: &Contract, note: Option<&str>) -> Notice {
    let number = &contract.contract_number;
    let (title, message) = match kind {
        ContractEventKind::Created => (
            "New contract".to_string(),
            format!("Contract {number} \"{}\" was created.", contract.title),
        ),
        ContractEventKind::SubmittedForSignature => (
            "Contract awaiting signature".to_string(),
            format!("Contract {number} is ready for the agency's signature."),
        ),
        ContractEventKind::AdminSigned => (
            "Contract signed by the agency".to_string(),
            format!("Contract {number} was signed by the agency and awaits the client's signature."),
        ),
        ContractEventKind::ClientSigned => {
            let follow_up = if contract.state == ContractState::PendingPaymentProof {
                "Please upload the deposit payment proof."
            } else {
                "The contract is now active."
            };
            (
                "Contract fully signed".to_string(),
                format!("Contract {number} was signed by the client. {follow_up}"),
            )
        }
        ContractEventKind::Cancelled => (
            "Contract cancelled".to_string(),
            with_note(format!("Contract {number} was cancelled."), note),
        ),
        ContractEventKind::PaymentProofUploaded => (
            "Payment proof uploaded".to_string(),
            format!("A deposit payment proof for contract {number} awaits verification."),
        ),
        ContractEventKind::PaymentVerified => (
            "Payment verified".to_string(),
            format!("The deposit for contract {number} was verified. The contract is now active."),
        ),
        ContractEventKind::PaymentRejected => (
            "Payment proof rejected".to_string(),
            with_note(
                format!("The deposit proof for contract {number} was rejected. Please upload a new proof."),
                note,
            ),
        ),
        ContractEventKind::DeletionRequested => (
            "Contract deletion requested".to_string(),
            with_note(format!("Deletion of contract {number} was requested."), note),
        ),
        ContractEventKind::DeletionApproved => (
            "Contract deletion approved".to_string(),
            format!("Contract {number} was removed."),
        ),
        ContractEventKind::DeletionRejected => (
            "Contract deletion rejected".to_string(),
            with_note(
                format!("The deletion request for contract {number} was rejected."),
                note,
            ),
        ),
    };

    Notice { title, message }
}

fn with_note(message: String, note: Option<&str>) -> String {
    match note {
        Some(note) => format!("{message} Note: {note}"),
        None => message,
    }
}

/// One in-app entry per recipient, plus one e-mail entry for every
/// recipient with an address. Duplicate recipients are collapsed.
pub fn outbox_entries(
    recipients: &[UserProfile],
    notice: &Notice,
    kind: ContractEventKind,
    contract: &Contract,
    public_base_url: &str,
    now: DateTime<Utc>,
) -> Vec<OutboxEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(recipients.len() * 2);

    for recipient in recipients {
        if !seen.insert(recipient.id) {
            continue;
        }
        let link = link_for(recipient, contract, public_base_url);
        let email = Some(recipient.email.trim())
            .filter(|email| !email.is_empty())
            .map(str::to_string);

        entries.push(entry(
            OutboxChannel::InApp,
            recipient.id,
            None,
            notice,
            kind,
            contract.id,
            link.clone(),
            now,
        ));
        if email.is_some() {
            entries.push(entry(
                OutboxChannel::Email,
                recipient.id,
                email,
                notice,
                kind,
                contract.id,
                link,
                now,
            ));
        }
    }

    entries
}

fn link_for(recipient: &UserProfile, contract: &Contract, public_base_url: &str) -> Option<String> {
    if contract.is_deleted() {
        return None;
    }
    let base = public_base_url.trim_end_matches('/');
    match recipient.role {
        Role::Client => Some(format!("{base}/share/{}", contract.share_token)),
        Role::Admin | Role::Affiliate => Some(format!("{base}/contracts/{}", contract.id)),
    }
}

#[allow(clippy::too_many_arguments)]
fn entry(
    channel: OutboxChannel,
    recipient_id: Uuid,
    recipient_email: Option<String>,
    notice: &Notice,
    kind: ContractEventKind,
    related_id: Uuid,
    link: Option<String>,
    now: DateTime<Utc>,
) -> OutboxEntry {
    OutboxEntry {
        id: Uuid::new_v4(),
        channel,
        recipient_id,
        recipient_email,
        title: notice.title.clone(),
        message: notice.message.clone(),
        kind: kind.tag().to_string(),
        related_id: Some(related_id),
        link,
        status: OutboxStatus::Pending,
        attempts: 0,
        next_attempt_at: now,
        last_error: None,
        created_at: now,
        delivered_at: None,
    }
}
