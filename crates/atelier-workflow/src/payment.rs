//! Deposit payment-proof gate.

use atelier_core::{
    Actor, Contract, ContractEventKind, ContractState, PaymentMethod, PaymentProof,
    ProofRejection, ReviewDecision, Role, WorkflowError,
};
use chrono::{DateTime, Utc};

use crate::transitions::{Transition, activate, non_blank};

#[derive(Debug, Clone)]
pub struct ProofUpload {
    /// Reference to the stored image (object key or URL).
    pub proof_ref: String,
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

pub fn upload_payment_proof(
    contract: &Contract,
    actor: &Actor,
    upload: &ProofUpload,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if actor.role != Role::Client || contract.client_id != actor.user_id {
        return Err(WorkflowError::forbidden(
            "only the contract's client can upload a payment proof",
        ));
    }
    if contract.state != ContractState::PendingPaymentProof {
        return Err(WorkflowError::precondition(format!(
            "contract is not awaiting a payment proof, it is {}",
            contract.state
        )));
    }
    let proof_ref = upload.proof_ref.trim();
    if proof_ref.is_empty() {
        return Err(WorkflowError::validation("proof_ref is required"));
    }

    let mut next = contract.clone();
    next.payment_proof = Some(PaymentProof {
        proof_ref: proof_ref.to_string(),
        method: upload.method,
        notes: non_blank(upload.notes.as_deref()),
        uploaded_at: now,
        verified_at: None,
        verified_by: None,
        verifier_notes: None,
    });
    next.state = ContractState::PendingVerification;

    Ok(Transition::advance(
        contract,
        next,
        ContractEventKind::PaymentProofUploaded,
        actor,
        None,
        now,
    ))
}

/// Approves or rejects the proof on file. Rejection needs notes so the
/// client knows what to fix.
pub fn verify_payment(
    contract: &Contract,
    actor: &Actor,
    decision: ReviewDecision,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transition, WorkflowError> {
    if !actor.is_admin() {
        return Err(WorkflowError::forbidden("only admins can verify payments"));
    }
    let notes = non_blank(notes);
    if decision == ReviewDecision::Reject && notes.is_none() {
        return Err(WorkflowError::validation(
            "notes are required when rejecting a payment proof",
        ));
    }
    let proof = match (&contract.payment_proof, contract.state) {
        (Some(proof), ContractState::PendingVerification) => proof,
        _ => {
            return Err(WorkflowError::precondition(format!(
                "no payment proof awaits verification, contract is {}",
                contract.state
            )));
        }
    };

    let mut next = contract.clone();
    let kind = match decision {
        ReviewDecision::Approve => {
            next.payment_proof = Some(PaymentProof {
                verified_at: Some(now),
                verified_by: Some(actor.user_id),
                verifier_notes: notes.clone(),
                ..proof.clone()
            });
            activate(&mut next);
            ContractEventKind::PaymentVerified
        }
        ReviewDecision::Reject => {
            next.last_rejection = Some(ProofRejection {
                proof_ref: proof.proof_ref.clone(),
                notes: notes.clone().unwrap_or_default(),
                rejected_at: now,
                rejected_by: actor.user_id,
            });
            next.payment_proof = None;
            next.state = ContractState::PendingPaymentProof;
            ContractEventKind::PaymentRejected
        }
    };

    Ok(Transition::advance(contract, next, kind, actor, notes, now))
}
