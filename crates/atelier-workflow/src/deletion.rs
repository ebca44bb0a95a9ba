//! Affiliate-initiated, admin-arbitrated contract removal.
//!
//! Approval tombstones the contract instead of deleting the row; the audit
//! trail survives.

use atelier_core::{
    Actor, Contract, ContractEventKind, DeletionRequest, DeletionStatus, ReviewDecision, Role,
    WorkflowError,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::transitions::{Transition, non_blank};

pub fn request_deletion(
    contract: &Contract,
    actor: &Actor,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<DeletionRequest, WorkflowError> {
    if actor.role != Role::Affiliate || contract.affiliate_id != Some(actor.user_id) {
        return Err(WorkflowError::forbidden(
            "only the contract's affiliate can request its deletion",
        ));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(WorkflowError::validation("a reason is required"));
    }

    Ok(DeletionRequest {
        id: Uuid::new_v4(),
        contract_id: contract.id,
        requested_by: actor.user_id,
        reason: reason.to_string(),
        status: DeletionStatus::Pending,
        reviewed_by: None,
        review_notes: None,
        created_at: now,
        reviewed_at: None,
    })
}

#[derive(Debug, Clone)]
pub struct DeletionResolution {
    pub request: DeletionRequest,
    /// Present when the request was approved.
    pub tombstone: Option<Transition>,
}

pub fn resolve_deletion(
    request: &DeletionRequest,
    contract: &Contract,
    actor: &Actor,
    decision: ReviewDecision,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DeletionResolution, WorkflowError> {
    if !actor.is_admin() {
        return Err(WorkflowError::forbidden(
            "only admins can resolve deletion requests",
        ));
    }
    if request.status != DeletionStatus::Pending {
        return Err(WorkflowError::precondition(format!(
            "deletion request already {}",
            request.status.as_str()
        )));
    }
    let notes = non_blank(notes);
    if decision == ReviewDecision::Reject && notes.is_none() {
        return Err(WorkflowError::validation(
            "notes are required when rejecting a deletion request",
        ));
    }

    let mut resolved = request.clone();
    resolved.reviewed_by = Some(actor.user_id);
    resolved.review_notes = notes.clone();
    resolved.reviewed_at = Some(now);

    let tombstone = match decision {
        ReviewDecision::Approve => {
            resolved.status = DeletionStatus::Approved;
            let mut next = contract.clone();
            next.deleted_at = Some(now);
            Some(Transition::advance(
                contract,
                next,
                ContractEventKind::DeletionApproved,
                actor,
                Some(request.reason.clone()),
                now,
            ))
        }
        ReviewDecision::Reject => {
            resolved.status = DeletionStatus::Rejected;
            None
        }
    };

    Ok(DeletionResolution {
        request: resolved,
        tombstone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transitions::tests::{admin, affiliate, client, draft};

    #[test]
    fn only_the_owning_affiliate_requests() {
        let contract = draft();
        assert!(request_deletion(&contract, &affiliate(), "duplicate entry", Utc::now()).is_ok());

        let other = Actor::new(Uuid::from_u128(77), Role::Affiliate);
        for actor in [other, client(), admin()] {
            assert!(matches!(
                request_deletion(&contract, &actor, "duplicate entry", Utc::now()),
                Err(WorkflowError::Forbidden(_))
            ));
        }
    }

    #[test]
    fn reason_is_required() {
        assert!(matches!(
            request_deletion(&draft(), &affiliate(), "  ", Utc::now()),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn approval_tombstones_the_contract() {
        let contract = draft();
        let request = request_deletion(&contract, &affiliate(), "typo", Utc::now()).expect("request");
        let resolution = resolve_deletion(
            &request,
            &contract,
            &admin(),
            ReviewDecision::Approve,
            None,
            Utc::now(),
        )
        .expect("approve");

        assert_eq!(resolution.request.status, DeletionStatus::Approved);
        let tombstone = resolution.tombstone.expect("tombstone");
        assert!(tombstone.contract.is_deleted());
        assert_eq!(tombstone.contract.state, contract.state);
        assert_eq!(tombstone.expected_version, Some(contract.version));
    }

    #[test]
    fn rejection_needs_notes_and_keeps_the_contract() {
        let contract = draft();
        let request = request_deletion(&contract, &affiliate(), "typo", Utc::now()).expect("request");

        assert!(matches!(
            resolve_deletion(&request, &contract, &admin(), ReviewDecision::Reject, None, Utc::now()),
            Err(WorkflowError::Validation(_))
        ));

        let resolution = resolve_deletion(
            &request,
            &contract,
            &admin(),
            ReviewDecision::Reject,
            Some("contract is valid"),
            Utc::now(),
        )
        .expect("reject");
        assert_eq!(resolution.request.status, DeletionStatus::Rejected);
        assert!(resolution.tombstone.is_none());
    }

    #[test]
    fn resolved_requests_cannot_be_resolved_again() {
        let contract = draft();
        let request = request_deletion(&contract, &affiliate(), "typo", Utc::now()).expect("request");
        let resolved = resolve_deletion(
            &request,
            &contract,
            &admin(),
            ReviewDecision::Reject,
            Some("keep it"),
            Utc::now(),
        )
        .expect("reject")
        .request;

        assert!(matches!(
            resolve_deletion(&resolved, &contract, &admin(), ReviewDecision::Approve, None, Utc::now()),
            Err(WorkflowError::Precondition(_))
        ));
    }
}
