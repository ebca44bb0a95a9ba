//! Contract workflow rules and the service that drives them.

pub mod amounts;
pub mod deletion;
pub mod fanout;
pub mod outbox;
pub mod payment;
pub mod service;
pub mod transitions;

pub use amounts::{DepositSplit, split_deposit};
pub use deletion::{DeletionResolution, request_deletion, resolve_deletion};
pub use outbox::{DispatchReport, OutboxDispatcher, RetryPolicy};
pub use payment::{ProofUpload, upload_payment_proof, verify_payment};
pub use service::{ContractParties, ContractService, NewUser, ServiceSettings, clamp_limit};
pub use transitions::{
    DraftInput, Transition, cancel, draft_contract, sign_as_admin, sign_as_client,
    submit_for_signature,
};
