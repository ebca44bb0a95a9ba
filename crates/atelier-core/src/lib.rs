pub mod error;
pub mod events;
pub mod models;
pub mod state;
pub mod storage;

pub use error::{ParseEnumError, StoreError, WorkflowError};
pub use events::{ContractChanged, ContractEventKind, OutboxChannel, OutboxEntry, OutboxStatus};
pub use models::{
    Actor, AuditEntry, CommissionStatus, Contract, DeletionRequest, DeletionStatus, Notification,
    PaymentMethod, PaymentProof, ProofRejection, ReviewDecision, Role, Signature, UserProfile,
};
pub use state::{ContractState, ContractStatus, PaymentStatus, WorkflowStatus};
pub use storage::{
    ChangeFeed, ChangeSet, ContractFilter, ContractStore, ContractSummary, ContractWrite,
    DeletionRequestWrite, EmailSink, NoopChangeFeed, NotificationStore, OutboxStore, UserStore,
};
