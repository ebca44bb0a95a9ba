pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;
pub mod redis_bus;

pub use config::{OutboxConfig, ServiceConfig, StoreBackend};
pub use contracts::{
    ApiResponse, CancelRequest, ContractView, CreateContractRequest, DeletionRequestBody,
    DocumentQuery, ErrorBody, ListContractsQuery, ListDeletionRequestsQuery, MarkAllReadResponse,
    NotificationsQuery, OutboundMail, PaymentProofRequest, RegisterUserRequest, ReviewRequest,
    SignRequest,
};
pub use db::{apply_schema, connect_database};
pub use pg_store::PgStore;
pub use redis_bus::{CONTRACTS_CHANGED_CHANNEL, MAIL_OUTBOUND_CHANNEL, RedisBus};
