use atelier_core::{
    Contract, ContractStatus, PaymentMethod, PaymentStatus, ReviewDecision, Role, WorkflowStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uniform success body: `{ "success": true, "data": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Uniform failure body: `{ "success": false, "error": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContractRequest {
    pub title: String,
    pub client_id: Uuid,
    pub affiliate_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub deposit_amount: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub deposit_proof_required: bool,
    pub commission_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    /// `data:image/...` URL of the drawn signature.
    pub signature: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProofRequest {
    pub proof_ref: String,
    #[serde(default = "default_payment_method")]
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequestBody {
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListContractsQuery {
    pub state: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDeletionRequestsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub locale: Option<String>,
}

/// A contract together with its derived status labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractView {
    #[serde(flatten)]
    pub contract: Contract,
    pub workflow_status: WorkflowStatus,
    pub status: ContractStatus,
    pub payment_status: PaymentStatus,
}

impl From<Contract> for ContractView {
    fn from(contract: Contract) -> Self {
        Self {
            workflow_status: contract.workflow_status(),
            status: contract.state.status(),
            payment_status: contract.payment_status(),
            contract,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

/// Payload published on the outbound mail channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub message: String,
    pub link: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::BankTransfer
}
