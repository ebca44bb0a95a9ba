use atelier_core::{
    Actor, AuditEntry, Contract, ContractSummary, DeletionRequest, Notification, UserProfile,
};
use atelier_documents::{ContractDocument, DocumentParties, Locale, Party, render_contract};
use atelier_platform::{
    ApiResponse, CancelRequest, ContractView, CreateContractRequest, DeletionRequestBody,
    DocumentQuery, ListContractsQuery, ListDeletionRequestsQuery, MarkAllReadResponse,
    NotificationsQuery, PaymentProofRequest, RegisterUserRequest, ReviewRequest, SignRequest,
};
use atelier_workflow::{DraftInput, NewUser, ProofUpload};
use axum::{
    Json,
    extract::{
        FromRequestParts, Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, request::Parts},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

/// Header carrying the authenticated user's id, set by the upstream session layer.
pub const USER_ID_HEADER: &str = "x-user-id";

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// The caller resolved from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Actor);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok());
        Ok(Self(state.service.authenticate(user_id).await?))
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub document: ContractDocument,
    pub text: String,
}

fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::ok(data))))
}

fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(data))))
}

fn views(contracts: Vec<Contract>) -> Vec<ContractView> {
    contracts.into_iter().map(ContractView::from).collect()
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn me(State(state): State<AppState>, Caller(actor): Caller) -> ApiResult<UserProfile> {
    ok(state.service.me(&actor).await?)
}

pub async fn register_user(
    State(state): State<AppState>,
    Caller(actor): Caller,
    payload: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> ApiResult<UserProfile> {
    let Json(payload) = payload?;
    let user = state
        .service
        .register_user(
            &actor,
            NewUser {
                email: payload.email,
                full_name: payload.full_name,
                role: payload.role,
            },
        )
        .await?;
    created(user)
}

pub async fn create_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    payload: Result<Json<CreateContractRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Json(payload) = payload?;
    let input = DraftInput {
        title: payload.title,
        client_id: payload.client_id,
        affiliate_id: payload.affiliate_id,
        total_amount: payload.total_amount,
        deposit_amount: payload.deposit_amount,
        currency: payload.currency,
        payment_method: payload.payment_method,
        terms: payload.terms,
        deposit_proof_required: payload.deposit_proof_required,
        commission_amount: payload.commission_amount,
    };
    let contract = state.service.create_contract(&actor, input).await?;
    created(contract.into())
}

pub async fn list_contracts(
    State(state): State<AppState>,
    Caller(actor): Caller,
    query: Result<Query<ListContractsQuery>, QueryRejection>,
) -> ApiResult<Vec<ContractView>> {
    let Query(query) = query?;
    let contract_state = query.state.as_deref().map(str::parse).transpose()?;
    let contracts = state
        .service
        .list_contracts(&actor, contract_state, query.limit)
        .await?;
    ok(views(contracts))
}

pub async fn get_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    ok(state.service.contract(&actor, id).await?.into())
}

pub async fn contract_history(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Vec<AuditEntry>> {
    let Path(id) = id?;
    ok(state.service.contract_history(&actor, id).await?)
}

pub async fn contract_document(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> ApiResult<DocumentView> {
    let Path(id) = id?;
    let Query(query) = query?;
    let locale: Locale = query
        .locale
        .as_deref()
        .map(str::parse)
        .transpose()?
        .unwrap_or_default();

    let contract = state.service.contract(&actor, id).await?;
    let parties = state.service.contract_parties(&contract).await?;
    let parties = DocumentParties {
        client: Party {
            name: parties.client.full_name,
            email: parties.client.email,
        },
        affiliate: parties.affiliate.map(|affiliate| Party {
            name: affiliate.full_name,
            email: affiliate.email,
        }),
    };
    let document = render_contract(&contract, parties, locale)?;
    let text = document.to_text();
    ok(DocumentView { document, text })
}

pub async fn submit_for_signature(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    ok(state.service.submit_for_signature(&actor, id).await?.into())
}

pub async fn sign_as_admin(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SignRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let contract = state
        .service
        .sign_as_admin(&actor, id, &payload.signature)
        .await?;
    ok(contract.into())
}

pub async fn sign_as_client(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SignRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let contract = state
        .service
        .sign_as_client(&actor, id, &payload.signature)
        .await?;
    ok(contract.into())
}

pub async fn cancel_contract(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Option<Json<CancelRequest>>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    let reason = payload?.and_then(|Json(payload)| payload.reason);
    let contract = state
        .service
        .cancel(&actor, id, reason.as_deref())
        .await?;
    ok(contract.into())
}

pub async fn upload_payment_proof(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<PaymentProofRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let contract = state
        .service
        .upload_payment_proof(&actor, id, &proof_upload(payload))
        .await?;
    ok(contract.into())
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let contract = state
        .service
        .verify_payment(&actor, id, payload.decision, payload.notes.as_deref())
        .await?;
    ok(contract.into())
}

pub async fn request_deletion(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<DeletionRequestBody>, JsonRejection>,
) -> ApiResult<DeletionRequest> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    let request = state
        .service
        .request_deletion(&actor, id, &payload.reason)
        .await?;
    created(request)
}

pub async fn list_deletion_requests(
    State(state): State<AppState>,
    Caller(actor): Caller,
    query: Result<Query<ListDeletionRequestsQuery>, QueryRejection>,
) -> ApiResult<Vec<DeletionRequest>> {
    let Query(query) = query?;
    let status = query.status.as_deref().map(str::parse).transpose()?;
    ok(state
        .service
        .list_deletion_requests(&actor, status, query.limit)
        .await?)
}

pub async fn resolve_deletion(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ReviewRequest>, JsonRejection>,
) -> ApiResult<DeletionRequest> {
    let Path(id) = id?;
    let Json(payload) = payload?;
    ok(state
        .service
        .resolve_deletion(&actor, id, payload.decision, payload.notes.as_deref())
        .await?)
}

pub async fn shared_contract(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<ContractView> {
    ok(state.service.shared_contract(&token).await?.into())
}

pub async fn sign_shared(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<SignRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Json(payload) = payload?;
    let contract = state
        .service
        .sign_shared(&token, &payload.signature)
        .await?;
    ok(contract.into())
}

pub async fn upload_shared_payment_proof(
    State(state): State<AppState>,
    Path(token): Path<String>,
    payload: Result<Json<PaymentProofRequest>, JsonRejection>,
) -> ApiResult<ContractView> {
    let Json(payload) = payload?;
    let contract = state
        .service
        .upload_shared_payment_proof(&token, &proof_upload(payload))
        .await?;
    ok(contract.into())
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Caller(actor): Caller,
    query: Result<Query<NotificationsQuery>, QueryRejection>,
) -> ApiResult<Vec<Notification>> {
    let Query(query) = query?;
    ok(state
        .service
        .notifications(&actor, query.unread_only, query.limit)
        .await?)
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Caller(actor): Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Uuid> {
    let Path(id) = id?;
    state.service.mark_notification_read(&actor, id).await?;
    ok(id)
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> ApiResult<MarkAllReadResponse> {
    let updated = state.service.mark_all_notifications_read(&actor).await?;
    ok(MarkAllReadResponse { updated })
}

pub async fn dashboard_summary(
    State(state): State<AppState>,
    Caller(actor): Caller,
) -> ApiResult<ContractSummary> {
    ok(state.service.dashboard_summary(&actor).await?)
}

fn proof_upload(payload: PaymentProofRequest) -> ProofUpload {
    ProofUpload {
        proof_ref: payload.proof_ref,
        method: payload.method,
        notes: payload.notes,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atelier_core::{ContractState, NoopChangeFeed, PaymentMethod, ReviewDecision, Role};
    use atelier_store::InMemoryStore;
    use atelier_workflow::{ContractService, ServiceSettings};
    use axum::{
        body::Body,
        http::{HeaderValue, Request},
        response::IntoResponse,
    };
    use rust_decimal::Decimal;

    use super::*;

    const SIGNATURE: &str = "data:image/png;base64,iVBORw0KGgo=";

    struct Harness {
        state: AppState,
        admin: Actor,
        client: Actor,
        affiliate: Actor,
    }

    async fn harness() -> Harness {
        let service = ContractService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(NoopChangeFeed),
            ServiceSettings::default(),
        );
        let admin = service
            .bootstrap_admin("owner@atelier.example", "Studio Owner")
            .await
            .expect("bootstrap")
            .expect("first admin");
        let admin = Actor::from(&admin);
        let client = register(&service, &admin, "client@example.com", Role::Client).await;
        let affiliate = register(&service, &admin, "scout@example.com", Role::Affiliate).await;

        Harness {
            state: AppState {
                service,
                redis: None,
            },
            admin,
            client,
            affiliate,
        }
    }

    async fn register(service: &ContractService, admin: &Actor, email: &str, role: Role) -> Actor {
        let user = service
            .register_user(
                admin,
                NewUser {
                    email: email.to_string(),
                    full_name: email.to_string(),
                    role,
                },
            )
            .await
            .expect("register user");
        Actor::from(&user)
    }

    fn create_request(harness: &Harness) -> CreateContractRequest {
        CreateContractRequest {
            title: "Brand identity".to_string(),
            client_id: harness.client.user_id,
            affiliate_id: Some(harness.affiliate.user_id),
            total_amount: Decimal::new(100_000, 0),
            deposit_amount: Some(Decimal::new(50_000, 0)),
            currency: "USD".to_string(),
            payment_method: PaymentMethod::BankTransfer,
            terms: vec!["Two revision rounds".to_string()],
            deposit_proof_required: false,
            commission_amount: None,
        }
    }

    async fn create(harness: &Harness) -> ContractView {
        let (status, Json(body)) = create_contract(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Json(create_request(harness))),
        )
        .await
        .expect("create");
        assert_eq!(status, StatusCode::CREATED);
        body.data
    }

    fn sign(signature: &str) -> Result<Json<SignRequest>, JsonRejection> {
        Ok(Json(SignRequest {
            signature: signature.to_string(),
        }))
    }

    #[tokio::test]
    async fn created_contracts_persist_the_remaining_amount() {
        let harness = harness().await;
        let view = create(&harness).await;
        assert_eq!(view.contract.remaining_amount, Decimal::new(50_000, 0));
        assert_eq!(view.contract.state, ContractState::Draft);
        assert_eq!(view.workflow_status.as_str(), "draft");
    }

    #[tokio::test]
    async fn signing_flow_completes_through_the_handlers() {
        let harness = harness().await;
        let id = create(&harness).await.contract.id;

        let (_, Json(body)) = sign_as_admin(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            sign(SIGNATURE),
        )
        .await
        .expect("admin signs");
        assert_eq!(body.data.contract.state, ContractState::PendingClientSignature);

        let second = sign_as_admin(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            sign(SIGNATURE),
        )
        .await
        .unwrap_err();
        assert_eq!(second.status(), StatusCode::PRECONDITION_FAILED);

        let (_, Json(body)) = sign_as_client(
            State(harness.state.clone()),
            Caller(harness.client),
            Ok(Path(id)),
            sign(SIGNATURE),
        )
        .await
        .expect("client signs");
        assert!(body.success);
        assert_eq!(body.data.workflow_status.as_str(), "completed");
        assert_eq!(body.data.status.as_str(), "active");

        let (_, Json(body)) = contract_document(
            State(harness.state.clone()),
            Caller(harness.client),
            Ok(Path(id)),
            Ok(Query(DocumentQuery {
                locale: Some("ar".to_string()),
            })),
        )
        .await
        .expect("document");
        assert_eq!(body.data.document.locale, Locale::Ar);
        assert!(body.data.text.contains("رقم العقد"));
    }

    #[tokio::test]
    async fn unsigned_documents_are_a_precondition_failure() {
        let harness = harness().await;
        let id = create(&harness).await.contract.id;

        let err = contract_document(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            Ok(Query(DocumentQuery::default())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn clients_cannot_sign_before_the_agency() {
        let harness = harness().await;
        let id = create(&harness).await.contract.id;

        let err = sign_as_client(
            State(harness.state.clone()),
            Caller(harness.client),
            Ok(Path(id)),
            sign(SIGNATURE),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[tokio::test]
    async fn duplicate_deletion_requests_conflict() {
        let harness = harness().await;
        let id = create(&harness).await.contract.id;
        let reason = || {
            Ok(Json(DeletionRequestBody {
                reason: "Client withdrew".to_string(),
            }))
        };

        let (status, _) = request_deletion(
            State(harness.state.clone()),
            Caller(harness.affiliate),
            Ok(Path(id)),
            reason(),
        )
        .await
        .expect("first request");
        assert_eq!(status, StatusCode::CREATED);

        let err = request_deletion(
            State(harness.state.clone()),
            Caller(harness.affiliate),
            Ok(Path(id)),
            reason(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn rejecting_a_proof_needs_notes() {
        let harness = harness().await;
        let mut request = create_request(&harness);
        request.deposit_proof_required = true;
        let (_, Json(body)) = create_contract(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Json(request)),
        )
        .await
        .expect("create");
        let id = body.data.contract.id;

        sign_as_admin(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            sign(SIGNATURE),
        )
        .await
        .expect("admin signs");
        sign_as_client(
            State(harness.state.clone()),
            Caller(harness.client),
            Ok(Path(id)),
            sign(SIGNATURE),
        )
        .await
        .expect("client signs");

        upload_payment_proof(
            State(harness.state.clone()),
            Caller(harness.client),
            Ok(Path(id)),
            Ok(Json(PaymentProofRequest {
                proof_ref: "proofs/receipt.pdf".to_string(),
                method: PaymentMethod::BankTransfer,
                notes: None,
            })),
        )
        .await
        .expect("proof uploaded");

        let review = |notes: Option<&str>| {
            Ok(Json(ReviewRequest {
                decision: ReviewDecision::Reject,
                notes: notes.map(str::to_string),
            }))
        };
        let err = verify_payment(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            review(None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let (_, Json(body)) = verify_payment(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            review(Some("amount does not match")),
        )
        .await
        .expect("rejected");
        assert_eq!(body.data.contract.state, ContractState::PendingPaymentProof);
        assert!(body.data.contract.payment_proof.is_none());
    }

    #[tokio::test]
    async fn unknown_state_filters_are_bad_requests() {
        let harness = harness().await;
        let err = list_contracts(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Query(ListContractsQuery {
                state: Some("archived".to_string()),
                limit: None,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_cancel_bodies_get_the_uniform_error_body() {
        let harness = harness().await;
        let id = create(&harness).await.contract.id;

        let err = cancel_contract(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            Json::<CancelRequest>::from_bytes(b"{\"reason\": ").map(Some),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let response = err.into_response();
        assert_eq!(
            response.headers().get("content-type").expect("content type"),
            "application/json"
        );

        let (_, Json(body)) = cancel_contract(
            State(harness.state.clone()),
            Caller(harness.admin),
            Ok(Path(id)),
            Ok(None),
        )
        .await
        .expect("cancel without a body");
        assert_eq!(body.data.contract.state, ContractState::Cancelled);
    }

    #[tokio::test]
    async fn callers_are_resolved_from_the_user_header() {
        let harness = harness().await;

        let request = Request::builder()
            .header(
                USER_ID_HEADER,
                HeaderValue::from_str(&harness.client.user_id.to_string()).expect("header"),
            )
            .body(Body::empty())
            .expect("request");
        let (mut parts, _) = request.into_parts();
        let Caller(actor) = Caller::from_request_parts(&mut parts, &harness.state)
            .await
            .expect("known user");
        assert_eq!(actor, harness.client);

        let (mut parts, _) = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .expect("request")
            .into_parts();
        let err = Caller::from_request_parts(&mut parts, &harness.state)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
