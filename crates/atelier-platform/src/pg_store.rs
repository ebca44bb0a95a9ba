use std::str::FromStr;

use anyhow::anyhow;
use async_trait::async_trait;
use atelier_core::{
    AuditEntry, ChangeSet, Contract, ContractFilter, ContractStore, ContractSummary,
    ContractWrite, DeletionRequest, DeletionRequestWrite, DeletionStatus, Notification,
    NotificationStore, OutboxEntry, OutboxStore, ParseEnumError, PaymentProof, ProofRejection,
    Signature, StoreError, UserProfile, UserStore,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

const CONTRACT_COLUMNS: &str = r#"
    id, contract_number, share_token, title, client_id, affiliate_id,
    total_amount, deposit_amount, remaining_amount, currency, payment_method, terms,
    deposit_proof_required, commission_amount, commission_status, state,
    admin_signature, client_signature, payment_proof, last_rejection,
    version, created_by, created_at, updated_at, deleted_at
"#;

const DELETION_REQUEST_COLUMNS: &str = r#"
    id, contract_id, requested_by, reason, status, reviewed_by, review_notes,
    created_at, reviewed_at
"#;

const OUTBOX_COLUMNS: &str = r#"
    id, channel, recipient_id, recipient_email, title, message, kind, related_id, link,
    status, attempts, next_attempt_at, last_error, created_at, delivered_at
"#;

/// Postgres-backed storage for the whole portal.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContractStore for PgStore {
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        match &changes.contract {
            Some(ContractWrite::Insert(contract)) => insert_contract(&mut tx, contract).await?,
            Some(ContractWrite::Update {
                contract,
                expected_version,
            }) => update_contract(&mut tx, contract, *expected_version).await?,
            None => {}
        }

        match &changes.deletion_request {
            Some(DeletionRequestWrite::Insert(request)) => {
                insert_deletion_request(&mut tx, request).await?
            }
            Some(DeletionRequestWrite::Resolve(request)) => {
                resolve_deletion_request(&mut tx, request).await?
            }
            None => {}
        }

        for entry in &changes.audit {
            sqlx::query(
                r#"
                INSERT INTO contract_audit_log (
                    id, contract_id, action, actor_id, from_state, to_state, note, occurred_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry.id)
            .bind(entry.contract_id)
            .bind(&entry.action)
            .bind(entry.actor_id)
            .bind(entry.from_state.map(|state| state.as_str()))
            .bind(entry.to_state.as_str())
            .bind(&entry.note)
            .bind(entry.occurred_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        for entry in &changes.outbox {
            sqlx::query(
                r#"
                INSERT INTO notification_outbox (
                    id, channel, recipient_id, recipient_email, title, message, kind,
                    related_id, link, status, attempts, next_attempt_at, last_error,
                    created_at, delivered_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(entry.id)
            .bind(entry.channel.as_str())
            .bind(entry.recipient_id)
            .bind(&entry.recipient_email)
            .bind(&entry.title)
            .bind(&entry.message)
            .bind(&entry.kind)
            .bind(entry.related_id)
            .bind(&entry.link)
            .bind(entry.status.as_str())
            .bind(entry.attempts)
            .bind(entry.next_attempt_at)
            .bind(&entry.last_error)
            .bind(entry.created_at)
            .bind(entry.delivered_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn contract(&self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(contract_from_row).transpose()
    }

    async fn contract_by_share_token(&self, token: &str) -> Result<Option<Contract>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTRACT_COLUMNS} FROM contracts WHERE share_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(contract_from_row).transpose()
    }

    async fn list_contracts(&self, filter: &ContractFilter) -> Result<Vec<Contract>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CONTRACT_COLUMNS}
            FROM contracts
            WHERE deleted_at IS NULL
              AND ($1::uuid IS NULL OR client_id = $1)
              AND ($2::uuid IS NULL OR affiliate_id = $2)
              AND ($3::text IS NULL OR state = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#
        ))
        .bind(filter.client_id)
        .bind(filter.affiliate_id)
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(contract_from_row).collect()
    }

    async fn contract_history(&self, contract_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, contract_id, action, actor_id, from_state, to_state, note, occurred_at
            FROM contract_audit_log
            WHERE contract_id = $1
            ORDER BY occurred_at, id
            "#,
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(audit_entry_from_row).collect()
    }

    async fn deletion_request(&self, id: Uuid) -> Result<Option<DeletionRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DELETION_REQUEST_COLUMNS} FROM contract_deletion_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(deletion_request_from_row).transpose()
    }

    async fn list_deletion_requests(
        &self,
        status: Option<DeletionStatus>,
        requested_by: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<DeletionRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {DELETION_REQUEST_COLUMNS}
            FROM contract_deletion_requests
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::uuid IS NULL OR requested_by = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#
        ))
        .bind(status.map(|status| status.as_str()))
        .bind(requested_by)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(deletion_request_from_row).collect()
    }

    async fn summary(&self) -> Result<ContractSummary, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS contracts_total,
                COUNT(*) FILTER (WHERE state = 'draft') AS draft,
                COUNT(*) FILTER (
                    WHERE state IN ('pending_admin_signature', 'pending_client_signature')
                ) AS pending_signature,
                COUNT(*) FILTER (WHERE state = 'pending_payment_proof') AS pending_payment_proof,
                COUNT(*) FILTER (WHERE state = 'pending_verification') AS pending_verification,
                COUNT(*) FILTER (WHERE state = 'active') AS active,
                COUNT(*) FILTER (WHERE state = 'cancelled') AS cancelled,
                COALESCE(SUM(total_amount) FILTER (WHERE state = 'active'), 0) AS active_value,
                COALESCE(
                    SUM(deposit_amount) FILTER (
                        WHERE state = 'active'
                          AND (NOT deposit_proof_required
                               OR payment_proof->>'verified_at' IS NOT NULL)
                    ),
                    0
                ) AS deposits_collected,
                (
                    SELECT COUNT(*)
                    FROM contract_deletion_requests
                    WHERE status = 'pending'
                ) AS deletion_requests_pending
            FROM contracts
            WHERE deleted_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(ContractSummary {
            contracts_total: row.try_get("contracts_total").map_err(db_error)?,
            draft: row.try_get("draft").map_err(db_error)?,
            pending_signature: row.try_get("pending_signature").map_err(db_error)?,
            pending_payment_proof: row.try_get("pending_payment_proof").map_err(db_error)?,
            pending_verification: row.try_get("pending_verification").map_err(db_error)?,
            active: row.try_get("active").map_err(db_error)?,
            cancelled: row.try_get("cancelled").map_err(db_error)?,
            deletion_requests_pending: row
                .try_get("deletion_requests_pending")
                .map_err(db_error)?,
            active_value: row.try_get("active_value").map_err(db_error)?,
            deposits_collected: row.try_get("deposits_collected").map_err(db_error)?,
        })
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, email, full_name, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn admins(&self) -> Result<Vec<UserProfile>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, email, full_name, role, created_at
            FROM users
            WHERE role = 'admin'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(user_from_row).collect()
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, title, message, kind, related_id, link, read, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.kind)
        .bind(notification.related_id)
        .bind(&notification.link)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn notifications_for(
        &self,
        user_id: Uuid,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, message, kind, related_id, link, read, created_at
            FROM notifications
            WHERE user_id = $1
              AND (NOT $2 OR read = FALSE)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2")
            .bind(notification_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND read = FALSE")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE notification_outbox
            SET attempts = attempts + 1,
                next_attempt_at = $2
            WHERE id IN (
                SELECT id
                FROM notification_outbox
                WHERE status = 'pending'
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now + lease)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut claimed = rows
            .iter()
            .map(outbox_entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|entry| (entry.created_at, entry.id));
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_outbox
            SET status = 'delivered', delivered_at = $2, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        require_row(result.rows_affected())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notification_outbox SET next_attempt_at = $2, last_error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        require_row(result.rows_affected())
    }

    async fn mark_dead(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE notification_outbox SET status = 'dead', last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        require_row(result.rows_affected())
    }
}

async fn insert_contract(conn: &mut PgConnection, contract: &Contract) -> Result<(), StoreError> {
    sqlx::query(&format!(
        r#"
        INSERT INTO contracts ({CONTRACT_COLUMNS})
        VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
        )
        "#
    ))
    .bind(contract.id)
    .bind(&contract.contract_number)
    .bind(&contract.share_token)
    .bind(&contract.title)
    .bind(contract.client_id)
    .bind(contract.affiliate_id)
    .bind(contract.total_amount)
    .bind(contract.deposit_amount)
    .bind(contract.remaining_amount)
    .bind(&contract.currency)
    .bind(contract.payment_method.as_str())
    .bind(Json(&contract.terms))
    .bind(contract.deposit_proof_required)
    .bind(contract.commission_amount)
    .bind(contract.commission_status.map(|status| status.as_str()))
    .bind(contract.state.as_str())
    .bind(contract.admin_signature.as_ref().map(Json))
    .bind(contract.client_signature.as_ref().map(Json))
    .bind(contract.payment_proof.as_ref().map(Json))
    .bind(contract.last_rejection.as_ref().map(Json))
    .bind(contract.version)
    .bind(contract.created_by)
    .bind(contract.created_at)
    .bind(contract.updated_at)
    .bind(contract.deleted_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn update_contract(
    conn: &mut PgConnection,
    contract: &Contract,
    expected_version: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE contracts
        SET state = $3,
            admin_signature = $4,
            client_signature = $5,
            payment_proof = $6,
            last_rejection = $7,
            commission_status = $8,
            version = $9,
            updated_at = $10,
            deleted_at = $11
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(contract.id)
    .bind(expected_version)
    .bind(contract.state.as_str())
    .bind(contract.admin_signature.as_ref().map(Json))
    .bind(contract.client_signature.as_ref().map(Json))
    .bind(contract.payment_proof.as_ref().map(Json))
    .bind(contract.last_rejection.as_ref().map(Json))
    .bind(contract.commission_status.map(|status| status.as_str()))
    .bind(contract.version)
    .bind(contract.updated_at)
    .bind(contract.deleted_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let exists = sqlx::query("SELECT 1 FROM contracts WHERE id = $1")
        .bind(contract.id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    match exists {
        Some(_) => Err(StoreError::VersionConflict {
            contract_id: contract.id,
            expected: expected_version,
        }),
        None => Err(StoreError::NotFound),
    }
}

async fn insert_deletion_request(
    conn: &mut PgConnection,
    request: &DeletionRequest,
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        r#"
        INSERT INTO contract_deletion_requests ({DELETION_REQUEST_COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#
    ))
    .bind(request.id)
    .bind(request.contract_id)
    .bind(request.requested_by)
    .bind(&request.reason)
    .bind(request.status.as_str())
    .bind(request.reviewed_by)
    .bind(&request.review_notes)
    .bind(request.created_at)
    .bind(request.reviewed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn resolve_deletion_request(
    conn: &mut PgConnection,
    request: &DeletionRequest,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE contract_deletion_requests
        SET status = $2, reviewed_by = $3, review_notes = $4, reviewed_at = $5
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(request.id)
    .bind(request.status.as_str())
    .bind(request.reviewed_by)
    .bind(&request.review_notes)
    .bind(request.reviewed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let exists = sqlx::query("SELECT 1 FROM contract_deletion_requests WHERE id = $1")
        .bind(request.id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    match exists {
        Some(_) => Err(StoreError::AlreadyResolved(request.id)),
        None => Err(StoreError::NotFound),
    }
}

fn contract_from_row(row: &PgRow) -> Result<Contract, StoreError> {
    let terms: Json<Vec<String>> = row.try_get("terms").map_err(db_error)?;
    let commission_status: Option<String> = row.try_get("commission_status").map_err(db_error)?;
    let admin_signature: Option<Json<Signature>> =
        row.try_get("admin_signature").map_err(db_error)?;
    let client_signature: Option<Json<Signature>> =
        row.try_get("client_signature").map_err(db_error)?;
    let payment_proof: Option<Json<PaymentProof>> =
        row.try_get("payment_proof").map_err(db_error)?;
    let last_rejection: Option<Json<ProofRejection>> =
        row.try_get("last_rejection").map_err(db_error)?;

    Ok(Contract {
        id: row.try_get("id").map_err(db_error)?,
        contract_number: row.try_get("contract_number").map_err(db_error)?,
        share_token: row.try_get("share_token").map_err(db_error)?,
        title: row.try_get("title").map_err(db_error)?,
        client_id: row.try_get("client_id").map_err(db_error)?,
        affiliate_id: row.try_get("affiliate_id").map_err(db_error)?,
        total_amount: row.try_get("total_amount").map_err(db_error)?,
        deposit_amount: row.try_get("deposit_amount").map_err(db_error)?,
        remaining_amount: row.try_get("remaining_amount").map_err(db_error)?,
        currency: row
            .try_get::<String, _>("currency")
            .map_err(db_error)?
            .trim()
            .to_string(),
        payment_method: parse_column(row, "payment_method")?,
        terms: terms.0,
        deposit_proof_required: row.try_get("deposit_proof_required").map_err(db_error)?,
        commission_amount: row.try_get("commission_amount").map_err(db_error)?,
        commission_status: commission_status.as_deref().map(parse_label).transpose()?,
        state: parse_column(row, "state")?,
        admin_signature: admin_signature.map(|json| json.0),
        client_signature: client_signature.map(|json| json.0),
        payment_proof: payment_proof.map(|json| json.0),
        last_rejection: last_rejection.map(|json| json.0),
        version: row.try_get("version").map_err(db_error)?,
        created_by: row.try_get("created_by").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
        deleted_at: row.try_get("deleted_at").map_err(db_error)?,
    })
}

fn deletion_request_from_row(row: &PgRow) -> Result<DeletionRequest, StoreError> {
    Ok(DeletionRequest {
        id: row.try_get("id").map_err(db_error)?,
        contract_id: row.try_get("contract_id").map_err(db_error)?,
        requested_by: row.try_get("requested_by").map_err(db_error)?,
        reason: row.try_get("reason").map_err(db_error)?,
        status: parse_column(row, "status")?,
        reviewed_by: row.try_get("reviewed_by").map_err(db_error)?,
        review_notes: row.try_get("review_notes").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        reviewed_at: row.try_get("reviewed_at").map_err(db_error)?,
    })
}

fn audit_entry_from_row(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let from_state: Option<String> = row.try_get("from_state").map_err(db_error)?;
    Ok(AuditEntry {
        id: row.try_get("id").map_err(db_error)?,
        contract_id: row.try_get("contract_id").map_err(db_error)?,
        action: row.try_get("action").map_err(db_error)?,
        actor_id: row.try_get("actor_id").map_err(db_error)?,
        from_state: from_state.as_deref().map(parse_label).transpose()?,
        to_state: parse_column(row, "to_state")?,
        note: row.try_get("note").map_err(db_error)?,
        occurred_at: row.try_get("occurred_at").map_err(db_error)?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    Ok(Notification {
        id: row.try_get("id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        title: row.try_get("title").map_err(db_error)?,
        message: row.try_get("message").map_err(db_error)?,
        kind: row.try_get("kind").map_err(db_error)?,
        related_id: row.try_get("related_id").map_err(db_error)?,
        link: row.try_get("link").map_err(db_error)?,
        read: row.try_get("read").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserProfile, StoreError> {
    Ok(UserProfile {
        id: row.try_get("id").map_err(db_error)?,
        email: row.try_get("email").map_err(db_error)?,
        full_name: row.try_get("full_name").map_err(db_error)?,
        role: parse_column(row, "role")?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

fn outbox_entry_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    Ok(OutboxEntry {
        id: row.try_get("id").map_err(db_error)?,
        channel: parse_column(row, "channel")?,
        recipient_id: row.try_get("recipient_id").map_err(db_error)?,
        recipient_email: row.try_get("recipient_email").map_err(db_error)?,
        title: row.try_get("title").map_err(db_error)?,
        message: row.try_get("message").map_err(db_error)?,
        kind: row.try_get("kind").map_err(db_error)?,
        related_id: row.try_get("related_id").map_err(db_error)?,
        link: row.try_get("link").map_err(db_error)?,
        status: parse_column(row, "status")?,
        attempts: row.try_get("attempts").map_err(db_error)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(db_error)?,
        last_error: row.try_get("last_error").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        delivered_at: row.try_get("delivered_at").map_err(db_error)?,
    })
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.try_get(column).map_err(db_error)?;
    parse_label(&raw)
}

fn parse_label<T>(raw: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = ParseEnumError>,
{
    raw.parse()
        .map_err(|err: ParseEnumError| StoreError::Backend(err.into()))
}

fn require_row(rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Maps unique violations onto [`StoreError::Duplicate`]; everything else is
/// a backend failure.
fn db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Duplicate(duplicate_message(db.constraint()).to_string());
        }
    }
    StoreError::Backend(anyhow!(err))
}

fn duplicate_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("users_email_key") => "e-mail address is already registered",
        Some("contract_deletion_requests_one_pending") => {
            "a deletion request for this contract is already pending"
        }
        Some("contracts_contract_number_key") => "contract number is already taken",
        Some("contracts_share_token_key") => "share token is already taken",
        _ => "record already exists",
    }
}
