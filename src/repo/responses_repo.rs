use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::payment::ApiCall;
use crate::error::{CoreError, Result};
use crate::store::{NewResponse, ResponseLog, ResponseRecord};

#[derive(Clone)]
pub struct ResponsesRepo {
    pub pool: PgPool,
}

fn row_to_response(row: &PgRow) -> Result<ResponseRecord> {
    let api_call: String = row.get("api_call");
    Ok(ResponseRecord {
        id: row.get("id"),
        api_call: ApiCall::parse(&api_call).ok_or(CoreError::UnknownApiCall(api_call))?,
        payment_id: row.get("payment_id"),
        transaction_id: row.get("transaction_id"),
        transaction_type: row.get("transaction_type"),
        processor_account_id: row.get("processor_account_id"),
        message: row.get("message"),
        gateway_reference_id: row.get("gateway_reference_id"),
        success: row.get("success"),
        test_mode: row.get("test_mode"),
        raw_fields: row.get("raw_fields"),
        tenant_id: row.get("tenant_id"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
    })
}

const RESPONSE_COLUMNS: &str = r#"
    id, api_call, payment_id, transaction_id, transaction_type, processor_account_id,
    message, gateway_reference_id, success, test_mode, raw_fields, tenant_id, account_id,
    created_at
"#;

/// Exact matches across identity fields, restricted to successful rows of
/// the requested call class.
const SEARCH_PREDICATE: &str = r#"
    tenant_id = $1 AND api_call = $2 AND success = TRUE
    AND (
        gateway_reference_id = $3
        OR raw_fields->>'id' = $3
        OR raw_fields#>>'{card,id}' = $3
        OR payment_id::text = $3
    )
"#;

#[async_trait::async_trait]
impl ResponseLog for ResponsesRepo {
    async fn record(&self, new: NewResponse) -> Result<ResponseRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO gateway_responses (
                api_call, payment_id, transaction_id, transaction_type, processor_account_id,
                message, gateway_reference_id, success, test_mode, raw_fields, tenant_id, account_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            RETURNING {RESPONSE_COLUMNS}
            "#
        ))
        .bind(new.api_call.as_str())
        .bind(new.payment_id)
        .bind(new.transaction_id)
        .bind(new.transaction_type)
        .bind(new.processor_account_id)
        .bind(new.message)
        .bind(new.gateway_reference_id)
        .bind(new.success)
        .bind(new.test_mode)
        .bind(new.raw_fields)
        .bind(new.tenant_id)
        .bind(new.account_id)
        .fetch_one(&self.pool)
        .await?;

        row_to_response(&row)
    }

    async fn get(&self, id: i64) -> Result<ResponseRecord> {
        let row = sqlx::query(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM gateway_responses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("response", id))?;

        row_to_response(&row)
    }

    async fn find_by_gateway_reference(
        &self,
        tenant_id: Uuid,
        reference: &str,
    ) -> Result<Vec<ResponseRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESPONSE_COLUMNS} FROM gateway_responses
            WHERE tenant_id = $1 AND gateway_reference_id = $2
            ORDER BY id ASC
            "#
        ))
        .bind(tenant_id)
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_response).collect()
    }

    async fn find_for_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        api_call: ApiCall,
    ) -> Result<Vec<ResponseRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESPONSE_COLUMNS} FROM gateway_responses
            WHERE tenant_id = $1 AND payment_id = $2 AND api_call = $3
            ORDER BY id ASC
            "#
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .bind(api_call.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_response).collect()
    }

    async fn search_count(&self, tenant_id: Uuid, api_call: ApiCall, key: &str) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(DISTINCT id) AS total FROM gateway_responses WHERE {SEARCH_PREDICATE}"
        ))
        .bind(tenant_id)
        .bind(api_call.as_str())
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn search_batch(
        &self,
        tenant_id: Uuid,
        api_call: ApiCall,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ResponseRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT DISTINCT {RESPONSE_COLUMNS} FROM gateway_responses
            WHERE {SEARCH_PREDICATE}
            ORDER BY id ASC
            OFFSET $4 LIMIT $5
            "#
        ))
        .bind(tenant_id)
        .bind(api_call.as_str())
        .bind(key)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_response).collect()
    }
}
