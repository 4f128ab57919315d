use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::store::{NewPaymentMethod, PaymentMethodRecord, PaymentMethodStore};

#[derive(Clone)]
pub struct PaymentMethodsRepo {
    pub pool: PgPool,
}

fn row_to_payment_method(row: &PgRow) -> Result<PaymentMethodRecord> {
    let details: Option<serde_json::Value> = row.get("details");
    Ok(PaymentMethodRecord {
        id: row.get("id"),
        account_id: row.get("account_id"),
        tenant_id: row.get("tenant_id"),
        payment_method_id: row.get("payment_method_id"),
        external_instrument_id: row.get("external_instrument_id"),
        customer_ref: row.get("customer_ref"),
        details: details.map(serde_json::from_value).transpose()?,
        is_default: row.get("is_default"),
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const PAYMENT_METHOD_COLUMNS: &str = r#"
    id, account_id, tenant_id, payment_method_id, external_instrument_id, customer_ref,
    details, is_default, is_deleted, created_at, updated_at
"#;

/// Exact match on identifiers and short card fields, partial match on names
/// and address lines; rows without a confirmed logical id are excluded.
const SEARCH_PREDICATE: &str = r#"
    tenant_id = $1 AND payment_method_id IS NOT NULL
    AND (
        account_id::text = $2
        OR payment_method_id::text = $2
        OR external_instrument_id = $2
        OR customer_ref = $2
        OR details->>'brand' = $2
        OR details->>'last4' = $2
        OR details->>'account_last4' = $2
        OR details->>'routing_number' = $2
        OR details->>'exp_month' = $2
        OR details->>'exp_year' = $2
        OR details->>'state' = $2
        OR details->>'zip' = $2
        OR details->>'holder_name' ILIKE '%' || $2 || '%'
        OR details->>'address1' ILIKE '%' || $2 || '%'
        OR details->>'address2' ILIKE '%' || $2 || '%'
        OR details->>'city' ILIKE '%' || $2 || '%'
        OR details->>'country' ILIKE '%' || $2 || '%'
        OR details->>'bank_name' ILIKE '%' || $2 || '%'
    )
"#;

#[async_trait::async_trait]
impl PaymentMethodStore for PaymentMethodsRepo {
    async fn create(&self, new: NewPaymentMethod) -> Result<PaymentMethodRecord> {
        let details = new.details.as_ref().map(serde_json::to_value).transpose()?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payment_methods (
                account_id, tenant_id, payment_method_id, external_instrument_id, customer_ref,
                details, is_default
            ) VALUES ($1,$2,$3,$4,$5,$6,$7)
            RETURNING {PAYMENT_METHOD_COLUMNS}
            "#
        ))
        .bind(new.account_id)
        .bind(new.tenant_id)
        .bind(new.payment_method_id)
        .bind(new.external_instrument_id)
        .bind(new.customer_ref)
        .bind(details)
        .bind(new.is_default)
        .fetch_one(&self.pool)
        .await?;

        row_to_payment_method(&row)
    }

    async fn link_payment_method_id(&self, id: i64, payment_method_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_methods
            SET payment_method_id = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(payment_method_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("payment method row", id));
        }
        Ok(())
    }

    async fn mark_deleted(&self, tenant_id: Uuid, payment_method_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id FROM payment_methods
            WHERE tenant_id = $1 AND payment_method_id = $2 AND is_deleted = FALSE
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(payment_method_id)
        .fetch_all(tx.as_mut())
        .await?;

        let id: i64 = match rows.as_slice() {
            [] => return Err(CoreError::not_found("payment method", payment_method_id)),
            [row] => row.get("id"),
            many => {
                return Err(CoreError::AmbiguousMapping {
                    payment_method_id,
                    count: many.len(),
                })
            }
        };

        sqlx::query("UPDATE payment_methods SET is_deleted = TRUE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_default(&self, tenant_id: Uuid, account_id: Uuid, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE payment_methods
            SET is_default = (id = $3), updated_at = now()
            WHERE tenant_id = $1 AND account_id = $2 AND is_deleted = FALSE
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(id)
        .execute(tx.as_mut())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("payment method row", id));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn active_by_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<PaymentMethodRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods
            WHERE tenant_id = $1 AND account_id = $2 AND is_deleted = FALSE
            ORDER BY id ASC
            "#
        ))
        .bind(tenant_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment_method).collect()
    }

    async fn active_by_payment_method_id(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<PaymentMethodRecord> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods
            WHERE tenant_id = $1 AND payment_method_id = $2 AND is_deleted = FALSE
            ORDER BY id ASC
            "#
        ))
        .bind(tenant_id)
        .bind(payment_method_id)
        .fetch_all(&self.pool)
        .await?;

        match rows.as_slice() {
            [] => Err(CoreError::not_found("payment method", payment_method_id)),
            [row] => row_to_payment_method(row),
            many => Err(CoreError::AmbiguousMapping {
                payment_method_id,
                count: many.len(),
            }),
        }
    }

    async fn search_count(&self, tenant_id: Uuid, key: &str) -> Result<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(DISTINCT id) AS total FROM payment_methods WHERE {SEARCH_PREDICATE}"
        ))
        .bind(tenant_id)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn search_batch(
        &self,
        tenant_id: Uuid,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PaymentMethodRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT DISTINCT {PAYMENT_METHOD_COLUMNS} FROM payment_methods
            WHERE {SEARCH_PREDICATE}
            ORDER BY id ASC
            OFFSET $3 LIMIT $4
            "#
        ))
        .bind(tenant_id)
        .bind(key)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payment_method).collect()
    }
}
