use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::payment::ApiCall;
use crate::error::{CoreError, Result};
use crate::store::{
    select_refund_candidate, NewTransaction, TransactionLedger, TransactionRecord,
};

#[derive(Clone)]
pub struct TransactionsRepo {
    pub pool: PgPool,
}

fn row_to_transaction(row: &PgRow) -> Result<TransactionRecord> {
    let api_call: String = row.get("api_call");
    Ok(TransactionRecord {
        id: row.get("id"),
        response_id: row.get("response_id"),
        api_call: ApiCall::parse(&api_call).ok_or(CoreError::UnknownApiCall(api_call))?,
        payment_id: row.get("payment_id"),
        transaction_id: row.get("transaction_id"),
        amount_minor: row.get("amount_minor"),
        currency: row.get("currency"),
        gateway_reference_id: row.get("gateway_reference_id"),
        tenant_id: row.get("tenant_id"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
    })
}

const TRANSACTION_COLUMNS: &str = r#"
    id, response_id, api_call, payment_id, transaction_id, amount_minor, currency,
    gateway_reference_id, tenant_id, account_id, created_at
"#;

#[async_trait::async_trait]
impl TransactionLedger for TransactionsRepo {
    async fn record_if_absent(&self, new: NewTransaction) -> Result<(TransactionRecord, bool)> {
        // The unique index on (tenant_id, payment_id, transaction_id) is the
        // at-most-once guarantee; a raced insert reads back the winner.
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO ledger_transactions (
                response_id, api_call, payment_id, transaction_id, amount_minor, currency,
                gateway_reference_id, tenant_id, account_id
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            ON CONFLICT (tenant_id, payment_id, transaction_id) DO NOTHING
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(new.response_id)
        .bind(new.api_call.as_str())
        .bind(new.payment_id)
        .bind(new.transaction_id)
        .bind(new.amount_minor)
        .bind(new.currency.clone())
        .bind(new.gateway_reference_id.clone())
        .bind(new.tenant_id)
        .bind(new.account_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row_to_transaction(&row)?, true));
        }

        tracing::info!(
            payment_id = %new.payment_id,
            transaction_id = %new.transaction_id,
            "ledger row already present, returning recorded outcome"
        );
        let existing = self
            .find_by_transaction(new.tenant_id, new.payment_id, new.transaction_id)
            .await?
            .ok_or_else(|| CoreError::not_found("ledger transaction", new.transaction_id))?;
        Ok((existing, false))
    }

    async fn find_by_transaction(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions
            WHERE tenant_id = $1 AND payment_id = $2 AND transaction_id = $3
            "#
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn transactions_for(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions
            WHERE tenant_id = $1 AND payment_id = $2
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn find_candidate_for_refund(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        amount_minor: i64,
    ) -> Result<TransactionRecord> {
        // Row locks on the payment's ledger entries serialize concurrent
        // refund decisions for the same logical payment.
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions
            WHERE tenant_id = $1 AND payment_id = $2
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#
        ))
        .bind(tenant_id)
        .bind(payment_id)
        .fetch_all(tx.as_mut())
        .await?;

        let history: Vec<TransactionRecord> =
            rows.iter().map(row_to_transaction).collect::<Result<_>>()?;
        let candidate = select_refund_candidate(&history, payment_id, amount_minor)?.clone();
        tx.commit().await?;
        Ok(candidate)
    }
}
