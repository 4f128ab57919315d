use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::instrument::InstrumentDetails;
use crate::domain::payment::ApiCall;
use crate::domain::properties;
use crate::error::{CoreError, Result};
use crate::store::{
    NewPaymentMethod, NewResponse, NewTransaction, PaymentMethodRecord, PaymentMethodStore,
    ResponseLog, ResponseRecord, TransactionLedger, TransactionRecord,
};

/// In-memory backend with the same observable semantics as the Postgres
/// repos, including the uniqueness discipline of `record_if_absent`. Used by
/// tests and demos; one lock, never held across an await.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    responses: Vec<ResponseRecord>,
    transactions: Vec<TransactionRecord>,
    payment_methods: Vec<PaymentMethodRecord>,
    next_response_id: i64,
    next_transaction_id: i64,
    next_payment_method_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResponseLog for MemoryStore {
    async fn record(&self, new: NewResponse) -> Result<ResponseRecord> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_response_id += 1;
        let record = ResponseRecord {
            id: inner.next_response_id,
            api_call: new.api_call,
            payment_id: new.payment_id,
            transaction_id: new.transaction_id,
            transaction_type: new.transaction_type,
            processor_account_id: new.processor_account_id,
            message: new.message,
            gateway_reference_id: new.gateway_reference_id,
            success: new.success,
            test_mode: new.test_mode,
            raw_fields: new.raw_fields,
            tenant_id: new.tenant_id,
            account_id: new.account_id,
            created_at: Utc::now(),
        };
        inner.responses.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<ResponseRecord> {
        self.inner
            .lock()
            .unwrap()
            .responses
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("response", id))
    }

    async fn find_by_gateway_reference(
        &self,
        tenant_id: Uuid,
        reference: &str,
    ) -> Result<Vec<ResponseRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .responses
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| r.gateway_reference_id.as_deref() == Some(reference))
            .cloned()
            .collect())
    }

    async fn find_for_payment(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        api_call: ApiCall,
    ) -> Result<Vec<ResponseRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .responses
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| r.payment_id == Some(payment_id) && r.api_call == api_call)
            .cloned()
            .collect())
    }

    async fn search_count(&self, tenant_id: Uuid, api_call: ApiCall, key: &str) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .responses
            .iter()
            .filter(|r| response_matches(r, tenant_id, api_call, key))
            .count() as i64)
    }

    async fn search_batch(
        &self,
        tenant_id: Uuid,
        api_call: ApiCall,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ResponseRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .responses
            .iter()
            .filter(|r| response_matches(r, tenant_id, api_call, key))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// Exact matches only, restricted to successful rows of the requested call
/// class: the gateway reference, the raw payload id, the raw card id, or the
/// payment id itself.
fn response_matches(r: &ResponseRecord, tenant_id: Uuid, api_call: ApiCall, key: &str) -> bool {
    if r.tenant_id != tenant_id || r.api_call != api_call || !r.success {
        return false;
    }
    r.gateway_reference_id.as_deref() == Some(key)
        || properties::extract_str(&r.raw_fields, &["id"]) == Some(key)
        || properties::extract_str(&r.raw_fields, &["card", "id"]) == Some(key)
        || r.payment_id.map(|p| p.to_string()).as_deref() == Some(key)
}

#[async_trait::async_trait]
impl TransactionLedger for MemoryStore {
    async fn record_if_absent(&self, new: NewTransaction) -> Result<(TransactionRecord, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .transactions
            .iter()
            .find(|t| {
                t.tenant_id == new.tenant_id
                    && t.payment_id == new.payment_id
                    && t.transaction_id == new.transaction_id
            })
            .cloned()
        {
            return Ok((existing, false));
        }

        inner.next_transaction_id += 1;
        let record = TransactionRecord {
            id: inner.next_transaction_id,
            response_id: new.response_id,
            api_call: new.api_call,
            payment_id: new.payment_id,
            transaction_id: new.transaction_id,
            amount_minor: new.amount_minor,
            currency: new.currency,
            gateway_reference_id: new.gateway_reference_id,
            tenant_id: new.tenant_id,
            account_id: new.account_id,
            created_at: Utc::now(),
        };
        inner.transactions.push(record.clone());
        Ok((record, true))
    }

    async fn find_by_transaction(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .transactions
            .iter()
            .find(|t| {
                t.tenant_id == tenant_id
                    && t.payment_id == payment_id
                    && t.transaction_id == transaction_id
            })
            .cloned())
    }

    async fn transactions_for(
        &self,
        tenant_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<TransactionRecord>> {
        let mut rows: Vec<TransactionRecord> = self
            .inner
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.payment_id == payment_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}

#[async_trait::async_trait]
impl PaymentMethodStore for MemoryStore {
    async fn create(&self, new: NewPaymentMethod) -> Result<PaymentMethodRecord> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_payment_method_id += 1;
        let now = Utc::now();
        let record = PaymentMethodRecord {
            id: inner.next_payment_method_id,
            account_id: new.account_id,
            tenant_id: new.tenant_id,
            payment_method_id: new.payment_method_id,
            external_instrument_id: new.external_instrument_id,
            customer_ref: new.customer_ref,
            details: new.details,
            is_default: new.is_default,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        inner.payment_methods.push(record.clone());
        Ok(record)
    }

    async fn link_payment_method_id(&self, id: i64, payment_method_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .payment_methods
            .iter_mut()
            .find(|pm| pm.id == id)
            .ok_or_else(|| CoreError::not_found("payment method row", id))?;
        record.payment_method_id = Some(payment_method_id);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_deleted(&self, tenant_id: Uuid, payment_method_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let matches: Vec<usize> = inner
            .payment_methods
            .iter()
            .enumerate()
            .filter(|(_, pm)| {
                pm.tenant_id == tenant_id
                    && !pm.is_deleted
                    && pm.payment_method_id == Some(payment_method_id)
            })
            .map(|(i, _)| i)
            .collect();

        match matches.as_slice() {
            [] => Err(CoreError::not_found("payment method", payment_method_id)),
            [index] => {
                let pm = &mut inner.payment_methods[*index];
                pm.is_deleted = true;
                pm.updated_at = Utc::now();
                Ok(())
            }
            many => Err(CoreError::AmbiguousMapping {
                payment_method_id,
                count: many.len(),
            }),
        }
    }

    async fn set_default(&self, tenant_id: Uuid, account_id: Uuid, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut seen = false;
        for pm in inner
            .payment_methods
            .iter_mut()
            .filter(|pm| pm.tenant_id == tenant_id && pm.account_id == account_id && !pm.is_deleted)
        {
            let make_default = pm.id == id;
            seen |= make_default;
            if pm.is_default != make_default {
                pm.is_default = make_default;
                pm.updated_at = Utc::now();
            }
        }
        if seen {
            Ok(())
        } else {
            Err(CoreError::not_found("payment method row", id))
        }
    }

    async fn active_by_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<PaymentMethodRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .payment_methods
            .iter()
            .filter(|pm| pm.tenant_id == tenant_id && pm.account_id == account_id && !pm.is_deleted)
            .cloned()
            .collect())
    }

    async fn active_by_payment_method_id(
        &self,
        tenant_id: Uuid,
        payment_method_id: Uuid,
    ) -> Result<PaymentMethodRecord> {
        let inner = self.inner.lock().unwrap();
        let matches: Vec<&PaymentMethodRecord> = inner
            .payment_methods
            .iter()
            .filter(|pm| {
                pm.tenant_id == tenant_id
                    && !pm.is_deleted
                    && pm.payment_method_id == Some(payment_method_id)
            })
            .collect();

        match matches.as_slice() {
            [] => Err(CoreError::not_found("payment method", payment_method_id)),
            [one] => Ok((*one).clone()),
            many => Err(CoreError::AmbiguousMapping {
                payment_method_id,
                count: many.len(),
            }),
        }
    }

    async fn search_count(&self, tenant_id: Uuid, key: &str) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payment_methods
            .iter()
            .filter(|pm| payment_method_matches(pm, tenant_id, key))
            .count() as i64)
    }

    async fn search_batch(
        &self,
        tenant_id: Uuid,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PaymentMethodRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payment_methods
            .iter()
            .filter(|pm| payment_method_matches(pm, tenant_id, key))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// Exact match on identifiers and short card fields, partial match on names
/// and address lines. Rows never confirmed by the caller (no logical id yet)
/// are excluded.
fn payment_method_matches(pm: &PaymentMethodRecord, tenant_id: Uuid, key: &str) -> bool {
    if pm.tenant_id != tenant_id || pm.payment_method_id.is_none() {
        return false;
    }

    let exact = pm.account_id.to_string() == key
        || pm.payment_method_id.map(|id| id.to_string()).as_deref() == Some(key)
        || pm.external_instrument_id == key
        || pm.customer_ref.as_deref() == Some(key);
    if exact {
        return true;
    }

    let contains = |field: &Option<String>| {
        field
            .as_deref()
            .is_some_and(|v| v.to_lowercase().contains(&key.to_lowercase()))
    };
    let eq = |field: &Option<String>| field.as_deref() == Some(key);

    match &pm.details {
        Some(InstrumentDetails::Card {
            brand,
            last4,
            exp_month,
            exp_year,
            holder_name,
            address1,
            address2,
            city,
            state,
            zip,
            country,
        }) => {
            eq(brand)
                || eq(last4)
                || eq(state)
                || eq(zip)
                || exp_month.map(|m| m.to_string()).as_deref() == Some(key)
                || exp_year.map(|y| y.to_string()).as_deref() == Some(key)
                || contains(holder_name)
                || contains(address1)
                || contains(address2)
                || contains(city)
                || contains(country)
        }
        Some(InstrumentDetails::BankAccount {
            bank_name,
            account_last4,
            routing_number,
            holder_name,
            ..
        }) => eq(account_last4) || eq(routing_number) || contains(bank_name) || contains(holder_name),
        None => false,
    }
}
