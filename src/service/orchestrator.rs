use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::directory::AccountDirectory;
use crate::domain::context::CallContext;
use crate::domain::instrument::{InstrumentDetails, InstrumentRef, KnownInstrument, NewInstrument};
use crate::domain::payment::{ApiCall, PaymentResult};
use crate::domain::properties::{self, Properties};
use crate::error::{CoreError, Result};
use crate::gateway::{CallOptions, GatewayFacade, Outcome};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::search::{BatchLoader, Pagination};
use crate::store::{
    NewPaymentMethod, NewResponse, NewTransaction, PaymentMethodRecord, PaymentMethodStore,
    ResponseLog, ResponseRecord, TransactionLedger, TransactionRecord,
};

/// Top-level entry point. Composes the gateway facade with the response log,
/// the transaction ledger and the payment-method store; every dependency is
/// injected, nothing is global.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    pub gateway: Arc<dyn GatewayFacade>,
    pub responses: Arc<dyn ResponseLog>,
    pub ledger: Arc<dyn TransactionLedger>,
    pub payment_methods: Arc<dyn PaymentMethodStore>,
    pub directory: Arc<dyn AccountDirectory>,
    pub config: AppConfig,
}

impl PaymentOrchestrator {
    pub async fn charge(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
        payment_method_id: Uuid,
        amount_minor: i64,
        currency: &str,
        props: &Properties,
    ) -> Result<PaymentResult> {
        self.payment_call(
            ApiCall::Purchase,
            ctx,
            account_id,
            payment_id,
            transaction_id,
            payment_method_id,
            amount_minor,
            currency,
            props,
        )
        .await
    }

    pub async fn authorize(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
        payment_method_id: Uuid,
        amount_minor: i64,
        currency: &str,
        props: &Properties,
    ) -> Result<PaymentResult> {
        self.payment_call(
            ApiCall::Authorize,
            ctx,
            account_id,
            payment_id,
            transaction_id,
            payment_method_id,
            amount_minor,
            currency,
            props,
        )
        .await
    }

    /// Purchase and authorize share one shape: ledger check first (a replay
    /// never reaches the gateway), then call, record, derive.
    #[allow(clippy::too_many_arguments)]
    async fn payment_call(
        &self,
        api_call: ApiCall,
        ctx: &CallContext,
        account_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
        payment_method_id: Uuid,
        amount_minor: i64,
        currency: &str,
        props: &Properties,
    ) -> Result<PaymentResult> {
        if let Some(result) = self.replay(ctx, payment_id, transaction_id).await? {
            return Ok(result);
        }

        let pm = self
            .payment_methods
            .active_by_payment_method_id(ctx.tenant_id, payment_method_id)
            .await?;
        let options = self.build_options(props, Some(amount_minor), Some(&pm), Some(transaction_id));
        let instrument = InstrumentRef {
            external_instrument_id: pm.external_instrument_id.clone(),
            customer_ref: pm.customer_ref.clone(),
        };

        let outcome = match api_call {
            ApiCall::Purchase => {
                self.gateway
                    .purchase(amount_minor, currency, &instrument, &options)
                    .await?
            }
            _ => {
                self.gateway
                    .authorize(amount_minor, currency, &instrument, &options)
                    .await?
            }
        };

        let (response, transaction) = self
            .record_outcome(
                api_call,
                ctx,
                Some(account_id),
                Some(payment_id),
                Some(transaction_id),
                Some(amount_minor),
                Some(currency),
                options.processor_account_id.clone(),
                outcome,
            )
            .await?;
        Ok(PaymentResult::from_records(&response, transaction.as_ref()))
    }

    pub async fn capture(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
        amount_minor: i64,
        currency: &str,
        props: &Properties,
    ) -> Result<PaymentResult> {
        if let Some(result) = self.replay(ctx, payment_id, transaction_id).await? {
            return Ok(result);
        }

        let reference = self
            .prior_reference(ctx, payment_id, &[ApiCall::Authorize])
            .await?;
        let options = self.build_options(props, Some(amount_minor), None, Some(transaction_id));
        let outcome = self
            .gateway
            .capture(amount_minor, currency, &reference, &options)
            .await?;

        let (response, transaction) = self
            .record_outcome(
                ApiCall::Capture,
                ctx,
                Some(account_id),
                Some(payment_id),
                Some(transaction_id),
                Some(amount_minor),
                Some(currency),
                options.processor_account_id.clone(),
                outcome,
            )
            .await?;
        Ok(PaymentResult::from_records(&response, transaction.as_ref()))
    }

    pub async fn void(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
        props: &Properties,
    ) -> Result<PaymentResult> {
        if let Some(result) = self.replay(ctx, payment_id, transaction_id).await? {
            return Ok(result);
        }

        let reference = self
            .prior_reference(ctx, payment_id, &[ApiCall::Authorize, ApiCall::Purchase])
            .await?;
        let options = self.build_options(props, None, None, Some(transaction_id));
        let outcome = self.gateway.void(&reference, &options).await?;

        let (response, transaction) = self
            .record_outcome(
                ApiCall::Void,
                ctx,
                Some(account_id),
                Some(payment_id),
                Some(transaction_id),
                None,
                None,
                options.processor_account_id.clone(),
                outcome,
            )
            .await?;
        Ok(PaymentResult::from_records(&response, transaction.as_ref()))
    }

    pub async fn refund(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_id: Uuid,
        transaction_id: Uuid,
        amount_minor: i64,
        currency: &str,
        props: &Properties,
    ) -> Result<PaymentResult> {
        if let Some(result) = self.replay(ctx, payment_id, transaction_id).await? {
            return Ok(result);
        }

        // Eligibility is checked against the payment's cumulative history;
        // a business failure here surfaces to the caller unretried.
        let candidate = self
            .ledger
            .find_candidate_for_refund(ctx.tenant_id, payment_id, amount_minor)
            .await?;
        let reference = candidate
            .gateway_reference_id
            .clone()
            .ok_or_else(|| CoreError::not_found("gateway reference for charge", payment_id))?;

        let options = self.build_options(props, Some(amount_minor), None, Some(transaction_id));
        let outcome = self
            .gateway
            .refund(amount_minor, &reference, &options)
            .await?;

        let (response, transaction) = self
            .record_outcome(
                ApiCall::Refund,
                ctx,
                Some(account_id),
                Some(payment_id),
                Some(transaction_id),
                Some(amount_minor),
                Some(currency),
                options.processor_account_id.clone(),
                outcome,
            )
            .await?;
        Ok(PaymentResult::from_records(&response, transaction.as_ref()))
    }

    /// All recorded outcomes for a payment, oldest first. Falls back to
    /// failed charge attempts when the ledger has nothing, so a declined
    /// payment still reports its error detail.
    pub async fn payment_info(
        &self,
        ctx: &CallContext,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentResult>> {
        let transactions = self.ledger.transactions_for(ctx.tenant_id, payment_id).await?;
        if transactions.is_empty() {
            let mut results = Vec::new();
            for api_call in [ApiCall::Purchase, ApiCall::Authorize] {
                for response in self
                    .responses
                    .find_for_payment(ctx.tenant_id, payment_id, api_call)
                    .await?
                {
                    results.push(PaymentResult::from_records(&response, None));
                }
            }
            return Ok(results);
        }

        let mut results = Vec::with_capacity(transactions.len());
        for transaction in &transactions {
            let response = self.responses.get(transaction.response_id).await?;
            results.push(PaymentResult::from_records(&response, Some(transaction)));
        }
        Ok(results)
    }

    pub async fn refund_info(
        &self,
        ctx: &CallContext,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentResult>> {
        let transactions = self.ledger.transactions_for(ctx.tenant_id, payment_id).await?;
        let mut results = Vec::new();
        for transaction in transactions
            .iter()
            .filter(|t| t.api_call == ApiCall::Refund)
        {
            let response = self.responses.get(transaction.response_id).await?;
            results.push(PaymentResult::from_records(&response, Some(transaction)));
        }
        Ok(results)
    }

    pub async fn add_payment_method(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_method_id: Uuid,
        instrument: NewInstrument,
        set_default: bool,
        props: &Properties,
    ) -> Result<PaymentMethodRecord> {
        let email = match properties::find_str(props, "email") {
            Some(email) => Some(email.to_string()),
            None => {
                self.directory
                    .account_by_id(ctx.tenant_id, account_id)
                    .await?
                    .email
            }
        };
        let customer = match properties::find_str(props, "customer") {
            Some(customer) => Some(customer.to_string()),
            None => self.customer_ref_for_account(ctx, account_id).await?,
        };

        let mut options = self.build_options(props, None, None, None);
        options.email = email;
        options.customer = customer.clone();
        options.description = Some(account_id.to_string());

        let mut outcome = self.gateway.store(&instrument, &options).await?;
        let external_instrument_id = outcome
            .gateway_reference_id
            .clone()
            .or_else(|| properties::extract_str(&outcome.raw_fields, &["card", "id"]).map(str::to_string));
        let customer_ref = properties::extract_str(&outcome.raw_fields, &["customer"])
            .map(str::to_string)
            .or(customer);

        // Optional follow-up call; the composite is recorded exactly once.
        if set_default && outcome.success {
            if let (Some(customer_ref), Some(instrument_ref)) =
                (customer_ref.as_deref(), external_instrument_id.as_deref())
            {
                let follow_up = self
                    .gateway
                    .update_customer_default(customer_ref, instrument_ref, &options)
                    .await?;
                outcome = outcome.merge_follow_up(follow_up);
            }
        }

        let success = outcome.success;
        let message = outcome.message.clone();
        let error_code = outcome.error_code.clone();
        let details = instrument_details(&instrument, &outcome.raw_fields);
        let (response, _) = self
            .record_outcome(
                ApiCall::AddPaymentMethod,
                ctx,
                Some(account_id),
                None,
                None,
                None,
                None,
                options.processor_account_id.clone(),
                outcome,
            )
            .await?;

        if !success {
            return Err(CoreError::GatewayRejected {
                message: message.unwrap_or_else(|| "instrument registration failed".to_string()),
                code: error_code,
            });
        }

        let external_instrument_id = external_instrument_id
            .or_else(|| response.gateway_reference_id.clone())
            .ok_or_else(|| CoreError::not_found("gateway instrument id", payment_method_id))?;

        let record = self
            .payment_methods
            .create(NewPaymentMethod {
                account_id,
                tenant_id: ctx.tenant_id,
                payment_method_id: Some(payment_method_id),
                external_instrument_id,
                customer_ref,
                details,
                is_default: set_default,
            })
            .await?;
        if set_default {
            self.payment_methods
                .set_default(ctx.tenant_id, account_id, record.id)
                .await?;
        }
        Ok(record)
    }

    pub async fn delete_payment_method(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_method_id: Uuid,
        props: &Properties,
    ) -> Result<()> {
        let pm = self
            .payment_methods
            .active_by_payment_method_id(ctx.tenant_id, payment_method_id)
            .await?;

        let options = self.build_options(props, None, Some(&pm), None);
        let outcome = self
            .gateway
            .unstore(pm.customer_ref.as_deref(), &pm.external_instrument_id, &options)
            .await?;

        let success = outcome.success;
        let message = outcome.message.clone();
        let error_code = outcome.error_code.clone();
        self.record_outcome(
            ApiCall::DeletePaymentMethod,
            ctx,
            Some(account_id),
            None,
            None,
            None,
            None,
            options.processor_account_id.clone(),
            outcome,
        )
        .await?;

        if !success {
            return Err(CoreError::GatewayRejected {
                message: message.unwrap_or_else(|| "instrument removal failed".to_string()),
                code: error_code,
            });
        }
        self.payment_methods
            .mark_deleted(ctx.tenant_id, payment_method_id)
            .await
    }

    pub async fn set_default_payment_method(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        payment_method_id: Uuid,
        props: &Properties,
    ) -> Result<()> {
        let pm = self
            .payment_methods
            .active_by_payment_method_id(ctx.tenant_id, payment_method_id)
            .await?;
        let customer_ref = pm
            .customer_ref
            .clone()
            .ok_or_else(|| CoreError::not_found("gateway customer", account_id))?;

        let options = self.build_options(props, None, Some(&pm), None);
        let outcome = self
            .gateway
            .update_customer_default(&customer_ref, &pm.external_instrument_id, &options)
            .await?;

        let success = outcome.success;
        let message = outcome.message.clone();
        let error_code = outcome.error_code.clone();
        self.record_outcome(
            ApiCall::SetDefaultPaymentMethod,
            ctx,
            Some(account_id),
            None,
            None,
            None,
            None,
            options.processor_account_id.clone(),
            outcome,
        )
        .await?;

        if !success {
            return Err(CoreError::GatewayRejected {
                message: message.unwrap_or_else(|| "default update failed".to_string()),
                code: error_code,
            });
        }
        self.payment_methods
            .set_default(ctx.tenant_id, account_id, pm.id)
            .await
    }

    pub async fn payment_method_detail(
        &self,
        ctx: &CallContext,
        payment_method_id: Uuid,
    ) -> Result<PaymentMethodRecord> {
        self.payment_methods
            .active_by_payment_method_id(ctx.tenant_id, payment_method_id)
            .await
    }

    pub async fn payment_methods_for_account(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
    ) -> Result<Vec<PaymentMethodRecord>> {
        self.payment_methods
            .active_by_account(ctx.tenant_id, account_id)
            .await
    }

    pub async fn reconcile_payment_methods(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        known: &[KnownInstrument],
    ) -> Result<ReconcileReport> {
        let reconciler = Reconciler {
            payment_methods: self.payment_methods.clone(),
        };
        reconciler.run(ctx, account_id, known).await
    }

    pub async fn search_payments(
        &self,
        ctx: &CallContext,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Pagination<ResponseRecord>> {
        self.search_responses(ctx, ApiCall::Purchase, key, offset, limit)
            .await
    }

    pub async fn search_refunds(
        &self,
        ctx: &CallContext,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Pagination<ResponseRecord>> {
        self.search_responses(ctx, ApiCall::Refund, key, offset, limit)
            .await
    }

    async fn search_responses(
        &self,
        ctx: &CallContext,
        api_call: ApiCall,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Pagination<ResponseRecord>> {
        let total = self
            .responses
            .search_count(ctx.tenant_id, api_call, key)
            .await?;

        let responses = self.responses.clone();
        let tenant_id = ctx.tenant_id;
        let key = key.to_string();
        let loader: BatchLoader<ResponseRecord> = Box::new(move |batch_offset, batch_limit| {
            let responses = responses.clone();
            let key = key.clone();
            Box::pin(async move {
                responses
                    .search_batch(tenant_id, api_call, &key, batch_offset, batch_limit)
                    .await
            })
        });
        Ok(Pagination::new(total, offset, limit, loader))
    }

    pub async fn search_payment_methods(
        &self,
        ctx: &CallContext,
        key: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Pagination<PaymentMethodRecord>> {
        let total = self.payment_methods.search_count(ctx.tenant_id, key).await?;

        let payment_methods = self.payment_methods.clone();
        let tenant_id = ctx.tenant_id;
        let key = key.to_string();
        let loader: BatchLoader<PaymentMethodRecord> = Box::new(move |batch_offset, batch_limit| {
            let payment_methods = payment_methods.clone();
            let key = key.clone();
            Box::pin(async move {
                payment_methods
                    .search_batch(tenant_id, &key, batch_offset, batch_limit)
                    .await
            })
        });
        Ok(Pagination::new(total, offset, limit, loader))
    }

    /// Records an inbound gateway notification. Notifications are facts, not
    /// calls we made, so they land in the response log as-is and nothing is
    /// derived from them.
    pub async fn process_notification(
        &self,
        ctx: &CallContext,
        payload: Value,
    ) -> Result<ResponseRecord> {
        let event_type = properties::extract_str(&payload, &["type"]).map(str::to_string);
        let live_mode = properties::extract(&payload, &["livemode"])
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let reference = properties::extract_str(&payload, &["request"])
            .or_else(|| properties::extract_str(&payload, &["id"]))
            .map(str::to_string);

        self.responses
            .record(NewResponse {
                api_call: ApiCall::Webhook,
                payment_id: None,
                transaction_id: None,
                transaction_type: event_type,
                processor_account_id: None,
                message: None,
                gateway_reference_id: reference,
                success: true,
                test_mode: !live_mode,
                raw_fields: payload,
                tenant_id: ctx.tenant_id,
                account_id: None,
            })
            .await
    }

    /// Ledger-first idempotency: when the logical pair is already recorded,
    /// the stored outcome is rebuilt and the gateway is never called.
    async fn replay(
        &self,
        ctx: &CallContext,
        payment_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<PaymentResult>> {
        let Some(existing) = self
            .ledger
            .find_by_transaction(ctx.tenant_id, payment_id, transaction_id)
            .await?
        else {
            return Ok(None);
        };

        tracing::info!(
            payment_id = %payment_id,
            transaction_id = %transaction_id,
            "transaction already recorded, replaying stored outcome"
        );
        let response = self.responses.get(existing.response_id).await?;
        Ok(Some(PaymentResult::from_records(&response, Some(&existing))))
    }

    /// Persists the outcome (success or failure) and, for successful
    /// ledger-class calls with a monetary or reference outcome, derives the
    /// idempotency row.
    #[allow(clippy::too_many_arguments)]
    async fn record_outcome(
        &self,
        api_call: ApiCall,
        ctx: &CallContext,
        account_id: Option<Uuid>,
        payment_id: Option<Uuid>,
        transaction_id: Option<Uuid>,
        amount_minor: Option<i64>,
        currency: Option<&str>,
        processor_account_id: Option<String>,
        outcome: Outcome,
    ) -> Result<(ResponseRecord, Option<TransactionRecord>)> {
        let gateway_reference_id = properties::extract_str(&outcome.raw_fields, &["id"])
            .map(str::to_string)
            .or_else(|| outcome.gateway_reference_id.clone());

        let response = self
            .responses
            .record(NewResponse {
                api_call,
                payment_id,
                transaction_id,
                transaction_type: None,
                processor_account_id,
                message: outcome.message.clone(),
                gateway_reference_id: gateway_reference_id.clone(),
                success: outcome.success,
                test_mode: outcome.test_mode,
                raw_fields: outcome.raw_fields,
                tenant_id: ctx.tenant_id,
                account_id,
            })
            .await?;

        let has_billing_fact = gateway_reference_id.is_some() || amount_minor.is_some();
        let transaction = match (payment_id, transaction_id) {
            (Some(payment_id), Some(transaction_id))
                if outcome.success && api_call.is_ledger_class() && has_billing_fact =>
            {
                let (record, _was_new) = self
                    .ledger
                    .record_if_absent(NewTransaction {
                        response_id: response.id,
                        api_call,
                        payment_id,
                        transaction_id,
                        amount_minor,
                        currency: currency.map(str::to_string),
                        gateway_reference_id,
                        tenant_id: ctx.tenant_id,
                        account_id,
                    })
                    .await?;
                Some(record)
            }
            _ => None,
        };

        Ok((response, transaction))
    }

    /// Gateway reference of the prior transaction a capture or void acts on.
    async fn prior_reference(
        &self,
        ctx: &CallContext,
        payment_id: Uuid,
        classes: &[ApiCall],
    ) -> Result<String> {
        let transactions = self.ledger.transactions_for(ctx.tenant_id, payment_id).await?;
        for class in classes {
            if let Some(reference) = transactions
                .iter()
                .rev()
                .filter(|t| t.api_call == *class)
                .find_map(|t| t.gateway_reference_id.clone())
            {
                return Ok(reference);
            }
        }
        Err(CoreError::not_found("prior transaction", payment_id))
    }

    /// Distinct gateway customer across the account's active instruments;
    /// more than one is a data fault we refuse to guess around.
    async fn customer_ref_for_account(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
    ) -> Result<Option<String>> {
        let active = self
            .payment_methods
            .active_by_account(ctx.tenant_id, account_id)
            .await?;
        let mut customers: Vec<&str> = active
            .iter()
            .filter_map(|pm| pm.customer_ref.as_deref())
            .collect();
        customers.sort_unstable();
        customers.dedup();
        match customers.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some((*one).to_string())),
            _ => Err(CoreError::AmbiguousCustomer { account_id }),
        }
    }

    fn build_options(
        &self,
        props: &Properties,
        amount_minor: Option<i64>,
        pm: Option<&PaymentMethodRecord>,
        transaction_id: Option<Uuid>,
    ) -> CallOptions {
        let destination = properties::find_str(props, "destination")
            .map(str::to_string)
            .or_else(|| self.config.destination.clone());

        // Application fees only apply to destination charges.
        let application_fee = destination.as_ref().and_then(|_| {
            properties::find_i64(props, "fees_amount")
                .or_else(|| {
                    properties::find_f64(props, "fees_percent")
                        .zip(amount_minor)
                        .map(|(percent, amount)| (percent * amount as f64).round() as i64)
                })
                .or(self.config.fees_amount)
                .or_else(|| {
                    self.config
                        .fees_percent
                        .zip(amount_minor)
                        .map(|(percent, amount)| (percent * amount as f64).round() as i64)
                })
        });

        CallOptions {
            processor_account_id: properties::find_str(props, "processor_account_id")
                .map(str::to_string)
                .or_else(|| Some(self.config.default_processor_account.clone())),
            // Retries reuse the logical transaction id unless the caller
            // pins their own key.
            idempotency_key: properties::find_str(props, "idempotency_key")
                .map(str::to_string)
                .or_else(|| transaction_id.map(|id| id.to_string())),
            customer: pm.and_then(|pm| pm.customer_ref.clone()),
            email: None,
            description: None,
            destination,
            application_fee,
            reverse_transfer: properties::find_bool(props, "reverse_transfer"),
            refund_application_fee: properties::find_bool(props, "refund_application_fee"),
            extra: props.clone(),
        }
    }
}

/// Best-effort instrument metadata: prefer what the gateway echoed back,
/// fall back to what the caller supplied.
fn instrument_details(instrument: &NewInstrument, raw: &Value) -> Option<InstrumentDetails> {
    if let Some(card) = properties::extract(raw, &["card"]).and_then(Value::as_object) {
        return Some(InstrumentDetails::from_card_object(card));
    }

    match instrument {
        NewInstrument::Token(_) => None,
        NewInstrument::BankAccount {
            bank_name,
            account_number,
            account_type,
            routing_number,
        } => Some(InstrumentDetails::BankAccount {
            bank_name: bank_name.clone(),
            account_last4: Some(
                account_number
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<String>()
                    .chars()
                    .rev()
                    .collect(),
            ),
            routing_number: Some(routing_number.clone()),
            account_type: Some(account_type.clone()),
            holder_name: None,
        }),
    }
}
