use std::sync::Arc;

use uuid::Uuid;

use crate::domain::context::CallContext;
use crate::domain::instrument::KnownInstrument;
use crate::error::Result;
use crate::store::{NewPaymentMethod, PaymentMethodRecord, PaymentMethodStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// A local record already carries this binding.
    Satisfied { record_id: i64 },
    /// A local record holds the instrument but was never confirmed; bind it.
    Link { record_id: i64 },
    /// The instrument exists at the gateway but was never locally observed.
    Insert,
}

#[derive(Debug, Clone)]
pub struct ReconcileStep {
    pub entry: KnownInstrument,
    pub decision: ReconcileDecision,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub satisfied: usize,
    pub linked: usize,
    pub inserted: usize,
}

/// Decides, entry by entry, how the authoritative instrument list maps onto
/// the locally stored records.
///
/// First match by instrument id wins, in store order. A record already bound
/// to a *different* logical id is skipped, never rebound: if no other record
/// takes the entry it falls through to an insert, leaving a second record
/// for the same instrument. That anomaly is deliberate — the caller's list
/// is authoritative and an existing distinct binding is never overwritten or
/// guessed away.
///
/// Decisions earlier in the pass are visible to later entries, so one local
/// record is consumed by at most one entry.
pub fn plan(known: &[KnownInstrument], local: &[PaymentMethodRecord]) -> Vec<ReconcileStep> {
    let mut state: Vec<(i64, &str, Option<Uuid>)> = local
        .iter()
        .map(|r| (r.id, r.external_instrument_id.as_str(), r.payment_method_id))
        .collect();

    let mut steps = Vec::with_capacity(known.len());
    for entry in known {
        let mut decision = None;
        for record in state.iter_mut() {
            if record.1 != entry.external_instrument_id {
                continue;
            }
            match record.2 {
                Some(bound) if bound == entry.payment_method_id => {
                    decision = Some(ReconcileDecision::Satisfied { record_id: record.0 });
                    break;
                }
                None => {
                    record.2 = Some(entry.payment_method_id);
                    decision = Some(ReconcileDecision::Link { record_id: record.0 });
                    break;
                }
                Some(_) => continue,
            }
        }
        steps.push(ReconcileStep {
            entry: entry.clone(),
            decision: decision.unwrap_or(ReconcileDecision::Insert),
        });
    }
    steps
}

/// Applies a reconciliation pass against the payment-method store.
pub struct Reconciler {
    pub payment_methods: Arc<dyn PaymentMethodStore>,
}

impl Reconciler {
    pub async fn run(
        &self,
        ctx: &CallContext,
        account_id: Uuid,
        known: &[KnownInstrument],
    ) -> Result<ReconcileReport> {
        let local = self
            .payment_methods
            .active_by_account(ctx.tenant_id, account_id)
            .await?;

        let mut report = ReconcileReport::default();
        for step in plan(known, &local) {
            match step.decision {
                ReconcileDecision::Satisfied { .. } => report.satisfied += 1,
                ReconcileDecision::Link { record_id } => {
                    tracing::info!(
                        instrument = %step.entry.external_instrument_id,
                        payment_method_id = %step.entry.payment_method_id,
                        "linking existing local payment method"
                    );
                    self.payment_methods
                        .link_payment_method_id(record_id, step.entry.payment_method_id)
                        .await?;
                    report.linked += 1;
                }
                ReconcileDecision::Insert => {
                    tracing::info!(
                        instrument = %step.entry.external_instrument_id,
                        payment_method_id = %step.entry.payment_method_id,
                        "creating local payment method for gateway-known instrument"
                    );
                    self.payment_methods
                        .create(NewPaymentMethod {
                            account_id,
                            tenant_id: ctx.tenant_id,
                            payment_method_id: Some(step.entry.payment_method_id),
                            external_instrument_id: step.entry.external_instrument_id.clone(),
                            customer_ref: None,
                            details: None,
                            is_default: step.entry.is_default,
                        })
                        .await?;
                    report.inserted += 1;
                }
            }
        }
        Ok(report)
    }
}
