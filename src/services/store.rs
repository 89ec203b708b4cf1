use crate::models::{PaymentRecord, PaymentSession, PaymentStatus};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory reconciliation of payment attempts, keyed by checkout request
/// id. Both the status poller and the provider callback write through
/// `apply_result`; whichever lands first wins and later writes are ignored.
pub struct PaymentStore {
    records: RwLock<HashMap<String, PaymentRecord>>,
}

impl PaymentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert_initiated(
        &self,
        session: &PaymentSession,
        phone_number: &str,
        amount: u64,
        account_reference: &str,
    ) {
        let now = Utc::now();
        let record = PaymentRecord {
            merchant_request_id: session.merchant_request_id.clone(),
            checkout_request_id: session.checkout_request_id.clone(),
            phone_number: phone_number.to_string(),
            amount,
            account_reference: account_reference.to_string(),
            status: PaymentStatus::Pending,
            result_code: None,
            result_desc: None,
            receipt_number: None,
            created_at: now,
            updated_at: now,
        };

        self.records
            .write()
            .await
            .insert(session.checkout_request_id.clone(), record);
    }

    /// Settle a payment attempt. Returns false when the record is unknown or
    /// already terminal, so duplicate callbacks and late poll results are
    /// no-ops.
    pub async fn apply_result(
        &self,
        checkout_request_id: &str,
        status: PaymentStatus,
        result_code: Option<String>,
        result_desc: Option<String>,
        receipt_number: Option<String>,
    ) -> bool {
        let mut records = self.records.write().await;

        match records.get_mut(checkout_request_id) {
            Some(record) if record.status.is_terminal() => {
                tracing::debug!(
                    "Ignoring result for already settled payment {}",
                    checkout_request_id
                );
                false
            }
            Some(record) => {
                record.status = status;
                record.result_code = result_code;
                record.result_desc = result_desc;
                if receipt_number.is_some() {
                    record.receipt_number = receipt_number;
                }
                record.updated_at = Utc::now();
                true
            }
            None => {
                tracing::warn!(
                    "Result for unknown checkout request {}",
                    checkout_request_id
                );
                false
            }
        }
    }

    pub async fn get(&self, checkout_request_id: &str) -> Option<PaymentRecord> {
        self.records.read().await.get(checkout_request_id).cloned()
    }

    pub async fn pending_count(&self) -> u64 {
        self.records
            .read()
            .await
            .values()
            .filter(|record| record.status == PaymentStatus::Pending)
            .count() as u64
    }
}

impl Default for PaymentStore {
    fn default() -> Self {
        Self::new()
    }
}
