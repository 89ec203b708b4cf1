use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One checkout attempt, immutable once submitted to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkPushRequest {
    pub phone_number: String,
    pub amount: f64,
    pub account_reference: String,
    pub transaction_desc: String,
}

/// Provider acknowledgment of an accepted push. Field names follow the
/// Daraja wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Reconciled view of one payment attempt, keyed by checkout request id.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub phone_number: String,
    pub amount: u64,
    pub account_reference: String,
    pub status: PaymentStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of polling the status endpoint until a terminal answer or the
/// attempt limit.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub status: PaymentStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
}

// Daraja posts its asynchronous confirmation wrapped in Body.stkCallback.

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

impl StkCallback {
    /// The M-Pesa receipt number, present in the metadata of successful
    /// callbacks only.
    pub fn receipt_number(&self) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .item
            .iter()
            .find(|item| item.name == "MpesaReceiptNumber")
            .and_then(|item| item.value.as_ref())
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// Ack body Daraja expects from the callback receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

/// Checkout entry point payload, shaped after the storefront's request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub phone_number: String,
    pub amount: f64,
    #[serde(default)]
    pub order_reference: Option<String>,
    #[serde(default)]
    pub transaction_desc: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    #[serde(flatten)]
    pub session: PaymentSession,
    #[serde(rename = "accountReference")]
    pub account_reference: String,
    #[serde(rename = "receiverNumber")]
    pub receiver_number: String,
}
