use crate::handlers::AppState;
use crate::models::{CallbackAck, PaymentStatus, StkCallbackEnvelope};
use axum::{extract::State, Json};

/// Receiver for Daraja's asynchronous confirmation. Settlement is keyed by
/// checkout request id and idempotent; duplicate deliveries and callbacks
/// for unknown sessions are acked without effect, so the provider stops
/// retrying either way.
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(envelope): Json<StkCallbackEnvelope>,
) -> Json<CallbackAck> {
    let callback = envelope.body.stk_callback;

    let status = if callback.result_code == 0 {
        PaymentStatus::Succeeded
    } else {
        PaymentStatus::Failed
    };
    let receipt_number = callback.receipt_number();

    let applied = state
        .store
        .apply_result(
            &callback.checkout_request_id,
            status,
            Some(callback.result_code.to_string()),
            Some(callback.result_desc.clone()),
            receipt_number,
        )
        .await;

    if applied {
        tracing::info!(
            "Callback settled payment {} as {:?}: {}",
            callback.checkout_request_id,
            status,
            callback.result_desc
        );
    }

    Json(CallbackAck {
        result_code: 0,
        result_desc: "Accepted".to_string(),
    })
}
