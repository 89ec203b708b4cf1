use crate::{
    error::GatewayError,
    models::{
        ApiResponse, InitiatePaymentRequest, InitiatedPayment, PaymentRecord, PaymentStatus,
        StkPushRequest,
    },
    services::{
        mpesa::{normalize_phone_number, round_amount},
        MpesaService, PaymentStore,
    },
};
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub mpesa: Arc<MpesaService>,
    pub store: Arc<PaymentStore>,
    pub receiver_number: String,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
}

/// Checkout entry point: validates the request, submits the push and
/// spawns the status poller for the accepted session.
pub async fn initiate_stk_push(
    State(state): State<AppState>,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<Json<ApiResponse<InitiatedPayment>>, GatewayError> {
    let phone_number = normalize_phone_number(&payload.phone_number)?;
    let amount = round_amount(payload.amount)?;

    let account_reference = payload
        .order_reference
        .unwrap_or_else(generate_order_reference);
    let transaction_desc = payload
        .transaction_desc
        .unwrap_or_else(|| "Order payment".to_string());

    let request = StkPushRequest {
        phone_number: phone_number.clone(),
        amount: payload.amount,
        account_reference: account_reference.clone(),
        transaction_desc,
    };

    let session = state.mpesa.initiate_stk_push(&request).await?;

    state
        .store
        .insert_initiated(&session, &phone_number, amount, &account_reference)
        .await;

    tokio::spawn(poll_until_settled(
        state.mpesa.clone(),
        state.store.clone(),
        session.checkout_request_id.clone(),
        state.poll_max_attempts,
        state.poll_interval,
    ));

    Ok(Json(ApiResponse {
        success: true,
        data: InitiatedPayment {
            session,
            account_reference,
            receiver_number: state.receiver_number.clone(),
        },
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    }))
}

/// Reconciled local view of one payment attempt.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentRecord>>, GatewayError> {
    let record = state
        .store
        .get(&checkout_request_id)
        .await
        .ok_or(GatewayError::NotFound(checkout_request_id))?;

    Ok(Json(ApiResponse {
        success: true,
        data: record,
        timestamp: Utc::now(),
        request_id: Uuid::new_v4().to_string(),
    }))
}

/// Raw provider status passthrough, one query per call.
pub async fn query_payment_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let value = state.mpesa.query_stk_push_status(&checkout_request_id).await?;
    Ok(Json(value))
}

async fn poll_until_settled(
    mpesa: Arc<MpesaService>,
    store: Arc<PaymentStore>,
    checkout_request_id: String,
    max_attempts: u32,
    interval: Duration,
) {
    match mpesa
        .poll_stk_push_status(&checkout_request_id, max_attempts, interval)
        .await
    {
        Ok(outcome) => {
            store
                .apply_result(
                    &checkout_request_id,
                    outcome.status,
                    outcome.result_code,
                    outcome.result_desc,
                    None,
                )
                .await;
        }
        Err(e) => {
            tracing::error!("Status polling for {} gave up: {}", checkout_request_id, e);
            store
                .apply_result(
                    &checkout_request_id,
                    PaymentStatus::TimedOut,
                    None,
                    Some(e.to_string()),
                    None,
                )
                .await;
        }
    }
}

fn generate_order_reference() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("GEN-{}", id[..6].to_uppercase())
}
