use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{PaymentSession, PaymentStatus, PollOutcome, StkPushRequest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::Duration;

/// Daraja signals acceptance of a push (and completion of a queried
/// transaction) with this code.
const SUCCESS_CODE: &str = "0";

/// Error code the status endpoint returns while the payer has not yet
/// answered the prompt.
const STILL_PROCESSING_CODE: &str = "500.001.1001";

const COUNTRY_PREFIX: &str = "254";

/// Daraja STK push client
#[derive(Debug, Clone)]
pub struct MpesaService {
    http: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    business_short_code: String,
    passkey: String,
    callback_url: String,
}

impl MpesaService {
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        Self::with_base_url(config, config.environment.base_url().to_string())
    }

    /// Create a client against a custom base URL (for testing)
    pub fn with_base_url(config: &Config, base_url: String) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            business_short_code: config.business_short_code.clone(),
            passkey: config.passkey.clone(),
            callback_url: config.callback_url.clone(),
        })
    }

    /// Exchange client credentials for a bearer token. Every operation
    /// re-authenticates; the caller retries on failure.
    pub async fn get_access_token(&self) -> Result<String, GatewayError> {
        let auth = BASE64.encode(format!("{}:{}", self.consumer_key, self.consumer_secret));

        let response = self
            .http
            .get(format!(
                "{}/oauth/v1/generate?grant_type=client_credentials",
                self.base_url
            ))
            .header("Authorization", format!("Basic {}", auth))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Auth(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Auth(format!("undecodable token response: {}", e)))?;

        body.get("access_token")
            .and_then(|token| token.as_str())
            .map(|token| token.to_string())
            .ok_or_else(|| GatewayError::Auth("missing access_token field".to_string()))
    }

    /// Submit a push-payment prompt to the payer's handset.
    ///
    /// Phone number and amount are validated before any network call. A
    /// provider response code other than "0" never produces a session.
    pub async fn initiate_stk_push(
        &self,
        request: &StkPushRequest,
    ) -> Result<PaymentSession, GatewayError> {
        let phone_number = normalize_phone_number(&request.phone_number)?;
        let amount = round_amount(request.amount)?;

        let token = self.get_access_token().await?;
        let timestamp = generate_timestamp();
        let password = generate_password(&self.business_short_code, &self.passkey, &timestamp);

        let payload = serde_json::json!({
            "BusinessShortCode": &self.business_short_code,
            "Password": &password,
            "Timestamp": &timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": &phone_number,
            "PartyB": &self.business_short_code,
            "PhoneNumber": &phone_number,
            "CallBackURL": &self.callback_url,
            "AccountReference": &request.account_reference,
            "TransactionDesc": &request.transaction_desc,
        });

        let response = self
            .http
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.base_url))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let session: PaymentSession = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("undecodable push response: {}", e)))?;

        if session.response_code != SUCCESS_CODE {
            return Err(GatewayError::Rejected {
                code: session.response_code,
                description: session.response_description,
            });
        }

        tracing::info!(
            "STK push accepted: {} ({} KES to {})",
            session.checkout_request_id,
            amount,
            phone_number
        );

        Ok(session)
    }

    /// Query the outcome of a previously submitted push. Returns the decoded
    /// provider JSON verbatim; interpreting it is the caller's job.
    pub async fn query_stk_push_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let token = self.get_access_token().await?;
        let timestamp = generate_timestamp();
        let password = generate_password(&self.business_short_code, &self.passkey, &timestamp);

        let payload = serde_json::json!({
            "BusinessShortCode": &self.business_short_code,
            "Password": &password,
            "Timestamp": &timestamp,
            "CheckoutRequestID": checkout_request_id,
        });

        let response = self
            .http
            .post(format!("{}/mpesa/stkpushquery/v1/query", self.base_url))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("undecodable query response: {}", e)))
    }

    /// Poll the status endpoint until the push settles or the attempts run
    /// out. The status endpoint answers with an error payload while the
    /// payer has not yet responded; that counts as still pending.
    pub async fn poll_stk_push_status(
        &self,
        checkout_request_id: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<PollOutcome, GatewayError> {
        for attempt in 1..=max_attempts {
            tracing::debug!(
                "Polling STK push status for {}, attempt {}/{}",
                checkout_request_id,
                attempt,
                max_attempts
            );

            match self.query_stk_push_status(checkout_request_id).await {
                Ok(value) => match result_code_of(&value) {
                    Some(code) if code == SUCCESS_CODE => {
                        tracing::info!("STK push {} completed", checkout_request_id);
                        return Ok(PollOutcome {
                            status: PaymentStatus::Succeeded,
                            result_code: Some(code),
                            result_desc: result_desc_of(&value),
                        });
                    }
                    Some(code) => {
                        tracing::warn!(
                            "STK push {} settled with result code {}",
                            checkout_request_id,
                            code
                        );
                        return Ok(PollOutcome {
                            status: PaymentStatus::Failed,
                            result_code: Some(code),
                            result_desc: result_desc_of(&value),
                        });
                    }
                    // No result code yet, keep waiting
                    None => {}
                },
                Err(GatewayError::Provider { ref body, .. })
                    if body.contains(STILL_PROCESSING_CODE) =>
                {
                    tracing::debug!("STK push {} still processing", checkout_request_id);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::error!("Error polling STK push status: {}", e);
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::warn!(
            "STK push {} did not settle within {} attempts",
            checkout_request_id,
            max_attempts
        );

        Ok(PollOutcome {
            status: PaymentStatus::TimedOut,
            result_code: None,
            result_desc: None,
        })
    }
}

/// Local-time request timestamp in the YYYYMMDDHHmmss format Daraja signs
/// against.
pub fn generate_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Request signature: base64 of short code, passkey and timestamp
/// concatenated.
pub fn generate_password(business_short_code: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", business_short_code, passkey, timestamp))
}

/// Normalize a subscriber number to the 12-digit 254XXXXXXXXX form.
///
/// Non-digits are stripped first, so "+254 712-345-678" and "0712345678"
/// both normalize to the same number. Already-normalized input passes
/// through unchanged.
pub fn normalize_phone_number(raw: &str) -> Result<String, GatewayError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("{}{}", COUNTRY_PREFIX, rest)
    } else if digits.starts_with(COUNTRY_PREFIX) {
        digits
    } else {
        format!("{}{}", COUNTRY_PREFIX, digits)
    };

    if normalized.len() != 12 {
        return Err(GatewayError::InvalidPhoneNumber(raw.to_string()));
    }

    Ok(normalized)
}

/// Amounts go out as whole currency units.
pub fn round_amount(amount: f64) -> Result<u64, GatewayError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(GatewayError::InvalidAmount(amount));
    }

    let rounded = amount.round();
    if rounded < 1.0 {
        return Err(GatewayError::InvalidAmount(amount));
    }

    Ok(rounded as u64)
}

// The query endpoint has returned ResultCode both as a string and as a
// number across API revisions.
fn result_code_of(value: &serde_json::Value) -> Option<String> {
    match value.get("ResultCode") {
        Some(serde_json::Value::String(code)) => Some(code.clone()),
        Some(serde_json::Value::Number(code)) => Some(code.to_string()),
        _ => None,
    }
}

fn result_desc_of(value: &serde_json::Value) -> Option<String> {
    value
        .get("ResultDesc")
        .and_then(|desc| desc.as_str())
        .map(|desc| desc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_leading_zero_to_country_code() {
        assert_eq!(
            normalize_phone_number("0712345678").unwrap(),
            "254712345678"
        );
    }

    #[test]
    fn normalization_is_idempotent_for_full_numbers() {
        assert_eq!(
            normalize_phone_number("254712345678").unwrap(),
            "254712345678"
        );
    }

    #[test]
    fn prepends_country_code_to_bare_subscriber_numbers() {
        assert_eq!(normalize_phone_number("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn strips_formatting_characters() {
        assert_eq!(
            normalize_phone_number("+254 712-345-678").unwrap(),
            "254712345678"
        );
    }

    #[test]
    fn rejects_numbers_of_wrong_length() {
        assert!(matches!(
            normalize_phone_number("07123").unwrap_err(),
            GatewayError::InvalidPhoneNumber(_)
        ));
        assert!(matches!(
            normalize_phone_number("07123456789").unwrap_err(),
            GatewayError::InvalidPhoneNumber(_)
        ));
        assert!(matches!(
            normalize_phone_number("").unwrap_err(),
            GatewayError::InvalidPhoneNumber(_)
        ));
    }

    #[test]
    fn timestamp_is_fourteen_digits() {
        let timestamp = generate_timestamp();
        assert_eq!(timestamp.len(), 14);
        assert!(timestamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn password_is_deterministic_per_timestamp() {
        let first = generate_password("174379", "secret-passkey", "20240101120000");
        let second = generate_password("174379", "secret-passkey", "20240101120000");
        let later = generate_password("174379", "secret-passkey", "20240101120001");

        assert_eq!(first, second);
        assert_ne!(first, later);
    }

    #[test]
    fn password_is_base64_of_concatenation() {
        let password = generate_password("174379", "pk", "20240101120000");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379pk20240101120000");
    }

    #[test]
    fn rounds_amounts_to_whole_units() {
        assert_eq!(round_amount(1500.7).unwrap(), 1501);
        assert_eq!(round_amount(1500.2).unwrap(), 1500);
        assert_eq!(round_amount(1.0).unwrap(), 1);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(matches!(
            round_amount(0.0).unwrap_err(),
            GatewayError::InvalidAmount(_)
        ));
        assert!(matches!(
            round_amount(-5.0).unwrap_err(),
            GatewayError::InvalidAmount(_)
        ));
        assert!(matches!(
            round_amount(0.2).unwrap_err(),
            GatewayError::InvalidAmount(_)
        ));
        assert!(matches!(
            round_amount(f64::NAN).unwrap_err(),
            GatewayError::InvalidAmount(_)
        ));
    }

    #[test]
    fn reads_result_code_as_string_or_number() {
        let as_string = serde_json::json!({"ResultCode": "1032"});
        let as_number = serde_json::json!({"ResultCode": 0});
        let missing = serde_json::json!({"ResponseCode": "0"});

        assert_eq!(result_code_of(&as_string).as_deref(), Some("1032"));
        assert_eq!(result_code_of(&as_number).as_deref(), Some("0"));
        assert_eq!(result_code_of(&missing), None);
    }
}
