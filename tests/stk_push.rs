use mpesa_gateway::{
    config::{Config, Environment},
    error::GatewayError,
    models::{PaymentStatus, StkPushRequest},
    services::MpesaService,
};
use serde_json::json;
use std::time::Duration;

const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
const PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
const QUERY_PATH: &str = "/mpesa/stkpushquery/v1/query";

fn test_config() -> Config {
    Config {
        environment: Environment::Sandbox,
        host: "127.0.0.1".to_string(),
        port: 3000,
        consumer_key: "key".to_string(),
        consumer_secret: "secret".to_string(),
        business_short_code: "174379".to_string(),
        passkey: "test-passkey".to_string(),
        callback_url: "https://example.com/api/payments/callback".to_string(),
        receiver_number: "+254722683434".to_string(),
        rate_limit_per_second: 10,
        rate_limit_burst: 30,
        poll_interval_secs: 1,
        poll_max_attempts: 3,
    }
}

fn service_for(server: &mockito::ServerGuard) -> MpesaService {
    MpesaService::with_base_url(&test_config(), server.url()).unwrap()
}

fn order_request() -> StkPushRequest {
    StkPushRequest {
        phone_number: "0712345678".to_string(),
        amount: 1500.7,
        account_reference: "GEN-000123".to_string(),
        transaction_desc: "Order payment".to_string(),
    }
}

async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("GET", TOKEN_PATH)
        .with_status(200)
        .with_body(json!({"access_token": "token-123", "expires_in": "3599"}).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn initiate_returns_session_and_normalizes_payload() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("GET", TOKEN_PATH)
        .match_header("authorization", "Basic a2V5OnNlY3JldA==")
        .with_status(200)
        .with_body(json!({"access_token": "token-123", "expires_in": "3599"}).to_string())
        .create_async()
        .await;
    let push = server
        .mock("POST", PUSH_PATH)
        .match_header("authorization", "Bearer token-123")
        .match_body(mockito::Matcher::PartialJson(json!({
            "BusinessShortCode": "174379",
            "TransactionType": "CustomerPayBillOnline",
            "Amount": 1501,
            "PartyA": "254712345678",
            "PartyB": "174379",
            "PhoneNumber": "254712345678",
            "CallBackURL": "https://example.com/api/payments/callback",
            "AccountReference": "GEN-000123",
        })))
        .with_status(200)
        .with_body(
            json!({
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let service = service_for(&server);
    let session = service.initiate_stk_push(&order_request()).await.unwrap();

    assert_eq!(session.checkout_request_id, "ws_CO_191220191020363925");
    assert_eq!(session.merchant_request_id, "29115-34620561-1");
    assert_eq!(session.response_code, "0");

    token.assert_async().await;
    push.assert_async().await;
}

#[tokio::test]
async fn invalid_phone_rejects_before_any_network_call() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("GET", TOKEN_PATH).expect(0).create_async().await;
    let push = server.mock("POST", PUSH_PATH).expect(0).create_async().await;

    let service = service_for(&server);
    let mut request = order_request();
    request.phone_number = "12345".to_string();

    let err = service.initiate_stk_push(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidPhoneNumber(_)));
    token.assert_async().await;
    push.assert_async().await;
}

#[tokio::test]
async fn non_positive_amount_rejects_before_any_network_call() {
    let mut server = mockito::Server::new_async().await;
    let token = server.mock("GET", TOKEN_PATH).expect(0).create_async().await;

    let service = service_for(&server);
    let mut request = order_request();
    request.amount = 0.0;

    let err = service.initiate_stk_push(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidAmount(_)));
    token.assert_async().await;
}

#[tokio::test]
async fn provider_http_failure_surfaces_status() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server).await;
    let _push = server
        .mock("POST", PUSH_PATH)
        .with_status(503)
        .with_body("Service Unavailable")
        .create_async()
        .await;

    let service = service_for(&server);
    let err = service.initiate_stk_push(&order_request()).await.unwrap_err();

    match err {
        GatewayError::Provider { status, body } => {
            assert_eq!(status, 503);
            assert!(body.contains("Service Unavailable"));
        }
        other => panic!("expected Provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn declined_push_surfaces_provider_description() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server).await;
    let _push = server
        .mock("POST", PUSH_PATH)
        .with_status(200)
        .with_body(
            json!({
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResponseCode": "1",
                "ResponseDescription": "Insufficient funds on the utility account",
                "CustomerMessage": "Request could not be processed"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let service = service_for(&server);
    let err = service.initiate_stk_push(&order_request()).await.unwrap_err();

    match err {
        GatewayError::Rejected { code, description } => {
            assert_eq!(code, "1");
            assert!(description.contains("Insufficient funds"));
        }
        other => panic!("expected Rejected error, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_token_exchange_is_an_auth_error() {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("GET", TOKEN_PATH)
        .with_status(401)
        .with_body("Bad credentials")
        .create_async()
        .await;

    let service = service_for(&server);
    let err = service.initiate_stk_push(&order_request()).await.unwrap_err();

    assert!(matches!(err, GatewayError::Auth(_)));
}

#[tokio::test]
async fn token_response_without_token_field_is_an_auth_error() {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("GET", TOKEN_PATH)
        .with_status(200)
        .with_body(json!({"expires_in": "3599"}).to_string())
        .create_async()
        .await;

    let service = service_for(&server);
    let err = service.get_access_token().await.unwrap_err();

    assert!(matches!(err, GatewayError::Auth(_)));
}

#[tokio::test]
async fn query_is_a_verbatim_passthrough() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server).await;
    let query = server
        .mock("POST", QUERY_PATH)
        .match_body(mockito::Matcher::PartialJson(json!({
            "BusinessShortCode": "174379",
            "CheckoutRequestID": "ws_CO_191220191020363925",
        })))
        .with_status(200)
        .with_body(
            json!({
                "ResponseCode": "0",
                "ResponseDescription": "The service request has been accepted successsfully",
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": "1032",
                "ResultDesc": "Request cancelled by user"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let service = service_for(&server);
    let value = service
        .query_stk_push_status("ws_CO_191220191020363925")
        .await
        .unwrap();

    assert_eq!(value["ResultCode"], "1032");
    assert_eq!(value["ResultDesc"], "Request cancelled by user");
    query.assert_async().await;
}

#[tokio::test]
async fn poll_reports_success_when_transaction_settles() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server).await;
    let _query = server
        .mock("POST", QUERY_PATH)
        .with_status(200)
        .with_body(
            json!({
                "ResponseCode": "0",
                "ResultCode": "0",
                "ResultDesc": "The service request is processed successfully."
            })
            .to_string(),
        )
        .create_async()
        .await;

    let service = service_for(&server);
    let outcome = service
        .poll_stk_push_status("ws_CO_191220191020363925", 3, Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(outcome.status, PaymentStatus::Succeeded);
    assert_eq!(outcome.result_code.as_deref(), Some("0"));
}

#[tokio::test]
async fn poll_reports_failure_on_terminal_result_code() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server).await;
    let _query = server
        .mock("POST", QUERY_PATH)
        .with_status(200)
        .with_body(
            json!({
                "ResponseCode": "0",
                "ResultCode": "1032",
                "ResultDesc": "Request cancelled by user"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let service = service_for(&server);
    let outcome = service
        .poll_stk_push_status("ws_CO_191220191020363925", 3, Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(outcome.status, PaymentStatus::Failed);
    assert_eq!(outcome.result_code.as_deref(), Some("1032"));
    assert_eq!(outcome.result_desc.as_deref(), Some("Request cancelled by user"));
}

#[tokio::test]
async fn poll_times_out_while_transaction_is_processing() {
    let mut server = mockito::Server::new_async().await;
    let _token = mock_token(&mut server).await;
    let query = server
        .mock("POST", QUERY_PATH)
        .with_status(500)
        .with_body(
            json!({
                "requestId": "ws_CO_191220191020363925",
                "errorCode": "500.001.1001",
                "errorMessage": "The transaction is being processed"
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let service = service_for(&server);
    let outcome = service
        .poll_stk_push_status("ws_CO_191220191020363925", 2, Duration::from_millis(10))
        .await
        .unwrap();

    assert_eq!(outcome.status, PaymentStatus::TimedOut);
    assert_eq!(outcome.result_code, None);
    query.assert_async().await;
}
