//! HTTP/JSON client for the iBanking payment API.
//!
//! Thin client: all business rules (balance checks, OTP generation and
//! delivery, resend caps) live on the server. The client's job is to call the
//! endpoints and surface the server's `{message}` payloads on failure.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.trim_end_matches('/').to_string();
        log::info!("📡 Payment API client initialized: {}", base_url);

        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Authenticate and fetch the customer profile. The response may carry
    /// `pendingTransactionId` when an OTP transaction was left in flight.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let path = "/api/auth/login";
        log::debug!("→ POST {}", path);

        let body = serde_json::json!({ "username": username, "password": password });
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Fetch the current profile; the server is authoritative for balance.
    pub async fn me(&self, token: &str) -> Result<Profile, ApiError> {
        let path = "/api/auth/me";
        log::debug!("→ GET {}", path);

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Look up the tuition owed for a student in the current semester.
    pub async fn lookup_tuition(
        &self,
        token: &str,
        student_id: &str,
    ) -> Result<TuitionInfo, ApiError> {
        let path = "/api/tuition/lookup";
        log::debug!("→ GET {} (studentId: {})", path, student_id);

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("studentId", student_id)])
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Start a payment transaction. The server issues an OTP and emails it;
    /// a `409` means a transaction is already pending for this customer.
    pub async fn initiate(
        &self,
        token: &str,
        student_id: &str,
    ) -> Result<InitiateResponse, ApiError> {
        let path = "/api/payment/initiate";
        log::debug!("→ POST {} (studentId: {})", path, student_id);

        let body = serde_json::json!({ "studentId": student_id });
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .bearer_auth(token)
            .send()
            .await?;
        let resp: InitiateResponse = Self::parse_response(response).await?;
        log::info!(
            "✅ Transaction {} initiated, OTP valid {}s",
            resp.transaction_id,
            resp.ttl_seconds
        );
        Ok(resp)
    }

    /// Ask the server to issue and email a fresh OTP for the transaction.
    pub async fn resend_otp(
        &self,
        token: &str,
        transaction_id: u64,
    ) -> Result<ResendResponse, ApiError> {
        let path = "/api/payment/resend-otp";
        log::debug!("→ POST {} (transactionId: {})", path, transaction_id);

        let body = serde_json::json!({ "transactionId": transaction_id });
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .bearer_auth(token)
            .send()
            .await?;
        let resp: ResendResponse = Self::parse_response(response).await?;
        log::info!("✅ OTP resent for transaction {}", transaction_id);
        Ok(resp)
    }

    /// Submit the entered OTP to finalize the payment.
    pub async fn confirm(
        &self,
        token: &str,
        transaction_id: u64,
        otp: &str,
    ) -> Result<ConfirmResponse, ApiError> {
        let path = "/api/payment/confirm";
        log::debug!("→ POST {} (transactionId: {})", path, transaction_id);

        let body = serde_json::json!({ "transactionId": transaction_id, "otp": otp });
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .bearer_auth(token)
            .send()
            .await?;
        let resp: ConfirmResponse = Self::parse_response(response).await?;
        log::info!("✅ Transaction {} confirmed", transaction_id);
        Ok(resp)
    }

    /// Fetch the customer's transaction history, newest first. Also used by
    /// the reconciliation poller to learn the fate of the active transaction.
    pub async fn history(&self, token: &str) -> Result<Vec<TransactionRecord>, ApiError> {
        let path = "/api/payment/history";
        log::debug!("→ GET {}", path);

        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Decode a successful body, or extract the server's `{message}` from an
    /// error status.
    async fn parse_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ApiError::InvalidResponse(format!("JSON parse error: {}", e)));
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        };
        Err(ApiError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extract the transaction id from a `409` conflict message of the form
/// `"... (ID: 42) ..."` so the client can adopt the pending transaction.
pub fn parse_pending_id(message: &str) -> Option<u64> {
    let idx = message.find("ID:")?;
    let digits: String = message[idx + 3..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

// ============================================================================
// Data Structures
// ============================================================================

/// Customer profile as returned by login and `/api/auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    /// Account balance in VND.
    pub balance: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    #[serde(flatten)]
    pub profile: Profile,
    /// Present when the customer still has an OTP transaction in flight;
    /// the client must resume it.
    #[serde(default)]
    pub pending_transaction_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TuitionInfo {
    pub student_id: String,
    pub student_name: String,
    pub semester: String,
    pub amount: u64,
    pub paid: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub transaction_id: u64,
    pub ttl_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendResponse {
    pub ttl_seconds: u32,
    #[serde(default)]
    pub resend_count: Option<u32>,
    #[serde(default)]
    pub resend_remaining: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub message: String,
    #[serde(default)]
    pub amount: Option<u64>,
}

/// One entry of `/api/payment/history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: u64,
    pub student_id: String,
    pub semester: String,
    pub amount: u64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    PendingOtp,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl TransactionStatus {
    /// OTP interaction may continue only in these two states; everything
    /// else is terminal for the client.
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionStatus::PendingOtp | TransactionStatus::Processing)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
