//! Daraja HTTP client: OAuth, submission, and response classification,
//! `spec.md` §4.5. Grounded in `kalkiboru111-hive`'s `MpesaClient`
//! (OAuth cache + STK builder + phone formatting) and the teacher's
//! `#[instrument(skip_all, err)]` tracing-span convention on I/O calls.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::instrument;

use crate::config::MpesaConfig;
use crate::errors::{CoreError, CoreResult};
use crate::mpesa::payloads::{B2bRequest, B2cRequest, StkPushRequest, is_accepted};
use crate::mpesa::token_cache::TokenCache;

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    expires_in: String,
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub accepted: bool,
    pub response_code: String,
    pub response_description: String,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub checkout_request_id: Option<String>,
    pub raw: Json,
}

pub struct MpesaClient {
    http: reqwest::Client,
    config: MpesaConfig,
    token_cache: TokenCache,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoreError::config(format!("failed to build http client: {e}")))?;
        Ok(MpesaClient {
            http,
            config,
            token_cache: TokenCache::new(),
        })
    }

    #[instrument(skip_all, err)]
    async fn fetch_access_token(&self) -> CoreResult<(String, i64)> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let credentials = B64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Basic {credentials}"))
            .send()
            .await
            .map_err(|e| CoreError::external(format!("oauth request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::external(format!(
                "oauth request rejected with status {}",
                response.status()
            )));
        }
        let body: OAuthResponse = response
            .json()
            .await
            .map_err(|e| CoreError::external(format!("oauth response malformed: {e}")))?;
        let expires_in = body.expires_in.parse().unwrap_or(3600);
        Ok((body.access_token, expires_in))
    }

    async fn access_token(&self) -> CoreResult<String> {
        if let Some(token) = self.token_cache.get().await {
            return Ok(token);
        }
        let (token, expires_in) = self.fetch_access_token().await?;
        self.token_cache.set(token.clone(), expires_in).await;
        Ok(token)
    }

    async fn post_with_auth(&self, path: &str, body: &Json) -> CoreResult<(StatusCode, Json)> {
        let token = self.access_token().await?;
        let url = format!("{}{path}", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::external(format!("mpesa request failed: {e}")))?;

        let final_response = if response.status() == StatusCode::UNAUTHORIZED {
            self.token_cache.invalidate().await;
            let token = self.access_token().await?;
            self.http
                .post(&url)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|e| CoreError::external(format!("mpesa retry failed: {e}")))?
        } else {
            response
        };

        let status_code = final_response.status();
        let json = final_response
            .json()
            .await
            .unwrap_or_else(|_| serde_json::json!({}));
        Ok((status_code, json))
    }

    fn classify(status: StatusCode, raw: Json) -> SubmissionOutcome {
        let response_code = raw
            .get("ResponseCode")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
            .unwrap_or_else(|| "1".to_string());
        let response_description = raw
            .get("ResponseDescription")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        SubmissionOutcome {
            accepted: is_accepted(status.is_success(), &response_code),
            response_code,
            response_description,
            conversation_id: raw.get("ConversationID").and_then(|v| v.as_str()).map(str::to_string),
            originator_conversation_id: raw
                .get("OriginatorConversationID")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            merchant_request_id: raw.get("MerchantRequestID").and_then(|v| v.as_str()).map(str::to_string),
            checkout_request_id: raw.get("CheckoutRequestID").and_then(|v| v.as_str()).map(str::to_string),
            raw,
        }
    }

    #[instrument(skip_all, err)]
    pub async fn submit_stk_push(&self, request: &StkPushRequest) -> CoreResult<SubmissionOutcome> {
        let body = serde_json::to_value(request)
            .map_err(|e| CoreError::external(format!("failed to serialize stk push request: {e}")))?;
        let (status, raw) = self.post_with_auth("/mpesa/stkpush/v1/processrequest", &body).await?;
        Ok(Self::classify(status, raw))
    }

    #[instrument(skip_all, err)]
    pub async fn submit_b2c(&self, request: &B2cRequest) -> CoreResult<SubmissionOutcome> {
        let body = serde_json::to_value(request)
            .map_err(|e| CoreError::external(format!("failed to serialize b2c request: {e}")))?;
        let (status, raw) = self.post_with_auth("/mpesa/b2c/v3/paymentrequest", &body).await?;
        Ok(Self::classify(status, raw))
    }

    #[instrument(skip_all, err)]
    pub async fn submit_b2b(&self, request: &B2bRequest) -> CoreResult<SubmissionOutcome> {
        let body = serde_json::to_value(request)
            .map_err(|e| CoreError::external(format!("failed to serialize b2b request: {e}")))?;
        let (status, raw) = self.post_with_auth("/mpesa/b2b/v1/paymentrequest", &body).await?;
        Ok(Self::classify(status, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_accepts_zero_response_code() {
        let raw = serde_json::json!({"ResponseCode": "0", "ResponseDescription": "Accepted"});
        let outcome = MpesaClient::classify(StatusCode::OK, raw);
        assert!(outcome.accepted);
    }

    #[test]
    fn classify_rejects_non_zero_response_code() {
        let raw = serde_json::json!({"ResponseCode": "1", "ResponseDescription": "Rejected"});
        let outcome = MpesaClient::classify(StatusCode::OK, raw);
        assert!(!outcome.accepted);
    }

    #[test]
    fn classify_rejects_non_2xx_even_with_zero_code() {
        let raw = serde_json::json!({"ResponseCode": "0"});
        let outcome = MpesaClient::classify(StatusCode::INTERNAL_SERVER_ERROR, raw);
        assert!(!outcome.accepted);
    }
}
