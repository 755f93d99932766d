use crate::auth::service_error_message;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[async_trait]
pub trait PremiumGrant: Send + Sync {
    async fn grant_premium(&self, user_id: &str) -> Result<()>;
}

/// GoTrue admin API, authenticated with the service-role key.
pub struct GoTrueAdmin {
    http: reqwest::Client,
    base: String,
    service_key: String,
}

impl GoTrueAdmin {
    pub fn new(project_url: &str, service_key: &str) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            service_key: service_key.to_string(),
        })
    }
}

#[async_trait]
impl PremiumGrant for GoTrueAdmin {
    async fn grant_premium(&self, user_id: &str) -> Result<()> {
        let url = format!("{}/admin/users/{}", self.base, urlencoding::encode(user_id));
        let resp = self
            .http
            .put(url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&json!({ "user_metadata": { "is_premium": true } }))
            .send()
            .await
            .context("Identity service unreachable")?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            return Err(anyhow!(service_error_message(&body, status.as_u16())));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("No signature matching")]
    MissingSignature,

    #[error("Webhook Error: {0}")]
    BadPayload(String),

    #[error("Internal Server Error")]
    Upgrade(#[source] anyhow::Error),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingSignature | WebhookError::BadPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Upgrade(e) => {
                error!(error = ?e, "error updating user");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PaymentEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<PaymentEventData>,
}

#[derive(Debug, Deserialize)]
struct PaymentEventData {
    #[serde(default)]
    object: Value,
}

impl PaymentEvent {
    fn object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.data.as_ref()?.object.as_object()
    }
}

pub fn router(grant: Arc<dyn PremiumGrant>) -> Router {
    Router::new()
        .route("/stripe-webhook", post(payment_webhook))
        .route("/health", get(|| async { "ok" }))
        .with_state(grant)
}

pub async fn serve(bind: &str, grant: Arc<dyn PremiumGrant>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %bind, "webhook listening");
    axum::serve(listener, router(grant)).await?;
    Ok(())
}

async fn payment_webhook(
    State(grant): State<Arc<dyn PremiumGrant>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<Value>, WebhookError> {
    // Presence only. The signature itself is not verified.
    if !headers.contains_key("stripe-signature") {
        return Err(WebhookError::MissingSignature);
    }
    let event: PaymentEvent =
        serde_json::from_slice(&body).map_err(|e| WebhookError::BadPayload(e.to_string()))?;
    info!(kind = %event.kind, "received payment event");

    if event.kind == CHECKOUT_COMPLETED {
        let object = event
            .object()
            .ok_or_else(|| WebhookError::BadPayload("missing data.object".to_string()))?;
        let reference = object
            .get("client_reference_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());
        match reference {
            Some(user_id) => {
                grant.grant_premium(user_id).await.map_err(WebhookError::Upgrade)?;
                info!(user = %user_id, "upgraded user to premium");
            }
            None => warn!("{CHECKOUT_COMPLETED} received without client_reference_id"),
        }
    }

    Ok(Json(json!({ "received": true })))
}
