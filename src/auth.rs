use crate::storage::Storage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const SESSION_KEY: &str = "auth-session";
// Refresh a little before the access token actually lapses.
const REFRESH_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl User {
    pub fn is_premium(&self) -> bool {
        self.user_metadata.get("is_premium") == Some(&Value::Bool(true))
    }

    pub fn display_name(&self) -> Option<&str> {
        self.metadata_str("display_name")
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.metadata_str("avatar_url")
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    pub fn expires_within(&self, secs: i64) -> bool {
        self.expires_at
            .is_some_and(|at| at <= Utc::now().timestamp() + secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    ConfirmationRequired(User),
}

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome>;
    async fn refresh(&self, refresh_token: &str) -> Result<Session>;
    async fn sign_out(&self, access_token: &str) -> Result<()>;
    async fn update_user(&self, access_token: &str, data: Value) -> Result<User>;
}

/// Stand-in used when no identity service is configured.
pub struct DisabledIdentity;

#[async_trait]
impl IdentityService for DisabledIdentity {
    async fn sign_in(&self, _: &str, _: &str) -> Result<Session> {
        Err(anyhow!("Sign-in is not configured"))
    }

    async fn sign_up(&self, _: &str, _: &str) -> Result<SignUpOutcome> {
        Err(anyhow!("Sign-up is not configured"))
    }

    async fn refresh(&self, _: &str) -> Result<Session> {
        Err(anyhow!("Sign-in is not configured"))
    }

    async fn sign_out(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn update_user(&self, _: &str, _: Value) -> Result<User> {
        Err(anyhow!("Sign-in is not configured"))
    }
}

#[derive(Debug, Clone)]
pub struct GoTrueClient {
    http: reqwest::Client,
    base: String,
    anon_key: String,
}

impl GoTrueClient {
    pub fn new(project_url: &str, anon_key: &str) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let resp = req
            .header("apikey", &self.anon_key)
            .send()
            .await
            .context("Identity service unreachable")?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(anyhow!(service_error_message(&body, status.as_u16())));
        }
        Ok(body)
    }

    async fn token(&self, grant_type: &str, body: Value) -> Result<Session> {
        let url = format!("{}/token?grant_type={grant_type}", self.base);
        let body = self.send(self.http.post(url).json(&body)).await?;
        serde_json::from_value(body).context("Invalid session response")
    }
}

#[async_trait]
impl IdentityService for GoTrueClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.token("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let url = format!("{}/signup", self.base);
        let body = self
            .send(self.http.post(url).json(&json!({ "email": email, "password": password })))
            .await?;
        parse_sign_up(body)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        self.token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = format!("{}/logout", self.base);
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Identity service unreachable")?;
        if !resp.status().is_success() {
            return Err(anyhow!("Sign-out failed (HTTP {})", resp.status()));
        }
        Ok(())
    }

    async fn update_user(&self, access_token: &str, data: Value) -> Result<User> {
        let url = format!("{}/user", self.base);
        let body = self
            .send(self.http.put(url).bearer_auth(access_token).json(&json!({ "data": data })))
            .await?;
        serde_json::from_value(body).context("Invalid user response")
    }
}

fn parse_sign_up(body: Value) -> Result<SignUpOutcome> {
    if body.get("access_token").is_some() {
        let session = serde_json::from_value(body).context("Invalid session response")?;
        return Ok(SignUpOutcome::SignedIn(session));
    }
    let user = serde_json::from_value(body).context("Invalid user response")?;
    Ok(SignUpOutcome::ConfirmationRequired(user))
}

// GoTrue uses different error fields per endpoint.
pub(crate) fn service_error_message(body: &Value, status: u16) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("Identity service error (HTTP {status})"))
}

pub struct AuthProvider {
    service: Arc<dyn IdentityService>,
    storage: Arc<dyn Storage>,
    session_tx: watch::Sender<Option<Session>>,
}

impl AuthProvider {
    pub fn new(service: Arc<dyn IdentityService>, storage: Arc<dyn Storage>) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            service,
            storage,
            session_tx,
        }
    }

    pub async fn restore(&self) {
        let stored = match self.storage.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = ?e, "failed to read stored session");
                return;
            }
        };
        let session: Session = match serde_json::from_str(&stored) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "discarding unreadable stored session");
                self.set_session(None);
                return;
            }
        };
        if !session.is_expired() {
            self.session_tx.send_replace(Some(session));
            return;
        }
        match self.service.refresh(&session.refresh_token).await {
            Ok(fresh) => self.set_session(Some(fresh)),
            Err(e) => {
                info!(error = %e, "stored session expired");
                self.set_session(None);
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.session_tx.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.session_tx.borrow().as_ref().map(|s| s.user.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.session_tx.borrow().as_ref().map(|s| s.user.id.clone())
    }

    pub fn is_premium(&self) -> bool {
        self.session_tx
            .borrow()
            .as_ref()
            .is_some_and(|s| s.user.is_premium())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let session = self.service.sign_in(email.trim(), password).await?;
        let user = session.user.clone();
        info!(user = %user.id, "signed in");
        self.set_session(Some(session));
        Ok(user)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome> {
        let outcome = self.service.sign_up(email.trim(), password).await?;
        if let SignUpOutcome::SignedIn(session) = &outcome {
            self.set_session(Some(session.clone()));
        }
        Ok(outcome)
    }

    /// The local session is dropped even when the service call fails.
    pub async fn sign_out(&self) {
        if self.session().is_some() {
            let res = match self.live_session().await {
                Ok(session) => self.service.sign_out(&session.access_token).await,
                Err(e) => Err(e),
            };
            if let Err(e) = res {
                warn!(error = ?e, "remote sign-out failed");
            }
        }
        self.set_session(None);
    }

    pub async fn update_profile(&self, display_name: &str, avatar_url: Option<&str>) -> Result<User> {
        self.update_metadata(json!({
            "display_name": display_name,
            "avatar_url": avatar_url,
        }))
        .await
    }

    /// Mocked checkout: flips the premium flag directly on the signed-in user.
    pub async fn activate_premium(&self) -> Result<User> {
        let user = self.update_metadata(json!({ "is_premium": true })).await?;
        info!(user = %user.id, "premium activated");
        Ok(user)
    }

    async fn update_metadata(&self, data: Value) -> Result<User> {
        let session = self.live_session().await?;
        let user = self.service.update_user(&session.access_token, data).await?;
        self.set_session(Some(Session {
            user: user.clone(),
            ..session
        }));
        Ok(user)
    }

    async fn live_session(&self) -> Result<Session> {
        let session = self
            .session()
            .ok_or_else(|| anyhow!("Sign in to update your account"))?;
        if !session.expires_within(REFRESH_MARGIN_SECS) {
            return Ok(session);
        }
        let fresh = self
            .service
            .refresh(&session.refresh_token)
            .await
            .context("Session expired, please sign in again")?;
        info!(user = %fresh.user.id, "session refreshed");
        self.set_session(Some(fresh.clone()));
        Ok(fresh)
    }

    fn set_session(&self, session: Option<Session>) {
        let res = match &session {
            Some(s) => serde_json::to_string(s)
                .map_err(anyhow::Error::from)
                .and_then(|json| self.storage.set(SESSION_KEY, &json)),
            None => self.storage.remove(SESSION_KEY),
        };
        if let Err(e) = res {
            warn!(error = ?e, "failed to persist session");
        }
        self.session_tx.send_replace(session);
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Accepts `password == "secret"` and only `token-*` access tokens.
    #[derive(Default)]
    pub struct FakeIdentity {
        pub metadata: Mutex<Map<String, Value>>,
        pub fail_sign_out: bool,
        pub signed_out_with: Mutex<Vec<String>>,
    }

    pub fn expired_session_for(id: &str) -> Session {
        Session {
            access_token: format!("stale-{id}"),
            ..session_for(id, Some(Utc::now().timestamp() - 60))
        }
    }

    fn check_token(token: &str) -> Result<&str> {
        token
            .strip_prefix("token-")
            .ok_or_else(|| anyhow!("JWT expired"))
    }

    pub fn session_for(id: &str, expires_at: Option<i64>) -> Session {
        Session {
            access_token: format!("token-{id}"),
            refresh_token: format!("refresh-{id}"),
            expires_at,
            user: User {
                id: id.to_string(),
                email: Some(format!("{id}@example.com")),
                user_metadata: Map::new(),
            },
        }
    }

    #[async_trait]
    impl IdentityService for FakeIdentity {
        async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
            if password != "secret" {
                return Err(anyhow!("Invalid login credentials"));
            }
            let id = email.split('@').next().unwrap_or(email);
            Ok(session_for(id, None))
        }

        async fn sign_up(&self, email: &str, _: &str) -> Result<SignUpOutcome> {
            Ok(SignUpOutcome::ConfirmationRequired(User {
                id: "new".into(),
                email: Some(email.into()),
                user_metadata: Map::new(),
            }))
        }

        async fn refresh(&self, refresh_token: &str) -> Result<Session> {
            match refresh_token.strip_prefix("refresh-") {
                Some(id) if id != "revoked" => Ok(session_for(id, None)),
                _ => Err(anyhow!("Invalid Refresh Token")),
            }
        }

        async fn sign_out(&self, access_token: &str) -> Result<()> {
            if self.fail_sign_out {
                return Err(anyhow!("offline"));
            }
            check_token(access_token)?;
            self.signed_out_with.lock().unwrap().push(access_token.to_string());
            Ok(())
        }

        async fn update_user(&self, access_token: &str, data: Value) -> Result<User> {
            let id = check_token(access_token)?;
            let mut md = self.metadata.lock().unwrap();
            if let Value::Object(map) = data {
                md.extend(map);
            }
            Ok(User {
                id: id.to_string(),
                email: None,
                user_metadata: md.clone(),
            })
        }
    }
}
