//! Account access through the backend's `/api/auth` endpoints.
//!
//! Only the session token and the public user record are kept locally.

use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::CornCareClient;
use crate::error::ClientResult;
use crate::models::{AuthResponse, AuthUser, ContactMethod, LoginCredentials, RegisterInfo};
use crate::storage::{self, KvStore, AUTH_TOKEN_KEY, USER_KEY};

/// The payload key the backend expects the contact under.
fn contact_field(method: ContactMethod) -> &'static str {
    match method {
        ContactMethod::Phone => "phone",
        ContactMethod::Email => "email",
    }
}

#[derive(Clone)]
pub struct AuthClient {
    client: CornCareClient,
    store: Arc<dyn KvStore>,
}

impl AuthClient {
    pub fn new(client: CornCareClient, store: Arc<dyn KvStore>) -> Self {
        Self { client, store }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> ClientResult<AuthResponse> {
        let response = self
            .client
            .http()
            .post(self.client.endpoint(path))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(match serde_json::from_str::<AuthResponse>(&body) {
            Ok(parsed) => parsed,
            Err(_) if status.is_success() => AuthResponse::failure("unexpected response from auth service"),
            Err(_) => AuthResponse::failure(format!("auth service returned status {}", status.as_u16())),
        })
    }

    /// Asks the backend to deliver a verification code. Returns whether it accepted.
    pub async fn send_code(&self, method: ContactMethod, contact: &str) -> bool {
        let mut payload = json!({ "method": method });
        payload[contact_field(method)] = json!(contact);
        match self.post("/api/auth/send-code", &payload).await {
            Ok(response) => response.success,
            Err(e) => {
                warn!(error = %e, "sending verification code failed");
                false
            }
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> AuthResponse {
        self.authenticate("/api/auth/login", credentials).await
    }

    pub async fn register(&self, info: &RegisterInfo) -> AuthResponse {
        self.authenticate("/api/auth/register", info).await
    }

    async fn authenticate<T: Serialize>(&self, path: &str, payload: &T) -> AuthResponse {
        let response = match self.post(path, payload).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, path, "auth request failed");
                return AuthResponse::failure("network connection failed, try again later");
            }
        };

        if let (true, Some(token), Some(user)) = (response.success, &response.token, &response.user) {
            if let Err(e) = self.persist(token, user) {
                warn!(error = %e, "could not persist session");
                return AuthResponse::failure(format!("could not save session: {e}"));
            }
            info!(user = %user.id, "signed in");
        }
        response
    }

    fn persist(&self, token: &str, user: &AuthUser) -> ClientResult<()> {
        self.store.set(AUTH_TOKEN_KEY, token)?;
        storage::write_json(self.store.as_ref(), USER_KEY, user)
    }

    /// Tells the backend best-effort, then always forgets the local session.
    pub async fn logout(&self) -> ClientResult<()> {
        if let Some(token) = self.token() {
            let outcome = self
                .client
                .http()
                .post(self.client.endpoint("/api/auth/logout"))
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .send()
                .await;
            if let Err(e) = outcome {
                warn!(error = %e, "logout request failed");
            }
        }
        self.store.remove(AUTH_TOKEN_KEY)?;
        self.store.remove(USER_KEY)?;
        info!("signed out");
        Ok(())
    }

    pub fn token(&self) -> Option<String> {
        match self.store.get(AUTH_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "could not read session token");
                None
            }
        }
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        match storage::read_json(self.store.as_ref(), USER_KEY) {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "could not read signed-in user");
                None
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some() && self.current_user().is_some()
    }
}
