use std::sync::Arc;

use futures::Stream;
use tracing::info;

use super::{Identity, SessionStore};
use crate::api::{ApiClient, RegisterRequest};
use crate::error::Result;

/// Login, registration and logout, keeping the session store in step.
#[derive(Clone)]
pub struct AuthService {
    api: ApiClient,
    store: Arc<SessionStore>,
}

impl AuthService {
    pub fn new(api: ApiClient, store: Arc<SessionStore>) -> Self {
        Self { api, store }
    }

    /// Authenticate and install the resulting session.
    ///
    /// A rejected login leaves the current session untouched.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Option<Identity>> {
        let (credential, identity) = self.api.login(identifier, secret).await?;
        self.store.set_session(credential, identity.clone());
        Ok(identity)
    }

    pub async fn register(&self, payload: &RegisterRequest) -> Result<()> {
        self.api.register(payload).await
    }

    /// Clear the local session now; tell the server in the background.
    pub fn logout(&self) {
        info!("Logging out");
        self.store.clear();
        self.api.logout_in_background();
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn identity_stream(&self) -> impl Stream<Item = Option<Identity>> + Send + 'static {
        self.store.identity_stream()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::error::SessionError;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_for(server: &MockServer) -> AuthService {
        let api = ApiClient::with_base_url(&format!("{}/api/auth", server.uri()), Duration::from_secs(5))
            .expect("mock server uri is http");
        AuthService::new(api, Arc::new(SessionStore::new()))
    }

    async fn mount(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(format!("/api/auth/{}", endpoint)))
            .respond_with(response)
            .mount(server)
            .await;
    }

    /// Wait for the background logout call to reach the server.
    async fn wait_for_logout(server: &MockServer) -> bool {
        for _ in 0..100 {
            let seen = server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .any(|r| r.url.path() == "/api/auth/logout");
            if seen {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_login_installs_session_and_identity() {
        let server = MockServer::start().await;
        mount(
            &server,
            "login",
            ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "c1",
                "expiresIn": 900,
                "usuario": { "nome": "Padaria Central" }
            })),
        )
        .await;
        let service = service_for(&server);
        let mut identities = Box::pin(service.identity_stream());

        let identity = service.login("contato@padaria.test", "hunter22").await.unwrap();

        assert_eq!(identity.as_ref().and_then(|i| i.display_name()), Some("Padaria Central"));
        assert!(service.is_authenticated());
        assert_eq!(service.store().current_credential().as_deref(), Some("c1"));
        let emitted = identities.next().await.flatten();
        assert_eq!(emitted.as_ref().and_then(|i| i.display_name()), Some("Padaria Central"));
    }

    #[tokio::test]
    async fn test_rejected_login_keeps_existing_session() {
        let server = MockServer::start().await;
        mount(&server, "login", ResponseTemplate::new(401)).await;
        let service = service_for(&server);
        service
            .store()
            .set_session(Credential::new("c1", 900), None);

        let err = service.login("ana@example.com", "wrong1").await.unwrap_err();
        assert!(matches!(err, SessionError::CredentialRejected(_)));
        assert_eq!(service.store().current_credential().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_logout_clears_immediately_regardless_of_server() {
        let server = MockServer::start().await;
        mount(&server, "logout", ResponseTemplate::new(500)).await;
        let service = service_for(&server);
        service
            .store()
            .set_session(Credential::new("c1", 900), None);
        let mut identities = Box::pin(service.identity_stream());

        service.logout();

        assert!(!service.is_authenticated());
        assert_eq!(identities.next().await, Some(None));
        assert!(wait_for_logout(&server).await);
        assert!(!service.is_authenticated());
    }

    #[test]
    fn test_logout_outside_runtime_still_clears() {
        // No runtime, so no request is ever sent to this address.
        let api = ApiClient::with_base_url("http://127.0.0.1:9/api/auth", Duration::from_secs(2))
            .expect("valid base url");
        let service = AuthService::new(api, Arc::new(SessionStore::new()));
        service
            .store()
            .set_session(Credential::new("c1", 900), None);
        service.logout();
        assert!(!service.is_authenticated());
    }
}
