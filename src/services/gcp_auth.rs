//! OAuth2 access tokens for the Cloud Storage JSON API.
//!
//! Three sources, picked once at startup:
//! - a service-account key file, exchanged through the JWT bearer grant;
//! - the instance metadata server (Cloud Run, GCE);
//! - nothing at all, when talking to a storage emulator.

use crate::services::storage_service::{StorageError, StorageResult};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::debug;

pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before the server says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account key file this crate needs.
#[derive(Deserialize, Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Source {
    ServiceAccount(ServiceAccountKey),
    MetadataServer { token_url: String },
    Anonymous,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens, caching each one until shortly before expiry.
#[derive(Clone)]
pub struct TokenProvider {
    source: Arc<Source>,
    client: reqwest::Client,
    cached: Arc<Mutex<Option<CachedToken>>>,
}

impl TokenProvider {
    fn with_source(client: reqwest::Client, source: Source) -> Self {
        Self {
            source: Arc::new(source),
            client,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// No credentials; requests go out unauthenticated.
    pub fn anonymous(client: reqwest::Client) -> Self {
        Self::with_source(client, Source::Anonymous)
    }

    /// Metadata server at `GCE_METADATA_HOST` or the well-known host.
    pub fn metadata_server(client: reqwest::Client) -> Self {
        let host =
            std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| DEFAULT_METADATA_HOST.into());
        Self::metadata_server_at(client, &format!("http://{}", host))
    }

    /// Metadata server rooted at `base_url`.
    pub fn metadata_server_at(client: reqwest::Client, base_url: &str) -> Self {
        let token_url = format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token?scopes={}",
            base_url.trim_end_matches('/'),
            STORAGE_SCOPE
        );
        Self::with_source(client, Source::MetadataServer { token_url })
    }

    pub fn service_account(client: reqwest::Client, key: ServiceAccountKey) -> Self {
        Self::with_source(client, Source::ServiceAccount(key))
    }

    /// Read a service-account key file.
    pub async fn from_key_file(client: reqwest::Client, path: &Path) -> StorageResult<Self> {
        let raw = tokio::fs::read(path).await.map_err(|err| {
            StorageError::Auth(format!("reading key file {}: {}", path.display(), err))
        })?;
        let key: ServiceAccountKey = serde_json::from_slice(&raw)?;
        debug!(client_email = %key.client_email, "using service-account credentials");
        Ok(Self::service_account(client, key))
    }

    /// Current bearer token, or `None` for anonymous access.
    pub async fn token(&self) -> StorageResult<Option<String>> {
        if matches!(*self.source, Source::Anonymous) {
            return Ok(None);
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(Some(token.value.clone()));
            }
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(Some(response.access_token))
    }

    async fn fetch(&self) -> StorageResult<TokenResponse> {
        let request = match &*self.source {
            Source::Anonymous => {
                return Err(StorageError::Auth("no credential source configured".into()));
            }
            Source::MetadataServer { token_url } => self
                .client
                .get(token_url)
                .header("Metadata-Flavor", "Google"),
            Source::ServiceAccount(key) => {
                let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                let assertion = sign_assertion(key, token_uri)?;
                self.client
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

/// Build the signed RS256 assertion for the JWT bearer grant.
fn sign_assertion(key: &ServiceAccountKey, audience: &str) -> StorageResult<String> {
    let iat = Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: STORAGE_SCOPE,
        aud: audience,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| StorageError::Auth(format!("invalid private key: {}", err)))?;
    jsonwebtoken::encode(&header, &claims, &signing_key)
        .map_err(|err| StorageError::Auth(format!("signing assertion: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn anonymous_provider_has_no_token() {
        let provider = TokenProvider::anonymous(reqwest::Client::new());
        assert_eq!(provider.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn metadata_token_is_fetched_once_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(
                "/computeMetadata/v1/instance/service-accounts/default/token",
            ))
            .and(query_param("scopes", STORAGE_SCOPE))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TokenProvider::metadata_server_at(reqwest::Client::new(), &server.uri());
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("ya29.test"));
        assert_eq!(provider.token().await.unwrap().as_deref(), Some("ya29.test"));
    }

    #[tokio::test]
    async fn token_endpoint_failure_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let provider = TokenProvider::metadata_server_at(reqwest::Client::new(), &server.uri());
        let err = provider.token().await.unwrap_err();
        assert!(matches!(err, StorageError::Auth(ref msg) if msg.contains("403")));
    }

    #[test]
    fn malformed_private_key_is_rejected() {
        let key = ServiceAccountKey {
            client_email: "svc@project.iam.gserviceaccount.com".into(),
            private_key: "not a pem".into(),
            private_key_id: Some("abc".into()),
            token_uri: None,
        };
        assert!(matches!(
            sign_assertion(&key, DEFAULT_TOKEN_URI),
            Err(StorageError::Auth(_))
        ));
    }
}
