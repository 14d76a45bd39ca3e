//! Authentication header construction for outbound calls (§3 `AuthConfig`,
//! §6 "authentication header per `AuthConfig` variant").
//!
//! JWT/JWS signing covers the HMAC algorithm family (HS256/384/512) with a
//! hand-rolled compact JWT encoder; RS256/384/512 require an external KMS or
//! HSM to produce the signature and are rejected here rather than silently
//! mis-signed (see DESIGN.md).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use paybridge_core::{AuthConfig, ClientHeaders, JwsAlgorithm, PayBridgeError};
use serde_json::json;
use sha2::{Sha256, Sha384, Sha512};
use tracing::warn;

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn sign_hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn sign_hmac_sha384(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha384>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn sign_hmac_sha512(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Encodes a compact JWT `header.payload.signature` using an HMAC-SHA2
/// family algorithm. `alg` is the JWT `alg` header value.
fn encode_hs_jwt(alg: &str, secret: &str, issuer: &str, audience: &str, expiration_seconds: u64) -> String {
    let header = b64(json!({"alg": alg, "typ": "JWT"}).to_string().as_bytes());
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
    let payload = b64(json!({
        "iss": issuer,
        "aud": audience,
        "iat": now,
        "exp": now + expiration_seconds,
    })
    .to_string()
    .as_bytes());
    let signing_input = format!("{header}.{payload}");
    let signature = match alg {
        "HS256" => sign_hmac_sha256(secret.as_bytes(), signing_input.as_bytes()),
        "HS384" => sign_hmac_sha384(secret.as_bytes(), signing_input.as_bytes()),
        "HS512" => sign_hmac_sha512(secret.as_bytes(), signing_input.as_bytes()),
        _ => unreachable!("caller only passes HS* algorithms"),
    };
    format!("{signing_input}.{}", b64(&signature))
}

/// In-memory OAuth2 client-credentials token cache, keyed by token endpoint
/// plus client id so distinct tenants sharing a provider still get distinct
/// cached tokens.
#[derive(Default)]
pub struct OAuth2TokenCache {
    tokens: DashMap<String, (String, chrono::DateTime<Utc>)>,
}

impl OAuth2TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_token(
        &self,
        client: &reqwest::Client,
        token_endpoint: &str,
        client_id: &str,
        client_secret: &str,
        scope: &str,
    ) -> Result<String, PayBridgeError> {
        let cache_key = format!("{token_endpoint}/{client_id}");
        if let Some(entry) = self.tokens.get(&cache_key) {
            if entry.1 > Utc::now() {
                return Ok(entry.0.clone());
            }
        }

        let response = client
            .post(token_endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| PayBridgeError::DispatchTransient { service: "oauth2".to_string(), message: e.to_string() })?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PayBridgeError::DispatchPermanent { service: "oauth2".to_string(), message: e.to_string() })?;

        let access_token = body
            .get("access_token")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| PayBridgeError::DispatchPermanent {
                service: "oauth2".to_string(),
                message: "token response missing access_token".to_string(),
            })?
            .to_string();
        let expires_in = body.get("expires_in").and_then(serde_json::Value::as_i64).unwrap_or(3600);
        self.tokens.insert(cache_key, (access_token.clone(), Utc::now() + chrono::Duration::seconds(expires_in.max(1))));
        Ok(access_token)
    }
}

/// Builds the headers an [`AuthConfig`] contributes to an outbound request,
/// plus any [`ClientHeaders`] layered on top (§3, §6).
pub async fn build_auth_headers(
    client: &reqwest::Client,
    oauth_cache: &Arc<OAuth2TokenCache>,
    auth: &AuthConfig,
    client_headers: Option<&ClientHeaders>,
) -> Result<BTreeMap<String, String>, PayBridgeError> {
    let mut headers = BTreeMap::new();

    match auth {
        AuthConfig::Jwt { secret, issuer, audience, expiration_seconds } => {
            let token = encode_hs_jwt("HS256", secret, issuer, audience, *expiration_seconds);
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        AuthConfig::Jws { secret_or_public_key, algorithm, issuer, audience, expiration_seconds } => {
            let alg = match algorithm {
                JwsAlgorithm::Hs256 => "HS256",
                JwsAlgorithm::Hs384 => "HS384",
                JwsAlgorithm::Hs512 => "HS512",
                JwsAlgorithm::Rs256 | JwsAlgorithm::Rs384 | JwsAlgorithm::Rs512 => {
                    warn!(?algorithm, "RSA-family JWS signing requires an external KMS, refusing to sign locally");
                    return Err(PayBridgeError::ConfigurationMissing {
                        coordinate: issuer.clone(),
                        kind: format!("jws signer for {algorithm:?}"),
                    });
                }
            };
            let token = encode_hs_jwt(alg, secret_or_public_key, issuer, audience, *expiration_seconds);
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        AuthConfig::OAuth2 { token_endpoint, client_id, client_secret, scope } => {
            let token = oauth_cache.fetch_token(client, token_endpoint, client_id, client_secret, scope).await?;
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        AuthConfig::ApiKey { key, header_name } => {
            headers.insert(header_name.clone(), key.clone());
        }
        AuthConfig::Basic { username, password } => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            headers.insert("Authorization".to_string(), format!("Basic {encoded}"));
        }
    }

    if let Some(client_headers) = client_headers {
        if client_headers.enabled {
            if let Some(client_id) = &client_headers.client_id {
                headers.insert(client_headers.id_header_name.clone(), client_id.clone());
            }
            if let Some(client_secret) = &client_headers.client_secret {
                headers.insert(client_headers.secret_header_name.clone(), client_secret.clone());
            }
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hs256_jwt_has_three_dot_separated_segments() {
        let token = encode_hs_jwt("HS256", "secret", "iss", "aud", 60);
        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn api_key_produces_named_header() {
        let client = reqwest::Client::new();
        let cache = Arc::new(OAuth2TokenCache::new());
        let auth = AuthConfig::ApiKey { key: "secret-key".to_string(), header_name: "X-Api-Key".to_string() };
        let headers = build_auth_headers(&client, &cache, &auth, None).await.unwrap();
        assert_eq!(headers.get("X-Api-Key"), Some(&"secret-key".to_string()));
    }

    #[tokio::test]
    async fn basic_auth_base64_encodes_credentials() {
        let client = reqwest::Client::new();
        let cache = Arc::new(OAuth2TokenCache::new());
        let auth = AuthConfig::Basic { username: "u".to_string(), password: "p".to_string() };
        let headers = build_auth_headers(&client, &cache, &auth, None).await.unwrap();
        assert_eq!(headers.get("Authorization"), Some(&"Basic dTpw".to_string()));
    }

    #[tokio::test]
    async fn rsa_jws_is_rejected_without_a_kms() {
        let client = reqwest::Client::new();
        let cache = Arc::new(OAuth2TokenCache::new());
        let auth = AuthConfig::Jws {
            secret_or_public_key: "k".to_string(),
            algorithm: JwsAlgorithm::Rs256,
            issuer: "iss".to_string(),
            audience: "aud".to_string(),
            expiration_seconds: 60,
        };
        let result = build_auth_headers(&client, &cache, &auth, None).await;
        assert!(result.is_err());
    }
}
