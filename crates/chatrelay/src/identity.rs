//! Turns the identity token a caller presents into a stable user id.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::{
    Method, Request,
    header::{ACCEPT, AUTHORIZATION},
};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::RelayResult;
use crate::outbound::call_outbound;

/// Yes/no oracle over identity tokens.
#[async_trait]
pub trait IdentityOracle: Send + Sync {
    /// Never fails: anything that is not a positive answer is `false`.
    async fn validate(&self, token: &str) -> bool;
}

/// Asks a Supabase project's auth service who owns a token.
#[derive(Clone)]
pub struct SupabaseIdentity {
    base_url: Url,
    anon_key: String,
}

impl std::fmt::Debug for SupabaseIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseIdentity")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"<redacted>")
            .finish()
    }
}

impl SupabaseIdentity {
    pub fn new(base_url: Url, anon_key: impl Into<String>) -> Self {
        Self {
            base_url,
            anon_key: anon_key.into(),
        }
    }

    pub fn user_request(&self, token: &str) -> RelayResult<Request<Vec<u8>>> {
        let url = self.base_url.join("/auth/v1/user")?;
        Ok(Request::builder()
            .method(Method::GET)
            .uri(url.to_string())
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(ACCEPT, "application/json")
            .body(Vec::new())?)
    }

    async fn fetch_user(&self, token: &str) -> RelayResult<Option<Value>> {
        let resp = call_outbound(self.user_request(token)?).await?;
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "identity provider rejected token");
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(resp.body())?))
    }
}

#[async_trait]
impl IdentityOracle for SupabaseIdentity {
    #[instrument(name = "supabase.validate", skip_all)]
    async fn validate(&self, token: &str) -> bool {
        match self.fetch_user(token).await {
            Ok(Some(user)) => user.get("id").is_some_and(|id| !id.is_null()),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "identity provider call failed");
                false
            }
        }
    }
}

/// Reads the `email` claim out of a JWT without checking its signature.
pub fn decode_email(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims
        .get("email")
        .and_then(Value::as_str)
        .filter(|email| !email.is_empty())
        .map(String::from)
}

/// Resolves the user id for `token`.
///
/// A token the oracle accepts maps to its email claim. Any other token is used
/// verbatim, so callers without a valid session still keep a conversation.
pub async fn resolve_user_id(oracle: &dyn IdentityOracle, token: &str) -> String {
    if !oracle.validate(token).await {
        warn!("identity token not validated, using raw token as user id");
        return token.to_string();
    }

    match decode_email(token) {
        Some(email) => email,
        None => {
            warn!("validated token carries no email claim, using raw token as user id");
            token.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockIdentityOracle;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwt_with(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn decodes_email_claim() {
        let token = jwt_with(json!({"sub": "123", "email": "ada@example.com"}));
        assert_eq!(decode_email(&token).as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn undecodable_tokens_have_no_email() {
        assert_eq!(decode_email("not-a-jwt"), None);
        assert_eq!(decode_email("a.%%%.c"), None);
        assert_eq!(decode_email(&jwt_with(json!({"sub": "123"}))), None);
    }

    #[tokio::test]
    async fn valid_token_resolves_to_email() {
        let token = jwt_with(json!({"email": "ada@example.com"}));
        let mut oracle = MockIdentityOracle::new();
        oracle.expect_validate().times(1).returning(|_| true);

        assert_eq!(resolve_user_id(&oracle, &token).await, "ada@example.com");
    }

    #[tokio::test]
    async fn invalid_token_falls_back_to_raw_token() {
        let mut oracle = MockIdentityOracle::new();
        oracle.expect_validate().returning(|_| false);

        assert_eq!(resolve_user_id(&oracle, "anon-123").await, "anon-123");
        // Same token, same id.
        assert_eq!(resolve_user_id(&oracle, "anon-123").await, "anon-123");
    }

    #[tokio::test]
    async fn valid_token_without_email_falls_back_to_raw_token() {
        let token = jwt_with(json!({"sub": "123"}));
        let mut oracle = MockIdentityOracle::new();
        oracle.expect_validate().returning(|_| true);

        assert_eq!(resolve_user_id(&oracle, &token).await, token);
    }

    #[tokio::test]
    async fn supabase_accepts_token_with_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "3f1c",
                "email": "ada@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = SupabaseIdentity::new(Url::parse(&server.uri()).unwrap(), "anon");
        assert!(oracle.validate("good").await);
    }

    #[tokio::test]
    async fn supabase_rejects_unauthorized_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "msg": "invalid JWT"
            })))
            .mount(&server)
            .await;

        let oracle = SupabaseIdentity::new(Url::parse(&server.uri()).unwrap(), "anon");
        assert!(!oracle.validate("bad").await);
    }

    #[tokio::test]
    async fn supabase_unreachable_means_invalid() {
        let oracle = SupabaseIdentity::new(Url::parse("http://127.0.0.1:9").unwrap(), "anon");
        assert!(!oracle.validate("whatever").await);
    }
}
