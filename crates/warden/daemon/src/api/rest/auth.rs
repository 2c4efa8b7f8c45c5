//! Bearer token authentication and route-class scopes

use super::state::AppState;
use crate::config::TokenConfig;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Permission attached to a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// `POST /intent`
    #[serde(rename = "intent.submit")]
    IntentSubmit,
    /// `GET /governance/*`
    #[serde(rename = "governance.read")]
    GovernanceRead,
    /// `/internal/*`: approve, resume, halt and friends
    #[serde(rename = "governance.control")]
    GovernanceControl,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::IntentSubmit => "intent.submit",
            Scope::GovernanceRead => "governance.read",
            Scope::GovernanceControl => "governance.control",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller, available to handlers as a request extension
#[derive(Debug, Clone)]
pub struct Principal {
    pub name: String,
    pub scopes: Vec<Scope>,
    /// Token digest, used as the rate-limit key
    pub key: String,
}

impl Principal {
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }
}

/// Hex SHA-256 of a bearer token
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Known tokens, held only as digests
#[derive(Debug, Default)]
pub struct TokenRegistry {
    by_digest: HashMap<String, Principal>,
}

impl TokenRegistry {
    pub fn from_config(tokens: &[TokenConfig]) -> Self {
        let mut by_digest = HashMap::new();
        for token in tokens {
            let digest = match (&token.token_sha256, &token.token) {
                (Some(digest), _) => digest.to_ascii_lowercase(),
                (None, Some(plain)) => token_digest(plain),
                (None, None) => continue,
            };
            by_digest.insert(
                digest.clone(),
                Principal {
                    name: token.principal.clone(),
                    scopes: token.scopes.clone(),
                    key: digest,
                },
            );
        }
        Self { by_digest }
    }

    pub fn len(&self) -> usize {
        self.by_digest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }

    pub fn authenticate(&self, token: &str) -> Option<&Principal> {
        self.by_digest.get(&token_digest(token))
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Route-class guard: authenticate, rate limit, then check the scope
pub async fn authorize(
    State((state, scope)): State<(AppState, Scope)>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("Missing or invalid Authorization header".into()))?;

    let principal = state
        .tokens
        .authenticate(token)
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("API key not recognised".into()))?;

    if let Err(retry_after) = state.rate_limiter.check(&principal.key) {
        tracing::warn!(principal = %principal.name, "Rate limit exceeded");
        return Err(ApiError::RateLimited {
            retry_after_secs: retry_after.as_secs_f64().ceil().max(1.0) as u64,
        });
    }

    if !principal.has_scope(scope) {
        tracing::warn!(principal = %principal.name, %scope, path = %request.uri().path(), "Missing scope");
        return Err(ApiError::Forbidden(format!("token lacks the {} scope", scope)));
    }

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(principal: &str, plain: &str, scopes: &[Scope]) -> TokenConfig {
        TokenConfig {
            principal: principal.to_string(),
            token_sha256: None,
            token: Some(plain.to_string()),
            scopes: scopes.to_vec(),
        }
    }

    #[test]
    fn test_registry_matches_plain_and_digest() {
        let registry = TokenRegistry::from_config(&[
            token("ci", "sk_test_ci", &[Scope::IntentSubmit]),
            TokenConfig {
                principal: "ops".into(),
                token_sha256: Some(token_digest("sk_test_ops").to_uppercase()),
                token: None,
                scopes: vec![Scope::GovernanceControl],
            },
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.authenticate("sk_test_ci").unwrap().name, "ci");
        assert!(registry
            .authenticate("sk_test_ops")
            .unwrap()
            .has_scope(Scope::GovernanceControl));
        assert!(registry.authenticate("sk_test_other").is_none());
    }

    #[test]
    fn test_scope_wire_names() {
        let scopes: Vec<Scope> =
            serde_json::from_str(r#"["intent.submit","governance.read","governance.control"]"#).unwrap();
        assert_eq!(
            scopes,
            vec![Scope::IntentSubmit, Scope::GovernanceRead, Scope::GovernanceControl]
        );
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        assert_eq!(
            token_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
