//! Bearer JWT authentication and scope checks.

use activekg_core::config::JwtSettings;
use activekg_core::types::RequestContext;
use activekg_core::{Error, Result};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Claims carried by access tokens.
#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub tenant_id: String,
    #[serde(default = "default_actor_type")]
    pub actor_type: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub nbf: Option<u64>,
}

fn default_actor_type() -> String {
    "user".to_string()
}

/// Validates bearer tokens and produces the trusted request context.
pub struct Authenticator {
    settings: JwtSettings,
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    /// Build from settings. Fails fast on a missing or malformed key when
    /// JWT is enabled.
    pub fn new(settings: JwtSettings) -> Result<Self> {
        let (decoding_key, algorithm) = if settings.enabled {
            match settings.algorithm.as_str() {
                "HS256" => {
                    let secret = settings.secret_key.as_deref().ok_or_else(|| {
                        Error::Config("JWT_SECRET_KEY required for HS256".to_string())
                    })?;
                    (
                        Some(DecodingKey::from_secret(secret.as_bytes())),
                        Algorithm::HS256,
                    )
                }
                "RS256" => {
                    let pem = settings.public_key_pem.as_deref().ok_or_else(|| {
                        Error::Config("JWT_PUBLIC_KEY required for RS256".to_string())
                    })?;
                    let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                        .map_err(|e| Error::Config(format!("invalid RS256 public key: {e}")))?;
                    (Some(key), Algorithm::RS256)
                }
                other => {
                    return Err(Error::Config(format!("unsupported JWT algorithm: {other}")))
                }
            }
        } else {
            (None, Algorithm::HS256)
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = settings.leeway_secs;
        if let Some(aud) = &settings.audience {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }
        if let Some(iss) = &settings.issuer {
            validation.set_issuer(&[iss]);
        }

        Ok(Self {
            settings,
            decoding_key,
            validation,
        })
    }

    /// Whether JWT validation is active.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Authenticate a request from its headers.
    ///
    /// With JWT disabled (dev mode) every request maps onto the default
    /// tenant with all scopes granted locally.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<RequestContext> {
        if !self.settings.enabled {
            return Ok(RequestContext {
                tenant_id: self.settings.dev_tenant.clone(),
                actor_id: "dev_user".to_string(),
                actor_type: "user".to_string(),
                scopes: vec!["*".to_string()],
            });
        }

        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| Error::Auth("missing bearer token".to_string()))?;

        let key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| Error::Config("JWT key not loaded".to_string()))?;
        let data = decode::<JwtClaims>(token, key, &self.validation)
            .map_err(|e| Error::Auth(format!("invalid token: {e}")))?;
        let claims = data.claims;

        if claims.tenant_id.trim().is_empty() {
            return Err(Error::Auth("token missing tenant_id".to_string()));
        }

        Ok(RequestContext {
            tenant_id: claims.tenant_id,
            actor_id: claims.sub,
            actor_type: claims.actor_type,
            scopes: claims.scopes,
        })
    }
}

/// Require a scope on the context; the `*` wildcard (dev mode) always
/// passes.
pub fn require_scope(ctx: &RequestContext, scope: &str) -> Result<()> {
    if ctx.has_scope(scope) || ctx.has_scope("*") {
        Ok(())
    } else {
        Err(Error::Scope(format!("missing scope: {scope}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret-key";

    fn settings(enabled: bool) -> JwtSettings {
        JwtSettings {
            enabled,
            algorithm: "HS256".to_string(),
            secret_key: Some(SECRET.to_string()),
            leeway_secs: 30,
            ..JwtSettings::default()
        }
    }

    fn token(tenant: &str, scopes: &[&str], exp_offset_secs: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset_secs) as u64;
        let claims = json!({
            "sub": "user-1",
            "tenant_id": tenant,
            "actor_type": "user",
            "scopes": scopes,
            "exp": exp,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn valid_token_yields_context() {
        let auth = Authenticator::new(settings(true)).unwrap();
        let ctx = auth
            .authenticate(&headers_with(&token("tenant1", &["search:read"], 600)))
            .unwrap();
        assert_eq!(ctx.tenant_id, "tenant1");
        assert!(ctx.has_scope("search:read"));
        assert!(require_scope(&ctx, "search:read").is_ok());
        assert!(require_scope(&ctx, "admin:refresh").is_err());
    }

    #[test]
    fn missing_token_is_auth_error() {
        let auth = Authenticator::new(settings(true)).unwrap();
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn expired_beyond_leeway_is_rejected_within_leeway_accepted() {
        let auth = Authenticator::new(settings(true)).unwrap();
        // Expired 10s ago but leeway is 30s: accepted
        let ctx = auth.authenticate(&headers_with(&token("t", &[], -10)));
        assert!(ctx.is_ok());
        // Expired 120s ago: rejected
        let err = auth.authenticate(&headers_with(&token("t", &[], -120)));
        assert!(matches!(err, Err(Error::Auth(_))));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = Authenticator::new(settings(true)).unwrap();
        let mut tok = token("tenant1", &[], 600);
        tok.push('x');
        assert!(matches!(
            auth.authenticate(&headers_with(&tok)),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn dev_mode_grants_default_tenant_and_wildcard() {
        let auth = Authenticator::new(settings(false)).unwrap();
        let ctx = auth.authenticate(&HeaderMap::new()).unwrap();
        assert_eq!(ctx.tenant_id, "default");
        assert!(require_scope(&ctx, "admin:refresh").is_ok());
    }

    #[test]
    fn hs256_requires_secret() {
        let mut s = settings(true);
        s.secret_key = None;
        assert!(matches!(Authenticator::new(s), Err(Error::Config(_))));
    }
}
