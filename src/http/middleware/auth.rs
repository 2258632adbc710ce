//! Bearer token authentication.
//!
//! # Responsibilities
//! - Extract a token from the `Authorization` header or a query parameter
//! - Hand it to a pluggable [`TokenVerifier`] for signature checks
//! - Enforce time, issuer and audience claims
//! - Store the verified claims under [`AUTH_KEY`] for later middleware
//!
//! # Data Flow
//! ```text
//! Request
//!     → OPTIONS passthrough (unless enabled)
//!     → extractor (header schema / query parameter)
//!     → TokenVerifier::verify → Claims
//!     → exp / nbf / iss / aud checks
//!     → ctx.set_value(AUTH_KEY, claims) → next()
//!
//! Any failure: WWW-Authenticate + 401 abort
//! ```
//!
//! # Design Decisions
//! - Signature verification (JWT, OIDC discovery) lives behind the
//!   verifier trait; this module only owns the HTTP side of the exchange

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerRef};
use crate::http::response::DefaultResponseBody;

/// Context key holding the verified [`Claims`].
pub const AUTH_KEY: &str = "auth_key";

/// Verified token claims.
pub type Claims = Map<String, Value>;

/// Pulls a raw token out of a request.
pub type TokenExtractor = Arc<dyn Fn(&Request<Body>) -> Result<String, AuthError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("token_required")]
    TokenRequired,

    #[error("invalid_request")]
    InvalidRequest,

    #[error("invalid_token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// Value for the `WWW-Authenticate` response header.
    pub fn challenge(&self) -> &'static str {
        match self {
            AuthError::TokenRequired => "Bearer realm=\"token_required\"",
            AuthError::InvalidRequest => "Bearer error=\"invalid_request\"",
            AuthError::InvalidToken(_) => "Bearer error=\"invalid_token\"",
        }
    }
}

/// Checks a raw token and returns its claims.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Claims, AuthError>>;
}

/// Verifier backed by a fixed token table. Useful for tests and internal
/// service-to-service keys.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Claims>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, claims: Claims) -> Self {
        self.tokens.insert(token.into(), claims);
        self
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Claims, AuthError>> {
        let result = self
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".to_string()));
        Box::pin(async move { result })
    }
}

/// Read `Authorization: <schema> <token>`; the schema compares
/// case-insensitively.
pub fn from_header(schema: impl Into<String>) -> TokenExtractor {
    let schema = schema.into().to_ascii_lowercase();
    Arc::new(move |request| {
        let value = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if value.is_empty() {
            return Err(AuthError::TokenRequired);
        }
        let fields: Vec<&str> = value.split_whitespace().collect();
        match fields.as_slice() {
            [scheme, token] if scheme.to_ascii_lowercase() == schema => Ok((*token).to_string()),
            _ => Err(AuthError::InvalidRequest),
        }
    })
}

/// Read the token from a query parameter.
pub fn from_parameter(name: impl Into<String>) -> TokenExtractor {
    let name = name.into();
    Arc::new(move |request| {
        let query = request.uri().query().unwrap_or_default();
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::TokenRequired)
    })
}

#[derive(Clone)]
pub struct AuthOptions {
    /// Required substring of the `iss` claim.
    pub issuer: Option<String>,
    /// Accepted audiences; empty skips the check.
    pub audiences: Vec<String>,
    /// Authenticate OPTIONS requests too (preflights pass through by default).
    pub enable_options: bool,
    /// Header schema used when no extractor is given.
    pub schema: String,
    pub extractor: Option<TokenExtractor>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            issuer: None,
            audiences: Vec::new(),
            enable_options: false,
            schema: "bearer".to_string(),
            extractor: None,
        }
    }
}

/// Bearer authentication middleware.
pub struct Auth {
    verifier: Arc<dyn TokenVerifier>,
    extractor: TokenExtractor,
    options: AuthOptions,
}

impl Auth {
    pub fn new(verifier: impl TokenVerifier, options: AuthOptions) -> Self {
        let extractor = options
            .extractor
            .clone()
            .unwrap_or_else(|| from_header(options.schema.clone()));
        Self {
            verifier: Arc::new(verifier),
            extractor,
            options,
        }
    }

    fn check_claims(&self, claims: &Claims) -> Result<(), AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        if let Some(exp) = claims.get("exp").and_then(Value::as_f64) {
            if now >= exp {
                return Err(AuthError::InvalidToken("token is expired".to_string()));
            }
        }
        if let Some(nbf) = claims.get("nbf").and_then(Value::as_f64) {
            if now < nbf {
                return Err(AuthError::InvalidToken("token is not valid yet".to_string()));
            }
        }

        if let Some(issuer) = &self.options.issuer {
            let iss = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
            if !iss.contains(issuer.as_str()) {
                return Err(AuthError::InvalidToken(format!("invalid issuer {iss:?}")));
            }
        }

        if !self.options.audiences.is_empty() {
            let audiences: Vec<&str> = match claims.get("aud") {
                Some(Value::String(aud)) => vec![aud.as_str()],
                Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            let accepted = self
                .options
                .audiences
                .iter()
                .any(|want| audiences.iter().any(|aud| aud.contains(want.as_str())));
            if !accepted {
                return Err(AuthError::InvalidToken("no accepted audience".to_string()));
            }
        }
        Ok(())
    }

    async fn authenticate(&self, token: Result<String, AuthError>) -> Result<Claims, AuthError> {
        let token = token?;
        let claims = self.verifier.verify(&token).await?;
        self.check_claims(&claims)?;
        Ok(claims)
    }
}

/// Install bearer authentication with `verifier`.
pub fn auth(verifier: impl TokenVerifier, options: AuthOptions) -> HandlerRef {
    Arc::new(Auth::new(verifier, options))
}

/// Claims stored by [`Auth`] on this request.
pub fn claims(ctx: &Context) -> Option<Arc<Claims>> {
    ctx.get_value::<Claims>(AUTH_KEY)
}

impl Handler for Auth {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !self.options.enable_options && *ctx.method() == Method::OPTIONS {
                ctx.next().await;
                return;
            }

            let token = (self.extractor)(ctx.request());
            match self.authenticate(token).await {
                Ok(claims) => {
                    ctx.set_value(AUTH_KEY, claims);
                    ctx.next().await;
                }
                Err(err) => {
                    tracing::debug!(parent: ctx.span(), error = %err, "Authentication failed");
                    ctx.set_header(
                        header::WWW_AUTHENTICATE,
                        HeaderValue::from_static(err.challenge()),
                    );
                    ctx.abort_with_message(
                        StatusCode::UNAUTHORIZED,
                        &DefaultResponseBody::new(StatusCode::UNAUTHORIZED, err.to_string()),
                    );
                }
            }
        })
    }

    fn name(&self) -> &str {
        "auth"
    }
}
