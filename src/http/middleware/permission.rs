//! Scope-based permission checks on top of [`auth`](super::auth).
//!
//! Reads the claims stored under [`AUTH_KEY`] and requires every listed
//! scope to appear in `claim`. The claim may be a space-separated string or
//! a (nested) array of strings. Missing claims or scopes abort with 403.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::http::context::Context;
use crate::http::handler::{Handler, HandlerRef};
use crate::http::middleware::auth::{Claims, AUTH_KEY};

/// Permission middleware.
#[derive(Debug, Clone)]
pub struct Permission {
    claim: String,
    required: Vec<String>,
}

impl Permission {
    pub fn new<I, S>(claim: impl Into<String>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            claim: claim.into(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    fn allows(&self, claims: &Claims) -> bool {
        let mut granted = HashSet::new();
        if let Some(value) = claims.get(&self.claim) {
            collect_scopes(value, &mut granted);
        }
        self.required.iter().all(|scope| granted.contains(scope.as_str()))
    }
}

/// Require every scope in `required` to be present in `claim`.
pub fn permission<I, S>(claim: impl Into<String>, required: I) -> HandlerRef
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(Permission::new(claim, required))
}

fn collect_scopes<'a>(value: &'a Value, out: &mut HashSet<&'a str>) {
    match value {
        Value::String(s) => out.extend(s.split_whitespace()),
        Value::Array(items) => items.iter().for_each(|item| collect_scopes(item, out)),
        _ => {}
    }
}

impl Handler for Permission {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let allowed = ctx
                .get_value::<Claims>(AUTH_KEY)
                .is_some_and(|claims| self.allows(&claims));
            if !allowed {
                ctx.set_header(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"insufficient_scope\""),
                );
                ctx.abort(StatusCode::FORBIDDEN);
                return;
            }
            ctx.next().await;
        })
    }

    fn name(&self) -> &str {
        "permission"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::named;
    use crate::http::middleware::auth::{auth, AuthOptions, StaticTokenVerifier};
    use crate::routing::Router;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        value.as_object().cloned().unwrap_or_default()
    }

    fn router(required: &[&str]) -> Router {
        let verifier = StaticTokenVerifier::new()
            .with_token("reader", claims(json!({"scope": "read:items profile"})))
            .with_token("admin", claims(json!({"scope": ["read:items", ["write:items"]]})));
        let mut router = Router::new();
        router.use_middleware([
            auth(verifier, AuthOptions::default()),
            permission("scope", required.iter().copied()),
        ]);
        router.get("/items", [named("items", |ctx| {
            Box::pin(async move { ctx.text(StatusCode::OK, "items") })
        })]);
        router
    }

    async fn status(router: &Router, token: &str) -> (StatusCode, Option<String>) {
        let req = Request::get("/items")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let res = router.dispatch(req).await;
        let challenge = res
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        (res.status(), challenge)
    }

    #[tokio::test]
    async fn test_space_separated_scope() {
        let router = router(&["read:items"]);
        assert_eq!(status(&router, "reader").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_nested_array_scope() {
        let router = router(&["read:items", "write:items"]);
        assert_eq!(status(&router, "admin").await.0, StatusCode::OK);

        let (code, challenge) = status(&router, "reader").await;
        assert_eq!(code, StatusCode::FORBIDDEN);
        assert_eq!(challenge.as_deref(), Some("Bearer error=\"insufficient_scope\""));
    }

    #[tokio::test]
    async fn test_missing_claims_forbidden() {
        let mut router = Router::new();
        router.use_middleware([permission("scope", ["read:items"])]);
        router.get("/items", [named("items", |ctx| {
            Box::pin(async move { ctx.text(StatusCode::OK, "items") })
        })]);
        let res = router
            .dispatch(Request::get("/items").body(Body::empty()).unwrap())
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }
}
