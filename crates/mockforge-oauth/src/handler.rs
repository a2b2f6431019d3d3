//! The combined OAuth/OIDC [`RouteHandler`]: serves the seven well-known
//! routes mounted under a mock's `issuer_path` prefix.
//!
//! Tokens are HS256-signed with the mock's configured `signing_secret`.
//! Because that secret is shared rather than a publishable keypair, the
//! JWKS endpoint answers with an empty key set.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mockforge_core::{Protocol, ProtocolDetail, RequestLogEntry, RequestLogger};
use serde_json::json;
use tracing::debug;

use mockforge_http::RouteHandler;

use crate::claims::Claims;

const MAX_BODY: usize = 64 * 1024;

/// Serves every request whose path begins with `issuer_path`.
pub struct OAuthHandler {
    issuer_path: String,
    signing_secret: String,
    token_ttl_secs: u64,
    logger: RequestLogger,
}

impl OAuthHandler {
    pub fn new(issuer_path: String, signing_secret: String, token_ttl_secs: u64, logger: RequestLogger) -> Self {
        Self { issuer_path, signing_secret, token_ttl_secs, logger }
    }

    fn issue_token(&self, subject: &str, scope: Option<String>) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims::new(&self.issuer_path, subject, self.token_ttl_secs).with_scope(scope);
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(self.signing_secret.as_bytes()))
    }

    fn verify_token(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.issuer_path.as_str()]);
        decode::<Claims>(token, &DecodingKey::from_secret(self.signing_secret.as_bytes()), &validation)
            .ok()
            .map(|data| data.claims)
    }
}

fn query_params(req: &Request<Body>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[async_trait]
impl RouteHandler for OAuthHandler {
    async fn handle(&self, req: Request<Body>) -> Response {
        let start = Instant::now();
        let full_path = req.uri().path().to_string();
        let suffix = full_path.strip_prefix(&self.issuer_path).unwrap_or(&full_path).to_string();
        let method = req.method().clone();
        let route = suffix.trim_end_matches('/').to_string();

        let resp = match (method.clone(), route.as_str()) {
            (Method::GET, "/.well-known/openid-configuration") => self.openid_configuration(),
            (Method::GET, "/.well-known/jwks.json") => self.jwks(),
            (Method::GET, "/authorize") => self.authorize(&req),
            (Method::POST, "/token") => self.token(req).await,
            (Method::GET, "/userinfo") => self.userinfo(&req),
            (Method::POST, "/revoke") => self.revoke(),
            (Method::POST, "/introspect") => self.introspect(req).await,
            _ => StatusCode::NOT_FOUND.into_response(),
        };

        let status = resp.status().as_u16();
        self.logger
            .log(RequestLogEntry {
                id: String::new(),
                timestamp: chrono::Utc::now(),
                protocol: Protocol::OAuth,
                method: method.to_string(),
                path: full_path,
                query: String::new(),
                headers: HashMap::new(),
                body: None,
                remote_addr: None,
                matched_mock_id: format!("{}:{}", self.issuer_path, route),
                status,
                duration_ms: start.elapsed().as_millis() as u64,
                detail: Some(ProtocolDetail::default()),
                near_misses: Vec::new(),
            })
            .await;

        resp
    }
}

impl OAuthHandler {
    fn openid_configuration(&self) -> Response {
        let issuer = &self.issuer_path;
        axum::Json(json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "userinfo_endpoint": format!("{issuer}/userinfo"),
            "revocation_endpoint": format!("{issuer}/revoke"),
            "introspection_endpoint": format!("{issuer}/introspect"),
            "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["HS256"],
        }))
        .into_response()
    }

    fn jwks(&self) -> Response {
        axum::Json(json!({ "keys": [] })).into_response()
    }

    fn authorize(&self, req: &Request<Body>) -> Response {
        let params = query_params(req);
        let Some(redirect_uri) = params.get("redirect_uri") else {
            return (StatusCode::BAD_REQUEST, "missing redirect_uri").into_response();
        };
        let code = uuid::Uuid::new_v4().to_string();
        let mut url = match url::Url::parse(redirect_uri) {
            Ok(u) => u,
            Err(_) => return (StatusCode::BAD_REQUEST, "invalid redirect_uri").into_response(),
        };
        url.query_pairs_mut().append_pair("code", &code);
        if let Some(state) = params.get("state") {
            url.query_pairs_mut().append_pair("state", state);
        }
        Redirect::to(url.as_str()).into_response()
    }

    async fn token(&self, req: Request<Body>) -> Response {
        let body = match to_bytes(req.into_body(), MAX_BODY).await {
            Ok(b) => b,
            Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
        };
        let form: HashMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();
        let grant_type = form.get("grant_type").map(String::as_str).unwrap_or("");
        debug!(grant_type, "oauth token request");

        let subject = form.get("username").cloned().unwrap_or_else(|| "mock-subject".to_string());
        let scope = form.get("scope").cloned();

        let access_token = match self.issue_token(&subject, scope.clone()) {
            Ok(t) => t,
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
        let id_token = if grant_type != "client_credentials" {
            self.issue_token(&subject, scope.clone()).ok()
        } else {
            None
        };

        axum::Json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": self.token_ttl_secs,
            "scope": scope,
            "id_token": id_token,
        }))
        .into_response()
    }

    fn userinfo(&self, req: &Request<Body>) -> Response {
        let Some(token) = bearer_token(req) else {
            return StatusCode::UNAUTHORIZED.into_response();
        };
        match self.verify_token(&token) {
            Some(claims) => axum::Json(json!({ "sub": claims.sub, "iss": claims.iss })).into_response(),
            None => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    fn revoke(&self) -> Response {
        StatusCode::OK.into_response()
    }

    async fn introspect(&self, req: Request<Body>) -> Response {
        let body = match to_bytes(req.into_body(), MAX_BODY).await {
            Ok(b) => b,
            Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
        };
        let form: HashMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();
        let Some(token) = form.get("token") else {
            return axum::Json(json!({ "active": false })).into_response();
        };
        match self.verify_token(token) {
            Some(claims) => axum::Json(json!({
                "active": true,
                "sub": claims.sub,
                "iss": claims.iss,
                "exp": claims.exp,
                "scope": claims.scope,
            }))
            .into_response(),
            None => axum::Json(json!({ "active": false })).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_and_verifies_a_token() {
        let handler = OAuthHandler::new("/oauth".to_string(), "test-secret".to_string(), 3600, RequestLogger::new(100));
        let token = handler.issue_token("alice", Some("openid".to_string())).unwrap();
        let claims = handler.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.scope.as_deref(), Some("openid"));
    }

    #[test]
    fn rejects_token_signed_with_a_different_secret() {
        let issuer = OAuthHandler::new("/oauth".to_string(), "secret-a".to_string(), 3600, RequestLogger::new(100));
        let other = OAuthHandler::new("/oauth".to_string(), "secret-b".to_string(), 3600, RequestLogger::new(100));
        let token = issuer.issue_token("alice", None).unwrap();
        assert!(other.verify_token(&token).is_none());
    }
}
