//! Request context: client address, cookie-carried session and API errors.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{HeaderMap, StatusCode, header::USER_AGENT, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use teller_core::{AuthError, Identity, RequestMeta, Session, SessionId, SessionState, StoreError};

use crate::cookies::{SESSION_COOKIE, parse_cookie};
use crate::server::GatewayState;

/// Address recorded when no client address is known.
pub const UNKNOWN_IP: &str = "0.0.0.0";

/// Resolve the client IP recorded in audit entries: `X-Forwarded-For` first
/// hop, then `X-Real-IP`, then the peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .map(String::from)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Authentication failure rendered as a JSON API response.
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        Self(error)
    }
}

#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "not_authenticated"),
            AuthError::CsrfRejected => (StatusCode::FORBIDDEN, "csrf_rejected"),
            AuthError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
            AuthError::DuplicateEmail => (StatusCode::CONFLICT, "duplicate_email"),
            AuthError::StoreUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let error = match &self.0 {
            AuthError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };

        (status, Json(ApiErrorResponse { error, code })).into_response()
    }
}

/// The caller's session, already run through the idle-expiry policy.
///
/// A live session is touched and saved during extraction. An expired or idle
/// anonymous one is destroyed and replaced with a fresh anonymous session.
#[derive(Debug)]
pub struct SessionContext {
    /// Session for this request.
    pub session: Session,
    /// Client IP and user agent.
    pub meta: RequestMeta,
    /// Id the client presented, if it named a stored session.
    pub cookie_id: Option<SessionId>,
}

impl SessionContext {
    /// Identity of the live session, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }
}

impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
    Arc<GatewayState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<GatewayState>::from_ref(state);

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let meta = RequestMeta::new(client_ip(&parts.headers, peer), user_agent);

        let presented = parse_cookie(&parts.headers, SESSION_COOKIE)
            .and_then(|raw| SessionId::parse(&raw));
        let loaded = match presented {
            Some(id) => match state.sessions.load(&id) {
                Ok(session) => session,
                Err(StoreError::Corrupt(e)) => {
                    tracing::warn!(error = %e, "Discarding unreadable session");
                    None
                }
                Err(e) => return Err(AuthError::from_store(e, "load session").into()),
            },
            None => None,
        };

        let Some(mut session) = loaded else {
            return Ok(Self {
                session: Session::anonymous(),
                meta,
                cookie_id: None,
            });
        };

        let cookie_id = Some(session.id().clone());
        match state.auth.sessions().resolve(&mut session) {
            SessionState::Expired => {
                state
                    .sessions
                    .remove(session.id())
                    .map_err(|e| AuthError::from_store(e, "remove session"))?;
                Ok(Self {
                    session: Session::anonymous(),
                    meta,
                    cookie_id,
                })
            }
            SessionState::Active => {
                state
                    .sessions
                    .save(&session)
                    .map_err(|e| AuthError::from_store(e, "save session"))?;
                Ok(Self {
                    session,
                    meta,
                    cookie_id,
                })
            }
            SessionState::Anonymous | SessionState::Destroyed => Ok(Self {
                session,
                meta,
                cookie_id,
            }),
        }
    }
}

/// Extractor that requires a live authenticated session.
#[derive(Debug)]
pub struct RequireAuth {
    /// Identity held by the session.
    pub identity: Identity,
    /// Full request context.
    pub context: SessionContext,
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
    Arc<GatewayState>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = SessionContext::from_request_parts(parts, state).await?;
        match context.identity().cloned() {
            Some(identity) => Ok(Self { identity, context }),
            None => Err(AuthError::NotAuthenticated.into()),
        }
    }
}
