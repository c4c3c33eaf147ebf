//! HTTP handlers.
//!
//! The form endpoints answer with `303 See Other` plus a flash message held in
//! the session, never with an error body.
//!
//! Login and registration consume a CSRF token. Logout does not: it only ends
//! the caller's own session, and the session cookie is `SameSite=Strict`.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Path, State},
    http::{HeaderValue, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use teller_core::{
    AuthError, Credentials, Flash, Identity, LoginSuccess, Registration, RegistrationForm,
    Session,
};

use crate::context::{ApiError, RequireAuth, SessionContext};
use crate::cookies::REMEMBER_COOKIE;
use crate::redirect::DEFAULT_PAGE;
use crate::server::GatewayState;

const LOGIN_PAGE: &str = "login";
const REGISTER_PAGE: &str = "register";

const LOGIN_SUCCESS: &str = "Login successful. Welcome back!";
const LOGIN_INVALID: &str = "Invalid username or password.";
const LOGIN_FAILED: &str = "Login failed. Please try again later.";
const REGISTER_SUCCESS: &str = "Registration successful. Welcome to ATM Management System!";
const REGISTER_LOGIN_PENDING: &str = "Registration successful. Please log in.";
const REGISTER_FAILED: &str = "Registration failed. Please try again.";
const REGISTER_DUPLICATE: &str = "An account with this email already exists.";
const LOGOUT_SUCCESS: &str = "You have been successfully logged out.";
const INVALID_METHOD: &str = "Invalid request method.";
const CSRF_FAILED: &str = "Invalid or expired form. Please try again.";

/// Login form fields.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LoginForm {
    username: Option<String>,
    password: Option<String>,
    remember: Option<String>,
    redirect: Option<String>,
    csrf_token: Option<String>,
}

/// Registration form fields.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RegisterForm {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    password: Option<String>,
    confirm_password: Option<String>,
    csrf_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CsrfResponse {
    token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FlashResponse {
    flash: Option<Flash>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MeResponse {
    #[serde(flatten)]
    identity: Identity,
    permissions: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PermissionResponse {
    permission: String,
    granted: bool,
}

/// Checkbox values browsers and clients send for "checked".
fn is_checked(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("on" | "1" | "true" | "yes"))
}

fn with_cookies(mut response: Response, cookies: Vec<String>) -> Response {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::error!(error = %e, "Dropping unencodable cookie"),
        }
    }
    response
}

/// Queue a flash on the session, persist it and redirect.
fn flash_redirect(
    state: &GatewayState,
    context: &mut SessionContext,
    flash: Flash,
    location: &str,
) -> Result<Response, ApiError> {
    context.session.set_flash(flash);
    let cookies = state.commit(context.cookie_id.as_ref(), &context.session)?;
    Ok(with_cookies(Redirect::to(location).into_response(), cookies))
}

/// Run blocking password work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AuthError::Internal(format!("password task failed: {e}")))?
}

/// Persist a freshly authenticated session in place of the caller's old one.
fn establish(
    state: &GatewayState,
    context: &SessionContext,
    success: LoginSuccess,
    flash: Flash,
    location: &str,
) -> Result<Response, ApiError> {
    let LoginSuccess {
        mut session,
        remember,
    } = success;
    session.set_flash(flash);

    let mut cookies = state.commit(context.cookie_id.as_ref(), &session)?;
    if let Some(token) = remember {
        cookies.push(
            state
                .cookies
                .remember(&token.cookie_value(), state.auth.settings().remember_lifetime()),
        );
    }
    Ok(with_cookies(Redirect::to(location).into_response(), cookies))
}

/// Liveness check.
pub(crate) async fn health() -> &'static str {
    "OK"
}

/// Issue the session's anti-forgery token.
pub(crate) async fn csrf_token(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
) -> Result<Response, ApiError> {
    let token = state.csrf.issue_token(&mut context.session);
    let cookies = state.commit(context.cookie_id.as_ref(), &context.session)?;
    Ok(with_cookies(
        Json(CsrfResponse { token }).into_response(),
        cookies,
    ))
}

/// Pop the pending flash message.
pub(crate) async fn flash(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
) -> Result<Response, ApiError> {
    let flash = context.session.take_flash();
    let cookies = if flash.is_some() {
        state.commit(context.cookie_id.as_ref(), &context.session)?
    } else {
        Vec::new()
    };
    Ok(with_cookies(
        Json(FlashResponse { flash }).into_response(),
        cookies,
    ))
}

/// `POST` login form.
pub(crate) async fn login(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    let supplied = form.csrf_token.as_deref().unwrap_or_default();
    if state.csrf.consume(&mut context.session, supplied).is_err() {
        let location = state.redirects.page_with(LOGIN_PAGE, "error", "csrf");
        return flash_redirect(&state, &mut context, Flash::danger(CSRF_FAILED), &location);
    }

    let credentials = Credentials::new(
        form.username.unwrap_or_default(),
        form.password.unwrap_or_default(),
    )
    .remember(is_checked(form.remember.as_deref()));
    let target = state.redirects.resolve(form.redirect.as_deref());

    let auth = Arc::clone(&state.auth);
    let meta = context.meta.clone();
    let result = blocking(move || auth.login(&credentials, &meta)).await;

    match result {
        Ok(success) => {
            let location = state.redirects.page(&target);
            establish(&state, &context, success, Flash::success(LOGIN_SUCCESS), &location)
        }
        Err(AuthError::Validation(issues)) => {
            let message = teller_core::validation::join_issues(&issues);
            let location = state.redirects.page_with(LOGIN_PAGE, "error", "invalid");
            flash_redirect(&state, &mut context, Flash::danger(message), &location)
        }
        Err(AuthError::InvalidCredentials) => {
            let location = state.redirects.page_with(LOGIN_PAGE, "error", "invalid");
            flash_redirect(&state, &mut context, Flash::danger(LOGIN_INVALID), &location)
        }
        Err(e) => {
            tracing::error!(error = %e, "Login could not be completed");
            let location = state.redirects.page_with(LOGIN_PAGE, "error", "failed");
            flash_redirect(&state, &mut context, Flash::danger(LOGIN_FAILED), &location)
        }
    }
}

/// `POST` registration form. A new account is logged in straight away.
pub(crate) async fn register(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
    Form(form): Form<RegisterForm>,
) -> Result<Response, ApiError> {
    let supplied = form.csrf_token.as_deref().unwrap_or_default();
    if state.csrf.consume(&mut context.session, supplied).is_err() {
        let location = state.redirects.page_with(REGISTER_PAGE, "error", "csrf");
        return flash_redirect(&state, &mut context, Flash::danger(CSRF_FAILED), &location);
    }

    let registration = RegistrationForm {
        name: form.name.unwrap_or_default(),
        email: form.email.unwrap_or_default(),
        phone: form.phone.unwrap_or_default(),
        password: SecretString::from(form.password.unwrap_or_default()),
        confirm_password: SecretString::from(form.confirm_password.unwrap_or_default()),
    };

    let auth = Arc::clone(&state.auth);
    let meta = context.meta.clone();
    let result = blocking(move || auth.register_and_login(&registration, &meta)).await;

    let (flash, error) = match result {
        Ok(Registration::LoggedIn(success)) => {
            let location = state.redirects.page(DEFAULT_PAGE);
            return establish(
                &state,
                &context,
                success,
                Flash::success(REGISTER_SUCCESS),
                &location,
            );
        }
        Ok(Registration::LoginPending(_)) => {
            let location = state.redirects.page_with(LOGIN_PAGE, "message", "registered");
            return flash_redirect(
                &state,
                &mut context,
                Flash::success(REGISTER_LOGIN_PENDING),
                &location,
            );
        }
        Err(AuthError::Validation(issues)) => (
            Flash::danger(teller_core::validation::join_issues(&issues)),
            "validation",
        ),
        Err(AuthError::DuplicateEmail) => (Flash::danger(REGISTER_DUPLICATE), "duplicate"),
        Err(e) => {
            tracing::error!(error = %e, "Registration could not be completed");
            (Flash::danger(REGISTER_FAILED), "failed")
        }
    };

    let location = state.redirects.page_with(REGISTER_PAGE, "error", error);
    flash_redirect(&state, &mut context, flash, &location)
}

/// Log out. Accepts `GET` and `POST`, and is safe to repeat.
pub(crate) async fn logout(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
) -> Result<Response, ApiError> {
    state.auth.logout(&mut context.session, &context.meta);

    // The flash rides on a fresh anonymous session.
    let mut fresh = Session::anonymous();
    fresh.set_flash(Flash::success(LOGOUT_SUCCESS));
    let mut cookies = state.commit(context.cookie_id.as_ref(), &fresh)?;
    cookies.push(state.cookies.clear(REMEMBER_COOKIE));

    let location = state.redirects.page_with(LOGIN_PAGE, "message", "logout");
    Ok(with_cookies(Redirect::to(&location).into_response(), cookies))
}

/// Any method other than `POST` on the login endpoint.
pub(crate) async fn login_wrong_method(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
) -> Result<Response, ApiError> {
    let location = state.redirects.page(LOGIN_PAGE);
    flash_redirect(&state, &mut context, Flash::danger(INVALID_METHOD), &location)
}

/// Any method other than `POST` on the registration endpoint.
pub(crate) async fn register_wrong_method(
    State(state): State<Arc<GatewayState>>,
    mut context: SessionContext,
) -> Result<Response, ApiError> {
    let location = state.redirects.page(REGISTER_PAGE);
    flash_redirect(&state, &mut context, Flash::danger(INVALID_METHOD), &location)
}

/// Identity of the current session with its effective permissions.
pub(crate) async fn me(State(state): State<Arc<GatewayState>>, auth: RequireAuth) -> Json<MeResponse> {
    let permissions = state.gate.permissions_for(auth.identity.role);
    Json(MeResponse {
        identity: auth.identity,
        permissions,
    })
}

/// Whether the current session holds a permission.
pub(crate) async fn permission(
    State(state): State<Arc<GatewayState>>,
    Path(permission): Path<String>,
    auth: RequireAuth,
) -> Json<PermissionResponse> {
    let granted = state.gate.has_permission(&auth.identity, &permission);
    if !granted {
        tracing::debug!(account_id = %auth.identity.account_id, %permission, "Permission not held");
    }
    Json(PermissionResponse {
        permission,
        granted,
    })
}
