//! Gateway server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use teller_core::{
    AuthError, AuthorizationGate, Authenticator, CsrfGuard, CredentialStore, Session, SessionId,
    SessionStore, SledCredentialStore, TellerConfig,
};

use crate::GatewayError;
use crate::context::ApiError;
use crate::cookies::{CookieJar, SESSION_COOKIE};
use crate::handlers;
use crate::middleware::{GatewayRateLimiter, rate_limit};
use crate::redirect::RedirectPolicy;
use crate::setup::seed_from_env;

/// New sessions created between sweeps of idle sessions.
const SESSION_PURGE_INTERVAL: u64 = 256;

/// Gateway server state shared across handlers.
pub struct GatewayState {
    /// Login, registration and logout.
    pub auth: Arc<Authenticator>,
    /// Credential store.
    pub store: Arc<dyn CredentialStore>,
    /// Session persistence.
    pub sessions: SessionStore,
    /// CSRF tokens.
    pub csrf: CsrfGuard,
    /// Role permissions.
    pub gate: AuthorizationGate,
    /// Redirect allow-list.
    pub redirects: RedirectPolicy,
    /// `Set-Cookie` builder.
    pub cookies: CookieJar,
    /// Per-client limiter for the auth endpoints.
    pub limiter: GatewayRateLimiter,
    /// Configuration in use.
    pub config: TellerConfig,
    created_sessions: AtomicU64,
}

impl GatewayState {
    /// Wire up state over an open store.
    ///
    /// # Errors
    ///
    /// Returns error if the session tree cannot be opened or the password
    /// cost is unusable.
    pub fn new(store: Arc<SledCredentialStore>, config: TellerConfig) -> Result<Self, GatewayError> {
        let sessions = SessionStore::open(store.db())
            .map_err(|e| GatewayError::Server(format!("Failed to open session store: {e}")))?;
        let dyn_store: Arc<dyn CredentialStore> = store;
        let auth = Authenticator::new(Arc::clone(&dyn_store), config.auth.clone())
            .map_err(|e| GatewayError::Config(format!("Auth init failed: {e}")))?;

        Ok(Self {
            auth: Arc::new(auth),
            store: dyn_store,
            sessions,
            csrf: CsrfGuard::new(config.auth.csrf_token_lifetime()),
            gate: AuthorizationGate::from_grants(&config.permissions),
            redirects: RedirectPolicy::new(
                config.gateway.front_controller.clone(),
                &config.gateway.allowed_redirects,
            ),
            cookies: CookieJar::new(
                config.gateway.secure_cookies,
                config.auth.session_lifetime(),
            ),
            limiter: GatewayRateLimiter::new(config.gateway.rate_limit_per_minute),
            config,
            created_sessions: AtomicU64::new(0),
        })
    }

    /// Persist a session at the end of a request and return any `Set-Cookie` values.
    ///
    /// A session whose id differs from the one the client presented replaces
    /// it. Destroyed sessions are removed and their cookie cleared. Every
    /// `SESSION_PURGE_INTERVAL` new sessions, idle ones are swept from storage.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the session cannot be written.
    pub fn commit(
        &self,
        presented: Option<&SessionId>,
        session: &Session,
    ) -> Result<Vec<String>, ApiError> {
        let stored = |result: Result<(), teller_core::StoreError>| {
            result.map_err(|e| ApiError(AuthError::from_store(e, "commit session")))
        };

        if let Some(old) = presented.filter(|old| *old != session.id()) {
            stored(self.sessions.remove(old))?;
        }

        if session.is_destroyed() {
            stored(self.sessions.remove(session.id()))?;
            return Ok(vec![self.cookies.clear(SESSION_COOKIE)]);
        }

        stored(self.sessions.save(session))?;
        if presented == Some(session.id()) {
            Ok(Vec::new())
        } else {
            self.session_created();
            Ok(vec![self.cookies.session(session.id().as_str())])
        }
    }

    fn session_created(&self) {
        let created = self.created_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        if created % SESSION_PURGE_INTERVAL == 0 {
            if let Err(e) = self.sessions.purge_expired(self.auth.sessions()) {
                tracing::warn!(error = %e, "Session purge failed");
            }
        }
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("auth", &self.auth)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let limited = Router::new()
        .route("/csrf", get(handlers::csrf_token))
        .route(
            "/api/auth/login",
            post(handlers::login).fallback(handlers::login_wrong_method),
        )
        .route(
            "/api/auth/register",
            post(handlers::register).fallback(handlers::register_wrong_method),
        )
        .route(
            "/api/auth/logout",
            get(handlers::logout).post(handlers::logout),
        )
        .layer(from_fn_with_state(Arc::clone(&state), rate_limit));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/flash", get(handlers::flash))
        .route("/api/me", get(handlers::me))
        .route("/api/permissions/{permission}", get(handlers::permission))
        .merge(limited)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Gateway server.
#[derive(Debug)]
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Open the store, seed from the environment and prepare state.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened or state cannot be built.
    pub fn new(config: TellerConfig) -> Result<Self, GatewayError> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| GatewayError::Config(format!("Failed to create data dir: {e}")))?;

        let store = Arc::new(
            SledCredentialStore::open(&data_dir, &config.store)
                .map_err(|e| GatewayError::Server(format!("Failed to open credential store: {e}")))?,
        );
        let state = GatewayState::new(store, config)?;

        if let Err(e) = seed_from_env(&state.auth, state.store.as_ref()) {
            tracing::warn!("Seeding from env failed: {}", e);
        }

        if let Err(e) = state.sessions.purge_expired(state.auth.sessions()) {
            tracing::warn!("Session purge failed: {}", e);
        }

        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    /// Run the gateway server until it fails.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the listener fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let settings = &self.state.config.gateway;
        let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let app = router(self.state());

        tracing::info!("Gateway listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| GatewayError::Server(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::extract::ConnectInfo;
    use axum::http::{
        Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    };
    use axum::response::Response;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use teller_core::types::NewAccount;
    use teller_core::{
        Account, AccountId, AuditAction, AuditRecord, AuthSettings, Identity, RegistrationForm,
        RememberTokenRecord, RequestMeta, Role, StoreError,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestGateway {
        _dir: TempDir,
        state: Arc<GatewayState>,
    }

    fn test_config() -> TellerConfig {
        TellerConfig {
            auth: AuthSettings::builder().password_cost(4).build(),
            ..TellerConfig::default()
        }
    }

    fn gateway_with(config: TellerConfig) -> TestGateway {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledCredentialStore::open_path(dir.path()).unwrap());
        let state = GatewayState::new(store, config).unwrap();
        TestGateway {
            _dir: dir,
            state: Arc::new(state),
        }
    }

    fn gateway() -> TestGateway {
        gateway_with(test_config())
    }

    fn provision(gw: &TestGateway, email: &str, password: &str, role: Role) -> AccountId {
        let form = RegistrationForm {
            name: "Jane Doe".to_string(),
            email: email.to_string(),
            phone: "5551234567".to_string(),
            password: SecretString::from(password.to_string()),
            confirm_password: SecretString::from(password.to_string()),
        };
        gw.state
            .auth
            .provision_account(&form, role, &RequestMeta::new("127.0.0.1", "test"))
            .unwrap()
    }

    async fn send(gw: &TestGateway, request: Request<Body>) -> Response {
        router(Arc::clone(&gw.state)).oneshot(request).await.unwrap()
    }

    fn get(path: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_form(path: &str, cookie: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, cookie)
            .body(Body::from(body))
            .unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    /// `teller_session=<id>` from a response that set a live session cookie.
    fn session_cookie(response: &Response) -> Option<String> {
        set_cookies(response)
            .into_iter()
            .filter_map(|c| c.split(';').next().map(str::to_string))
            .find(|pair| pair.starts_with("teller_session=") && pair.len() > "teller_session=".len())
    }

    fn location(response: &Response) -> &str {
        response.headers().get(LOCATION).unwrap().to_str().unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Fetch a CSRF token, returning it with the session cookie to send back.
    async fn csrf(gw: &TestGateway, cookie: Option<&str>) -> (String, String) {
        let response = send(gw, get("/csrf", cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response)
            .or_else(|| cookie.map(str::to_string))
            .unwrap();
        let body = json(response).await;
        (body["token"].as_str().unwrap().to_string(), cookie)
    }

    async fn pop_flash(gw: &TestGateway, cookie: &str) -> serde_json::Value {
        json(send(gw, get("/flash", Some(cookie))).await).await["flash"].clone()
    }

    /// Submit the login form, returning the response and the session cookie now in effect.
    async fn login(
        gw: &TestGateway,
        email: &str,
        password: &str,
        extra: &str,
    ) -> (Response, String) {
        let (token, cookie) = csrf(gw, None).await;
        let body = format!(
            "username={}&password={password}&csrf_token={token}{extra}",
            email.replace('@', "%40")
        );
        let response = send(gw, post_form("/api/auth/login", &cookie, body)).await;
        let cookie = session_cookie(&response).unwrap_or(cookie);
        (response, cookie)
    }

    #[tokio::test]
    async fn test_health() {
        let gw = gateway();
        let response = send(&gw, get("/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_rotates_session_and_redirects() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);

        let (token, anonymous) = csrf(&gw, None).await;
        let body = format!(
            "username=jane%40example.com&password=secret123&remember=on&redirect=transfer&csrf_token={token}"
        );
        let response = send(&gw, post_form("/api/auth/login", &anonymous, body)).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/index.php?page=transfer");
        let cookie = session_cookie(&response).unwrap();
        assert_ne!(cookie, anonymous);
        assert!(set_cookies(&response).iter().any(|c| c.starts_with("remember_token=")));

        let old_id = SessionId::parse(anonymous.trim_start_matches("teller_session=")).unwrap();
        assert!(gw.state.sessions.load(&old_id).unwrap().is_none());

        let flash = pop_flash(&gw, &cookie).await;
        assert_eq!(flash["type"], "success");
        assert_eq!(flash["message"], "Login successful. Welcome back!");
        assert!(pop_flash(&gw, &cookie).await.is_null());

        let me = send(&gw, get("/api/me", Some(&cookie))).await;
        assert_eq!(me.status(), StatusCode::OK);
        let me = json(me).await;
        assert_eq!(me["email"], "jane@example.com");
        assert_eq!(me["role"], "Customer");
        let permissions = me["permissions"].as_array().unwrap();
        assert!(permissions.iter().any(|p| p == "make_transfer"));
        assert!(!permissions.iter().any(|p| p == "manage_users"));
    }

    #[tokio::test]
    async fn test_permission_query() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);
        let (_, cookie) = login(&gw, "jane@example.com", "secret123", "").await;

        let granted = json(send(&gw, get("/api/permissions/make_transfer", Some(&cookie))).await).await;
        assert_eq!(granted["granted"], true);
        let denied = json(send(&gw, get("/api/permissions/manage_users", Some(&cookie))).await).await;
        assert_eq!(denied["granted"], false);

        let anonymous = send(&gw, get("/api/permissions/make_transfer", None)).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_password_redirects_back_to_login() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);

        let (response, cookie) = login(&gw, "jane@example.com", "wrongpass", "").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/index.php?page=login&error=invalid");

        let flash = pop_flash(&gw, &cookie).await;
        assert_eq!(flash["type"], "danger");
        assert_eq!(flash["message"], "Invalid username or password.");

        let me = send(&gw, get("/api/me", Some(&cookie))).await;
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_fields_message() {
        let gw = gateway();
        let (response, cookie) = login(&gw, "", "", "").await;
        assert_eq!(location(&response), "/index.php?page=login&error=invalid");
        assert_eq!(
            pop_flash(&gw, &cookie).await["message"],
            "Please enter both username and password."
        );
    }

    #[tokio::test]
    async fn test_login_requires_csrf_token_once() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);

        let (token, cookie) = csrf(&gw, None).await;
        let forged = "username=jane%40example.com&password=secret123&csrf_token=forged".to_string();
        let response = send(&gw, post_form("/api/auth/login", &cookie, forged)).await;
        assert_eq!(location(&response), "/index.php?page=login&error=csrf");

        // The failed check spent the issued token too.
        let replay = format!("username=jane%40example.com&password=secret123&csrf_token={token}");
        let response = send(&gw, post_form("/api/auth/login", &cookie, replay)).await;
        assert_eq!(location(&response), "/index.php?page=login&error=csrf");

        let logins = gw
            .state
            .store
            .recent_audit_records(50)
            .unwrap()
            .into_iter()
            .filter(|r| r.action == AuditAction::Login)
            .count();
        assert_eq!(logins, 0);
    }

    #[tokio::test]
    async fn test_open_redirect_falls_back_to_dashboard() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);
        let (response, _) = login(
            &gw,
            "jane@example.com",
            "secret123",
            "&redirect=https%3A%2F%2Fevil.example%2F",
        )
        .await;
        assert_eq!(location(&response), "/index.php?page=dashboard");
    }

    fn registration_body(name: &str, email: &str, password: &str, confirm: &str, token: &str) -> String {
        format!(
            "name={name}&email={}&phone=555-123-4567&password={password}&confirm_password={confirm}&csrf_token={token}",
            email.replace('@', "%40")
        )
    }

    #[tokio::test]
    async fn test_register_logs_in() {
        let gw = gateway();
        let (token, cookie) = csrf(&gw, None).await;
        let body = registration_body("Jane", "jane@example.com", "secret123", "secret123", &token);
        let response = send(&gw, post_form("/api/auth/register", &cookie, body)).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/index.php?page=dashboard");
        let cookie = session_cookie(&response).unwrap();
        assert_eq!(
            pop_flash(&gw, &cookie).await["message"],
            "Registration successful. Welcome to ATM Management System!"
        );

        let me = json(send(&gw, get("/api/me", Some(&cookie))).await).await;
        assert_eq!(me["role"], "Customer");
        assert_eq!(me["email"], "jane@example.com");
    }

    #[tokio::test]
    async fn test_register_reports_every_issue() {
        let gw = gateway();
        let (token, cookie) = csrf(&gw, None).await;
        let body = registration_body("", "jane@example.com", "secret123", "secret124", &token);
        let response = send(&gw, post_form("/api/auth/register", &cookie, body)).await;

        assert_eq!(location(&response), "/index.php?page=register&error=validation");
        assert_eq!(
            pop_flash(&gw, &cookie).await["message"],
            "Name is required. Passwords do not match."
        );
        assert_eq!(gw.state.store.account_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);

        let (token, cookie) = csrf(&gw, None).await;
        let body = registration_body("Jane", "JANE@example.com", "secret123", "secret123", &token);
        let response = send(&gw, post_form("/api/auth/register", &cookie, body)).await;

        assert_eq!(location(&response), "/index.php?page=register&error=duplicate");
        assert_eq!(gw.state.store.account_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);
        let (_, cookie) = login(&gw, "jane@example.com", "secret123", "&remember=on").await;

        let response = send(&gw, get("/api/auth/logout", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/index.php?page=login&message=logout");
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("remember_token=; Path=/; Max-Age=0"))
        );
        let fresh = session_cookie(&response).unwrap();
        assert_eq!(
            pop_flash(&gw, &fresh).await["message"],
            "You have been successfully logged out."
        );

        let me = send(&gw, get("/api/me", Some(&cookie))).await;
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);

        let again = send(&gw, get("/api/auth/logout", Some(&fresh))).await;
        assert_eq!(again.status(), StatusCode::SEE_OTHER);

        let logouts = gw
            .state
            .store
            .recent_audit_records(50)
            .unwrap()
            .into_iter()
            .filter(|r| r.action == AuditAction::Logout)
            .count();
        assert_eq!(logouts, 1);
    }

    #[tokio::test]
    async fn test_wrong_method_redirects_with_flash() {
        let gw = gateway();
        let response = send(&gw, get("/api/auth/login", None)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/index.php?page=login");

        let cookie = session_cookie(&response).unwrap();
        assert_eq!(pop_flash(&gw, &cookie).await["message"], "Invalid request method.");
    }

    #[tokio::test]
    async fn test_anonymous_me_is_unauthorized() {
        let gw = gateway();
        let response = send(&gw, get("/api/me", None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["code"], "not_authenticated");
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped() {
        let gw = gateway();
        let session = Session::authenticated(Identity {
            account_id: AccountId(1),
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            role: Role::Customer,
            authenticated_at: Utc::now() - chrono::Duration::hours(2),
        });
        gw.state.sessions.save(&session).unwrap();
        let cookie = format!("teller_session={}", session.id());

        let response = send(&gw, get("/api/me", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(gw.state.sessions.load(session.id()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_auth_routes() {
        let mut config = test_config();
        config.gateway.rate_limit_per_minute = 1;
        let gw = gateway_with(config);

        let first = send(&gw, get("/api/auth/login", None)).await;
        assert_eq!(first.status(), StatusCode::SEE_OTHER);
        let second = send(&gw, get("/api/auth/login", None)).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let health = send(&gw, get("/health", None)).await;
        assert_eq!(health.status(), StatusCode::OK);
    }

    fn from_peer(mut request: Request<Body>, peer: &str, forwarded_for: &str) -> Request<Body> {
        let peer: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        request
            .headers_mut()
            .insert("x-forwarded-for", forwarded_for.parse().unwrap());
        request
    }

    #[tokio::test]
    async fn test_forwarded_for_does_not_reset_rate_limit() {
        let mut config = test_config();
        config.gateway.rate_limit_per_minute = 1;
        let gw = gateway_with(config);

        let mut passed = 0;
        for i in 0..50 {
            let request = from_peer(
                get("/api/auth/login", None),
                "192.0.2.10:40000",
                &format!("198.51.100.{i}"),
            );
            if send(&gw, request).await.status() != StatusCode::TOO_MANY_REQUESTS {
                passed += 1;
            }
        }
        assert_eq!(passed, 1);
        assert_eq!(gw.state.limiter.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_trusted_proxy_headers_key_per_client() {
        let mut config = test_config();
        config.gateway.rate_limit_per_minute = 1;
        config.gateway.trust_proxy_headers = true;
        let gw = gateway_with(config);

        for client in ["198.51.100.1", "198.51.100.2"] {
            let request = from_peer(get("/api/auth/login", None), "10.0.0.1:443", client);
            assert_eq!(send(&gw, request).await.status(), StatusCode::SEE_OTHER);
        }
        let repeat = from_peer(get("/api/auth/login", None), "10.0.0.1:443", "198.51.100.1");
        assert_eq!(send(&gw, repeat).await.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_cookieless_csrf_requests_are_bounded() {
        let mut config = test_config();
        config.gateway.rate_limit_per_minute = 5;
        let gw = gateway_with(config);

        for _ in 0..50 {
            send(&gw, get("/csrf", None)).await;
        }
        assert_eq!(gw.state.sessions.len(), 5);
    }

    fn idle_anonymous() -> Session {
        let mut value = serde_json::to_value(Session::anonymous()).unwrap();
        value["last_activity"] = serde_json::json!(Utc::now() - chrono::Duration::hours(2));
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_new_sessions_sweep_idle_ones() {
        let gw = gateway();
        let idle = idle_anonymous();
        gw.state.sessions.save(&idle).unwrap();

        for _ in 1..SESSION_PURGE_INTERVAL {
            gw.state.commit(None, &Session::anonymous()).unwrap();
        }
        assert!(gw.state.sessions.load(idle.id()).unwrap().is_some());

        gw.state.commit(None, &Session::anonymous()).unwrap();
        assert!(gw.state.sessions.load(idle.id()).unwrap().is_none());
        assert_eq!(gw.state.sessions.len(), usize::try_from(SESSION_PURGE_INTERVAL).unwrap());
    }

    #[tokio::test]
    async fn test_idle_anonymous_session_is_replaced() {
        let gw = gateway();
        let idle = idle_anonymous();
        gw.state.sessions.save(&idle).unwrap();
        let cookie = format!("teller_session={}", idle.id());

        let response = send(&gw, get("/csrf", Some(&cookie))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let fresh = session_cookie(&response).unwrap();
        assert_ne!(fresh, cookie);
        assert!(gw.state.sessions.load(idle.id()).unwrap().is_none());
        assert_eq!(gw.state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_logout_post_needs_no_csrf_token() {
        let gw = gateway();
        provision(&gw, "jane@example.com", "secret123", Role::Customer);
        let (_, cookie) = login(&gw, "jane@example.com", "secret123", "").await;

        let response = send(&gw, post_form("/api/auth/logout", &cookie, String::new())).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/index.php?page=login&message=logout");
        let me = send(&gw, get("/api/me", Some(&cookie))).await;
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }

    /// Real store that cannot record logins.
    struct LoginUnrecorded(Arc<SledCredentialStore>);

    impl CredentialStore for LoginUnrecorded {
        fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
            self.0.find_account_by_email(email)
        }

        fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
            self.0.get_account(id)
        }

        fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
            self.0.list_accounts()
        }

        fn account_count(&self) -> Result<usize, StoreError> {
            self.0.account_count()
        }

        fn record_login(&self, _id: AccountId, _at: DateTime<Utc>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("write timed out".to_string()))
        }

        fn insert_account(
            &self,
            account: &NewAccount,
            audit: &AuditRecord,
        ) -> Result<AccountId, StoreError> {
            self.0.insert_account(account, audit)
        }

        fn update_account(&self, account: &Account) -> Result<(), StoreError> {
            self.0.update_account(account)
        }

        fn insert_remember_token(&self, record: &RememberTokenRecord) -> Result<(), StoreError> {
            self.0.insert_remember_token(record)
        }

        fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
            self.0.insert_audit_record(record)
        }

        fn recent_audit_records(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
            self.0.recent_audit_records(limit)
        }
    }

    #[tokio::test]
    async fn test_register_sends_to_login_when_session_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledCredentialStore::open_path(dir.path()).unwrap());
        let config = test_config();
        let mut state = GatewayState::new(Arc::clone(&store), config.clone()).unwrap();
        state.auth = Arc::new(
            Authenticator::new(Arc::new(LoginUnrecorded(Arc::clone(&store))), config.auth).unwrap(),
        );
        let gw = TestGateway {
            _dir: dir,
            state: Arc::new(state),
        };

        let (token, cookie) = csrf(&gw, None).await;
        let body = registration_body("Jane", "jane@example.com", "secret123", "secret123", &token);
        let response = send(&gw, post_form("/api/auth/register", &cookie, body)).await;

        assert_eq!(location(&response), "/index.php?page=login&message=registered");
        assert_eq!(
            pop_flash(&gw, &cookie).await["message"],
            "Registration successful. Please log in."
        );
        assert_eq!(store.account_count().unwrap(), 1);
        let me = send(&gw, get("/api/me", Some(&cookie))).await;
        assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    }
}
