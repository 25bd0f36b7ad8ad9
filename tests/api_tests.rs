use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use warden::config::Config;
use warden::db::Store;
use warden::state::{SharedState, build_notifier};

const PASSWORD: &str = "Sup3rSecret";

struct TestApp {
    router: Router,
    store: Store,
}

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestResponse {
    fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }

    /// `name=value` pairs from every Set-Cookie header, ready for a Cookie header.
    fn cookie_header(&self) -> String {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_url = "sqlite::memory:".to_string();
    config.server.secure_cookies = false;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.security.admin_emails = vec!["admin@example.com".to_string()];
    config.security.lockout.max_failed_attempts = 3;
    config.tokens.access_token_secret = "a".repeat(48);
    config.tokens.refresh_token_secret = "r".repeat(48);
    config
}

async fn spawn_app() -> TestApp {
    let config = test_config();
    let store = Store::new("sqlite::memory:")
        .await
        .expect("Failed to open database");
    let notifier = build_notifier(&config).expect("Failed to build notifier");
    let shared = SharedState::with_store(config, store.clone(), notifier)
        .expect("Failed to create shared state");

    let state = warden::api::create_app_state(Arc::new(shared), None);
    TestApp {
        router: warden::api::router(state),
        store,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn post_json(&self, uri: &str, body: Value, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn register(&self, username: &str, email: &str) -> TestResponse {
        self.post_json(
            "/api/auth/register",
            json!({ "username": username, "email": email, "password": PASSWORD }),
            None,
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.post_json(
            "/api/auth/login",
            json!({ "email": email, "password": password }),
            None,
        )
        .await
    }

    async fn verification_token(&self, email: &str) -> String {
        self.store
            .find_account_by_email(email)
            .await
            .unwrap()
            .unwrap()
            .email_verification_token
            .unwrap()
    }
}

#[tokio::test]
async fn test_register_login_refresh_logout_flow() {
    let app = spawn_app().await;

    let res = app.register("alice", "alice@example.com").await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.body["success"], true);
    assert_eq!(res.body["data"]["user"]["username"], "alice");
    assert_eq!(res.body["data"]["user"]["role"], "user");
    assert_eq!(res.body["data"]["user"]["isEmailVerified"], false);
    assert!(res.body["data"]["user"].get("passwordHash").is_none());

    let login = app.login("alice@example.com", PASSWORD).await;
    assert_eq!(login.status, StatusCode::OK);
    assert!(login.body["data"]["accessTokenExpiresAt"].is_string());
    assert!(login.body["data"]["refreshTokenExpiresAt"].is_string());
    assert!(login.body["data"]["user"]["lastLoginAt"].is_string());

    let set_cookies = login.set_cookies();
    assert_eq!(set_cookies.len(), 2);
    assert!(set_cookies.iter().all(|c| c.contains("HttpOnly")));
    assert!(set_cookies.iter().any(|c| c.starts_with("accessToken=")));
    assert!(set_cookies.iter().any(|c| c.starts_with("refreshToken=")));
    let cookies = login.cookie_header();

    let me = app.get("/api/auth/me", Some(&cookies)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["data"]["user"]["email"], "alice@example.com");

    let refreshed = app.post_json("/api/auth/refresh", json!({}), Some(&cookies)).await;
    assert_eq!(refreshed.status, StatusCode::OK);
    let new_cookies = refreshed.cookie_header();
    assert_ne!(new_cookies, cookies);

    // The rotated-out refresh token is dead
    let reused = app.post_json("/api/auth/refresh", json!({}), Some(&cookies)).await;
    assert_eq!(reused.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reused.code(), "TOKEN_REFRESH_FAILED");
    assert!(reused.set_cookies().iter().all(|c| c.contains("Max-Age=0")));

    let stale_access = app.get("/api/auth/me", Some(&cookies)).await;
    assert_eq!(stale_access.status, StatusCode::UNAUTHORIZED);

    let me = app.get("/api/auth/me", Some(&new_cookies)).await;
    assert_eq!(me.status, StatusCode::OK);

    let logout = app.post_json("/api/auth/logout", json!({}), Some(&new_cookies)).await;
    assert_eq!(logout.status, StatusCode::OK);
    let cleared = logout.set_cookies();
    assert_eq!(cleared.len(), 2);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));

    let after = app.get("/api/auth/me", Some(&new_cookies)).await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    assert_eq!(after.code(), "INVALID_ACCESS_TOKEN");

    let refresh_after = app
        .post_json("/api/auth/refresh", json!({}), Some(&new_cookies))
        .await;
    assert_eq!(refresh_after.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_bearer_header_and_body_refresh_token() {
    let app = spawn_app().await;
    app.register("bob", "bob@example.com").await;
    let login = app.login("bob@example.com", PASSWORD).await;

    let set_cookies = login.set_cookies();
    let token_value = |name: &str| {
        set_cookies
            .iter()
            .find_map(|c| c.strip_prefix(&format!("{name}=")))
            .and_then(|rest| rest.split(';').next())
            .unwrap()
            .to_string()
    };
    let access = token_value("accessToken");
    let refresh = token_value("refreshToken");

    let me = app
        .send(
            Request::builder()
                .uri("/api/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {access}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(me.status, StatusCode::OK);

    let refreshed = app
        .post_json("/api/auth/refresh", json!({ "refreshToken": refresh }), None)
        .await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert!(refreshed.body["data"]["accessTokenExpiresAt"].is_string());
}

#[tokio::test]
async fn test_missing_tokens() {
    let app = spawn_app().await;

    let me = app.get("/api/auth/me", None).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
    assert_eq!(me.code(), "ACCESS_TOKEN_REQUIRED");

    let refresh = app.post_json("/api/auth/refresh", json!({}), None).await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
    assert_eq!(refresh.code(), "REFRESH_TOKEN_REQUIRED");

    let garbage = app
        .get("/api/auth/me", Some("accessToken=not-a-token"))
        .await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbage.code(), "INVALID_ACCESS_TOKEN");
}

#[tokio::test]
async fn test_registration_validation_and_conflicts() {
    let app = spawn_app().await;

    let bad_email = app.register("carol", "not-an-email").await;
    assert_eq!(bad_email.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_email.code(), "VALIDATION_FAILED");

    let weak = app
        .post_json(
            "/api/auth/register",
            json!({ "username": "carol", "email": "carol@example.com", "password": "short" }),
            None,
        )
        .await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);

    assert_eq!(
        app.register("carol", "carol@example.com").await.status,
        StatusCode::CREATED
    );

    let same_email = app.register("carol2", "Carol@Example.com").await;
    assert_eq!(same_email.status, StatusCode::BAD_REQUEST);
    assert_eq!(same_email.code(), "EMAIL_TAKEN");

    let same_name = app.register("carol", "other@example.com").await;
    assert_eq!(same_name.status, StatusCode::BAD_REQUEST);
    assert_eq!(same_name.code(), "USERNAME_TAKEN");
}

#[tokio::test]
async fn test_login_failures_and_lockout() {
    let app = spawn_app().await;
    app.register("dave", "dave@example.com").await;

    let unknown = app.login("nobody@example.com", PASSWORD).await;
    let wrong = app.login("dave@example.com", "Wrong1234").await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.body, wrong.body);

    for _ in 0..2 {
        let res = app.login("dave@example.com", "Wrong1234").await;
        assert_eq!(res.code(), "INVALID_CREDENTIALS");
    }

    let locked = app.login("dave@example.com", PASSWORD).await;
    assert_eq!(locked.status, StatusCode::FORBIDDEN);
    assert_eq!(locked.code(), "ACCOUNT_LOCKED");
    assert!(locked.set_cookies().is_empty());
}

#[tokio::test]
async fn test_email_verification() {
    let app = spawn_app().await;
    app.register("erin", "erin@example.com").await;
    let cookies = app.login("erin@example.com", PASSWORD).await.cookie_header();

    let status = app.get("/api/auth/email-status", Some(&cookies)).await;
    assert_eq!(status.status, StatusCode::OK);
    assert_eq!(status.body["data"]["isEmailVerified"], false);

    let invalid = app.get("/api/auth/verify-email/deadbeef", None).await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.code(), "EMAIL_VERIFICATION_TOKEN_INVALID");

    let token = app.verification_token("erin@example.com").await;
    let verified = app
        .get(&format!("/api/auth/verify-email/{token}"), None)
        .await;
    assert_eq!(verified.status, StatusCode::OK);
    assert_eq!(verified.body["data"]["user"]["isEmailVerified"], true);

    let status = app.get("/api/auth/email-status", Some(&cookies)).await;
    assert_eq!(status.body["data"]["isEmailVerified"], true);

    let resend = app
        .post_json(
            "/api/auth/resend-verification",
            json!({ "email": "erin@example.com" }),
            None,
        )
        .await;
    assert_eq!(resend.status, StatusCode::BAD_REQUEST);
    assert_eq!(resend.code(), "EMAIL_ALREADY_VERIFIED");
}

#[tokio::test]
async fn test_resend_verification_replaces_token() {
    let app = spawn_app().await;
    app.register("fred", "fred@example.com").await;
    let first = app.verification_token("fred@example.com").await;

    let resend = app
        .post_json(
            "/api/auth/resend-verification",
            json!({ "email": "fred@example.com" }),
            None,
        )
        .await;
    assert_eq!(resend.status, StatusCode::OK);

    let second = app.verification_token("fred@example.com").await;
    assert_ne!(first, second);

    let old = app
        .get(&format!("/api/auth/verify-email/{first}"), None)
        .await;
    assert_eq!(old.code(), "EMAIL_VERIFICATION_TOKEN_INVALID");

    let unknown = app
        .post_json(
            "/api/auth/resend-verification",
            json!({ "email": "ghost@example.com" }),
            None,
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(unknown.code(), "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_admin_user_management() {
    let app = spawn_app().await;

    let admin = app.register("root", "admin@example.com").await;
    assert_eq!(admin.body["data"]["user"]["role"], "admin");
    let admin_id = admin.body["data"]["user"]["id"].as_i64().unwrap();

    let user = app.register("gina", "gina@example.com").await;
    let user_id = user.body["data"]["user"]["id"].as_i64().unwrap();

    let admin_cookies = app.login("admin@example.com", PASSWORD).await.cookie_header();
    let user_cookies = app.login("gina@example.com", PASSWORD).await.cookie_header();

    let forbidden = app.get("/api/users", Some(&user_cookies)).await;
    assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
    assert_eq!(forbidden.code(), "FORBIDDEN");

    let anonymous = app.get("/api/users", None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let all = app.get("/api/users", Some(&admin_cookies)).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.body["data"]["total"], 2);

    let users_only = app
        .get("/api/users?role=user&limit=1", Some(&admin_cookies))
        .await;
    assert_eq!(users_only.body["data"]["total"], 1);
    assert_eq!(users_only.body["data"]["limit"], 1);
    assert_eq!(users_only.body["data"]["accounts"][0]["username"], "gina");

    let bad_role = app.get("/api/users?role=owner", Some(&admin_cookies)).await;
    assert_eq!(bad_role.status, StatusCode::BAD_REQUEST);

    let self_demote = app
        .send(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/users/{admin_id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &admin_cookies)
                .body(Body::from(json!({ "isActive": false }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(self_demote.status, StatusCode::BAD_REQUEST);

    let deactivate = app
        .send(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/users/{user_id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &admin_cookies)
                .body(Body::from(json!({ "isActive": false }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(deactivate.status, StatusCode::OK);
    assert_eq!(deactivate.body["data"]["user"]["isActive"], false);

    let ended = app.get("/api/auth/me", Some(&user_cookies)).await;
    assert_eq!(ended.status, StatusCode::UNAUTHORIZED);

    let relogin = app.login("gina@example.com", PASSWORD).await;
    assert_eq!(relogin.status, StatusCode::FORBIDDEN);
    assert_eq!(relogin.code(), "ACCOUNT_DEACTIVATED");

    let missing = app
        .send(
            Request::builder()
                .method("PATCH")
                .uri("/api/users/9999")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, &admin_cookies)
                .body(Body::from(json!({ "role": "admin" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_security_headers() {
    let app = spawn_app().await;

    let res = app.get("/api/health", None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["data"]["status"], "ok");
    assert_eq!(res.body["data"]["database"], "ok");
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
    assert_eq!(res.headers["cache-control"], "no-store");

    let metrics = app.get("/metrics", None).await;
    assert_eq!(metrics.status, StatusCode::OK);
}
