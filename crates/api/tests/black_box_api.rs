use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use ctms_infra::{AuthConfig, AuthService};
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AuthConfig {
            pbkdf2_iterations: 1_000,
            ..AuthConfig::default()
        };
        let auth = Arc::new(AuthService::in_memory(config).expect("failed to build auth service"));
        auth.bootstrap_admin(Utc::now())
            .await
            .expect("failed to bootstrap admin");

        // Same router as prod, bound to an ephemeral port.
        let app = ctms_api::app::build_app(auth);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn login(&self, client: &reqwest::Client, username: &str, password: &str) -> reqwest::Response {
        client
            .post(self.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap()
    }

    async fn token(&self, client: &reqwest::Client, username: &str, password: &str) -> String {
        let res = self.login(client, username, password).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        body["session_token"].as_str().unwrap().to_string()
    }

    async fn create_user(
        &self,
        client: &reqwest::Client,
        admin_token: &str,
        username: &str,
        password: &str,
        role: &str,
    ) -> Value {
        let res = client
            .post(self.url("/admin/users"))
            .bearer_auth(admin_token)
            .json(&json!({
                "username": username,
                "email": format!("{username}@church.local"),
                "password": password,
                "role": role,
                "full_name": format!("{username} Example"),
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/auth/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_token");

    let res = client
        .get(srv.url("/auth/whoami"))
        .bearer_auth("not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_then_whoami_returns_the_bootstrap_admin() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = srv.login(&client, "admin", "admin123").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user"]["role"], "admin");
    let token = body["session_token"].as_str().unwrap().to_string();

    let res = client
        .get(srv.url("/auth/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let me: Value = res.json().await.unwrap();
    assert_eq!(me["username"], "admin");
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn bad_credentials_are_generic_and_lockout_returns_423() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = srv.login(&client, "ghost", "whatever").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let unknown: Value = res.json().await.unwrap();

    for _ in 0..5 {
        let res = srv.login(&client, "admin", "wrong").await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body, unknown);
    }

    let res = srv.login(&client, "admin", "admin123").await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "account_locked");
    assert!(body["message"].as_str().unwrap().contains("Try again after"));
}

#[tokio::test]
async fn viewer_is_denied_user_creation_with_required_role() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;

    let res = client
        .get(srv.url("/authorize?resource=users&action=create"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    srv.create_user(&client, &admin, "victor", "viewer-pass", "viewer").await;
    let viewer = srv.token(&client, "victor", "viewer-pass").await;

    let res = client
        .get(srv.url("/authorize?resource=users&action=create"))
        .bearer_auth(&viewer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "permission_denied");
    assert!(body["message"].as_str().unwrap().contains("requires role: admin"));

    let res = client
        .get(srv.url("/admin/users"))
        .bearer_auth(&viewer)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn duplicate_and_invalid_user_input_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;

    srv.create_user(&client, &admin, "martha", "martha-pass", "member").await;

    let res = client
        .post(srv.url("/admin/users"))
        .bearer_auth(&admin)
        .json(&json!({
            "username": "Martha",
            "email": "other@church.local",
            "password": "martha-pass",
            "role": "member",
            "full_name": "Martha Again",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(srv.url("/admin/users"))
        .bearer_auth(&admin)
        .json(&json!({
            "username": "pat",
            "email": "pat@church.local",
            "password": "pat-pass",
            "role": "bishop",
            "full_name": "Pat",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .put(srv.url("/admin/users/not-a-uuid/role"))
        .bearer_auth(&admin)
        .json(&json!({ "role": "treasurer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn change_password_keeps_current_session_only() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;
    srv.create_user(&client, &admin, "gina", "old-password", "secretary").await;

    let laptop = srv.token(&client, "gina", "old-password").await;
    let phone = srv.token(&client, "gina", "old-password").await;

    let res = client
        .post(srv.url("/auth/password"))
        .bearer_auth(&laptop)
        .json(&json!({ "old_password": "old-password", "new_password": "new-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url("/auth/whoami")).bearer_auth(&laptop).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.get(srv.url("/auth/whoami")).bearer_auth(&phone).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/auth/sessions")).bearer_auth(&laptop).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = srv.token(&client, "admin", "admin123").await;

    let res = client.post(srv.url("/auth/logout")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = client.post(srv.url("/auth/logout")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url("/auth/whoami")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_reset_and_deactivate_flow() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;
    let hank = srv.create_user(&client, &admin, "hank", "hank-pass", "member").await;
    let hank_id = hank["id"].as_str().unwrap().to_string();

    let res = client
        .post(srv.url(&format!("/admin/users/{hank_id}/reset-password")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let temporary = body["temporary_password"].as_str().unwrap().to_string();
    srv.token(&client, "hank", &temporary).await;

    let res = client
        .put(srv.url(&format!("/admin/users/{hank_id}/active")))
        .bearer_auth(&admin)
        .json(&json!({ "active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["is_active"], false);

    let res = srv.login(&client, "hank", &temporary).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn audit_log_and_events_round_trip() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;

    let res = client
        .post(srv.url("/events"))
        .bearer_auth(&admin)
        .json(&json!({
            "action": "member_added",
            "resource": "members",
            "resource_id": "17",
            "details": "Added member Jane Doe",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .get(srv.url("/admin/audit?action=MEMBER_ADDED"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["resource"], "members");
    assert_eq!(records[0]["ip_address"], "127.0.0.1");

    let res = client
        .get(srv.url("/admin/audit?limit=1"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["records"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn security_actions_cannot_be_recorded_as_events() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;
    srv.create_user(&client, &admin, "vera", "vera-pass", "viewer").await;
    let viewer = srv.token(&client, "vera", "vera-pass").await;

    let res = client
        .post(srv.url("/events"))
        .bearer_auth(&viewer)
        .json(&json!({
            "action": "ACCESS_GRANTED",
            "details": "Role 'admin' granted 'users.delete'",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/events"))
        .bearer_auth(&viewer)
        .json(&json!({ "action": "PAGE_ACCESS", "resource": "dashboard" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn admin_edits_profile_and_duplicate_email_conflicts() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;
    let ruth = srv.create_user(&client, &admin, "ruth", "ruth-pass", "member").await;
    srv.create_user(&client, &admin, "naomi", "naomi-pass", "member").await;
    let ruth_id = ruth["id"].as_str().unwrap().to_string();

    let res = client
        .put(srv.url(&format!("/admin/users/{ruth_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "email": "Ruth.Moab@Church.local", "full_name": "Ruth of Moab" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["email"], "ruth.moab@church.local");
    assert_eq!(body["full_name"], "Ruth of Moab");

    let res = client
        .put(srv.url(&format!("/admin/users/{ruth_id}")))
        .bearer_auth(&admin)
        .json(&json!({ "email": "NAOMI@church.local" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .get(srv.url("/admin/audit?action=USER_UPDATED"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["records"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rbac_inspection_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = srv.token(&client, "admin", "admin123").await;

    let res = client
        .get(srv.url("/admin/rbac/roles"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["roles"].as_array().unwrap().len(), 5);

    let res = client
        .get(srv.url("/admin/rbac/explain?role=secretary&resource=transactions&action=delete"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["granted"], false);
    assert_eq!(body["required_permission"], "transactions.delete");
}
