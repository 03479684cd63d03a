use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

use verser_db::models::NewUser;
use verser_db::{MemoryStore, SharedStorage};
use verser_gateway::{Outbound, Relay};
use verser_types::api::Claims;
use verser_types::models::Role;

const SECRET: &str = "rest-flow-test-secret";

struct TestApp {
    router: Router,
    storage: SharedStorage,
    relay: Relay,
}

impl TestApp {
    fn new() -> Self {
        let storage: SharedStorage = std::sync::Arc::new(MemoryStore::new());
        let state = verser_server::app_state(storage.clone(), SECRET.to_string());
        Self {
            relay: state.relay.clone(),
            router: verser_server::router(state),
            storage,
        }
    }

    /// Insert a user directly, skipping the password hash cost.
    fn seed_user(&self, username: &str) -> (i64, String) {
        let record = self
            .storage
            .create_user(NewUser {
                username: username.to_string(),
                email: None,
                password: "$argon2id$unused".into(),
                display_name: username.to_string(),
                avatar: None,
            })
            .unwrap();
        (record.id, token(record.id, username))
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

        let resp = self
            .router
            .clone()
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

fn token(user_id: i64, username: &str) -> String {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

#[tokio::test]
async fn creator_is_admin_and_members_cannot_self_promote() {
    let app = TestApp::new();
    let (creator, creator_token) = app.seed_user("creator");
    let (joiner, joiner_token) = app.seed_user("joiner");

    let (status, community) = app
        .call(
            Method::POST,
            "/api/communities",
            Some(&creator_token),
            Some(json!({"name": "Rustaceans", "description": "crabs"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let cid = community["id"].as_i64().unwrap();
    assert_eq!(community["creatorId"], creator);
    assert_eq!(app.storage.get_role(creator, cid).unwrap(), Some(Role::Admin));

    let (status, membership) = app
        .call(
            Method::POST,
            &format!("/api/communities/{cid}/join"),
            Some(&joiner_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(membership["role"], "member");
    assert_eq!(app.storage.get_role(joiner, cid).unwrap(), Some(Role::Member));

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/api/communities/{cid}/join"),
            Some(&joiner_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/communities/{cid}/members/{joiner}/role"),
            Some(&joiner_token),
            Some(json!({"role": "admin"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.storage.get_role(joiner, cid).unwrap(), Some(Role::Member));

    let (status, members) = app
        .call(
            Method::GET,
            &format!("/api/communities/{cid}/members"),
            Some(&joiner_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let members = members.as_array().unwrap();
    assert_eq!(members.len(), 2);
    for member in members {
        assert!(member.get("password").is_none());
        let expected = if member["id"] == creator { "admin" } else { "member" };
        assert_eq!(member["role"], expected);
    }
}

#[tokio::test]
async fn moderation_follows_role_hierarchy() {
    let app = TestApp::new();
    let (admin, admin_token) = app.seed_user("admin");
    let (mod_id, mod_token) = app.seed_user("moddy");
    let (member, member_token) = app.seed_user("member");

    let (_, community) = app
        .call(
            Method::POST,
            "/api/communities",
            Some(&admin_token),
            Some(json!({"name": "Moderated"})),
        )
        .await;
    let cid = community["id"].as_i64().unwrap();
    for token in [&mod_token, &member_token] {
        let (status, _) = app
            .call(Method::POST, &format!("/api/communities/{cid}/join"), Some(token), None)
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, updated) = app
        .call(
            Method::PUT,
            &format!("/api/communities/{cid}/members/{mod_id}/role"),
            Some(&admin_token),
            Some(json!({"role": "maintainer"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["role"], "maintainer");

    // Maintainers cannot mint admins or touch the admin
    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/api/communities/{cid}/members/{member}/role"),
            Some(&mod_token),
            Some(json!({"role": "admin"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/communities/{cid}/members/{admin}"),
            Some(&mod_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call(Method::DELETE, &format!("/api/communities/{cid}"), Some(&mod_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // ...but can remove a plain member
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/api/communities/{cid}/members/{member}"),
            Some(&mod_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.storage.is_member(member, cid).unwrap());

    let (status, _) = app
        .call(Method::DELETE, &format!("/api/communities/{cid}"), Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .call(Method::GET, &format!("/api/communities/{cid}"), Some(&admin_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!app.storage.is_member(mod_id, cid).unwrap());
}

#[tokio::test]
async fn leave_and_join_edge_cases() {
    let app = TestApp::new();
    let (_, owner_token) = app.seed_user("owner");
    let (user, user_token) = app.seed_user("visitor");

    let (status, _) = app
        .call(Method::POST, "/api/communities/999/join", Some(&user_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, community) = app
        .call(
            Method::POST,
            "/api/communities",
            Some(&owner_token),
            Some(json!({"name": "Quiet"})),
        )
        .await;
    let cid = community["id"].as_i64().unwrap();

    let (status, _) = app
        .call(Method::POST, &format!("/api/communities/{cid}/leave"), Some(&user_token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.call(Method::POST, &format!("/api/communities/{cid}/join"), Some(&user_token), None)
        .await;
    let (status, communities) = app
        .call(Method::GET, &format!("/api/users/{user}/communities"), Some(&user_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(communities.as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(Method::POST, &format!("/api/communities/{cid}/leave"), Some(&user_token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!app.storage.is_member(user, cid).unwrap());

    let (status, _) = app
        .call(
            Method::POST,
            "/api/communities",
            Some(&owner_token),
            Some(json!({"name": "   "})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = TestApp::new();

    let (status, body) = app.call(Method::GET, "/api/communities", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app
        .call(Method::GET, "/api/communities", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_hides_the_password() {
    let app = TestApp::new();
    let body = json!({"username": "newbie", "password": "correct horse", "displayName": "New Bie"});

    let (status, user) = app
        .call(Method::POST, "/api/users", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["username"], "newbie");
    assert_eq!(user["displayName"], "New Bie");
    assert_eq!(user["status"], "offline");
    assert!(user.get("password").is_none());

    let stored = app.storage.get_user_by_username("newbie").unwrap().unwrap();
    assert!(stored.password.starts_with("$argon2"));

    let (status, _) = app.call(Method::POST, "/api/users", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/users",
            None,
            Some(json!({"username": "shorty", "password": "123"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rest_messages_are_persisted_and_paged() {
    let app = TestApp::new();
    let (user, user_token) = app.seed_user("talker");

    for content in ["one", "two", "three"] {
        let (status, msg) = app
            .call(
                Method::POST,
                "/api/conversations/5/messages",
                Some(&user_token),
                Some(json!({"content": content})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(msg["userId"], user);
        assert_eq!(msg["type"], "text");
    }

    let (status, page) = app
        .call(
            Method::GET,
            "/api/conversations/5/messages?limit=2",
            Some(&user_token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> = page
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, ["two", "three"]);

    let (status, _) = app
        .call(
            Method::POST,
            "/api/conversations/5/messages",
            Some(&user_token),
            Some(json!({"content": "  "})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rest_message_is_relayed_to_open_sockets() {
    let app = TestApp::new();
    let (user, user_token) = app.seed_user("poster");
    let (_conn, mut outbound) = app.relay.register().await;

    let (status, msg) = app
        .call(
            Method::POST,
            "/api/conversations/9/messages",
            Some(&user_token),
            Some(json!({"content": "over rest"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let Ok(Outbound::Text(text)) = outbound.try_recv() else {
        panic!("expected a new_message frame on the relay connection");
    };
    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame["type"], "new_message");
    assert_eq!(frame["message"]["id"], msg["id"]);
    assert_eq!(frame["message"]["content"], "over rest");
    assert_eq!(frame["message"]["conversationId"], 9);
    assert_eq!(frame["user"]["id"], user);
    assert!(frame["user"].get("password").is_none());
}

#[tokio::test]
async fn invalid_bodies_are_json_bad_requests() {
    let app = TestApp::new();
    let (_, owner_token) = app.seed_user("owner");

    // Missing required field
    let (status, body) = app
        .call(Method::POST, "/api/users", None, Some(json!({"username": "abcd"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("password"));

    // Unknown field
    let (status, body) = app
        .call(
            Method::POST,
            "/api/communities",
            Some(&owner_token),
            Some(json!({"name": "Sneaky", "role": "admin"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Not a role
    let (status, body) = app
        .call(
            Method::PUT,
            "/api/communities/1/members/1/role",
            Some(&owner_token),
            Some(json!({"role": "overlord"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
