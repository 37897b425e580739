#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use futures_util::{SinkExt, StreamExt};
use http::{Method, Request};
use sqlx::SqlitePool;
use thicket::auth::jwt::JwtAuthenticator;
use thicket::auth::token_store::TokenStore;
use thicket::auth::{AuthBackend, Identity};
use thicket::config::{AuthMode, GatewayConfig};
use thicket::db;
use thicket::models::server::{CreateServer, Server};
use thicket::models::user::User;
use thicket::routes;
use thicket::state::AppState;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A user created for testing, bundling the User record with its raw token.
pub struct TestUser {
    pub user: User,
    pub token: String,
}

impl TestUser {
    /// Returns the Authorization header value.
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Shared secret of servers built with `TestServer::with_jwt`.
pub const JWT_SECRET: &str = "thicket-test-secret";

/// Test server that owns an in-memory SQLite pool and full AppState.
/// Each instance is isolated, so tests can run in parallel.
pub struct TestServer {
    pub state: AppState,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_gateway(GatewayConfig::default()).await
    }

    /// Same as `new`, with gateway limits overridden.
    pub async fn with_gateway(gateway: GatewayConfig) -> Self {
        let pool = db::create_pool("sqlite::memory:")
            .await
            .expect("failed to create test pool");
        let auth = AuthBackend::Tokens(TokenStore::new(pool.clone()));
        Self {
            state: AppState::new(pool, auth, gateway),
        }
    }

    /// A server that accepts HS256 JWTs signed with `JWT_SECRET` instead of
    /// stored tokens.
    pub async fn with_jwt() -> Self {
        let pool = db::create_pool("sqlite::memory:")
            .await
            .expect("failed to create test pool");
        let mode = AuthMode::Jwt {
            secret: JWT_SECRET.to_string(),
        };
        let auth = AuthBackend::from_mode(&mode, pool.clone());
        Self {
            state: AppState::new(pool, auth, GatewayConfig::default()),
        }
    }

    /// Returns an Axum Router wired to this server's state for `oneshot()` calls.
    pub fn router(&self) -> axum::Router {
        routes::router(self.state.clone())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.state.db
    }

    /// Binds a TCP listener on port 0, spawns the server, and returns its
    /// `host:port`.
    pub async fn spawn(&self) -> String {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("127.0.0.1:{}", addr.port())
    }

    /// Create a user and issue them a bearer token through the token store.
    pub async fn create_user_with_token(&self, username: &str) -> TestUser {
        let user = db::users::create_user(self.pool(), username, "unused-hash")
            .await
            .expect("failed to create test user");
        let token = TokenStore::new(self.pool().clone())
            .issue(&user.id)
            .await
            .expect("failed to issue test token");
        TestUser { user, token }
    }

    /// Create a server owned by `owner`. It comes with a `general` channel.
    pub async fn create_server(&self, owner: &TestUser, name: &str) -> Server {
        db::servers::create_server(
            self.pool(),
            &owner.user.id,
            &CreateServer {
                name: name.to_string(),
                description: None,
            },
        )
        .await
        .expect("failed to create test server")
    }

    pub async fn join(&self, server: &Server, user: &TestUser) {
        db::servers::join_by_invite(self.pool(), &server.invite_code, &user.user.id)
            .await
            .expect("failed to join test server");
    }

    /// ID of the channel created along with the server.
    pub async fn general_channel(&self, server: &Server) -> String {
        db::channels::list_channels(self.pool(), &server.id)
            .await
            .expect("failed to list channels")[0]
            .id
            .clone()
    }
}

/// A user known only to an identity provider, holding a JWT signed with
/// `secret`. No local row exists until the server first sees the token.
pub fn external_user(secret: &str, user_id: &str, username: &str) -> TestUser {
    let identity = Identity {
        user_id: user_id.to_string(),
        username: username.to_string(),
    };
    let token = JwtAuthenticator::new(secret.as_bytes())
        .issue(&identity, Duration::from_secs(300))
        .expect("failed to sign test token");
    TestUser {
        user: User {
            id: identity.user_id,
            username: identity.username,
            display_name: None,
            created_at: String::new(),
        },
        token,
    }
}

// ---------------------------------------------------------------------------
// Request builder helpers
// ---------------------------------------------------------------------------

/// Build an unauthenticated request with no body.
pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Build an authenticated request with no body.
pub fn authenticated_request(method: Method, uri: &str, auth_header: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", auth_header)
        .body(Body::empty())
        .unwrap()
}

/// Build an authenticated request with a JSON body.
pub fn authenticated_json_request(
    method: Method,
    uri: &str,
    auth_header: &str,
    body: &serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", auth_header)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Build an unauthenticated request with a JSON body.
pub fn json_request(method: Method, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Parse a response body into a `serde_json::Value`.
pub async fn parse_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Gateway client helpers
// ---------------------------------------------------------------------------

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a client waits for an expected frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn connect(addr: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

pub async fn send_event(ws: &mut Ws, event_type: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "type": event_type, "data": data });
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next JSON event, or `None` if the server closed the socket. Panics if
/// nothing arrives within `RECV_TIMEOUT`.
pub async fn next_event(ws: &mut Ws) -> Option<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a gateway frame");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(other)) => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Next event of the given type, skipping anything else.
pub async fn next_of_type(ws: &mut Ws, event_type: &str) -> serde_json::Value {
    loop {
        let event = next_event(ws)
            .await
            .unwrap_or_else(|| panic!("socket closed while waiting for {event_type}"));
        if event["type"] == event_type {
            return event;
        }
    }
}

/// Drains frames until the server closes the socket.
pub async fn expect_closed(ws: &mut Ws) {
    while next_event(ws).await.is_some() {}
}

/// Asserts nothing arrives for a short while.
pub async fn expect_silence(ws: &mut Ws) {
    let quiet = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(quiet.is_err(), "expected no frame, got {quiet:?}");
}

/// Connect and identify. Returns the socket and the READY event.
pub async fn identified(addr: &str, user: &TestUser) -> (Ws, serde_json::Value) {
    let mut ws = connect(addr).await;
    send_event(&mut ws, "IDENTIFY", serde_json::json!({ "token": user.token })).await;
    let ready = next_event(&mut ws).await.expect("READY");
    assert_eq!(ready["type"], "READY");
    (ws, ready)
}

/// Subscribe and wait until the hub has recorded it. HEARTBEAT_ACK is a
/// reply on the same connection, so it arriving proves SUBSCRIBE was handled.
pub async fn subscribe(ws: &mut Ws, channel_id: &str) {
    send_event(ws, "SUBSCRIBE", serde_json::json!({ "channel_id": channel_id })).await;
    send_event(ws, "HEARTBEAT", serde_json::json!({})).await;
    next_of_type(ws, "HEARTBEAT_ACK").await;
}

/// Polls `cond` until it holds or `RECV_TIMEOUT` elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
