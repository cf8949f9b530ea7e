//! HTTP entry point for Tandem server.
//!
//! `GET {websocket_path}/{document_id}` authenticates the caller, checks
//! document access, and only then upgrades to a WebSocket and hands the
//! socket to a [`Connection`].

use crate::config::Config;
use crate::error::ApiError;
use crate::jwt::JwtAuthenticator;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::policy::AccessPolicy;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    validate_document_id, AccessChecker, AccessError, Authenticator, Connection, Identity,
    RoomRegistry,
};
use tandem_transport::WebSocketTransport;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Cookie checked when neither the query nor the header carries a token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Live document rooms.
    pub registry: Arc<RoomRegistry>,
    /// Credential verification.
    pub authenticator: Arc<dyn Authenticator>,
    /// Document permissions.
    pub access: Arc<dyn AccessChecker>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        access: Arc<dyn AccessChecker>,
    ) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new()),
            authenticator,
            access,
            config,
        }
    }

    /// State with the JWT authenticator and access policy from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the authenticator cannot be built.
    pub fn from_config(config: Config) -> Result<Self> {
        let authenticator = JwtAuthenticator::from_config(&config.auth)?;
        let access = AccessPolicy::from_config(&config.access);
        Ok(Self::new(config, Arc::new(authenticator), Arc::new(access)))
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.collaboration_route(), get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => spawn_stats_reporter(Arc::clone(&state.registry)),
            Err(e) => error!("Failed to start metrics server: {:#}", e),
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Tandem server listening on {}", addr);
    info!(
        "Collaboration endpoint: ws://{}{}/{{document_id}}",
        addr,
        config.transport.websocket_path.trim_end_matches('/')
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn spawn_stats_reporter(registry: Arc<RoomRegistry>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        loop {
            ticker.tick().await;
            metrics::record_registry(&registry.stats());
        }
    });
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Query parameters accepted by the collaboration endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
    /// Access token.
    pub token: Option<String>,
}

/// Collaboration upgrade handler.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Query(query): Query<CredentialQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match authorize(&state, &document_id, &query, &headers).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(document = %document_id, code = e.code(), error = %e, "Rejected upgrade");
            metrics::record_rejection(e.code());
            return e.into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(document = %document_id, error = %rejection, "Not a WebSocket upgrade");
            return rejection.into_response();
        }
    };

    upgrade
        .max_message_size(state.config.limits.max_message_size)
        .on_failed_upgrade(|e| {
            debug!(error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, state, identity, document_id))
}

/// Authenticate the caller and check access to `document_id`.
async fn authorize(
    state: &AppState,
    document_id: &str,
    query: &CredentialQuery,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    validate_document_id(document_id).map_err(|e| ApiError::InvalidInput(e.to_string()))?;

    let credential = extract_credential(query, headers).ok_or(ApiError::MissingCredential)?;
    let identity = state.authenticator.authenticate(&credential).await?;

    state
        .access
        .check_access(&identity, document_id)
        .await
        .map_err(|e| {
            if let AccessError::Unavailable(reason) = &e {
                warn!(document = %document_id, reason = %reason, "Access check unavailable");
                metrics::record_error("access_check");
            }
            ApiError::from(e)
        })?;

    Ok(identity)
}

/// First non-empty credential from the `token` query parameter, the
/// `Authorization: Bearer` header, or the access token cookie.
fn extract_credential(query: &CredentialQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == ACCESS_TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Run an upgraded socket as a collaboration connection.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    identity: Identity,
    document_id: String,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection = Connection::new(
        WebSocketTransport::new(socket),
        identity,
        document_id,
        Arc::clone(&state.registry),
        state.config.connection_config(),
    );
    let summary = connection.start().await;

    metrics::record_summary(&summary);
    metrics::record_registry(&state.registry.stats());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessConfig;
    use crate::jwt::Claims;
    use futures_util::{SinkExt, StreamExt};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::net::SocketAddr;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tandem_protocol::{codec, Event, Member, Position};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::{self, Message};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const SECRET: &str = "test-secret";

    struct TestServer {
        addr: SocketAddr,
        state: Arc<AppState>,
    }

    impl TestServer {
        async fn start() -> Self {
            let access = AccessPolicy::from_config(&AccessConfig::default()).allow("private", ["alice"]);
            let state = Arc::new(AppState::new(
                Config::default(),
                Arc::new(JwtAuthenticator::hs256(SECRET.as_bytes(), None)),
                Arc::new(access),
            ));

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let router = app(Arc::clone(&state));
            tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });

            Self { addr, state }
        }

        fn url(&self, document_id: &str) -> String {
            format!("ws://{}/ws/collaboration/{}", self.addr, document_id)
        }

        async fn connect(&self, user: &str, document_id: &str) -> Client {
            let url = format!("{}?token={}", self.url(document_id), token(user));
            let (client, _) = connect_async(url).await.unwrap();
            client
        }

        async fn http_get(&self, path: &str) -> String {
            let mut stream = TcpStream::connect(self.addr).await.unwrap();
            let request = format!(
                "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                path, self.addr
            );
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        }
    }

    fn token(user: &str) -> String {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 600;
        let claims = Claims {
            user_id: user.to_string(),
            email: format!("{}@example.com", user),
            exp,
            iss: None,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn rejection_status(request: impl IntoClientRequest + Unpin) -> u16 {
        match connect_async(request).await {
            Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
            Err(e) => panic!("Expected HTTP rejection, got {:?}", e),
            Ok(_) => panic!("Expected HTTP rejection, got an upgrade"),
        }
    }

    async fn next_event(client: &mut Client) -> Event {
        loop {
            let message = timeout(Duration::from_secs(5), client.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            match message {
                Message::Text(text) => return codec::decode(text.as_bytes()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    async fn assert_silent(client: &mut Client) {
        let result = timeout(Duration::from_millis(200), client.next()).await;
        assert!(result.is_err(), "Expected no message, got {:?}", result);
    }

    #[test]
    fn test_extract_credential_order() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());
        headers.insert(header::COOKIE, "theme=dark; access_token=cookie-token".parse().unwrap());

        let query = CredentialQuery {
            token: Some("query-token".to_string()),
        };
        assert_eq!(
            extract_credential(&query, &headers).as_deref(),
            Some("query-token")
        );

        let empty = CredentialQuery {
            token: Some(String::new()),
        };
        assert_eq!(
            extract_credential(&empty, &headers).as_deref(),
            Some("header-token")
        );

        headers.remove(header::AUTHORIZATION);
        assert_eq!(
            extract_credential(&CredentialQuery::default(), &headers).as_deref(),
            Some("cookie-token")
        );

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        headers.insert(header::COOKIE, "access_token=".parse().unwrap());
        assert!(extract_credential(&CredentialQuery::default(), &headers).is_none());
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_before_upgrade() {
        let server = TestServer::start().await;

        let url = format!("{}?token=bad-token", server.url("doc-1"));
        assert_eq!(rejection_status(url).await, 401);
        assert!(!server.state.registry.room_exists("doc-1"));
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let server = TestServer::start().await;

        assert_eq!(rejection_status(server.url("doc-1")).await, 401);

        let response = server.http_get("/ws/collaboration/doc-1").await;
        assert!(response.starts_with("HTTP/1.1 401"));
        assert!(response.contains(r#""code":"unauthorized""#));
    }

    #[tokio::test]
    async fn test_forbidden_document() {
        let server = TestServer::start().await;

        let url = format!("{}?token={}", server.url("private"), token("bob"));
        assert_eq!(rejection_status(url).await, 403);

        let mut alice = server.connect("alice", "private").await;
        assert!(matches!(next_event(&mut alice).await, Event::Presence { .. }));
    }

    #[tokio::test]
    async fn test_invalid_document_id() {
        let server = TestServer::start().await;

        let long_id = "a".repeat(300);
        let url = format!("{}?token={}", server.url(&long_id), token("alice"));
        assert_eq!(rejection_status(url).await, 400);
    }

    #[tokio::test]
    async fn test_bearer_header_and_cookie() {
        let server = TestServer::start().await;

        let mut request = server.url("doc-1").into_client_request().unwrap();
        request.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token("alice")).parse().unwrap(),
        );
        let (mut alice, _) = connect_async(request).await.unwrap();
        assert!(matches!(next_event(&mut alice).await, Event::Presence { .. }));

        let mut request = server.url("doc-1").into_client_request().unwrap();
        request.headers_mut().insert(
            header::COOKIE,
            format!("access_token={}", token("bob")).parse().unwrap(),
        );
        let (mut bob, _) = connect_async(request).await.unwrap();
        match next_event(&mut bob).await {
            Event::Presence { users } => assert_eq!(users.len(), 2),
            other => panic!("Expected Presence event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_member_gets_presence_of_self() {
        let server = TestServer::start().await;

        let mut alice = server.connect("alice", "doc-1").await;
        assert_eq!(
            next_event(&mut alice).await,
            Event::presence(vec![Member::new("alice", "alice@example.com")])
        );
        assert_silent(&mut alice).await;
    }

    #[tokio::test]
    async fn test_cursor_reaches_other_member_once() {
        let server = TestServer::start().await;

        let mut alice = server.connect("alice", "doc-1").await;
        next_event(&mut alice).await;

        let mut bob = server.connect("bob", "doc-1").await;
        assert_eq!(
            next_event(&mut alice).await,
            Event::join("bob", "bob@example.com")
        );
        assert_eq!(
            next_event(&mut bob).await,
            Event::presence(vec![
                Member::new("alice", "alice@example.com"),
                Member::new("bob", "bob@example.com"),
            ])
        );

        bob.send(Message::Text(
            r#"{"type":"cursor","position":{"x":10,"y":20}}"#.to_string(),
        ))
        .await
        .unwrap();

        assert_eq!(
            next_event(&mut alice).await,
            Event::cursor("bob", Position::from_json(r#"{"x":10,"y":20}"#).unwrap())
        );
        assert_silent(&mut alice).await;
        assert_silent(&mut bob).await;
    }

    #[tokio::test]
    async fn test_null_position_is_forwarded() {
        let server = TestServer::start().await;

        let mut alice = server.connect("alice", "doc-1").await;
        next_event(&mut alice).await;
        let mut bob = server.connect("bob", "doc-1").await;
        next_event(&mut alice).await;
        next_event(&mut bob).await;

        bob.send(Message::Text(r#"{"type":"cursor","position":null}"#.to_string()))
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut alice).await,
            Event::cursor("bob", Position::from_json("null").unwrap())
        );
    }

    #[tokio::test]
    async fn test_oversize_frame_closes_sender() {
        let server = TestServer::start().await;

        let mut alice = server.connect("alice", "doc-1").await;
        next_event(&mut alice).await;
        let mut bob = server.connect("bob", "doc-1").await;
        next_event(&mut alice).await;
        next_event(&mut bob).await;

        let padding = "a".repeat(70 * 1024);
        let frame = format!(r#"{{"type":"cursor","position":"{}"}}"#, padding);
        // The server may close before the write completes.
        let _ = bob.send(Message::Text(frame)).await;

        assert_eq!(next_event(&mut alice).await, Event::leave("bob"));
        assert_eq!(server.state.registry.member_count("doc-1"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_leave() {
        let server = TestServer::start().await;

        let mut alice = server.connect("alice", "doc-1").await;
        next_event(&mut alice).await;
        let mut bob = server.connect("bob", "doc-1").await;
        next_event(&mut alice).await;
        next_event(&mut bob).await;

        bob.close(None).await.unwrap();
        assert_eq!(next_event(&mut alice).await, Event::leave("bob"));
        assert_eq!(server.state.registry.member_count("doc-1"), 1);

        alice.close(None).await.unwrap();
        drop(alice);
        for _ in 0..50 {
            if !server.state.registry.room_exists("doc-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!server.state.registry.room_exists("doc-1"));
    }

    #[tokio::test]
    async fn test_health() {
        let server = TestServer::start().await;

        let response = server.http_get("/health").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""status":"ok""#));
    }
}
