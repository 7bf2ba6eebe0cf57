//! HTTP pairing bootstrap.
//!
//! | Method | Path                | Auth   | Effect                                      |
//! |--------|---------------------|--------|---------------------------------------------|
//! | GET    | `/api/network-info` | none   | `{ips, port, token}`; mints a fresh token   |
//! | PUT    | `/api/pairing-code` | bearer | registers `{password}` for the caller       |
//! | POST   | `/api/pairing-code` | bearer | exchanges `{password}` for `{success,token}`|
//!
//! The bearer credential is resolved to an owner id by the configured
//! [`IdentityProvider`].  A missing or unresolvable credential is `401`; a
//! malformed body or a code that is not six letters or digits is `400`.
//! A wrong or expired code answers `401` with one merged message, so the
//! caller cannot tell the two apart.
//!
//! With a relay store configured, a registered code is also published as
//! the owner's [`ConnectionRecord`] together with a fresh token and this
//! host's address.  A failed publish is logged; the registration stands.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rimo_core::credentials::redact;
use rimo_core::{CredentialError, CredentialStore, OwnerId};
use rimo_link::{ConnectionRecord, RelayStore};

use crate::infrastructure::identity::IdentityProvider;
use crate::infrastructure::{lock_credentials, net_info};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub credentials: Arc<Mutex<CredentialStore>>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Port of the real-time channel, reported by `network-info`.
    pub ws_port: u16,
    pub advertised_ips: Vec<IpAddr>,
    /// Where registered codes are published; `None` keeps them local.
    pub relay: Option<Arc<dyn RelayStore>>,
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NetworkInfo {
    pub ips: Vec<String>,
    pub port: u16,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordBody {
    pub password: String,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PairingResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PairingResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

fn reply(status: StatusCode, body: PairingResponse) -> Response {
    (status, Json(body)).into_response()
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/network-info", get(network_info))
        .route("/api/pairing-code", put(register_code).post(redeem_code))
        .with_state(Arc::new(state))
}

/// Serves the bootstrap API on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_http<F>(addr: SocketAddr, state: HttpState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    info!("pairing API listening on {addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/network-info
async fn network_info(State(state): State<Arc<HttpState>>) -> Json<NetworkInfo> {
    let token = lock_credentials(&state.credentials).issue_token();
    debug!(token = %redact(&token.value), "issued token for network-info");
    Json(NetworkInfo {
        ips: net_info::advertised_ips(&state.advertised_ips)
            .iter()
            .map(ToString::to_string)
            .collect(),
        port: state.ws_port,
        token: token.value,
    })
}

/// PUT /api/pairing-code
async fn register_code(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Result<Json<PasswordBody>, JsonRejection>,
) -> Response {
    let owner = match caller(&state, &headers) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };
    let Ok(Json(body)) = body else {
        return reply(
            StatusCode::BAD_REQUEST,
            PairingResponse::failed("body must be {\"password\": \"...\"}"),
        );
    };

    let result = lock_credentials(&state.credentials).register_pairing_code(owner.clone(), &body.password);
    match result {
        Ok(code) => {
            info!(%owner, "pairing code registered");
            if let Some(relay) = &state.relay {
                publish_record(&state, relay.as_ref(), &owner, code.value).await;
            }
            reply(StatusCode::OK, PairingResponse::ok())
        }
        Err(e) => reply(StatusCode::BAD_REQUEST, PairingResponse::failed(e.to_string())),
    }
}

/// Publishes `pairing_code` with a fresh token and this host's address.
async fn publish_record(
    state: &HttpState,
    relay: &dyn RelayStore,
    owner: &OwnerId,
    pairing_code: String,
) {
    let Some(ip) = net_info::advertised_ips(&state.advertised_ips).into_iter().next() else {
        warn!(%owner, "no advertised address; connection record not published");
        return;
    };
    let token = lock_credentials(&state.credentials).issue_token();
    let record = ConnectionRecord {
        pairing_code,
        token: token.value,
        server: format!("ws://{}", SocketAddr::new(ip, state.ws_port)),
        updated_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
    };
    match relay.publish_connection(owner, record).await {
        Ok(()) => debug!(%owner, "connection record published"),
        Err(e) => warn!(%owner, "connection record not published: {e}"),
    }
}

/// POST /api/pairing-code
async fn redeem_code(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Result<Json<PasswordBody>, JsonRejection>,
) -> Response {
    let owner = match caller(&state, &headers) {
        Ok(owner) => owner,
        Err(resp) => return resp,
    };
    let Ok(Json(body)) = body else {
        return reply(
            StatusCode::BAD_REQUEST,
            PairingResponse::failed("body must be {\"password\": \"...\"}"),
        );
    };

    let result = lock_credentials(&state.credentials).validate_pairing_code(&owner, &body.password);
    match result {
        Ok(token) => {
            info!(%owner, token = %redact(&token.value), "pairing code redeemed");
            reply(
                StatusCode::OK,
                PairingResponse {
                    success: true,
                    token: Some(token.value),
                    message: None,
                },
            )
        }
        Err(e @ (CredentialError::Invalid | CredentialError::Expired)) => {
            debug!(%owner, "pairing code refused: {e}");
            reply(
                StatusCode::UNAUTHORIZED,
                PairingResponse::failed("invalid or expired pairing code"),
            )
        }
        Err(CredentialError::Malformed) => reply(
            StatusCode::BAD_REQUEST,
            PairingResponse::failed(CredentialError::Malformed.to_string()),
        ),
    }
}

/// Resolves the `Authorization: Bearer` header to an owner.
fn caller(state: &HttpState, headers: &HeaderMap) -> Result<OwnerId, Response> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let Some(bearer) = bearer else {
        return Err(reply(
            StatusCode::UNAUTHORIZED,
            PairingResponse::failed("missing bearer credential"),
        ));
    };
    state.identity.resolve(bearer).map_err(|e| {
        warn!("bearer credential not accepted: {e}");
        reply(
            StatusCode::UNAUTHORIZED,
            PairingResponse::failed("identity could not be verified"),
        )
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::identity::{IdentityError, MockIdentityProvider};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use rimo_core::ManualClock;
    use rimo_link::MemoryRelayStore;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        credentials: Arc<Mutex<CredentialStore>>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        fixture_with_relay(None)
    }

    fn fixture_with_relay(relay: Option<Arc<dyn RelayStore>>) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let credentials = Arc::new(Mutex::new(CredentialStore::new(clock.clone())));
        let mut identity = MockIdentityProvider::new();
        identity.expect_resolve().returning(|bearer| {
            if bearer == "good" {
                Ok(OwnerId::new("owner-u"))
            } else {
                Err(IdentityError::NotAJwt)
            }
        });
        let app = router(HttpState {
            credentials: credentials.clone(),
            identity: Arc::new(identity),
            ws_port: 3001,
            advertised_ips: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))],
            relay,
        });
        Fixture {
            app,
            credentials,
            clock,
        }
    }

    fn request(method: Method, bearer: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri("/api/pairing-code")
            .header("content-type", "application/json");
        if let Some(b) = bearer {
            builder = builder.header("authorization", format!("Bearer {b}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, PairingResponse) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_network_info_issues_a_valid_token() {
        // Arrange
        let f = fixture();
        let req = Request::builder()
            .uri("/api/network-info")
            .body(Body::empty())
            .unwrap();

        // Act
        let resp = f.app.clone().oneshot(req).await.unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let info: NetworkInfo = serde_json::from_slice(&bytes).unwrap();

        // Assert
        assert_eq!(info.ips, vec!["192.168.1.5".to_string()]);
        assert_eq!(info.port, 3001);
        assert!(f.credentials.lock().unwrap().is_token_valid(&info.token));
    }

    #[tokio::test]
    async fn test_register_then_redeem_within_ttl() {
        let f = fixture();

        let (status, body) = call(
            &f.app,
            request(Method::PUT, Some("good"), r#"{"password":"AB12CD"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);

        let (status, body) = call(
            &f.app,
            request(Method::POST, Some("good"), r#"{"password":"AB12CD"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let token = body.token.expect("token returned");
        assert!(f.credentials.lock().unwrap().is_token_valid(&token));
    }

    #[tokio::test]
    async fn test_redeem_after_ttl_fails() {
        let f = fixture();
        call(
            &f.app,
            request(Method::PUT, Some("good"), r#"{"password":"AB12CD"}"#),
        )
        .await;

        f.clock.advance(Duration::from_secs(15 * 60));
        let (status, body) = call(
            &f.app,
            request(Method::POST, Some("good"), r#"{"password":"AB12CD"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!body.success);
        assert!(body.token.is_none());
    }

    #[tokio::test]
    async fn test_wrong_code_is_refused() {
        let f = fixture();
        call(
            &f.app,
            request(Method::PUT, Some("good"), r#"{"password":"AB12CD"}"#),
        )
        .await;

        let (status, body) = call(
            &f.app,
            request(Method::POST, Some("good"), r#"{"password":"ZZZZZZ"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.message.as_deref(), Some("invalid or expired pairing code"));
    }

    #[tokio::test]
    async fn test_malformed_code_is_bad_request() {
        let f = fixture();
        let (status, body) = call(
            &f.app,
            request(Method::PUT, Some("good"), r#"{"password":"123"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_missing_body_is_bad_request() {
        let f = fixture();
        let (status, _) = call(&f.app, request(Method::PUT, Some("good"), "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_or_unknown_bearer_is_unauthorized() {
        let f = fixture();

        let (missing, _) = call(
            &f.app,
            request(Method::PUT, None, r#"{"password":"AB12CD"}"#),
        )
        .await;
        let (unknown, _) = call(
            &f.app,
            request(Method::POST, Some("forged"), r#"{"password":"AB12CD"}"#),
        )
        .await;

        assert_eq!(missing, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_registered_code_is_published_to_relay() {
        // Arrange
        let store = Arc::new(MemoryRelayStore::new());
        let f = fixture_with_relay(Some(store.clone() as Arc<dyn RelayStore>));

        // Act
        let (status, _) = call(
            &f.app,
            request(Method::PUT, Some("good"), r#"{"password":"ab12cd"}"#),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        let record = store
            .connection(&OwnerId::new("owner-u"))
            .await
            .unwrap()
            .expect("record published");
        assert_eq!(record.pairing_code, "AB12CD");
        assert_eq!(record.server, "ws://192.168.1.5:3001");
        assert!(f.credentials.lock().unwrap().is_token_valid(&record.token));
        assert!(record.updated_at > 0);
    }

    #[tokio::test]
    async fn test_rejected_code_publishes_nothing() {
        let store = Arc::new(MemoryRelayStore::new());
        let f = fixture_with_relay(Some(store.clone() as Arc<dyn RelayStore>));

        let (status, _) = call(
            &f.app,
            request(Method::PUT, Some("good"), r#"{"password":"123"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.connection(&OwnerId::new("owner-u")).await.unwrap(), None);
    }
}
