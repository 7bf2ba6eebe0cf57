//! Transport selection and the connect-attempt fallback policy.
//!
//! # State machine
//!
//! ```text
//!            ┌──────────► Connected
//!  Probing ──┤
//!            └──────────► Failed(Auth | Network)
//! ```
//!
//! A failed attempt is handed to [`FallbackPolicy::decide`] together with the
//! side that was connecting:
//!
//! | Side | Failure | Decision |
//! |------|---------|----------|
//! | host | auth | retry once after 500 ms with the same-machine token, then give up |
//! | host | network | give up |
//! | controller | auth | discard the stored token and ask for re-pairing |
//! | controller | network | fall back to the relay if an owner identity is known, else report unreachable |
//!
//! No path retries more than once without user action.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use rimo_core::credentials::redact;
use rimo_core::SAME_MACHINE_TOKEN;

/// Target used when no other hint is available.
pub const SAME_MACHINE_TARGET: &str = "ws://127.0.0.1:3001";

/// Delay before the host's single automatic retry.
pub const HOST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Upper-cased markers that identify a credential rejection.
const AUTH_MARKERS: [&str; 5] = ["AUTH", "FAILED", "TOKEN", "EXPIRED", "RETRY"];

// ── Classification ────────────────────────────────────────────────────────────

/// Which party is connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The host's own loopback control surface.
    Host,
    /// A remote controller using a scanned or typed token.
    Controller,
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Token invalid, expired or rejected.
    Auth,
    /// Target unreachable or the channel broke before a verdict.
    Network,
}

/// Classifies a rejection reason string.
///
/// A reason is an authentication failure iff its upper-cased text contains
/// `AUTH`, `FAILED`, `TOKEN`, `EXPIRED` or `RETRY`.
pub fn classify_rejection(reason: &str) -> FailureKind {
    let upper = reason.to_uppercase();
    if AUTH_MARKERS.iter().any(|m| upper.contains(m)) {
        FailureKind::Auth
    } else {
        FailureKind::Network
    }
}

/// Errors from a single connect attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The server answered the handshake with a rejection.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The target could not be reached at all.
    #[error("target unreachable: {0}")]
    Unreachable(String),

    /// The channel opened but the handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl ConnectError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected(reason) => classify_rejection(reason),
            Self::Unreachable(_) | Self::Handshake(_) => FailureKind::Network,
        }
    }
}

// ── Target resolution ─────────────────────────────────────────────────────────

/// Candidate addresses, in decreasing priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetHints {
    /// Forced by a scanned QR code or a command-line flag.
    pub explicit: Option<String>,
    /// Remembered from a previous successful pairing.
    pub remembered: Option<String>,
    /// The origin the controller UI was served from.
    pub same_origin: Option<String>,
}

impl TargetHints {
    /// Returns the highest-priority hint as a `ws://`/`wss://` URL.
    ///
    /// Blank hints are skipped, so an empty flag does not hide the
    /// remembered address.
    pub fn resolve(&self) -> String {
        let usable = |hint: &Option<String>| {
            hint.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        let chosen = usable(&self.explicit)
            .or_else(|| usable(&self.remembered))
            .or_else(|| usable(&self.same_origin))
            .unwrap_or_else(|| SAME_MACHINE_TARGET.to_string());
        to_ws_url(&chosen)
    }
}

fn to_ws_url(target: &str) -> String {
    if let Some(rest) = target.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = target.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if target.starts_with("ws://") || target.starts_with("wss://") {
        target.to_string()
    } else {
        format!("ws://{target}")
    }
}

// ── Attempt state ─────────────────────────────────────────────────────────────

/// State of one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Probing,
    Connected,
    Failed(FailureKind),
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probing => f.write_str("probing"),
            Self::Connected => f.write_str("connected"),
            Self::Failed(FailureKind::Auth) => f.write_str("failed(auth)"),
            Self::Failed(FailureKind::Network) => f.write_str("failed(network)"),
        }
    }
}

/// One attempt against one target.  Leaves `Probing` exactly once.
#[derive(Debug)]
pub struct Attempt {
    target: String,
    state: AttemptState,
}

impl Attempt {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: AttemptState::Probing,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Records the attempt's outcome.  Returns `false` if it had already
    /// left `Probing`, in which case the state is unchanged.
    pub fn settle(&mut self, outcome: AttemptState) -> bool {
        if self.state != AttemptState::Probing || outcome == AttemptState::Probing {
            return false;
        }
        debug!(target = %self.target, state = %outcome, "connect attempt settled");
        self.state = outcome;
        true
    }
}

// ── Policy ────────────────────────────────────────────────────────────────────

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait, then try once more with the same-machine token.
    RetryAfter(Duration),
    /// Forget the stored token and send the user back to pairing.
    DiscardTokenAndPromptRepair,
    /// Carry commands over the relay log instead.
    FallBackToRelay,
    /// Tell the user to try again later.
    ReportUnreachable,
    /// Stop; the local control surface is unavailable.
    GiveUp,
}

/// Facts about the attempt the policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub side: Side,
    pub retries_so_far: u32,
    pub relay_available: bool,
}

/// Maps a failed attempt to a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub host_retry_delay: Duration,
    pub max_host_retries: u32,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            host_retry_delay: HOST_RETRY_DELAY,
            max_host_retries: 1,
        }
    }
}

impl FallbackPolicy {
    pub fn decide(&self, ctx: &AttemptContext, failure: FailureKind) -> Decision {
        match (ctx.side, failure) {
            (Side::Host, FailureKind::Auth) if ctx.retries_so_far < self.max_host_retries => {
                Decision::RetryAfter(self.host_retry_delay)
            }
            (Side::Host, _) => Decision::GiveUp,
            (Side::Controller, FailureKind::Auth) => Decision::DiscardTokenAndPromptRepair,
            (Side::Controller, FailureKind::Network) if ctx.relay_available => {
                Decision::FallBackToRelay
            }
            (Side::Controller, FailureKind::Network) => Decision::ReportUnreachable,
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Opens one direct link.
#[async_trait]
pub trait Connector: Send + Sync {
    type Link: Send + 'static;

    async fn connect(&self, target: &str, token: &str) -> Result<Self::Link, ConnectError>;
}

/// Inputs to [`TransportRouter::establish`].
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub side: Side,
    pub hints: TargetHints,
    pub token: String,
    /// An owner identity is known, so the relay path can be used.
    pub relay_available: bool,
}

/// Final outcome of [`TransportRouter::establish`].
#[derive(Debug)]
pub enum Established<L> {
    /// The direct channel is open.
    Direct(L),
    /// Use the relay path.
    Relay,
    /// The controller's token was rejected; it must be discarded.
    RepairRequired(ConnectError),
    /// The controller cannot reach the host and has no relay.
    Unreachable(ConnectError),
    /// The host could not open its own control surface.
    Unavailable(ConnectError),
}

/// Runs connect attempts through a [`Connector`] under a [`FallbackPolicy`].
pub struct TransportRouter<C> {
    connector: C,
    policy: FallbackPolicy,
}

impl<C: Connector> TransportRouter<C> {
    pub fn new(connector: C) -> Self {
        Self::with_policy(connector, FallbackPolicy::default())
    }

    pub fn with_policy(connector: C, policy: FallbackPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connects, applying the fallback policy on failure.
    ///
    /// `before_retry` runs right before the host's automatic retry; the host
    /// uses it to re-issue its pairing code.
    pub async fn establish<F>(&self, request: ConnectRequest, mut before_retry: F) -> Established<C::Link>
    where
        F: FnMut() + Send,
    {
        let target = request.hints.resolve();
        let mut token = request.token;
        let mut retries = 0;

        loop {
            let mut attempt = Attempt::new(target.clone());
            info!(
                target = %target,
                token = %redact(&token),
                side = ?request.side,
                "connecting"
            );

            let err = match self.connector.connect(&target, &token).await {
                Ok(link) => {
                    attempt.settle(AttemptState::Connected);
                    return Established::Direct(link);
                }
                Err(e) => e,
            };

            let kind = err.kind();
            attempt.settle(AttemptState::Failed(kind));

            let ctx = AttemptContext {
                side: request.side,
                retries_so_far: retries,
                relay_available: request.relay_available,
            };
            match self.policy.decide(&ctx, kind) {
                Decision::RetryAfter(delay) => {
                    warn!("host connection rejected ({err}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    before_retry();
                    token = SAME_MACHINE_TOKEN.to_string();
                    retries += 1;
                }
                Decision::DiscardTokenAndPromptRepair => {
                    warn!("controller token rejected ({err}); re-pairing required");
                    return Established::RepairRequired(err);
                }
                Decision::FallBackToRelay => {
                    warn!("direct channel unreachable ({err}); falling back to relay");
                    return Established::Relay;
                }
                Decision::ReportUnreachable => {
                    warn!("direct channel unreachable ({err})");
                    return Established::Unreachable(err);
                }
                Decision::GiveUp => {
                    warn!("local control surface unavailable ({err})");
                    return Established::Unavailable(err);
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
