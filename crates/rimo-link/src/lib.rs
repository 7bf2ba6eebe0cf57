//! # rimo-link
//!
//! Transport plumbing shared by the host service and the controller.
//!
//! # How a connection is chosen (for beginners)
//!
//! 1. [`router::TargetHints`] picks *where* to connect: an explicit address
//!    beats a remembered one, which beats the page's own origin, which beats
//!    the same-machine default.
//! 2. [`router::TransportRouter`] performs the attempt through a
//!    [`router::Connector`] (in production, [`ws_client::WsConnector`]) and
//!    walks the `probing → connected | failed` state machine.
//! 3. On failure, [`router::FallbackPolicy`] decides what happens next based
//!    on which side is connecting and whether the failure was about
//!    credentials or reachability.
//! 4. When the direct channel is out of reach, commands go through
//!    [`relay::RelaySender`] into a per-owner [`relay::RelayStore`] log
//!    instead.  [`remote::RemoteRelayStore`] reaches that log on a relay
//!    service, so the controller and the host can sit on different networks.

pub mod relay;
pub mod remote;
pub mod router;
pub mod ws_client;

pub use relay::{
    ConnectionRecord, MemoryRelayStore, RelayEntry, RelayError, RelaySender, RelayStore,
};
pub use remote::{RelayReply, RelayRequest, RemoteRelayStore};
pub use router::{
    classify_rejection, ConnectError, ConnectRequest, Connector, Decision, Established,
    FailureKind, FallbackPolicy, Side, TargetHints, TransportRouter,
};
pub use ws_client::{DirectLink, WsConnector};
