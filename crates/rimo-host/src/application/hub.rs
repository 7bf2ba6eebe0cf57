//! The host's single event loop.
//!
//! # Ownership
//!
//! [`Hub`] is the only owner of session state.  Socket tasks never touch
//! the registry directly; they send [`HubEvent`]s down one `mpsc` channel and
//! the hub applies them one at a time:
//!
//! ```text
//!  socket task ─┐
//!  socket task ─┼──► mpsc<HubEvent> ──► Hub::handle ──► SessionRegistry
//!  socket task ─┘                                  ├──► CaptureLoop
//!                                                  ├──► per-connection worker
//!                                                  └──► relay listeners
//! ```
//!
//! # Per-connection resources
//!
//! Each connection gets, on `Connected`:
//!
//! - a **worker** task that runs its host-executed commands, one-shot
//!   screenshots and display listings in arrival order, so a slow
//!   capability call never stalls the hub or other connections;
//! - a **stats** task pushing `system-stats` every `stats_interval`.
//!
//! and may later acquire a mirror session and, if it registers as a host
//! with a known owner, a share of that owner's relay listener.
//! `Disconnected` drops all of them before the registry is told, so nothing
//! outlives its connection.
//!
//! # Relay listeners
//!
//! There is at most one listener per owner, however many host connections
//! name that owner.  Each host holds a reference; the listener is dropped
//! with the last one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use rimo_core::protocol::commands::DisplayInfo;
use rimo_core::protocol::frame::jpeg_data_url;
use rimo_core::{Command, ConnectionId, DeviceRole, OwnerId, Route, TransportKind};

use crate::application::capture_loop::{CaptureLoop, ConnectionFrameSink, ScreenCapture};
use crate::application::command_channel::CommandChannel;
use crate::application::relay_bridge::{RelayBridge, RelayListener};
use crate::application::session_registry::{Outbound, SessionRegistry};
use crate::application::stats::{spawn_stats_task, MetricsSampler};
use crate::application::task::TaskGuard;
use crate::domain::HostConfig;

/// Depth of each connection's worker queue.
const WORKER_QUEUE: usize = 128;

/// Something that happened on a connection.
#[derive(Debug)]
pub enum HubEvent {
    /// A connection passed its handshake.
    Connected {
        id: ConnectionId,
        transport: TransportKind,
        outbound: Outbound,
    },
    /// A decoded command arrived on a connection.
    Inbound { id: ConnectionId, command: Command },
    /// The connection's socket is gone.
    Disconnected { id: ConnectionId },
}

/// Capabilities the hub drives.
#[derive(Clone)]
pub struct HubServices {
    pub channel: Arc<CommandChannel>,
    pub capture: Arc<dyn ScreenCapture>,
    pub sampler: Arc<dyn MetricsSampler>,
    /// `None` when no relay store is configured.
    pub relay: Option<RelayBridge>,
}

/// Timing and identity knobs, taken from [`HostConfig`].
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub mirror_interval: Duration,
    pub stats_interval: Duration,
    pub relay_owner: Option<OwnerId>,
}

impl From<&HostConfig> for HubSettings {
    fn from(cfg: &HostConfig) -> Self {
        Self {
            mirror_interval: cfg.mirror_interval,
            stats_interval: cfg.stats_interval,
            relay_owner: cfg.relay_owner.clone(),
        }
    }
}

struct ConnectionTasks {
    worker_tx: mpsc::Sender<Command>,
    _worker: TaskGuard,
    _stats: TaskGuard,
    /// Owner whose shared relay listener this connection holds.
    relay_owner: Option<OwnerId>,
}

/// One owner's relay listener and the host connections holding it.
struct SharedListener {
    listener: RelayListener,
    hosts: HashSet<ConnectionId>,
}

pub struct Hub {
    registry: SessionRegistry,
    mirror: CaptureLoop,
    connections: HashMap<ConnectionId, ConnectionTasks>,
    relay_listeners: HashMap<OwnerId, SharedListener>,
    services: HubServices,
    settings: HubSettings,
}

impl Hub {
    pub fn new(services: HubServices, settings: HubSettings) -> Self {
        Self {
            registry: SessionRegistry::new(),
            mirror: CaptureLoop::new(Arc::clone(&services.capture)),
            connections: HashMap::new(),
            relay_listeners: HashMap::new(),
            services,
            settings,
        }
    }

    /// Applies events until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        info!("hub stopped");
    }

    pub fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected {
                id,
                transport,
                outbound,
            } => self.on_connected(id, transport, outbound),
            HubEvent::Inbound { id, command } => self.on_inbound(id, command),
            HubEvent::Disconnected { id } => self.on_disconnected(id),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn is_mirroring(&self, id: ConnectionId) -> bool {
        self.mirror.is_running(id)
    }

    pub fn has_relay_listener(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .and_then(|c| c.relay_owner.as_ref())
            .is_some_and(|owner| self.relay_listeners.contains_key(owner))
    }

    /// Number of distinct relay listeners, one per owner at most.
    pub fn relay_listener_count(&self) -> usize {
        self.relay_listeners.len()
    }

    /// Worker and stats tasks plus any mirror or relay listener still held
    /// for `id`.
    pub fn active_task_count(&self, id: ConnectionId) -> usize {
        let owned = self
            .connections
            .get(&id)
            .map_or(0, |_| 2 + usize::from(self.has_relay_listener(id)));
        owned + usize::from(self.mirror.is_running(id))
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    fn on_connected(&mut self, id: ConnectionId, transport: TransportKind, outbound: Outbound) {
        let (worker_tx, worker_rx) = mpsc::channel(WORKER_QUEUE);
        let worker = TaskGuard::spawn(run_worker(
            id,
            worker_rx,
            Arc::clone(&self.services.channel),
            Arc::clone(&self.services.capture),
            outbound.clone(),
        ));
        let stats = spawn_stats_task(
            Arc::clone(&self.services.sampler),
            self.settings.stats_interval,
            outbound.clone(),
        );
        self.connections.insert(
            id,
            ConnectionTasks {
                worker_tx,
                _worker: worker,
                _stats: stats,
                relay_owner: None,
            },
        );
        self.registry.connect(id, transport, outbound);
        info!(%id, "connection joined the hub");
    }

    fn on_inbound(&mut self, id: ConnectionId, command: Command) {
        if self.registry.get(id).is_none() {
            debug!(%id, "{} from unknown connection ignored", command.type_name());
            return;
        }
        match command.route() {
            Route::ExecuteOnHost => self.enqueue(id, command),
            Route::Session => self.on_session_command(id, command),
            Route::Forward => {
                let delivered = self.registry.broadcast_except(id, &command);
                debug!(%id, delivered, "forwarded {}", command.type_name());
            }
        }
    }

    fn on_session_command(&mut self, id: ConnectionId, command: Command) {
        match command {
            Command::SetRole { role, owner_id } => self.on_set_role(id, role, owner_id),
            Command::StartMirroring { display_id } => {
                let Some(outbound) = self.registry.get(id).map(|d| d.outbound().clone()) else {
                    return;
                };
                let sink = Arc::new(ConnectionFrameSink::new(outbound));
                self.mirror
                    .start(id, display_id, self.settings.mirror_interval, sink);
            }
            Command::StopMirroring {} => {
                self.mirror.stop(id);
            }
            cmd @ (Command::GetScreenshot { .. } | Command::GetDisplays {}) => {
                self.enqueue(id, cmd);
            }
            other => debug!(%id, "{} has no session handler", other.type_name()),
        }
    }

    fn on_set_role(&mut self, id: ConnectionId, role: DeviceRole, owner_id: Option<OwnerId>) {
        let owner = match role {
            DeviceRole::Host => owner_id.or_else(|| self.settings.relay_owner.clone()),
            DeviceRole::Controller => owner_id,
        };
        if !self.registry.register(id, role, owner.clone()) {
            return;
        }

        match (role, owner) {
            (DeviceRole::Host, Some(owner)) => self.attach_relay(id, owner),
            (DeviceRole::Controller, _) => self.detach_relay(id),
            (DeviceRole::Host, None) => {}
        }
    }

    fn on_disconnected(&mut self, id: ConnectionId) {
        self.mirror.stop(id);
        self.detach_relay(id);
        self.connections.remove(&id);
        self.registry.unregister(id);
    }

    // ── Relay listeners ───────────────────────────────────────────────────────

    /// Makes `id` a holder of `owner`'s listener, starting one if none is
    /// running.
    fn attach_relay(&mut self, id: ConnectionId, owner: OwnerId) {
        if self.services.relay.is_none() || !self.connections.contains_key(&id) {
            return;
        }
        let held = self
            .connections
            .get(&id)
            .and_then(|t| t.relay_owner.as_ref())
            == Some(&owner);
        let live = self
            .relay_listeners
            .get(&owner)
            .is_some_and(|s| s.listener.is_active());
        if held && live {
            return;
        }
        if !held {
            self.detach_relay(id);
        }

        if !live {
            let Some(bridge) = &self.services.relay else {
                return;
            };
            info!(%id, %owner, "draining relay log");
            let listener = bridge.listen(owner.clone());
            let hosts = self
                .relay_listeners
                .remove(&owner)
                .map(|s| s.hosts)
                .unwrap_or_default();
            self.relay_listeners
                .insert(owner.clone(), SharedListener { listener, hosts });
        }
        if let Some(shared) = self.relay_listeners.get_mut(&owner) {
            shared.hosts.insert(id);
            debug!(%id, %owner, holders = shared.hosts.len(), "relay listener shared");
        }
        if let Some(tasks) = self.connections.get_mut(&id) {
            tasks.relay_owner = Some(owner);
        }
    }

    /// Drops `id`'s hold on its owner's listener; the last holder stops it.
    fn detach_relay(&mut self, id: ConnectionId) {
        let Some(owner) = self
            .connections
            .get_mut(&id)
            .and_then(|t| t.relay_owner.take())
        else {
            return;
        };
        let Some(shared) = self.relay_listeners.get_mut(&owner) else {
            return;
        };
        shared.hosts.remove(&id);
        if shared.hosts.is_empty() {
            self.relay_listeners.remove(&owner);
            debug!(%id, %owner, "last holder left; relay listener stopped");
        }
    }

    fn enqueue(&self, id: ConnectionId, command: Command) {
        let Some(tasks) = self.connections.get(&id) else {
            return;
        };
        match tasks.worker_tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => {
                warn!(%id, "worker queue full; {} dropped", cmd.type_name());
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Fallback answer to `get-displays` when the capability cannot list them.
pub fn fallback_displays() -> Vec<DisplayInfo> {
    vec![DisplayInfo {
        id: 0,
        name: "Main Display".to_string(),
    }]
}

async fn run_worker(
    id: ConnectionId,
    mut commands: mpsc::Receiver<Command>,
    channel: Arc<CommandChannel>,
    capture: Arc<dyn ScreenCapture>,
    outbound: Outbound,
) {
    while let Some(cmd) = commands.recv().await {
        match &cmd {
            Command::GetScreenshot { display_id } => match capture.capture(*display_id).await {
                Ok(jpeg) => {
                    let _ = outbound.try_send(Command::ScreenshotData {
                        blob: jpeg_data_url(&jpeg),
                    });
                }
                Err(e) => debug!(%id, "screenshot failed: {e}"),
            },
            Command::GetDisplays {} => {
                let displays = match capture.list_displays().await {
                    Ok(list) if !list.is_empty() => list,
                    Ok(_) => fallback_displays(),
                    Err(e) => {
                        debug!(%id, "display listing failed: {e}");
                        fallback_displays()
                    }
                };
                let _ = outbound.try_send(Command::DisplaysList { displays });
            }
            _ => {
                if let Err(e) = channel.execute(&cmd).await {
                    warn!(%id, "{} not executed: {e}", cmd.type_name());
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::stats::SystemSnapshot;
    use crate::infrastructure::platform::mock::{
        InputCall, MockInputExecutor, MockMetricsSampler, MockScreenCapture,
    };
    use rimo_core::DeviceSummary;
    use rimo_link::{MemoryRelayStore, RelayStore};
    use uuid::Uuid;

    struct Fixture {
        hub: Hub,
        executor: Arc<MockInputExecutor>,
        store: Arc<MemoryRelayStore>,
    }

    fn fixture_with(capture: MockScreenCapture, relay_owner: Option<OwnerId>) -> Fixture {
        let executor = Arc::new(MockInputExecutor::new());
        let store = Arc::new(MemoryRelayStore::new());
        let channel = Arc::new(CommandChannel::new(executor.clone(), 1.0));
        let capture: Arc<dyn ScreenCapture> = Arc::new(capture);
        let services = HubServices {
            channel: channel.clone(),
            capture: capture.clone(),
            sampler: Arc::new(MockMetricsSampler::new(SystemSnapshot {
                cpu: 1,
                mem: 2,
                battery: None,
                is_charging: false,
            })),
            relay: Some(RelayBridge::new(
                store.clone(),
                channel,
                capture,
                Duration::from_millis(80),
            )),
        };
        let settings = HubSettings {
            mirror_interval: Duration::from_millis(80),
            stats_interval: Duration::from_secs(3),
            relay_owner,
        };
        Fixture {
            hub: Hub::new(services, settings),
            executor,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockScreenCapture::new(), None)
    }

    fn connect(hub: &mut Hub) -> (ConnectionId, mpsc::Receiver<Command>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        hub.handle(HubEvent::Connected {
            id,
            transport: TransportKind::Direct,
            outbound: tx,
        });
        (id, rx)
    }

    fn send(hub: &mut Hub, id: ConnectionId, command: Command) {
        hub.handle(HubEvent::Inbound { id, command });
    }

    fn drain(rx: &mut mpsc::Receiver<Command>) -> Vec<Command> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn set_role(role: DeviceRole, owner: Option<&str>) -> Command {
        Command::SetRole {
            role,
            owner_id: owner.map(OwnerId::new),
        }
    }

    #[tokio::test]
    async fn test_host_and_controller_see_each_other() {
        // Arrange
        let mut f = fixture();
        let (host, mut host_rx) = connect(&mut f.hub);
        let (ctrl, mut ctrl_rx) = connect(&mut f.hub);

        // Act
        send(&mut f.hub, host, set_role(DeviceRole::Host, None));
        send(&mut f.hub, ctrl, set_role(DeviceRole::Controller, None));

        // Assert
        let host_lists: Vec<_> = drain(&mut host_rx)
            .into_iter()
            .filter_map(|c| match c {
                Command::DevicesList { devices } => Some(devices),
                _ => None,
            })
            .collect();
        assert_eq!(
            host_lists.last(),
            Some(&vec![DeviceSummary {
                id: ctrl,
                role: DeviceRole::Controller
            }])
        );
        assert!(drain(&mut ctrl_rx).contains(&Command::DevicesList {
            devices: vec![DeviceSummary {
                id: host,
                role: DeviceRole::Host
            }]
        }));
    }

    #[tokio::test]
    async fn test_input_commands_execute_in_arrival_order() {
        let mut f = fixture();
        let (ctrl, _rx) = connect(&mut f.hub);

        send(
            &mut f.hub,
            ctrl,
            Command::MouseMove {
                dx: 10.0,
                dy: -5.0,
                sensitivity: 2.0,
            },
        );
        send(&mut f.hub, ctrl, Command::MouseScroll { dy: 1.0 });
        settle().await;

        assert_eq!(
            f.executor.calls(),
            vec![InputCall::Move(20.0, -10.0), InputCall::Scroll(-1.0)]
        );
    }

    #[tokio::test]
    async fn test_peer_commands_are_forwarded_to_others_only() {
        let mut f = fixture();
        let (host, mut host_rx) = connect(&mut f.hub);
        let (_ctrl, mut ctrl_rx) = connect(&mut f.hub);
        drain(&mut host_rx);
        drain(&mut ctrl_rx);

        let clip = Command::SyncClipboard { text: "hi".into() };
        send(&mut f.hub, host, clip.clone());

        assert_eq!(drain(&mut ctrl_rx), vec![clip]);
        assert!(drain(&mut host_rx).is_empty());
        assert!(f.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_get_displays_falls_back_when_capture_fails() {
        let mut f = fixture_with(MockScreenCapture::failing(), None);
        let (ctrl, mut rx) = connect(&mut f.hub);

        send(&mut f.hub, ctrl, Command::GetDisplays {});
        settle().await;

        assert!(drain(&mut rx).contains(&Command::DisplaysList {
            displays: fallback_displays()
        }));
    }

    #[tokio::test]
    async fn test_get_screenshot_answers_requester_only() {
        let mut f = fixture();
        let (ctrl, mut ctrl_rx) = connect(&mut f.hub);
        let (_other, mut other_rx) = connect(&mut f.hub);
        drain(&mut ctrl_rx);
        drain(&mut other_rx);

        send(&mut f.hub, ctrl, Command::GetScreenshot { display_id: 0 });
        settle().await;

        let got = drain(&mut ctrl_rx);
        assert_eq!(got.len(), 1);
        assert!(matches!(&got[0], Command::ScreenshotData { blob } if blob.starts_with("data:image/jpeg")));
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_every_task() {
        // Arrange
        let mut f = fixture_with(MockScreenCapture::new(), Some(OwnerId::new("u")));
        let (host, _rx) = connect(&mut f.hub);
        send(&mut f.hub, host, set_role(DeviceRole::Host, None));
        send(&mut f.hub, host, Command::StartMirroring { display_id: 0 });
        settle().await;
        assert!(f.hub.is_mirroring(host));
        assert!(f.hub.has_relay_listener(host));
        assert_eq!(f.hub.active_task_count(host), 4);

        // Act
        f.hub.handle(HubEvent::Disconnected { id: host });
        settle().await;

        // Assert
        assert_eq!(f.hub.active_task_count(host), 0);
        assert!(f.hub.registry().is_empty());
        assert_eq!(f.store.subscriber_count(&OwnerId::new("u")), 0);
    }

    #[tokio::test]
    async fn test_host_with_owner_drains_relay_log() {
        let mut f = fixture();
        let owner = OwnerId::new("owner-u");
        f.store
            .append(&owner, Command::MouseScroll { dy: 2.0 })
            .await
            .unwrap();
        let (host, _rx) = connect(&mut f.hub);

        send(&mut f.hub, host, set_role(DeviceRole::Host, Some("owner-u")));
        settle().await;

        assert_eq!(f.executor.calls(), vec![InputCall::Scroll(-2.0)]);
        assert!(f.store.pending_keys(&owner).is_empty());
    }

    #[tokio::test]
    async fn test_two_hosts_of_one_owner_execute_each_entry_once() {
        // Arrange
        let mut f = fixture();
        let owner = OwnerId::new("u");
        let (first, _rx1) = connect(&mut f.hub);
        let (second, _rx2) = connect(&mut f.hub);
        send(&mut f.hub, first, set_role(DeviceRole::Host, Some("u")));
        send(&mut f.hub, second, set_role(DeviceRole::Host, Some("u")));
        settle().await;

        // Act
        f.store
            .append(&owner, Command::TypeString { text: "pay".into() })
            .await
            .unwrap();
        settle().await;

        // Assert
        assert_eq!(f.executor.calls(), vec![InputCall::Type("pay".into())]);
        assert_eq!(f.hub.relay_listener_count(), 1);
        assert_eq!(f.store.subscriber_count(&owner), 1);
        assert!(f.store.pending_keys(&owner).is_empty());
    }

    #[tokio::test]
    async fn test_shared_relay_listener_outlives_first_host() {
        // Arrange
        let mut f = fixture();
        let owner = OwnerId::new("u");
        let (first, _rx1) = connect(&mut f.hub);
        let (second, _rx2) = connect(&mut f.hub);
        send(&mut f.hub, first, set_role(DeviceRole::Host, Some("u")));
        send(&mut f.hub, second, set_role(DeviceRole::Host, Some("u")));

        // Act
        f.hub.handle(HubEvent::Disconnected { id: first });
        settle().await;

        // Assert
        assert!(f.hub.has_relay_listener(second));
        assert_eq!(f.store.subscriber_count(&owner), 1);

        f.hub.handle(HubEvent::Disconnected { id: second });
        settle().await;
        assert_eq!(f.hub.relay_listener_count(), 0);
        assert_eq!(f.store.subscriber_count(&owner), 0);
    }

    #[tokio::test]
    async fn test_host_turning_controller_releases_its_share() {
        let mut f = fixture();
        let (host, _rx) = connect(&mut f.hub);
        send(&mut f.hub, host, set_role(DeviceRole::Host, Some("u")));
        assert!(f.hub.has_relay_listener(host));

        send(&mut f.hub, host, set_role(DeviceRole::Controller, None));

        assert!(!f.hub.has_relay_listener(host));
        assert_eq!(f.hub.relay_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_controller_never_subscribes_to_relay() {
        let mut f = fixture_with(MockScreenCapture::new(), Some(OwnerId::new("u")));
        let (ctrl, _rx) = connect(&mut f.hub);

        send(&mut f.hub, ctrl, set_role(DeviceRole::Controller, Some("u")));

        assert!(!f.hub.has_relay_listener(ctrl));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mirroring_without_session_is_noop() {
        let mut f = fixture();
        let (ctrl, _rx) = connect(&mut f.hub);

        send(&mut f.hub, ctrl, Command::StopMirroring {});
        send(&mut f.hub, ctrl, Command::StopMirroring {});

        assert!(!f.hub.is_mirroring(ctrl));
        assert_eq!(f.hub.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_commands_from_unknown_connection_are_ignored() {
        let mut f = fixture();
        send(&mut f.hub, Uuid::new_v4(), Command::MouseScroll { dy: 1.0 });
        settle().await;
        assert!(f.executor.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_are_pushed_to_each_connection() {
        let mut f = fixture();
        let (_id, mut rx) = connect(&mut f.hub);

        tokio::time::sleep(Duration::from_millis(3_100)).await;

        assert!(drain(&mut rx)
            .iter()
            .any(|c| matches!(c, Command::SystemStats { cpu: 1, mem: 2, .. })));
    }
}
