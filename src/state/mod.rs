/// Bounded per-player score buffers.
pub mod buffer;
/// Per-room observer fan-out.
pub mod hub;
/// Ranking.
pub mod leaderboard;
/// Process-wide counters.
pub mod metrics;
/// Room aggregate.
pub mod room;
/// Room phase transitions.
pub mod state_machine;
/// Room registry.
pub mod store;

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use uuid::Uuid;

use crate::{
    config::{ProcessRole, SessionConfig},
    dao::{archive::FrameArchive, bus::EventBus, local_bus::LocalBus},
    services::{
        broadcast::{BroadcastScheduler, LeaderboardPublisher},
        cleanup::CleanupManager,
        sync_gateway::SyncGateway,
    },
    state::room::ObserverId,
};

pub use self::hub::ObserverHubs;
pub use self::metrics::SessionMetrics;
pub use self::store::GameplayStore;

/// Handle shared by every task and request handler.
pub type SharedState = Arc<AppState>;

/// Central application state: the room store and the components that act on it.
pub struct AppState {
    config: SessionConfig,
    store: Arc<GameplayStore>,
    hubs: Arc<ObserverHubs>,
    metrics: Arc<SessionMetrics>,
    gateway: Arc<SyncGateway>,
    publisher: Arc<LeaderboardPublisher>,
    scheduler: BroadcastScheduler,
    cleanup: CleanupManager,
    next_observer_id: AtomicU64,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Events are exchanged over a private in-process bus and nothing is archived.
    pub fn new(config: SessionConfig) -> SharedState {
        Self::with_collaborators(config, Arc::new(LocalBus::default()), None)
    }

    /// Construct the state around an explicit bus and optional replay archive.
    pub fn with_collaborators(
        config: SessionConfig,
        bus: Arc<dyn EventBus>,
        archive: Option<Arc<dyn FrameArchive>>,
    ) -> SharedState {
        let store = Arc::new(GameplayStore::new(config.buffer_capacity));
        let hubs = Arc::new(ObserverHubs::new(config.observer_channel_capacity));
        let metrics = Arc::new(SessionMetrics::new());
        let gateway = Arc::new(SyncGateway::new(bus, Uuid::new_v4(), metrics.clone()));
        let publisher = Arc::new(LeaderboardPublisher::new(
            hubs.clone(),
            gateway.clone(),
            config.broadcast_only_on_change,
        ));
        let scheduler =
            BroadcastScheduler::new(store.clone(), publisher.clone(), config.broadcast_interval);
        let cleanup = CleanupManager::new(
            store.clone(),
            archive,
            metrics.clone(),
            config.cleanup_delay,
            config.forced_cleanup_delay,
        );

        Arc::new(Self {
            config,
            store,
            hubs,
            metrics,
            gateway,
            publisher,
            scheduler,
            cleanup,
            next_observer_id: AtomicU64::new(1),
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Role of this process.
    pub fn role(&self) -> ProcessRole {
        self.config.role
    }

    /// Identifier stamped on every envelope this process publishes.
    pub fn origin(&self) -> Uuid {
        self.gateway.origin()
    }

    /// Live rooms.
    pub fn store(&self) -> &GameplayStore {
        &self.store
    }

    /// Observer hubs.
    pub fn hubs(&self) -> &ObserverHubs {
        &self.hubs
    }

    /// Process-wide counters.
    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Cross-process publisher.
    pub fn gateway(&self) -> &SyncGateway {
        &self.gateway
    }

    /// Leaderboard publisher.
    pub fn publisher(&self) -> &LeaderboardPublisher {
        &self.publisher
    }

    /// Per-room leaderboard tickers.
    pub fn scheduler(&self) -> &BroadcastScheduler {
        &self.scheduler
    }

    /// Cleanup scheduler.
    pub fn cleanup(&self) -> &CleanupManager {
        &self.cleanup
    }

    /// Allocate an observer id for a subscriber that did not bring one.
    pub fn next_observer_id(&self) -> ObserverId {
        self.next_observer_id.fetch_add(1, Ordering::Relaxed)
    }
}
