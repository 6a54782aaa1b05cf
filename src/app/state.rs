//! Application state shared across routes

use std::sync::Arc;
use tokio::sync::watch;

use crate::config::Config;
use crate::game::RoomRegistry;
use crate::matchmaking::MatchmakingService;
use crate::store::StatsClient;
use crate::util::time::tick_duration;
use crate::ws::connection::ConnectionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub connections: Arc<ConnectionManager>,
    pub rooms: Arc<RoomRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
    pub stats: StatsClient,
    /// Flipped to `true` once at shutdown
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let stats = StatsClient::new(&config);
        let connections = Arc::new(ConnectionManager::new(config.outbound_queue_size));

        let rooms = Arc::new(RoomRegistry::new(
            connections.clone(),
            stats.clone(),
            shutdown_rx,
            config.max_rooms,
            tick_duration(config.tick_rate),
        ));

        // Matched groups land in the registry and are told via their connections
        let matchmaking = Arc::new(MatchmakingService::new(
            rooms.clone(),
            connections.clone(),
        ));

        Self {
            config,
            connections,
            rooms,
            matchmaking,
            stats,
            shutdown: Arc::new(shutdown_tx),
        }
    }

    /// Receiver for the shutdown signal
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
