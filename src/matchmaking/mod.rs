//! Matchmaking queues and room hand-off

pub mod queue;
pub mod service;

pub use queue::{MatchRequest, MatchmakingQueue};
pub use service::{DispatchError, MatchNotifier, MatchmakingService, RoomFactory, RoomHandle};
