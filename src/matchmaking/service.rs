//! Matchmaking service - manages per-mode queues and room creation

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::game::entity::PlayerId;
use crate::ws::protocol::GameMode;

use super::queue::{MatchRequest, MatchmakingQueue};

/// Map used for matchmade rooms
pub const DEFAULT_MAP_ID: u32 = 1;

/// How long a match assignment stays visible through `assignment`
pub const ASSIGNMENT_TTL: Duration = Duration::from_secs(300);

/// Descriptor of a freshly created room
#[derive(Debug, Clone, Serialize)]
pub struct RoomHandle {
    pub id: Uuid,
    pub name: String,
    pub mode: GameMode,
    pub max_players: usize,
    pub map_id: u32,
}

/// Room creation failed during a matching pass
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Room creation failed: {0}")]
    RoomCreation(String),
}

/// Creates rooms for matched batches
pub trait RoomFactory: Send + Sync {
    fn create_room(
        &self,
        name: &str,
        mode: GameMode,
        required_players: usize,
        map_id: u32,
    ) -> Result<RoomHandle, DispatchError>;
}

/// Tells a matched player where to go
pub trait MatchNotifier: Send + Sync {
    /// Returns false when the player had no live connection
    fn notify_match(&self, player_id: PlayerId, room: &RoomHandle) -> bool;
}

/// Matchmaking service
pub struct MatchmakingService {
    queues: HashMap<GameMode, Mutex<MatchmakingQueue>>,
    rooms: Arc<dyn RoomFactory>,
    notifier: Arc<dyn MatchNotifier>,
    /// Player -> room assigned by the latest matching pass, with assignment time
    assignments: DashMap<PlayerId, (Uuid, Instant)>,
    assignment_ttl: Duration,
}

impl MatchmakingService {
    pub fn new(rooms: Arc<dyn RoomFactory>, notifier: Arc<dyn MatchNotifier>) -> Self {
        let queues = GameMode::ALL
            .into_iter()
            .map(|mode| (mode, Mutex::new(MatchmakingQueue::new())))
            .collect();

        Self {
            queues,
            rooms,
            notifier,
            assignments: DashMap::new(),
            assignment_ttl: ASSIGNMENT_TTL,
        }
    }

    pub fn with_assignment_ttl(mut self, ttl: Duration) -> Self {
        self.assignment_ttl = ttl;
        self
    }

    fn queue(&self, mode: GameMode) -> &Mutex<MatchmakingQueue> {
        // every mode gets a queue in `new`
        &self.queues[&mode]
    }

    /// Add a request to its mode's queue
    pub async fn enqueue(&self, request: MatchRequest) {
        let player_id = request.player_id;
        let mode = request.mode;
        self.assignments.remove(&player_id);

        let mut queue = self.queue(mode).lock().await;
        queue.enqueue(request);

        info!(player_id, %mode, queue_size = queue.len(), "Player joined matchmaking queue");
    }

    /// Withdraw a player's request from a mode's queue
    pub async fn dequeue(&self, player_id: PlayerId, mode: GameMode) -> bool {
        let removed = self.queue(mode).lock().await.dequeue(player_id);
        if removed {
            info!(player_id, %mode, "Player left matchmaking queue");
        }
        removed
    }

    pub async fn queue_depth(&self, mode: GameMode) -> usize {
        self.queue(mode).lock().await.len()
    }

    pub async fn all_queue_depths(&self) -> HashMap<GameMode, usize> {
        let mut depths = HashMap::with_capacity(self.queues.len());
        for (mode, queue) in &self.queues {
            depths.insert(*mode, queue.lock().await.len());
        }
        depths
    }

    /// Room a player was matched into, if any
    pub fn assignment(&self, player_id: PlayerId) -> Option<Uuid> {
        self.assignments
            .get(&player_id)
            .filter(|entry| entry.1.elapsed() < self.assignment_ttl)
            .map(|entry| entry.0)
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }

    fn prune_assignments(&self) {
        let ttl = self.assignment_ttl;
        let before = self.assignments.len();
        self.assignments.retain(|_, (_, at)| at.elapsed() < ttl);
        let pruned = before.saturating_sub(self.assignments.len());
        if pruned > 0 {
            debug!(pruned, "Expired match assignments");
        }
    }

    /// Form at most one full group per mode. Returns rooms created.
    pub async fn run_matching_pass(&self) -> usize {
        self.prune_assignments();
        let mut created = 0;

        for mode in GameMode::ALL {
            let required = mode.required_players();
            let mut queue = self.queue(mode).lock().await;

            if let Some(batch) = queue.take_batch(required) {
                let name = format!("{}-{}", mode, Utc::now().format("%H%M%S"));

                match self.rooms.create_room(&name, mode, required, DEFAULT_MAP_ID) {
                    Ok(handle) => {
                        created += 1;
                        info!(
                            room_id = %handle.id,
                            %mode,
                            player_count = batch.len(),
                            "Matched players into room"
                        );
                        for request in &batch {
                            self.assignments
                                .insert(request.player_id, (handle.id, Instant::now()));
                            if !self.notifier.notify_match(request.player_id, &handle) {
                                warn!(
                                    player_id = request.player_id,
                                    room_id = %handle.id,
                                    "Matched player has no live connection"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        error!(%mode, error = %e, "Room creation failed, re-queueing batch");
                        queue.requeue_front(batch);
                    }
                }
            }

            if let Some(wait) = queue.oldest_wait() {
                trace!(
                    %mode,
                    waiting = queue.len(),
                    oldest_wait_ms = wait.as_millis() as u64,
                    "Players still queued"
                );
            }
        }

        if created > 0 {
            debug!(created, "Matching pass complete");
        }
        created
    }

    /// Run matching passes on a fixed interval until shutdown
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_ms = every.as_millis() as u64, "Matchmaking started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_matching_pass().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Matchmaking stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRooms {
        created: AtomicUsize,
        fail: AtomicBool,
    }

    impl RoomFactory for FakeRooms {
        fn create_room(
            &self,
            name: &str,
            mode: GameMode,
            required_players: usize,
            map_id: u32,
        ) -> Result<RoomHandle, DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::RoomCreation("capacity".into()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(RoomHandle {
                id: Uuid::new_v4(),
                name: name.to_string(),
                mode,
                max_players: required_players,
                map_id,
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notified: SyncMutex<Vec<(PlayerId, Uuid)>>,
    }

    impl MatchNotifier for RecordingNotifier {
        fn notify_match(&self, player_id: PlayerId, room: &RoomHandle) -> bool {
            self.notified.lock().push((player_id, room.id));
            true
        }
    }

    fn service() -> (MatchmakingService, Arc<FakeRooms>, Arc<RecordingNotifier>) {
        let rooms = Arc::new(FakeRooms::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = MatchmakingService::new(rooms.clone(), notifier.clone());
        (service, rooms, notifier)
    }

    fn request(player_id: PlayerId, mode: GameMode) -> MatchRequest {
        MatchRequest::new(player_id, 1, mode, "session")
    }

    #[tokio::test]
    async fn full_group_creates_exactly_one_room() {
        let (service, rooms, notifier) = service();
        for pid in 1..=2 {
            service.enqueue(request(pid, GameMode::DeathMatch)).await;
        }
        for pid in 3..=4 {
            service.enqueue(request(pid, GameMode::DeathMatch)).await;
        }

        assert_eq!(service.run_matching_pass().await, 1);

        assert_eq!(rooms.created.load(Ordering::SeqCst), 1);
        assert_eq!(service.queue_depth(GameMode::DeathMatch).await, 0);

        let notified = notifier.notified.lock().clone();
        assert_eq!(notified.len(), 4);
        let room_id = notified[0].1;
        assert!(notified.iter().all(|(_, id)| *id == room_id));
        assert_eq!(service.assignment(3), Some(room_id));
    }

    #[tokio::test]
    async fn one_short_leaves_queue_untouched() {
        let (service, rooms, _) = service();
        for pid in 1..=3 {
            service.enqueue(request(pid, GameMode::DeathMatch)).await;
        }

        assert_eq!(service.run_matching_pass().await, 0);
        assert_eq!(rooms.created.load(Ordering::SeqCst), 0);
        assert_eq!(service.queue_depth(GameMode::DeathMatch).await, 3);
    }

    #[tokio::test]
    async fn modes_match_independently() {
        let (service, _, _) = service();
        for pid in 1..=6 {
            service.enqueue(request(pid, GameMode::TeamDeathMatch)).await;
        }
        for pid in 10..=12 {
            service.enqueue(request(pid, GameMode::FlagCapture)).await;
        }

        assert_eq!(service.run_matching_pass().await, 1);
        let depths = service.all_queue_depths().await;
        assert_eq!(depths[&GameMode::TeamDeathMatch], 0);
        assert_eq!(depths[&GameMode::FlagCapture], 3);
        assert_eq!(depths[&GameMode::CapturePoint], 0);
    }

    #[tokio::test]
    async fn failed_creation_requeues_batch() {
        let (service, rooms, notifier) = service();
        rooms.fail.store(true, Ordering::SeqCst);
        for pid in 1..=5 {
            service.enqueue(request(pid, GameMode::DeathMatch)).await;
        }

        assert_eq!(service.run_matching_pass().await, 0);
        assert_eq!(service.queue_depth(GameMode::DeathMatch).await, 5);
        assert!(notifier.notified.lock().is_empty());

        rooms.fail.store(false, Ordering::SeqCst);
        assert_eq!(service.run_matching_pass().await, 1);
        let notified: Vec<PlayerId> = notifier.notified.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(notified, vec![1, 2, 3, 4]);
        assert_eq!(service.queue_depth(GameMode::DeathMatch).await, 1);
    }

    #[tokio::test]
    async fn one_room_per_mode_per_pass() {
        let (service, rooms, notifier) = service();
        for pid in 1..=8 {
            service.enqueue(request(pid, GameMode::DeathMatch)).await;
        }

        assert_eq!(service.run_matching_pass().await, 1);
        assert_eq!(rooms.created.load(Ordering::SeqCst), 1);
        assert_eq!(service.queue_depth(GameMode::DeathMatch).await, 4);
        let first: Vec<PlayerId> = notifier.notified.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(first, vec![1, 2, 3, 4]);

        assert_eq!(service.run_matching_pass().await, 1);
        assert_eq!(service.queue_depth(GameMode::DeathMatch).await, 0);
    }

    #[tokio::test]
    async fn expired_assignments_are_pruned() {
        let rooms = Arc::new(FakeRooms::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let service =
            MatchmakingService::new(rooms, notifier).with_assignment_ttl(Duration::ZERO);
        for pid in 1..=4 {
            service.enqueue(request(pid, GameMode::DeathMatch)).await;
        }

        assert_eq!(service.run_matching_pass().await, 1);
        assert_eq!(service.assignment(1), None);
        assert_eq!(service.assignment_count(), 4);

        service.run_matching_pass().await;
        assert_eq!(service.assignment_count(), 0);
    }

    #[tokio::test]
    async fn dequeue_withdraws_request() {
        let (service, _, _) = service();
        service.enqueue(request(1, GameMode::CapturePoint)).await;
        assert!(service.dequeue(1, GameMode::CapturePoint).await);
        assert!(!service.dequeue(1, GameMode::CapturePoint).await);
        assert_eq!(service.queue_depth(GameMode::CapturePoint).await, 0);
    }
}
