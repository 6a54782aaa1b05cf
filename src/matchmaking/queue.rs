//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::game::entity::PlayerId;
use crate::ws::protocol::GameMode;

/// A player's pending queue entry
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub player_id: PlayerId,
    pub character_id: u32,
    pub mode: GameMode,
    pub submitted_at: Instant,
    pub session_id: String,
}

impl MatchRequest {
    pub fn new(
        player_id: PlayerId,
        character_id: u32,
        mode: GameMode,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            player_id,
            character_id,
            mode,
            submitted_at: Instant::now(),
            session_id: session_id.into(),
        }
    }

    /// How long this request has been waiting
    pub fn wait_time(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// FIFO of requests for a single mode
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<MatchRequest>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request, replacing an earlier one from the same player
    pub fn enqueue(&mut self, request: MatchRequest) {
        self.queue.retain(|r| r.player_id != request.player_id);
        self.queue.push_back(request);
    }

    /// Withdraw a player's request
    pub fn dequeue(&mut self, player_id: PlayerId) -> bool {
        match self.queue.iter().position(|r| r.player_id == player_id) {
            Some(pos) => self.queue.remove(pos).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.queue.iter().any(|r| r.player_id == player_id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop the oldest `count` requests, or nothing if fewer are queued
    pub fn take_batch(&mut self, count: usize) -> Option<Vec<MatchRequest>> {
        if count == 0 || self.queue.len() < count {
            return None;
        }
        Some(self.queue.drain(..count).collect())
    }

    /// Put a batch back at the head, keeping its original order
    pub fn requeue_front(&mut self, batch: Vec<MatchRequest>) {
        for request in batch.into_iter().rev() {
            if !self.contains(request.player_id) {
                self.queue.push_front(request);
            }
        }
    }

    /// Wait time of the oldest request
    pub fn oldest_wait(&self) -> Option<Duration> {
        self.queue.front().map(MatchRequest::wait_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(player_id: PlayerId) -> MatchRequest {
        MatchRequest::new(player_id, 1, GameMode::DeathMatch, format!("session-{player_id}"))
    }

    fn ids(queue: &mut MatchmakingQueue, n: usize) -> Vec<PlayerId> {
        queue
            .take_batch(n)
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.player_id)
            .collect()
    }

    #[test]
    fn rejoin_replaces_earlier_entry() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(request(1));
        queue.enqueue(request(2));
        queue.enqueue(request(1));

        assert_eq!(queue.len(), 2);
        assert_eq!(ids(&mut queue, 2), vec![2, 1]);
    }

    #[test]
    fn dequeue_reports_whether_removed() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(request(1));
        assert!(queue.dequeue(1));
        assert!(!queue.dequeue(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn take_batch_needs_enough_requests() {
        let mut queue = MatchmakingQueue::new();
        for pid in 1..=3 {
            queue.enqueue(request(pid));
        }
        assert!(queue.take_batch(4).is_none());
        assert_eq!(queue.len(), 3);
        assert_eq!(ids(&mut queue, 2), vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn requeue_front_restores_original_order() {
        let mut queue = MatchmakingQueue::new();
        for pid in 1..=5 {
            queue.enqueue(request(pid));
        }
        let batch = queue.take_batch(3).unwrap();
        queue.enqueue(request(6));
        queue.requeue_front(batch);

        assert_eq!(ids(&mut queue, 5), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(&mut queue, 1), vec![6]);
    }

    #[test]
    fn requeue_skips_players_who_queued_again() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(request(1));
        queue.enqueue(request(2));
        let batch = queue.take_batch(2).unwrap();
        queue.enqueue(request(2));
        queue.requeue_front(batch);

        assert_eq!(ids(&mut queue, 2), vec![1, 2]);
        assert!(queue.is_empty());
    }
}
