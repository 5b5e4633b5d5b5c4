/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Live partition assignment, fed by the rebalance callback.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::info;

use super::record::TopicPartition;

/// A change to the set of partitions owned by this consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentEvent {
    Added(Vec<TopicPartition>),
    Removed(Vec<TopicPartition>),
}

/// Tracks the partitions currently assigned and fans changes out to subscribers.
///
/// Updates and subscriptions are serialized under one lock, so a subscriber that
/// starts from [`subscribe_with_snapshot`](Self::subscribe_with_snapshot) sees
/// every change after its snapshot exactly once.
#[derive(Debug, Default)]
pub struct AssignmentTracker {
    current: RwLock<BTreeSet<TopicPartition>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AssignmentEvent>>>,
}

impl AssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assigned(&self, partitions: Vec<TopicPartition>) {
        if partitions.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        self.current.write().extend(partitions.iter().cloned());
        info!(partitions = ?partitions, "Partitions assigned");
        Self::broadcast(&mut subscribers, AssignmentEvent::Added(partitions));
    }

    pub fn revoked(&self, partitions: Vec<TopicPartition>) {
        if partitions.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        {
            let mut current = self.current.write();
            for tp in &partitions {
                current.remove(tp);
            }
        }
        info!(partitions = ?partitions, "Partitions revoked");
        Self::broadcast(&mut subscribers, AssignmentEvent::Removed(partitions));
    }

    /// The partitions assigned right now.
    pub fn snapshot(&self) -> Vec<TopicPartition> {
        self.current.read().iter().cloned().collect()
    }

    pub fn contains(&self, tp: &TopicPartition) -> bool {
        self.current.read().contains(tp)
    }

    /// Returns the current assignment and a receiver for every later change.
    pub fn subscribe_with_snapshot(
        &self,
    ) -> (Vec<TopicPartition>, mpsc::UnboundedReceiver<AssignmentEvent>) {
        let mut subscribers = self.subscribers.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.push(tx);
        (self.snapshot(), rx)
    }

    fn broadcast(
        subscribers: &mut Vec<mpsc::UnboundedSender<AssignmentEvent>>,
        event: AssignmentEvent,
    ) {
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_tracks_assign_and_revoke() {
        let tracker = AssignmentTracker::new();
        tracker.assigned(vec![TopicPartition::new("t", 0), TopicPartition::new("t", 1)]);
        tracker.revoked(vec![TopicPartition::new("t", 0)]);
        assert_eq!(tracker.snapshot(), vec![TopicPartition::new("t", 1)]);
        assert!(tracker.contains(&TopicPartition::new("t", 1)));
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes_after_snapshot() {
        let tracker = AssignmentTracker::new();
        tracker.assigned(vec![TopicPartition::new("t", 0)]);

        let (snapshot, mut rx) = tracker.subscribe_with_snapshot();
        assert_eq!(snapshot, vec![TopicPartition::new("t", 0)]);

        tracker.assigned(vec![TopicPartition::new("t", 1)]);
        tracker.revoked(vec![TopicPartition::new("t", 0)]);

        assert_eq!(
            rx.recv().await,
            Some(AssignmentEvent::Added(vec![TopicPartition::new("t", 1)]))
        );
        assert_eq!(
            rx.recv().await,
            Some(AssignmentEvent::Removed(vec![TopicPartition::new("t", 0)]))
        );
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let tracker = AssignmentTracker::new();
        let (_, rx) = tracker.subscribe_with_snapshot();
        drop(rx);
        tracker.assigned(vec![TopicPartition::new("t", 0)]);
        assert!(tracker.subscribers.lock().is_empty());
    }
}
