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

//! Per-partition offset bookkeeping between deliveries and commit/reset.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::record::TopicPartition;

/// First and most recent delivered offset of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub low: i64,
    pub high: i64,
}

/// Offsets delivered since the last commit or reset.
///
/// Every revocation bumps a generation counter. A record polled at generation
/// `g` must not be recorded once its partition has been revoked after `g`,
/// see [`ConsumeSession::revoked_since`].
#[derive(Debug, Default)]
pub struct ConsumeSession {
    partitions: BTreeMap<TopicPartition, Watermarks>,
    generation: u64,
    revoked_at: BTreeMap<TopicPartition, u64>,
}

/// Session shared between the driver thread and the rebalance callback.
pub type SharedSession = Arc<Mutex<ConsumeSession>>;

impl ConsumeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Records a delivery. The first delivery of a partition fixes its low
    /// watermark; every delivery moves the high watermark.
    pub fn record(&mut self, tp: TopicPartition, offset: i64) {
        self.partitions
            .entry(tp)
            .and_modify(|w| w.high = offset)
            .or_insert(Watermarks {
                low: offset,
                high: offset,
            });
    }

    /// Offsets to commit: the next offset to read for every tracked partition.
    pub fn commit_offsets(&self) -> Vec<(TopicPartition, i64)> {
        self.partitions
            .iter()
            .map(|(tp, w)| (tp.clone(), w.high + 1))
            .collect()
    }

    /// Positions to seek back to: the first delivered offset of every tracked partition.
    pub fn reset_positions(&self) -> Vec<(TopicPartition, i64)> {
        self.partitions
            .iter()
            .map(|(tp, w)| (tp.clone(), w.low))
            .collect()
    }

    pub fn watermarks(&self, tp: &TopicPartition) -> Option<Watermarks> {
        self.partitions.get(tp).copied()
    }

    /// Drops the entries of revoked partitions.
    pub fn forget(&mut self, revoked: &[TopicPartition]) {
        if revoked.is_empty() {
            return;
        }
        self.generation += 1;
        for tp in revoked {
            self.partitions.remove(tp);
            self.revoked_at.insert(tp.clone(), self.generation);
        }
    }

    /// Current revocation generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True if `tp` was revoked after `generation` was observed.
    pub fn revoked_since(&self, tp: &TopicPartition, generation: u64) -> bool {
        self.revoked_at
            .get(tp)
            .is_some_and(|revoked| *revoked > generation)
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_watermark_fixed_by_first_delivery() {
        let mut session = ConsumeSession::new();
        let tp = TopicPartition::new("t", 0);
        session.record(tp.clone(), 10);
        session.record(tp.clone(), 11);
        session.record(tp.clone(), 12);
        assert_eq!(session.watermarks(&tp), Some(Watermarks { low: 10, high: 12 }));
        assert_eq!(session.commit_offsets(), vec![(tp.clone(), 13)]);
        assert_eq!(session.reset_positions(), vec![(tp, 10)]);
    }

    #[test]
    fn test_partitions_tracked_independently() {
        let mut session = ConsumeSession::new();
        let a = TopicPartition::new("t", 0);
        let b = TopicPartition::new("t", 1);
        session.record(a.clone(), 5);
        session.record(b.clone(), 100);
        session.record(a.clone(), 6);
        assert_eq!(session.commit_offsets(), vec![(a, 7), (b, 101)]);
    }

    #[test]
    fn test_forget_and_clear() {
        let mut session = ConsumeSession::new();
        let a = TopicPartition::new("t", 0);
        let b = TopicPartition::new("t", 1);
        session.record(a.clone(), 1);
        session.record(b.clone(), 1);
        session.forget(&[a.clone()]);
        assert!(session.watermarks(&a).is_none());
        assert!(!session.is_empty());
        session.clear();
        assert!(session.is_empty());
        assert!(session.commit_offsets().is_empty());
    }

    #[test]
    fn test_revoked_since_compares_generations() {
        let mut session = ConsumeSession::new();
        let a = TopicPartition::new("t", 0);
        let b = TopicPartition::new("t", 1);

        let before = session.generation();
        session.forget(&[a.clone()]);
        let after = session.generation();

        assert!(session.revoked_since(&a, before));
        assert!(!session.revoked_since(&a, after));
        assert!(!session.revoked_since(&b, before));

        // An empty revocation leaves the generation alone
        session.forget(&[]);
        assert_eq!(session.generation(), after);
    }
}
