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

//! Transactional inbox.
//!
//! The [`BatchConsumeLoop`] persists consumed records as `Pending` rows and
//! only then commits their offsets. A [`PartitionWorkerPool`] runs one worker
//! per assigned partition that hands pending rows to the topic's
//! [`InboxHandler`] and marks them `Received` or `Failed`. When the inbox is
//! disabled, a [`DirectConsumerWorker`] per topic handles records straight
//! from the broker instead.

pub mod consume;
pub mod direct;
pub mod handler;
pub mod store;
pub mod workers;

pub use consume::{BatchConsumeLoop, BatchOutcome};
pub use direct::DirectConsumerWorker;
pub use handler::{ConsumeResult, Handler, HandlerRegistry, InboxHandler, TypedHandler};
pub use store::InboxStore;
pub use workers::{process_message, PartitionWorkerPool};
