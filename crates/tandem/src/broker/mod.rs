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

//! Broker consumer session management.
//!
//! A [`SessionDriver`] owns exactly one consumer protocol handle on a dedicated
//! thread and exposes consume-one, consume-batch, commit and reset to any number
//! of async callers. Offsets delivered since the last commit or reset are kept
//! in a [`ConsumeSession`]; partition ownership is published through an
//! [`AssignmentTracker`].

pub mod assignment;
pub mod driver;
pub mod handle;
pub mod record;
pub mod session;

pub use assignment::{AssignmentEvent, AssignmentTracker};
pub use driver::{RecordSource, SessionDriver};
pub use handle::{ConsumerHandle, KafkaConsumerHandle};
pub use record::{RawRecord, TopicPartition};
pub use session::{ConsumeSession, SharedSession, Watermarks};
