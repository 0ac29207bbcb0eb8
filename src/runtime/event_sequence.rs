// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::{Arc, Mutex};

use crate::runtime::stopwatch::MonotonicStopWatch;

/// A `(label, nanoseconds since start)` pair.
pub type Event = (String, i64);

pub type EventSequenceRef = Arc<Mutex<EventSequence>>;

/// Ordered log of labelled events, timestamped relative to the first `start()`.
///
/// Not thread-safe on its own; the owning profile hands it out behind a mutex.
#[derive(Clone, Debug, Default)]
pub struct EventSequence {
    events: Vec<Event>,
    sw: MonotonicStopWatch,
}

impl EventSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock without resetting it.
    pub fn start(&mut self) {
        self.sw.start();
    }

    /// Pauses the clock.
    pub fn stop(&mut self) {
        self.sw.stop();
    }

    pub fn mark_event(&mut self, label: impl Into<String>) {
        self.events.push((label.into(), self.sw.elapsed_time()));
    }

    pub fn elapsed_time(&self) -> i64 {
        self.sw.elapsed_time()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}
