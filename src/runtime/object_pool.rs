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
use std::sync::Mutex;

use crate::runtime::profile::RuntimeProfile;

/// Query-scoped arena that keeps profile nodes alive until the query is torn down.
///
/// Merges allocate the nodes they create here so that the caller decides when the
/// whole set is released, independent of which tree currently references them.
#[derive(Debug, Default)]
pub struct ObjectPool {
    profiles: Mutex<Vec<RuntimeProfile>>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, profile: RuntimeProfile) -> RuntimeProfile {
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(profile.clone());
        profile
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
