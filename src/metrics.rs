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
//! Counter units shared by the profile wire form.

use serde::{Deserialize, Serialize};

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TUnit {
    UNIT,
    UNIT_PER_SECOND,
    CPU_TICKS,
    BYTES,
    BYTES_PER_SECOND,
    TIME_NS,
    DOUBLE_VALUE,
    NONE,
    TIME_MS,
    TIME_S,
}

impl TUnit {
    pub fn is_time(self) -> bool {
        matches!(
            self,
            TUnit::CPU_TICKS | TUnit::TIME_NS | TUnit::TIME_MS | TUnit::TIME_S
        )
    }
}
