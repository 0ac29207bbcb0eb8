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
//! Human-readable rendering of counter values by unit.

use crate::metrics::TUnit;

const KILO: f64 = 1000.0;
const MEGA: f64 = KILO * 1000.0;
const BILLION: f64 = MEGA * 1000.0;

const KILOBYTE: f64 = 1024.0;
const MEGABYTE: f64 = KILOBYTE * 1024.0;
const GIGABYTE: f64 = MEGABYTE * 1024.0;

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MIN: i64 = 60 * NANOS_PER_SEC;
const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MIN;

pub fn print(value: i64, unit: TUnit) -> String {
    match unit {
        TUnit::UNIT | TUnit::CPU_TICKS => print_unit(value),
        TUnit::UNIT_PER_SECOND => format!("{}/sec", print_unit(value)),
        TUnit::BYTES => print_bytes(value),
        TUnit::BYTES_PER_SECOND => format!("{}/sec", print_bytes(value)),
        TUnit::TIME_NS => print_time_ns(value),
        TUnit::TIME_MS => print_time_ns(value.saturating_mul(NANOS_PER_MILLI)),
        TUnit::TIME_S => print_time_ns(value.saturating_mul(NANOS_PER_SEC)),
        TUnit::DOUBLE_VALUE => format!("{:.2}", f64::from_bits(value as u64)),
        TUnit::NONE => String::new(),
    }
}

fn print_unit(value: i64) -> String {
    let v = value as f64;
    let abs = v.abs();
    let (scaled, suffix) = if abs >= BILLION {
        (v / BILLION, "B")
    } else if abs >= MEGA {
        (v / MEGA, "M")
    } else if abs >= KILO {
        (v / KILO, "K")
    } else {
        return value.to_string();
    };
    format!("{scaled:.2}{suffix} ({value})")
}

fn print_bytes(value: i64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let v = value as f64;
    let abs = v.abs();
    if abs >= GIGABYTE {
        format!("{:.2} GB", v / GIGABYTE)
    } else if abs >= MEGABYTE {
        format!("{:.2} MB", v / MEGABYTE)
    } else if abs >= KILOBYTE {
        format!("{:.2} KB", v / KILOBYTE)
    } else {
        format!("{v:.2} B")
    }
}

fn print_time_ns(value: i64) -> String {
    if value < 0 {
        return format!("-{}", print_time_ns(value.checked_neg().unwrap_or(i64::MAX)));
    }
    if value >= NANOS_PER_SEC {
        return print_long_duration(value);
    }
    if value >= NANOS_PER_MILLI {
        format!("{:.3}ms", value as f64 / NANOS_PER_MILLI as f64)
    } else if value >= NANOS_PER_MICRO {
        format!("{:.3}us", value as f64 / NANOS_PER_MICRO as f64)
    } else {
        format!("{value}ns")
    }
}

/// `1h2m3s`, `2m5s`, `1s234ms`: milliseconds are shown only under a minute.
fn print_long_duration(value: i64) -> String {
    let hours = value / NANOS_PER_HOUR;
    let minutes = (value % NANOS_PER_HOUR) / NANOS_PER_MIN;
    let seconds = (value % NANOS_PER_MIN) / NANOS_PER_SEC;
    let millis = (value % NANOS_PER_SEC) / NANOS_PER_MILLI;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{seconds}s"));
    if hours == 0 && minutes == 0 {
        out.push_str(&format!("{millis}ms"));
    }
    out
}
