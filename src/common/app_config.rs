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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksProfileConfig> = OnceLock::new();

const CONFIG_ENV: &str = "NOVAROCKS_PROFILE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "novarocks_profile.toml";

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rate_counter_update_interval_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

/// Installs the config at `path` unless one is already installed.
pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksProfileConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = NovaRocksProfileConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksProfileConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    init_from_path(path)
}

/// The installed config, without probing the environment or filesystem.
pub fn installed() -> Option<&'static NovaRocksProfileConfig> {
    CONFIG.get()
}

pub fn config() -> Result<&'static NovaRocksProfileConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV)
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p.trim()));
    }

    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow!(
        "missing config file: set ${CONFIG_ENV} or create ./{DEFAULT_CONFIG_FILE}"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksProfileConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression. Takes precedence over `log_level`.
    /// Example: "novarocks_profile=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub profile: ProfileConfig,
}

impl NovaRocksProfileConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovaRocksProfileConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        cfg.profile.validate()?;
        Ok(cfg)
    }

    /// The EnvFilter directive string the logger should be installed with.
    pub fn effective_log_filter(&self) -> String {
        match &self.log_filter {
            Some(filter) if !filter.trim().is_empty() => filter.trim().to_string(),
            _ => self.log_level.clone(),
        }
    }
}

impl Default for NovaRocksProfileConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            profile: ProfileConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileConfig {
    /// Period of the background thread that refreshes per-second counters.
    #[serde(default = "default_rate_counter_update_interval_ms")]
    pub rate_counter_update_interval_ms: u64,
    /// Whether instance profiles must share an identical shape to be merged.
    #[serde(default = "default_true")]
    pub merge_require_identical: bool,
    #[serde(default = "default_true")]
    pub pretty_print_indent: bool,
}

impl ProfileConfig {
    fn validate(&self) -> Result<()> {
        if self.rate_counter_update_interval_ms == 0 {
            return Err(anyhow!(
                "profile.rate_counter_update_interval_ms must be positive"
            ));
        }
        Ok(())
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            rate_counter_update_interval_ms: default_rate_counter_update_interval_ms(),
            merge_require_identical: true,
            pretty_print_indent: true,
        }
    }
}
