//! TOML configuration loading for `autoscalerd`.
//!
//! Mirrors `warpgrid-state::types::DeploymentSpec`'s plain serde-struct
//! convention: no custom `Deserialize` impls, defaults expressed with
//! `#[serde(default = ...)]`.

use anyhow::{Context, Result};
use autoscaler_reconciler::StepConfig;
use autoscaler_types::{NodeTypeConfig, NodeTypeName};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_idle_timeout_s() -> u64 {
    300
}

fn default_tick_interval_s() -> u64 {
    30
}

fn default_requested_timeout_s() -> u64 {
    600
}

fn default_terminating_timeout_s() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub max_num_nodes: Option<u32>,
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,
    #[serde(default = "default_tick_interval_s")]
    pub tick_interval_s: u64,
    #[serde(default)]
    pub conserve_gpu_nodes: bool,
    #[serde(default = "default_requested_timeout_s")]
    pub requested_timeout_s: u64,
    #[serde(default = "default_terminating_timeout_s")]
    pub terminating_timeout_s: u64,
    #[serde(default, rename = "node_types")]
    pub node_type_list: Vec<NodeTypeConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn node_type_configs(&self) -> HashMap<NodeTypeName, NodeTypeConfig> {
        self.node_type_list
            .iter()
            .map(|cfg| (cfg.name.clone(), cfg.clone()))
            .collect()
    }

    pub fn to_step_config(&self) -> StepConfig {
        StepConfig {
            node_type_configs: self.node_type_configs(),
            max_num_nodes: self.max_num_nodes,
            idle_timeout_s: self.idle_timeout_s,
            conserve_gpu_nodes: self.conserve_gpu_nodes,
            requested_timeout_ns: self.requested_timeout_s * 1_000_000_000,
            terminating_timeout_ns: self.terminating_timeout_s * 1_000_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config_with_defaults() {
        let toml = r#"
            max_num_nodes = 10

            [[node_types]]
            name = "cpu-small"
            min_worker_nodes = 1
            max_worker_nodes = 5
            launch_config_hash = "h1"

            [node_types.resources]
            CPU = 4.0

            [node_types.labels]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.max_num_nodes, Some(10));
        assert_eq!(config.idle_timeout_s, 300);
        assert_eq!(config.node_type_list.len(), 1);
        assert_eq!(config.node_type_list[0].name, "cpu-small");
    }
}
