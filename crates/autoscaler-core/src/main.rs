//! autoscalerd — the cluster autoscaler driver binary.
//!
//! Wires `autoscaler-types`, `autoscaler-scheduler`, and
//! `autoscaler-reconciler` together behind a small CLI. No real cloud,
//! ray cluster, or installer integration lives here (out of scope);
//! `tick` consumes a JSON snapshot of the outside world and `simulate`
//! drives the loop against the in-memory fakes in `fake_provider`.

mod config;
mod fake_provider;

use anyhow::{Context, Result};
use autoscaler_reconciler::{
    step_next, sync_from, ClusterResourceState, CloudProviderAdapter, MembershipSource,
    Observations, RayInstaller,
};
use autoscaler_scheduler::{ClusterResourceConstraint, GangResourceRequest, ResourceRequest};
use autoscaler_types::{Instance, InstanceManager, NodeState};
use clap::{Parser, Subcommand};
use config::Config;
use fake_provider::{FakeCloudProvider, FakeMembershipSource, FakeRayInstaller};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "autoscalerd", about = "Cluster autoscaler control core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconcile+schedule cycle against a config and a JSON state
    /// snapshot, printing the resulting instance states and reply as JSON.
    Tick {
        /// Path to the TOML cluster config.
        #[arg(long)]
        config: PathBuf,

        /// Path to a JSON `TickInput` snapshot.
        #[arg(long)]
        state: PathBuf,
    },

    /// Run `count` ticks against an in-memory fake cloud provider, printing
    /// a one-line summary per tick.
    Simulate {
        /// Path to the TOML cluster config.
        #[arg(long)]
        config: PathBuf,

        /// Number of ticks to run.
        #[arg(long, default_value = "10")]
        count: u32,

        /// Resource requests to submit on every tick, as JSON.
        #[arg(long)]
        demand: Option<PathBuf>,
    },
}

/// The snapshot a `tick` invocation reconciles and schedules against.
#[derive(Debug, Deserialize)]
struct TickInput {
    #[serde(default)]
    instances: Vec<Instance>,
    #[serde(default)]
    resource_requests: Vec<ResourceRequest>,
    #[serde(default)]
    gang_resource_requests: Vec<GangResourceRequest>,
    #[serde(default)]
    cluster_resource_constraints: Vec<ClusterResourceConstraint>,
    #[serde(default)]
    live_nodes: Vec<NodeState>,
    #[serde(default)]
    ray_nodes: Vec<NodeState>,
    #[serde(default)]
    now_ns: u64,
}

#[derive(Debug, Serialize)]
struct TickOutput {
    reply: autoscaler_scheduler::SchedulingReply,
    instances: Vec<Instance>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autoscaler_core=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Tick { config, state } => run_tick(config, state),
        Command::Simulate { config, count, demand } => run_simulate(config, count, demand),
    }
}

fn run_tick(config_path: PathBuf, state_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;
    let raw = std::fs::read_to_string(&state_path)
        .with_context(|| format!("reading state snapshot {}", state_path.display()))?;
    let input: TickInput =
        serde_json::from_str(&raw).with_context(|| format!("parsing state snapshot {}", state_path.display()))?;

    let im = InstanceManager::new();
    for instance in input.instances {
        im.insert(instance);
    }

    let live_nodes_by_cloud_instance_id: HashMap<_, _> = input
        .live_nodes
        .into_iter()
        .filter_map(|n| n.cloud_instance_id.clone().map(|id| (id, n)))
        .collect();

    let observations = Observations {
        ray_nodes: input.ray_nodes,
        ..Observations::default()
    };
    sync_from(&im, &observations, input.now_ns)?;

    let demand = ClusterResourceState {
        resource_requests: input.resource_requests,
        gang_resource_requests: input.gang_resource_requests,
        cluster_resource_constraints: input.cluster_resource_constraints,
        live_nodes_by_cloud_instance_id,
    };
    let provider = FakeCloudProvider::new();
    let step_config = config.to_step_config();
    let reply = step_next(&im, &provider, &step_config, &demand, input.now_ns)?;

    let (instances, _) = im.get_state();
    let output = TickOutput { reply, instances };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_simulate(config_path: PathBuf, count: u32, demand_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(&config_path)?;
    let node_type_configs = config.node_type_configs();
    let step_config = config.to_step_config();

    let resource_requests: Vec<ResourceRequest> = match demand_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading demand file {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing demand file {}", path.display()))?
        }
        None => Vec::new(),
    };

    let im = InstanceManager::new();
    let provider = FakeCloudProvider::new();
    let installer = FakeRayInstaller;

    for tick in 0..count {
        let now_ns = u64::from(tick) * step_config.idle_timeout_s.max(1) * 1_000_000_000;
        let membership = FakeMembershipSource {
            cloud_provider: &provider,
            node_type_configs: &node_type_configs,
        };
        let observations = Observations {
            ray_nodes: membership.ray_nodes(),
            non_terminated_cloud_instances: provider.non_terminated(),
            provider_errors: provider.poll_errors(),
            install_errors: installer.poll_install_errors(),
        };
        sync_from(&im, &observations, now_ns)?;

        let live_nodes_by_cloud_instance_id: HashMap<_, _> = observations
            .ray_nodes
            .iter()
            .filter_map(|n| n.cloud_instance_id.clone().map(|id| (id, n.clone())))
            .collect();
        let demand = ClusterResourceState {
            resource_requests: resource_requests.clone(),
            gang_resource_requests: Vec::new(),
            cluster_resource_constraints: Vec::new(),
            live_nodes_by_cloud_instance_id,
        };
        let reply = step_next(&im, &provider, &step_config, &demand, now_ns)?;

        let (instances, _) = im.get_state();
        info!(
            tick,
            instances = instances.len(),
            launching = reply.to_launch.len(),
            terminating = reply.to_terminate.len(),
            "tick complete"
        );
    }

    Ok(())
}
