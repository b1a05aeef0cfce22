//! The control loop that consolidates pods onto spot nodes
//!
//! Each tick classifies the cluster, proves drain feasibility for at most
//! one on-demand node, drains it and then arms a cooldown so the cluster
//! can settle before the next attempt.

use chrono::prelude::*;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use tracing::{event, instrument, Level};

use crate::args::Args;
use crate::error::Error;
use crate::libs::drain::{self, BlockingPod};
use crate::libs::events::DrainEvents;
use crate::libs::helpers;
use crate::libs::k8s::{self, Budgets, Nodes, Pods};
use crate::libs::metrics::Metrics;
use crate::libs::nodes::{NodeInfo, NodeMap, NodeRole, NodeSelectors};
use crate::libs::planner;
use crate::libs::simulator::{ClusterSnapshot, SchedulingPredicates};

/// Consolidates pods away from on-demand nodes one drain at a time
pub struct Rescheduler {
    /// The command line settings this controller was started with
    args: Args,
    /// The label selectors used to classify nodes
    selectors: NodeSelectors,
    /// Node api wrapper
    nodes: Nodes,
    /// Pod api wrapper
    pods: Pods,
    /// Disruption budget api wrapper
    budgets: Budgets,
    /// Event publisher for drain activity
    events: DrainEvents,
    /// The predicate checker used by the planner
    checker: SchedulingPredicates,
    /// Prometheus metrics handle
    metrics: Metrics,
    /// The cooldown between drains
    drain_delay: chrono::Duration,
    /// The earliest instant the next drain may start
    next_drain_time: DateTime<Utc>,
}

impl Rescheduler {
    /// Build a rescheduler, failing fast if the cluster is unreachable
    ///
    /// # Arguments
    ///
    /// * `args` - The command line args passed to the rescheduler
    pub async fn new(args: Args) -> Result<Self, Error> {
        // parse the node classification labels up front
        let selectors = NodeSelectors::parse(&args.on_demand_node_label, &args.spot_node_label)?;
        // build the client for the cluster we are running against
        let client = k8s::client(&args).await?;
        let nodes = Nodes::new(&client);
        let pods = Pods::new(&client);
        let budgets = Budgets::new(&client);
        let events = DrainEvents::new(&client, &args.namespace);
        let drain_delay = chrono::Duration::from_std(args.node_drain_delay)
            .map_err(|error| Error::new(format!("Invalid node drain delay: {error}")))?;
        Ok(Rescheduler {
            args,
            selectors,
            nodes,
            pods,
            budgets,
            events,
            checker: SchedulingPredicates,
            metrics: Metrics::new(),
            drain_delay,
            // start eligible so the first tick can act straight away
            next_drain_time: Utc::now(),
        })
    }

    /// Run the control loop until the process is told to stop
    pub async fn start(&mut self) -> Result<(), Error> {
        loop {
            tokio::select! {
                // stop at the next tick boundary when signalled
                _ = tokio::signal::ctrl_c() => {
                    event!(Level::INFO, msg = "Signal received, shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.args.housekeeping_interval) => {
                    // nothing inside a tick may take the process down
                    if let Err(error) = self.single_tick().await {
                        event!(Level::ERROR, error = error.to_string(), msg = "Tick failed");
                    }
                }
            }
        }
    }

    /// One pass of the reconciliation loop
    #[instrument(name = "Rescheduler::single_tick", skip_all, err(Debug))]
    pub async fn single_tick(&mut self) -> Result<(), Error> {
        // hold off while the drain delay timer is running
        let wait = self.next_drain_time - Utc::now();
        if wait > chrono::Duration::zero() {
            event!(
                Level::DEBUG,
                wait = wait.num_seconds(),
                msg = "Waiting for drain delay timer"
            );
            return Ok(());
        }
        // don't run if pods are unschedulable, attempt to not make things worse
        let unschedulable = self.pods.list_unschedulable().await?;
        if !unschedulable.is_empty() {
            event!(
                Level::INFO,
                pending = unschedulable.len(),
                msg = "Waiting for unschedulable pods to be scheduled"
            );
            return Ok(());
        }
        event!(Level::DEBUG, msg = "Starting node processing");
        // classify the cluster and summarise each nodes pods and resources
        let all_nodes = self.nodes.list_ready().await?;
        let node_map = NodeMap::build(&self.pods, all_nodes, &self.selectors).await?;
        self.metrics
            .set_node_count(NodeRole::OnDemand, node_map.on_demand.len());
        self.metrics.set_node_count(NodeRole::Spot, node_map.spot.len());
        let pdbs = self.budgets.list().await?;
        // update the spot side metrics and clear any configured taint
        self.update_spot_metrics(&node_map.spot, &pdbs);
        self.remove_taints(&node_map.spot).await;
        if node_map.on_demand.is_empty() {
            event!(Level::DEBUG, msg = "No nodes to process");
            return Ok(());
        }
        // build this ticks what-if view of the spot nodes
        let mut snapshot = ClusterSnapshot::new(&node_map.spot, self.args.priority_threshold)?;
        // walk the on-demand nodes emptiest first and drain the first provable one
        for info in &node_map.on_demand {
            let (movable, blocker) =
                drain::pods_for_drain(&info.pods, &pdbs, self.args.delete_non_replicated_pods);
            if let Some(BlockingPod { pod, reason }) = blocker {
                event!(
                    Level::INFO,
                    node = info.name(),
                    pod = helpers::pod_id(&pod),
                    reason = reason.as_str(),
                    msg = "Node has a blocking pod, skipping"
                );
                continue;
            }
            self.metrics
                .set_node_pods(NodeRole::OnDemand, info.name(), movable.len());
            if movable.is_empty() {
                // nothing to move, the autoscaler will reap the node once empty
                event!(Level::DEBUG, node = info.name(), msg = "No pods to move, skipping");
                continue;
            }
            event!(
                Level::INFO,
                node = info.name(),
                pods = movable.len(),
                msg = "Considering node for removal"
            );
            // prove the drain with a speculative placement pass
            snapshot.fork();
            if let Err(error) =
                planner::can_drain_node(&self.checker, &mut snapshot, &node_map.spot, &movable)
            {
                event!(
                    Level::DEBUG,
                    node = info.name(),
                    error = error.to_string(),
                    msg = "Cannot drain node"
                );
                snapshot.revert();
                continue;
            }
            event!(
                Level::INFO,
                node = info.name(),
                msg = "All pods can be moved, will drain node"
            );
            self.drain_node(&info.node, &movable).await;
            // let the cluster settle before the next drain regardless of outcome
            self.next_drain_time = Utc::now() + self.drain_delay;
            break;
        }
        event!(Level::DEBUG, msg = "Finished processing nodes");
        Ok(())
    }

    /// Drain a node and record the outcome
    ///
    /// # Arguments
    ///
    /// * `node` - The node to drain
    /// * `movable` - The pods to evict from it
    async fn drain_node(&self, node: &Node, movable: &[Pod]) {
        let name = node.metadata.name.as_deref().unwrap_or("");
        self.events.drain_started(node, movable.len()).await;
        match drain::drain_node(
            &self.pods,
            node,
            movable,
            self.args.max_graceful_termination,
            self.args.pod_eviction_timeout,
        )
        .await
        {
            Ok(()) => {
                self.metrics.observe_drain(name, true);
                self.events.drain_succeeded(node).await;
            }
            Err(error) => {
                event!(
                    Level::ERROR,
                    node = name,
                    error = error.to_string(),
                    msg = "Failed to drain node"
                );
                self.metrics.observe_drain(name, false);
                self.events.drain_failed(node, &error).await;
            }
        }
    }

    /// Update the movable pod gauges for the spot nodes
    ///
    /// # Arguments
    ///
    /// * `spot` - The spot node infos
    /// * `pdbs` - All known disruption budgets
    fn update_spot_metrics(&self, spot: &[NodeInfo], pdbs: &[PodDisruptionBudget]) {
        for info in spot {
            // only count the pod types the rescheduler understands
            let (movable, _) =
                drain::pods_for_drain(&info.pods, pdbs, self.args.delete_non_replicated_pods);
            self.metrics
                .set_node_pods(NodeRole::Spot, info.name(), movable.len());
        }
    }

    /// Strip the configured taint from every spot node
    ///
    /// # Arguments
    ///
    /// * `spot` - The spot node infos
    async fn remove_taints(&self, spot: &[NodeInfo]) {
        let key = match self.args.spot_node_taint_to_be_removed.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => return,
        };
        for info in spot {
            // taint removal is best effort, a conflict just waits for the next tick
            if let Err(error) = self.nodes.remove_taint(&info.node, key).await {
                event!(
                    Level::ERROR,
                    node = info.name(),
                    error = error.to_string(),
                    msg = "Failed to update node after deleting taint"
                );
            }
        }
    }
}
