use clap::Parser;
use std::time::Duration;

/// The command line args to pass to the rescheduler
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    author,
    about = "Moves pods from on-demand nodes onto spot nodes whenever they provably fit"
)]
pub struct Args {
    /// Whether this controller runs inside the cluster and should use the pod
    /// service account to build its client
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub running_in_cluster: bool,
    /// Path to a kubeconfig file to use when running outside the cluster
    #[clap(long)]
    pub kubeconfig: Option<String>,
    /// Namespace this controller reports events into
    #[clap(long, default_value = "kube-system")]
    pub namespace: String,
    /// Content type of requests sent to the apiserver
    #[clap(long, default_value = "application/json")]
    pub kube_api_content_type: String,
    /// How often the rescheduler takes actions
    #[clap(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub housekeeping_interval: Duration,
    /// How long to wait between draining nodes
    #[clap(long, default_value = "10m", value_parser = humantime::parse_duration)]
    pub node_drain_delay: Duration,
    /// How long to wait for each pod eviction to complete
    #[clap(long, default_value = "2m", value_parser = humantime::parse_duration)]
    pub pod_eviction_timeout: Duration,
    /// How long pods may take to shut down gracefully before the drain fails
    #[clap(long, default_value = "2m", value_parser = humantime::parse_duration)]
    pub max_graceful_termination: Duration,
    /// Address to listen on for serving prometheus metrics
    #[clap(long, default_value = "localhost:9235")]
    pub listen_address: String,
    /// Label of nodes to be considered for draining, as key or key=value
    #[clap(long, default_value = "kubernetes.io/role=worker")]
    pub on_demand_node_label: String,
    /// Label of nodes to be considered as targets for pods, as key or key=value
    #[clap(long, default_value = "kubernetes.io/role=spot-worker")]
    pub spot_node_label: String,
    /// Lowest pod priority to count against capacity while evaluating spot nodes
    #[clap(long, default_value_t = 0)]
    pub priority_threshold: i32,
    /// Drain pods without a replication controller; such pods will not be
    /// rescheduled
    #[clap(long, default_value_t)]
    pub delete_non_replicated_pods: bool,
    /// Taint key to strip from spot nodes each tick
    #[clap(long)]
    pub spot_node_taint_to_be_removed: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let args = Args::try_parse_from(["rescheduler"]).unwrap();
        assert!(args.running_in_cluster);
        assert_eq!(args.namespace, "kube-system");
        assert_eq!(args.housekeeping_interval, Duration::from_secs(10));
        assert_eq!(args.node_drain_delay, Duration::from_secs(600));
        assert_eq!(args.pod_eviction_timeout, Duration::from_secs(120));
        assert_eq!(args.max_graceful_termination, Duration::from_secs(120));
        assert_eq!(args.listen_address, "localhost:9235");
        assert_eq!(args.on_demand_node_label, "kubernetes.io/role=worker");
        assert_eq!(args.spot_node_label, "kubernetes.io/role=spot-worker");
        assert_eq!(args.priority_threshold, 0);
        assert!(!args.delete_non_replicated_pods);
        assert_eq!(args.spot_node_taint_to_be_removed, None);
    }

    #[test]
    fn durations_parse_human_friendly_values() {
        let args = Args::try_parse_from([
            "rescheduler",
            "--node-drain-delay",
            "30m",
            "--housekeeping-interval",
            "1m",
        ])
        .unwrap();
        assert_eq!(args.node_drain_delay, Duration::from_secs(1800));
        assert_eq!(args.housekeeping_interval, Duration::from_secs(60));
    }

    #[test]
    fn running_in_cluster_takes_a_value() {
        let args =
            Args::try_parse_from(["rescheduler", "--running-in-cluster", "false"]).unwrap();
        assert!(!args.running_in_cluster);
    }
}
