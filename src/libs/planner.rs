//! Works out whether all of a nodes movable pods fit onto the spot nodes

use k8s_openapi::api::core::v1::Pod;
use tracing::{event, Level};

use crate::error::Error;
use crate::libs::drain;
use crate::libs::helpers;
use crate::libs::nodes::NodeInfo;
use crate::libs::simulator::{ClusterSnapshot, PredicateChecker};

/// Find the first spot node whose predicates accept this pod
///
/// The spot nodes arrive fullest first so placements bin pack onto already
/// warm nodes and empty spot nodes remain available as spares.
///
/// # Arguments
///
/// * `checker` - The predicate checker to consult
/// * `snapshot` - The snapshot holding current and speculative placements
/// * `spot` - The spot nodes in placement order
/// * `pod` - The pod to place
pub fn find_spot_node_for_pod<C: PredicateChecker>(
    checker: &C,
    snapshot: &ClusterSnapshot,
    spot: &[NodeInfo],
    pod: &Pod,
) -> Option<String> {
    // pretend the pod is not scheduled so the checker does not see it as placed
    let mut candidate = pod.clone();
    if let Some(spec) = candidate.spec.as_mut() {
        spec.node_name = None;
    }
    for info in spot {
        match checker.check_predicates(snapshot, &candidate, info.name()) {
            Ok(()) => return Some(info.name().to_owned()),
            Err(reason) => event!(
                Level::DEBUG,
                pod = helpers::pod_id(pod),
                node = info.name(),
                reason = %reason,
                msg = "Pod can't be rescheduled on node"
            ),
        }
    }
    None
}

/// Decide whether all of these pods can be placed on the existing spot nodes
///
/// Successful placements are recorded in the snapshot so later pods see the
/// claimed capacity. The caller forks the snapshot before calling and
/// reverts it when this returns an error.
///
/// # Arguments
///
/// * `checker` - The predicate checker to consult
/// * `snapshot` - The forked snapshot to plan against
/// * `spot` - The spot nodes in placement order
/// * `pods` - The movable pods of one on-demand node
pub fn can_drain_node<C: PredicateChecker>(
    checker: &C,
    snapshot: &mut ClusterSnapshot,
    spot: &[NodeInfo],
    pods: &[Pod],
) -> Result<(), Error> {
    for pod in pods {
        match find_spot_node_for_pod(checker, snapshot, spot, pod) {
            Some(node_name) => {
                event!(
                    Level::DEBUG,
                    pod = helpers::pod_id(pod),
                    node = node_name,
                    msg = "Pod can be rescheduled, adding to plan"
                );
                snapshot.add_pod(pod, &node_name)?;
            }
            // no spot node accepts this pod
            None => match drain::safe_to_evict(pod) {
                // pods pinned against eviction fail the plan
                Some("false") => {
                    return Err(Error::new(format!(
                        "Pod {} can't be rescheduled on any existing node [{}=false]",
                        helpers::pod_id(pod),
                        drain::SAFE_TO_EVICT_ANNOTATION
                    )))
                }
                // the orchestrator may still find it a home once the node drains
                _ => event!(
                    Level::DEBUG,
                    pod = helpers::pod_id(pod),
                    msg = "No spot node fits, pod will be evicted without a guaranteed landing spot"
                ),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::drain::SAFE_TO_EVICT_ANNOTATION;
    use crate::libs::simulator::SchedulingPredicates;
    use crate::test_utilities;

    /// build a spot node info with one resident pod claiming some cpu
    fn spot_info(name: &str, allocatable_cpu: u64, resident_cpu: u64) -> NodeInfo {
        let pods = vec![test_utilities::pod("resident", resident_cpu, 128)];
        NodeInfo::new(
            test_utilities::node(name, &[], allocatable_cpu, 8192),
            pods,
        )
        .unwrap()
    }

    #[test]
    fn a_fitting_pod_is_planned_onto_a_spot_node() {
        let spot = vec![spot_info("s1", 1000, 200)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![test_utilities::owned_by(
            test_utilities::pod("web", 500, 256),
            "ReplicaSet",
        )];
        snapshot.fork();
        can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).unwrap();
        // the placement was recorded so later pods see the claim
        assert_eq!(snapshot.get("s1").unwrap().requested.cpu, 700);
    }

    #[test]
    fn pods_without_a_landing_spot_may_still_be_evicted() {
        // no spot node fits the pod but nothing pins it to its node
        let spot = vec![spot_info("s1", 1000, 800)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![test_utilities::owned_by(
            test_utilities::pod("web", 500, 256),
            "ReplicaSet",
        )];
        snapshot.fork();
        can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).unwrap();
        // nothing was placed, the pod just gets evicted
        assert_eq!(snapshot.get("s1").unwrap().requested.cpu, 800);
    }

    #[test]
    fn a_failed_plan_reverts_cleanly() {
        // the first pod claims the remaining slack, the pinned second one fails
        let spot = vec![spot_info("s1", 1000, 400)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let before = snapshot.clone();
        let pods = vec![
            test_utilities::owned_by(test_utilities::pod("p1", 400, 256), "ReplicaSet"),
            test_utilities::annotate(
                test_utilities::pod("pinned", 400, 256),
                SAFE_TO_EVICT_ANNOTATION,
                "false",
            ),
        ];
        snapshot.fork();
        assert!(can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).is_err());
        // the caller reverts on failure and the snapshot is as it was
        snapshot.revert();
        assert_eq!(
            snapshot.get("s1").unwrap().requested,
            before.get("s1").unwrap().requested
        );
    }

    #[test]
    fn a_hard_blocker_names_the_annotation() {
        let spot = vec![spot_info("s1", 1000, 800)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![test_utilities::annotate(
            test_utilities::pod("pinned", 500, 256),
            SAFE_TO_EVICT_ANNOTATION,
            "false",
        )];
        snapshot.fork();
        let error = can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods)
            .unwrap_err();
        assert!(error.to_string().contains(SAFE_TO_EVICT_ANNOTATION));
    }

    #[test]
    fn a_pinned_pod_that_fits_is_placed_normally() {
        // the annotation only matters once placement has failed
        let spot = vec![spot_info("s1", 1000, 0)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![test_utilities::annotate(
            test_utilities::pod("pinned", 100, 64),
            SAFE_TO_EVICT_ANNOTATION,
            "false",
        )];
        snapshot.fork();
        can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).unwrap();
        assert_eq!(snapshot.get("s1").unwrap().requested.cpu, 100);
    }

    #[test]
    fn safe_to_evict_pods_may_move_without_a_landing_spot() {
        let spot = vec![spot_info("s1", 1000, 800)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![test_utilities::annotate(
            test_utilities::pod("loose", 500, 256),
            SAFE_TO_EVICT_ANNOTATION,
            "true",
        )];
        snapshot.fork();
        can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).unwrap();
        // nothing was placed, the pod just gets evicted
        assert_eq!(snapshot.get("s1").unwrap().requested.cpu, 800);
    }

    #[test]
    fn two_pods_cannot_claim_the_same_slack() {
        // 600m free: enough for one 400m pod but not two
        let spot = vec![spot_info("s1", 1000, 400)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![
            test_utilities::owned_by(test_utilities::pod("p1", 400, 256), "ReplicaSet"),
            test_utilities::owned_by(test_utilities::pod("p2", 400, 256), "ReplicaSet"),
        ];
        snapshot.fork();
        can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).unwrap();
        // only the first pod was placed, the second saw the claimed capacity
        assert_eq!(snapshot.get("s1").unwrap().requested.cpu, 800);
    }

    #[test]
    fn placement_walks_spot_nodes_in_the_given_order() {
        // both nodes fit the pod; the fuller one is listed first and wins
        let spot = vec![spot_info("warm", 1000, 500), spot_info("cold", 1000, 0)];
        let snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pod = test_utilities::pod("web", 300, 256);
        let chosen = find_spot_node_for_pod(&SchedulingPredicates, &snapshot, &spot, &pod);
        assert_eq!(chosen.as_deref(), Some("warm"));
    }

    #[test]
    fn spillover_lands_on_the_next_spot_node() {
        let spot = vec![spot_info("warm", 1000, 800), spot_info("cold", 1000, 0)];
        let mut snapshot = ClusterSnapshot::new(&spot, 0).unwrap();
        let pods = vec![
            test_utilities::owned_by(test_utilities::pod("p1", 400, 256), "ReplicaSet"),
        ];
        snapshot.fork();
        can_drain_node(&SchedulingPredicates, &mut snapshot, &spot, &pods).unwrap();
        assert_eq!(snapshot.get("cold").unwrap().requested.cpu, 400);
        assert_eq!(snapshot.get("warm").unwrap().requested.cpu, 800);
    }
}
