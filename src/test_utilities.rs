//! Fixture builders for tests

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use serde_json::json;

/// Build a ready node with the given labels and allocatable resources
///
/// # Arguments
///
/// * `name` - The name of the node
/// * `labels` - The labels to set on the node
/// * `cpu_milli` - Allocatable cpu in millicpu
/// * `memory_mi` - Allocatable memory in mebibytes
pub fn node(name: &str, labels: &[(&str, &str)], cpu_milli: u64, memory_mi: u64) -> Node {
    let labels: serde_json::Map<String, serde_json::Value> = labels
        .iter()
        .map(|(key, value)| ((*key).to_owned(), json!(value)))
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": { "name": name, "labels": labels, "uid": format!("{name}-uid") },
        "spec": {},
        "status": {
            "allocatable": {
                "cpu": format!("{cpu_milli}m"),
                "memory": format!("{memory_mi}Mi")
            },
            "conditions": [{ "type": "Ready", "status": "True" }]
        }
    }))
    .expect("Failed to build test node")
}

/// Add a taint to a node
pub fn add_taint(mut node: Node, key: &str, effect: &str) -> Node {
    let spec = node.spec.get_or_insert_with(Default::default);
    let taints = spec.taints.get_or_insert_with(Vec::new);
    taints.push(
        serde_json::from_value(json!({ "key": key, "effect": effect }))
            .expect("Failed to build test taint"),
    );
    node
}

/// Build a running pod with the given resource requests
///
/// The pod lands in the default namespace carrying an `app` label matching
/// its name so disruption budget fixtures can select it.
///
/// # Arguments
///
/// * `name` - The name of the pod
/// * `cpu_milli` - Requested cpu in millicpu
/// * `memory_mi` - Requested memory in mebibytes
pub fn pod(name: &str, cpu_milli: u64, memory_mi: u64) -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "namespace": "default",
            "name": name,
            "labels": { "app": name }
        },
        "spec": {
            "containers": [{
                "name": "main",
                "image": "scratch",
                "resources": {
                    "requests": {
                        "cpu": format!("{cpu_milli}m"),
                        "memory": format!("{memory_mi}Mi")
                    }
                }
            }]
        },
        "status": { "phase": "Running" }
    }))
    .expect("Failed to build test pod")
}

/// Mark a pod as controlled by an owner of the given kind
pub fn owned_by(mut pod: Pod, kind: &str) -> Pod {
    let owners = pod.metadata.owner_references.get_or_insert_with(Vec::new);
    owners.push(
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": kind,
            "name": "owner",
            "uid": "owner-uid",
            "controller": true
        }))
        .expect("Failed to build test owner reference"),
    );
    pod
}

/// Annotate a pod
pub fn annotate(mut pod: Pod, key: &str, value: &str) -> Pod {
    pod.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_owned(), value.to_owned());
    pod
}

/// Set the priority of a pod
pub fn with_priority(mut pod: Pod, priority: i32) -> Pod {
    pod.spec.get_or_insert_with(Default::default).priority = Some(priority);
    pod
}

/// Give a pod a node selector entry
pub fn with_node_selector(mut pod: Pod, key: &str, value: &str) -> Pod {
    pod.spec
        .get_or_insert_with(Default::default)
        .node_selector
        .get_or_insert_with(Default::default)
        .insert(key.to_owned(), value.to_owned());
    pod
}

/// Add an Exists toleration for a taint key
pub fn with_toleration(mut pod: Pod, key: &str) -> Pod {
    pod.spec
        .get_or_insert_with(Default::default)
        .tolerations
        .get_or_insert_with(Vec::new)
        .push(
            serde_json::from_value(json!({ "key": key, "operator": "Exists" }))
                .expect("Failed to build test toleration"),
        );
    pod
}

/// Set the phase of a pod
pub fn with_phase(mut pod: Pod, phase: &str) -> Pod {
    pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_owned());
    pod
}

/// Build a disruption budget in the default namespace selecting the given labels
///
/// # Arguments
///
/// * `name` - The name of the budget
/// * `match_labels` - The labels the budget selects on
/// * `disruptions_allowed` - How many disruptions the budget currently allows
pub fn pdb(name: &str, match_labels: &[(&str, &str)], disruptions_allowed: i32) -> PodDisruptionBudget {
    let labels: serde_json::Map<String, serde_json::Value> = match_labels
        .iter()
        .map(|(key, value)| ((*key).to_owned(), json!(value)))
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "policy/v1",
        "kind": "PodDisruptionBudget",
        "metadata": { "namespace": "default", "name": name },
        "spec": { "selector": { "matchLabels": labels } },
        "status": {
            "disruptionsAllowed": disruptions_allowed,
            "currentHealthy": 1,
            "desiredHealthy": 1,
            "expectedPods": 1
        }
    }))
    .expect("Failed to build test pdb")
}
