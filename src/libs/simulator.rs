//! A what-if view of the spot nodes used to prove drain feasibility
//!
//! The snapshot supports forking off a speculative layer of placements that
//! can be committed by simply dropping the snapshot or rolled back with
//! revert. The predicate checker answers whether a pod could legally run on
//! a snapshot node right now.

mod predicate;
mod snapshot;

pub use predicate::{PredicateChecker, PredicateFailure, SchedulingPredicates};
pub use snapshot::{ClusterSnapshot, SnapshotNode};
