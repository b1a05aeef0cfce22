//! A controller that consolidates pods from on-demand nodes onto spot nodes
//!
//! Every tick the rescheduler classifies the cluster, proves via a placement
//! simulation that every movable pod on an on-demand node fits onto the
//! current spot nodes, and if so drains that node so the orchestrator
//! reschedules its pods. A cooldown between drains lets the cluster settle.

mod args;
mod error;
mod libs;

pub use args::Args;
pub use error::Error;
pub use libs::Rescheduler;

// fixture builders for tests
#[cfg(test)]
pub(crate) mod test_utilities;
