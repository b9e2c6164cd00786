//! Node health monitoring
//!
//! - `tracker` - NotReady bookkeeping and windowed pool evaluation
//! - `watch` - feeds node watch events into the tracker
//! - `interception` - operator-controlled latch and mirrored NotReady set
//! - `clock` - injectable time source

pub mod clock;
pub mod interception;
pub mod tracker;
pub mod watch;

pub use clock::{Clock, SystemClock};
pub use interception::{InterceptionOverride, OverrideStatus};
pub use tracker::{NodeEvent, NodeHealthRecord, NodeHealthTracker, PoolEvaluation, Readiness};
pub use watch::{start_node_watch, TrackerError};
