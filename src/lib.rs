//! faultmon - measurement and fault-injection harness for embedded Linux.
//!
//! This library provides the core functionality shared between:
//! - `faultmon` - samples device metrics at a fixed interval while running a
//!   probabilistic fault-injection schedule, writing both logs to CSV
//! - `faultmon-merge` - joins the observation and injection logs into a
//!   single labeled timeline for offline analysis

pub mod buffer;
pub mod config;
pub mod inject;
pub mod merge;
pub mod probe;
pub mod run;
pub mod sampler;
pub mod scheduler;
pub mod util;
