//! Single-step monitor: signal-driven shutdown, the bounded poll loop and
//! the attach-to-teardown lifecycle around an introspection session.

mod error;
mod monitor;
pub mod poll;
pub mod shutdown;

pub use error::MonitorError;
pub use monitor::{MonitorConfig, run};
pub use poll::{DEFAULT_LISTEN_TIMEOUT, LoopState, LoopSummary, PollLoop};
pub use shutdown::{RunState, SHUTDOWN_SIGNALS};
