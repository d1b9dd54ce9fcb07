//! Introspection session plumbing for the single-step monitor.
//!
//! The [`Backend`] trait is the contract an introspection library has to
//! fulfil. [`Session`] wraps a backend with the attach/register/listen/destroy
//! lifecycle, [`InitData`] carries the connection parameters used at attach
//! time and [`SingleStepSubscription`] describes which VCPUs to step.

mod backend;
mod error;
mod event;
mod init_data;
pub mod libvmi;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{AccessMode, Backend, EventSink, Target};
pub use error::VmiError;
pub use event::{
    EVENTS_VERSION, EventCallback, EventKind, EventResponse, MAX_VCPUS, SingleStepEvent,
    SingleStepSubscription, VcpuMask,
};
pub use init_data::{InitData, InitDataEntry, InitDataKind};
pub use libvmi::LibVmi;
pub use session::{Session, SessionState};
