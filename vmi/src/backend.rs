use crate::event::{EventResponse, SingleStepEvent, VcpuMask};
use crate::init_data::InitData;
use crate::VmiError;
use std::fmt;
use std::time::Duration;

/// Guest to attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Domain name as known to the hypervisor.
    Name(String),
    /// Numeric domain id.
    Id(u64),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Name(name) => write!(f, "{}", name),
            Target::Id(id) => write!(f, "domid {}", id),
        }
    }
}

/// Attach strategy negotiated by the access-mode probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Xen,
    Kvm,
    File,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Xen => write!(f, "xen"),
            AccessMode::Kvm => write!(f, "kvm"),
            AccessMode::File => write!(f, "file"),
        }
    }
}

/// Sink the backend delivers events into while `listen` is running.
pub type EventSink<'a> = dyn FnMut(&SingleStepEvent) -> EventResponse + 'a;

/// Introspection backend contract.
///
/// Every call happens on the thread that owns the backend. Implementations
/// are driven through [`crate::Session`], which enforces call ordering.
pub trait Backend {
    /// Determine how `target` should be attached. Must not change state.
    fn probe_access_mode(
        &mut self,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<AccessMode, VmiError>;

    fn attach(
        &mut self,
        mode: AccessMode,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<(), VmiError>;

    fn vcpu_count(&self) -> u32;

    fn register_singlestep(&mut self, version: u32, vcpus: VcpuMask) -> Result<(), VmiError>;

    fn clear_singlestep(&mut self, vcpus: VcpuMask) -> Result<(), VmiError>;

    /// Wait up to `timeout` for events, handing each pending one to `sink`
    /// before returning.
    fn listen(&mut self, timeout: Duration, sink: &mut EventSink<'_>) -> Result<(), VmiError>;

    /// Tear down. Called at most once, possibly on a never-attached backend.
    fn destroy(&mut self);
}
