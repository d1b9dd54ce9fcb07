use crate::backend::{AccessMode, Backend, EventSink, Target};
use crate::event::VcpuMask;
use crate::init_data::InitData;
use crate::VmiError;
use std::time::Duration;

const UNAVAILABLE: &str = "libvmi support not available (build with the `libvmi` feature)";

/// Placeholder used when the crate is built without libvmi.
#[derive(Debug, Default)]
pub struct LibVmi;

impl LibVmi {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for LibVmi {
    fn probe_access_mode(
        &mut self,
        _target: &Target,
        _init_data: Option<&InitData>,
    ) -> Result<AccessMode, VmiError> {
        Err(VmiError::Unavailable(UNAVAILABLE.to_string()))
    }

    fn attach(
        &mut self,
        _mode: AccessMode,
        _target: &Target,
        _init_data: Option<&InitData>,
    ) -> Result<(), VmiError> {
        Err(VmiError::Unavailable(UNAVAILABLE.to_string()))
    }

    fn vcpu_count(&self) -> u32 {
        0
    }

    fn register_singlestep(&mut self, _version: u32, _vcpus: VcpuMask) -> Result<(), VmiError> {
        Err(VmiError::Unavailable(UNAVAILABLE.to_string()))
    }

    fn clear_singlestep(&mut self, _vcpus: VcpuMask) -> Result<(), VmiError> {
        Err(VmiError::Unavailable(UNAVAILABLE.to_string()))
    }

    fn listen(&mut self, _timeout: Duration, _sink: &mut EventSink<'_>) -> Result<(), VmiError> {
        Err(VmiError::Unavailable(UNAVAILABLE.to_string()))
    }

    fn destroy(&mut self) {}
}
