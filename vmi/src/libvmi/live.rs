use super::ffi;
use crate::backend::{AccessMode, Backend, EventSink, Target};
use crate::event::{SingleStepEvent, VcpuMask};
use crate::init_data::{InitData, InitDataKind};
use crate::VmiError;
use libc::c_void;
use std::ffi::CString;
use std::ptr;
use std::time::Duration;

/// Connection to a guest through libvmi.
///
/// `vmi` stays null until `attach` succeeds. The registered event lives on
/// the heap behind a raw pointer because libvmi keeps that pointer until the
/// event is cleared or the instance destroyed.
pub struct LibVmi {
    vmi: ffi::vmi_instance_t,
    event: *mut ffi::vmi_event_t,
}

impl LibVmi {
    pub fn new() -> Self {
        Self {
            vmi: ptr::null_mut(),
            event: ptr::null_mut(),
        }
    }

    fn free_event(&mut self) {
        if !self.event.is_null() {
            drop(unsafe { Box::from_raw(self.event) });
            self.event = ptr::null_mut();
        }
    }
}

impl Default for LibVmi {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LibVmi {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Domain identifier in the form `vmi_init` expects, plus the matching flag.
struct RawTarget {
    name: Option<CString>,
    id: u64,
    flags: u64,
}

impl RawTarget {
    fn new(target: &Target) -> Result<Self, VmiError> {
        match target {
            Target::Name(name) => {
                let name = CString::new(name.as_str()).map_err(|_| {
                    VmiError::AccessMode(format!("domain name contains a NUL byte: {:?}", name))
                })?;
                Ok(Self {
                    name: Some(name),
                    id: 0,
                    flags: ffi::VMI_INIT_DOMAINNAME | ffi::VMI_INIT_EVENTS,
                })
            }
            Target::Id(id) => Ok(Self {
                name: None,
                id: *id,
                flags: ffi::VMI_INIT_DOMAINID | ffi::VMI_INIT_EVENTS,
            }),
        }
    }

    fn as_ptr(&self) -> *const c_void {
        match &self.name {
            Some(name) => name.as_ptr() as *const c_void,
            None => &self.id as *const u64 as *const c_void,
        }
    }
}

/// C view of an [`InitData`]. Entry pointers borrow from `values`, which is
/// freed together with the block once the libvmi call has returned.
struct RawInitData {
    block: ffi::vmi_init_data_t,
    _values: Vec<CString>,
}

impl RawInitData {
    fn new(init_data: &InitData) -> Result<Self, VmiError> {
        if init_data.count() > ffi::MAX_INIT_DATA_ENTRIES {
            return Err(VmiError::InvalidInitData(format!(
                "{} entries, at most {} supported",
                init_data.count(),
                ffi::MAX_INIT_DATA_ENTRIES
            )));
        }

        let mut block = ffi::vmi_init_data_t {
            count: init_data.count() as u64,
            entry: [ffi::vmi_init_data_entry_t {
                type_: 0,
                data: ptr::null_mut(),
            }; ffi::MAX_INIT_DATA_ENTRIES],
        };
        let mut values = Vec::with_capacity(init_data.count());

        for (slot, entry) in block.entry.iter_mut().zip(init_data.entries()) {
            let type_ = match entry.kind {
                InitDataKind::KvmiSocket => ffi::VMI_INIT_DATA_KVMI_SOCKET,
                other => {
                    return Err(VmiError::InvalidInitData(format!(
                        "{} entries are not supported by this binding",
                        other
                    )));
                }
            };
            let value = CString::new(entry.value.as_str()).map_err(|_| {
                VmiError::InvalidInitData(format!("{} contains a NUL byte", entry.kind))
            })?;
            slot.type_ = type_;
            slot.data = value.as_ptr() as *mut c_void;
            values.push(value);
        }

        Ok(Self {
            block,
            _values: values,
        })
    }

    fn as_mut_ptr(raw: Option<&mut Self>) -> *mut ffi::vmi_init_data_t {
        raw.map_or(ptr::null_mut(), |r| &mut r.block as *mut _)
    }
}

fn raw_init_data(init_data: Option<&InitData>) -> Result<Option<RawInitData>, VmiError> {
    init_data.map(RawInitData::new).transpose()
}

fn mode_to_raw(mode: AccessMode) -> ffi::vmi_mode_t {
    match mode {
        AccessMode::Xen => ffi::VMI_XEN,
        AccessMode::Kvm => ffi::VMI_KVM,
        AccessMode::File => ffi::VMI_FILE,
    }
}

/// Called by libvmi from inside `vmi_events_listen` on the listening thread.
unsafe extern "C" fn on_singlestep(
    _vmi: ffi::vmi_instance_t,
    event: *mut ffi::vmi_event_t,
) -> ffi::event_response_t {
    let event = unsafe { &*event };
    if event.data.is_null() {
        return 0;
    }
    // `data` points at the sink borrowed by the enclosing `listen` call.
    let sink = unsafe { &mut *(event.data as *mut &mut EventSink<'static>) };
    let ss = unsafe { event.payload.ss_event };

    let step = SingleStepEvent {
        vcpu: event.vcpu_id,
        gla: ss.gla,
        gfn: ss.gfn,
    };
    sink(&step).as_raw()
}

impl Backend for LibVmi {
    fn probe_access_mode(
        &mut self,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<AccessMode, VmiError> {
        let raw_target = RawTarget::new(target)?;
        let mut raw_init = raw_init_data(init_data)?;
        let mut mode: ffi::vmi_mode_t = 0;

        let status = unsafe {
            ffi::vmi_get_access_mode(
                ptr::null_mut(),
                raw_target.as_ptr(),
                raw_target.flags,
                RawInitData::as_mut_ptr(raw_init.as_mut()),
                &mut mode,
            )
        };
        if status != ffi::VMI_SUCCESS {
            return Err(VmiError::AccessMode(format!(
                "libvmi could not resolve {}",
                target
            )));
        }

        match mode {
            ffi::VMI_XEN => Ok(AccessMode::Xen),
            ffi::VMI_KVM => Ok(AccessMode::Kvm),
            ffi::VMI_FILE => Ok(AccessMode::File),
            other => Err(VmiError::AccessMode(format!(
                "unsupported access mode {}",
                other
            ))),
        }
    }

    fn attach(
        &mut self,
        mode: AccessMode,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<(), VmiError> {
        let raw_target = RawTarget::new(target)?;
        let mut raw_init = raw_init_data(init_data)?;
        let mut vmi: ffi::vmi_instance_t = ptr::null_mut();
        let mut error: ffi::vmi_init_error_t = ffi::VMI_INIT_ERROR_NONE;

        let status = unsafe {
            ffi::vmi_init(
                &mut vmi,
                mode_to_raw(mode),
                raw_target.as_ptr(),
                raw_target.flags,
                RawInitData::as_mut_ptr(raw_init.as_mut()),
                &mut error,
            )
        };
        if status != ffi::VMI_SUCCESS {
            return Err(VmiError::Attach(format!(
                "{}: {}",
                target,
                ffi::init_error_str(error)
            )));
        }

        self.vmi = vmi;
        Ok(())
    }

    fn vcpu_count(&self) -> u32 {
        if self.vmi.is_null() {
            return 0;
        }
        unsafe { ffi::vmi_get_num_vcpus(self.vmi) }
    }

    fn register_singlestep(&mut self, version: u32, vcpus: VcpuMask) -> Result<(), VmiError> {
        if self.vmi.is_null() {
            return Err(VmiError::NotAttached);
        }
        if !self.event.is_null() {
            return Err(VmiError::Registration(
                "an event is already registered".to_string(),
            ));
        }
        let vcpus = u32::try_from(vcpus.bits()).map_err(|_| {
            VmiError::Registration("libvmi arms single-step on at most 32 vcpus".to_string())
        })?;

        let mut event: Box<ffi::vmi_event_t> = Box::new(unsafe { std::mem::zeroed() });
        event.version = version;
        event.type_ = ffi::VMI_EVENT_SINGLESTEP;
        event.callback = Some(on_singlestep);
        event.payload.ss_event = ffi::single_step_event_t {
            vcpus,
            enable: 1,
            gla: 0,
            gfn: 0,
            offset: 0,
        };

        let event = Box::into_raw(event);
        if unsafe { ffi::vmi_register_event(self.vmi, event) } != ffi::VMI_SUCCESS {
            drop(unsafe { Box::from_raw(event) });
            return Err(VmiError::Registration(
                "vmi_register_event failed".to_string(),
            ));
        }
        self.event = event;
        Ok(())
    }

    fn clear_singlestep(&mut self, _vcpus: VcpuMask) -> Result<(), VmiError> {
        if self.vmi.is_null() || self.event.is_null() {
            return Err(VmiError::NotRegistered);
        }
        if unsafe { ffi::vmi_clear_event(self.vmi, self.event, None) } != ffi::VMI_SUCCESS {
            // libvmi may still reference the event; it is released in destroy.
            return Err(VmiError::Unregister("vmi_clear_event failed".to_string()));
        }
        self.free_event();
        Ok(())
    }

    fn listen(&mut self, timeout: Duration, sink: &mut EventSink<'_>) -> Result<(), VmiError> {
        if self.vmi.is_null() {
            return Err(VmiError::NotAttached);
        }
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        let mut sink: &mut EventSink<'_> = sink;
        if !self.event.is_null() {
            unsafe {
                (*self.event).data = &mut sink as *mut &mut EventSink<'_> as *mut c_void;
            }
        }

        let status = unsafe { ffi::vmi_events_listen(self.vmi, timeout_ms) };

        if !self.event.is_null() {
            unsafe {
                (*self.event).data = ptr::null_mut();
            }
        }

        if status != ffi::VMI_SUCCESS {
            return Err(VmiError::Listen("vmi_events_listen failed".to_string()));
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if !self.vmi.is_null() {
            unsafe { ffi::vmi_destroy(self.vmi) };
            self.vmi = ptr::null_mut();
        }
        self.free_event();
    }
}
