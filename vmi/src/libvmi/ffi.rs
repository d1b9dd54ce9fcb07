//! Raw bindings to the system libvmi.
//!
//! Only the entry points and structures the single-step monitor needs are
//! declared here. Layouts mirror `libvmi/libvmi.h` and `libvmi/events.h` for
//! `VMI_EVENTS_VERSION` 6 on 64-bit hosts.

#![allow(non_camel_case_types, dead_code)]

use libc::c_void;

pub type status_t = u32;
pub const VMI_SUCCESS: status_t = 0;
pub const VMI_FAILURE: status_t = 1;

pub type vmi_mode_t = u32;
pub const VMI_XEN: vmi_mode_t = 0;
pub const VMI_KVM: vmi_mode_t = 1;
pub const VMI_FILE: vmi_mode_t = 2;

pub const VMI_INIT_DOMAINNAME: u64 = 1 << 0;
pub const VMI_INIT_DOMAINID: u64 = 1 << 1;
pub const VMI_INIT_EVENTS: u64 = 1 << 2;

pub type vmi_init_error_t = u32;
pub const VMI_INIT_ERROR_NONE: vmi_init_error_t = 0;
pub const VMI_INIT_ERROR_DRIVER_NOT_DETECTED: vmi_init_error_t = 1;
pub const VMI_INIT_ERROR_DRIVER: vmi_init_error_t = 2;
pub const VMI_INIT_ERROR_VM_NOT_FOUND: vmi_init_error_t = 3;
pub const VMI_INIT_ERROR_PAGING: vmi_init_error_t = 4;
pub const VMI_INIT_ERROR_OS: vmi_init_error_t = 5;
pub const VMI_INIT_ERROR_EVENTS: vmi_init_error_t = 6;
pub const VMI_INIT_ERROR_SHM: vmi_init_error_t = 7;
pub const VMI_INIT_ERROR_NO_CONFIG: vmi_init_error_t = 8;
pub const VMI_INIT_ERROR_NO_CONFIG_ENTRY: vmi_init_error_t = 9;

pub const VMI_INIT_DATA_XEN_EVTCHN: u64 = 0;
pub const VMI_INIT_DATA_MEMMAP: u64 = 1;
pub const VMI_INIT_DATA_KVMI_SOCKET: u64 = 2;

/// Upper bound on entries this binding ever passes in one init-data block.
pub const MAX_INIT_DATA_ENTRIES: usize = 3;

pub type vmi_event_type_t = u16;
pub const VMI_EVENT_SINGLESTEP: vmi_event_type_t = 3;

pub type event_response_t = u32;

#[repr(C)]
pub struct vmi_instance {
    _private: [u8; 0],
}

pub type vmi_instance_t = *mut vmi_instance;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct vmi_init_data_entry_t {
    pub type_: u64,
    pub data: *mut c_void,
}

/// `vmi_init_data_t` with its trailing array sized for this binding.
///
/// libvmi reads exactly `count` entries, so a fixed-capacity array stands in
/// for the flexible array member.
#[repr(C)]
pub struct vmi_init_data_t {
    pub count: u64,
    pub entry: [vmi_init_data_entry_t; MAX_INIT_DATA_ENTRIES],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct single_step_event_t {
    pub vcpus: u32,
    pub enable: u8,
    pub gla: u64,
    pub gfn: u64,
    pub offset: u64,
}

pub type event_callback_t =
    Option<unsafe extern "C" fn(vmi: vmi_instance_t, event: *mut vmi_event_t) -> event_response_t>;

/// Union of the per-kind payloads; only the single-step member is named.
/// The reserve covers the largest member (register events).
#[repr(C)]
pub union vmi_event_payload {
    pub ss_event: single_step_event_t,
    _reserve: [u64; 16],
}

#[repr(C)]
pub struct vmi_event_t {
    pub version: u32,
    pub type_: vmi_event_type_t,
    pub slat_id: u16,
    pub data: *mut c_void,
    pub callback: event_callback_t,
    pub next_slat_id: u16,
    pub emul_read: *mut c_void,
    pub emul_insn: *mut c_void,
    pub vcpu_id: u32,
    pub page_mode: u32,
    pub payload: vmi_event_payload,
    pub regs: *mut c_void,
    _reserve: [u64; 8],
}

pub type vmi_event_free_t = Option<unsafe extern "C" fn(event: *mut vmi_event_t, rc: status_t)>;

#[link(name = "vmi")]
unsafe extern "C" {
    pub fn vmi_get_access_mode(
        vmi: vmi_instance_t,
        domain: *const c_void,
        init_flags: u64,
        init_data: *mut vmi_init_data_t,
        mode: *mut vmi_mode_t,
    ) -> status_t;

    pub fn vmi_init(
        vmi: *mut vmi_instance_t,
        mode: vmi_mode_t,
        domain: *const c_void,
        init_flags: u64,
        init_data: *mut vmi_init_data_t,
        error: *mut vmi_init_error_t,
    ) -> status_t;

    pub fn vmi_destroy(vmi: vmi_instance_t) -> status_t;

    pub fn vmi_get_num_vcpus(vmi: vmi_instance_t) -> u32;

    pub fn vmi_register_event(vmi: vmi_instance_t, event: *mut vmi_event_t) -> status_t;

    pub fn vmi_clear_event(
        vmi: vmi_instance_t,
        event: *mut vmi_event_t,
        free_routine: vmi_event_free_t,
    ) -> status_t;

    pub fn vmi_events_listen(vmi: vmi_instance_t, timeout: u32) -> status_t;
}

pub fn init_error_str(error: vmi_init_error_t) -> &'static str {
    match error {
        VMI_INIT_ERROR_NONE => "no error",
        VMI_INIT_ERROR_DRIVER_NOT_DETECTED => "no hypervisor driver detected",
        VMI_INIT_ERROR_DRIVER => "hypervisor driver failed to initialize",
        VMI_INIT_ERROR_VM_NOT_FOUND => "vm not found",
        VMI_INIT_ERROR_PAGING => "paging initialization failed",
        VMI_INIT_ERROR_OS => "os initialization failed",
        VMI_INIT_ERROR_EVENTS => "events initialization failed",
        VMI_INIT_ERROR_SHM => "shared memory initialization failed",
        VMI_INIT_ERROR_NO_CONFIG => "no config found",
        VMI_INIT_ERROR_NO_CONFIG_ENTRY => "no config entry found",
        _ => "unknown error",
    }
}
