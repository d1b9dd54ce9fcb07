use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmiError {
    #[error("failed to get access mode: {0}")]
    AccessMode(String),

    #[error("failed to init introspection session: {0}")]
    Attach(String),

    #[error("failed to register event: {0}")]
    Registration(String),

    #[error("failed to listen on events: {0}")]
    Listen(String),

    #[error("failed to clear event: {0}")]
    Unregister(String),

    #[error("session is not attached")]
    NotAttached,

    #[error("session is already attached")]
    AlreadyAttached,

    #[error("no event is registered on the session")]
    NotRegistered,

    #[error("invalid vcpu count: {0} (expected 1..={max})", max = crate::event::MAX_VCPUS)]
    InvalidVcpuCount(u32),

    #[error("invalid init data: {0}")]
    InvalidInitData(String),

    #[error("introspection backend unavailable: {0}")]
    Unavailable(String),
}
