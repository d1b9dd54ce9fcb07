use stepwatch_vmi::VmiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error(transparent)]
    Vmi(#[from] VmiError),
}

impl MonitorError {
    /// One-line diagnostic printed on stderr for each failure kind.
    pub fn diagnostic(&self) -> String {
        match self {
            MonitorError::Usage(detail) => format!(
                "{} (usage: stepwatch <name of VM> [kvmi socket path])",
                detail
            ),
            MonitorError::Signal(e) => format!("Failed to install signal handlers: {}", e),
            MonitorError::Vmi(e) => match e {
                VmiError::AccessMode(detail) | VmiError::Unavailable(detail) => {
                    format!("Failed to get access mode: {}", detail)
                }
                VmiError::Attach(detail) | VmiError::InvalidInitData(detail) => {
                    format!("Failed to init LibVMI library: {}", detail)
                }
                VmiError::Registration(detail) => format!("Failed to register event: {}", detail),
                VmiError::InvalidVcpuCount(_) => format!("Failed to register event: {}", e),
                VmiError::Listen(detail) => format!("Failed to listen on events: {}", detail),
                other => format!("Introspection error: {}", other),
            },
        }
    }
}
