//! Monitor lifecycle: attach, arm, poll, tear down.

use crate::error::MonitorError;
use crate::poll::{DEFAULT_LISTEN_TIMEOUT, LoopSummary, PollLoop};
use crate::shutdown::RunState;
use std::time::Duration;
use stepwatch_vmi::{
    Backend, EventResponse, InitData, Session, SingleStepEvent, SingleStepSubscription, Target,
};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub target: Target,
    /// KVMi socket handed to the backend as init data.
    pub socket_path: Option<String>,
    pub listen_timeout: Duration,
}

impl MonitorConfig {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            socket_path: None,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
        }
    }
}

/// Attach to `config.target`, single-step every VCPU and feed each event to
/// `on_event` until `run_state` asks for a stop.
///
/// Every outcome, including attach and registration failures, leaves through
/// the same teardown: best-effort unregister, destroy the session, release
/// the init data.
pub fn run<B, F>(
    backend: B,
    config: &MonitorConfig,
    run_state: &RunState,
    on_event: F,
) -> Result<LoopSummary, MonitorError>
where
    B: Backend,
    F: FnMut(&SingleStepEvent) + 'static,
{
    let init_data = InitData::from_socket_path(config.socket_path.as_deref());
    let mut session = Session::new(backend);

    let outcome = drive(&mut session, config, init_data.as_ref(), run_state, on_event);

    if session.is_registered() {
        if let Err(e) = session.unregister() {
            tracing::warn!(error = %e, "Failed to clear single-step event");
        }
    }
    session.close();
    drop(init_data);
    tracing::debug!("Teardown complete");

    outcome
}

fn drive<B, F>(
    session: &mut Session<B>,
    config: &MonitorConfig,
    init_data: Option<&InitData>,
    run_state: &RunState,
    mut on_event: F,
) -> Result<LoopSummary, MonitorError>
where
    B: Backend,
    F: FnMut(&SingleStepEvent) + 'static,
{
    session.attach(&config.target, init_data)?;

    let vcpus = session.vcpu_count()?;
    let subscription = SingleStepSubscription::build(
        move |event| {
            on_event(event);
            EventResponse::None
        },
        vcpus,
    )?;
    session.register(subscription)?;
    tracing::info!(vcpus, target = %config.target, "Single-stepping all VCPUs");

    Ok(PollLoop::new(run_state, config.listen_timeout).run(session)?)
}
