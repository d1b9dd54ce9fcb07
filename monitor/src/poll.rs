//! Bounded-wait event loop.

use crate::shutdown::RunState;
use nix::sys::signal::Signal;
use std::time::Duration;
use stepwatch_vmi::{Backend, Session, VmiError};

/// Default wait per `listen` call.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    StopRequested,
    Error,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    /// Number of `listen` calls made.
    pub iterations: u64,
    /// Events handed to the subscription callback.
    pub delivered: u64,
    pub signal: Option<Signal>,
}

pub struct PollLoop<'a> {
    run_state: &'a RunState,
    timeout: Duration,
    state: LoopState,
    iterations: u64,
    delivered: u64,
}

impl<'a> PollLoop<'a> {
    /// `timeout` must be non-zero; a zero wait would spin on the backend.
    pub fn new(run_state: &'a RunState, timeout: Duration) -> Self {
        debug_assert!(!timeout.is_zero());
        Self {
            run_state,
            timeout,
            state: LoopState::Running,
            iterations: 0,
            delivered: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Service events until a stop is requested or `listen` fails.
    ///
    /// The stop flag is checked before every `listen`, so at most one more
    /// bounded wait happens after a signal arrives.
    pub fn run<B: Backend>(&mut self, session: &mut Session<B>) -> Result<LoopSummary, VmiError> {
        while self.state == LoopState::Running {
            if self.run_state.stop_requested() {
                self.state = LoopState::StopRequested;
                break;
            }

            tracing::trace!("Waiting for events...");
            self.iterations += 1;

            match session.listen(self.timeout) {
                Ok(n) => self.delivered += n as u64,
                Err(e) => {
                    self.state = LoopState::Error;
                    tracing::error!(error = %e, iterations = self.iterations, "Listen failed");
                    return Err(e);
                }
            }
        }

        self.state = LoopState::Done;
        let summary = self.summary();
        tracing::info!(
            signal = ?summary.signal,
            iterations = summary.iterations,
            delivered = summary.delivered,
            "Event loop finished"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            iterations: self.iterations,
            delivered: self.delivered,
            signal: self.run_state.signal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stepwatch_vmi::testing::{Call, ScriptedBackend};
    use stepwatch_vmi::{EventResponse, SingleStepEvent, SingleStepSubscription, Target};

    const TIMEOUT: Duration = Duration::from_millis(5);

    fn registered(backend: ScriptedBackend) -> Session<ScriptedBackend> {
        let mut session = Session::new(backend);
        session
            .attach(&Target::Name("myvm".to_string()), None)
            .unwrap();
        let vcpus = session.vcpu_count().unwrap();
        let sub = SingleStepSubscription::build(|_| EventResponse::None, vcpus).unwrap();
        session.register(sub).unwrap();
        session
    }

    #[test]
    fn test_stop_before_first_listen() {
        let state = RunState::new();
        state.request_stop(libc::SIGINT);

        let backend = ScriptedBackend::new(1);
        let journal = backend.journal();
        let mut session = registered(backend);

        let mut poll = PollLoop::new(&state, TIMEOUT);
        let summary = poll.run(&mut session).unwrap();

        assert_eq!(poll.state(), LoopState::Done);
        assert_eq!(summary.iterations, 0);
        assert_eq!(journal.listens(), 0);
        assert_eq!(summary.signal, Some(Signal::SIGINT));
    }

    #[test]
    fn test_at_most_one_listen_after_stop() {
        let state = Arc::new(RunState::new());
        let flag = state.clone();
        let backend = ScriptedBackend::new(2).on_listen(move |n| {
            if n == 3 {
                flag.request_stop(libc::SIGTERM);
            }
        });
        let journal = backend.journal();
        let mut session = registered(backend);

        let summary = PollLoop::new(&state, TIMEOUT).run(&mut session).unwrap();

        // The request lands during the third wait; no fourth wait follows.
        assert_eq!(summary.iterations, 3);
        assert_eq!(journal.listens(), 3);
        assert_eq!(journal.count(&Call::Listen { timeout: TIMEOUT }), 3);
    }

    #[test]
    fn test_listen_failure_stops_loop() {
        let state = RunState::new();
        let backend = ScriptedBackend::new(1).fail_listen_at(2);
        let journal = backend.journal();
        let mut session = registered(backend);

        let mut poll = PollLoop::new(&state, TIMEOUT);
        let result = poll.run(&mut session);

        assert!(matches!(result, Err(VmiError::Listen(_))));
        assert_eq!(poll.state(), LoopState::Error);
        assert_eq!(journal.listens(), 2);
    }

    #[test]
    fn test_listen_failure_after_stop_request_is_an_error() {
        let state = Arc::new(RunState::new());
        let flag = state.clone();
        let backend = ScriptedBackend::new(1)
            .on_listen(move |n| {
                if n == 1 {
                    flag.request_stop(libc::SIGTERM);
                }
            })
            .fail_listen_at(1);
        let journal = backend.journal();
        let mut session = registered(backend);

        let mut poll = PollLoop::new(&state, TIMEOUT);
        let result = poll.run(&mut session);

        assert!(matches!(result, Err(VmiError::Listen(_))));
        assert_eq!(poll.state(), LoopState::Error);
        assert_eq!(journal.listens(), 1);
        assert!(state.stop_requested());
    }

    #[test]
    fn test_delivered_events_are_counted() {
        let state = Arc::new(RunState::new());
        let flag = state.clone();
        let step = |vcpu: u32| SingleStepEvent {
            vcpu,
            gla: 0x1000 * (vcpu as u64 + 1),
            gfn: vcpu as u64,
        };
        let backend = ScriptedBackend::new(2)
            .with_events(vec![step(0)])
            .with_events(vec![step(1), step(0)])
            .on_listen(move |n| {
                if n == 2 {
                    flag.request_stop(libc::SIGHUP);
                }
            });
        let mut session = registered(backend);

        let summary = PollLoop::new(&state, TIMEOUT).run(&mut session).unwrap();

        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.signal, Some(Signal::SIGHUP));
    }
}
