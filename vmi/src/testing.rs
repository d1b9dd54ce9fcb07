//! Scripted backend for exercising sessions and monitors without a hypervisor.
//!
//! Every call the backend receives is appended to a shared [`Journal`], so a
//! test can keep a handle to it after the backend itself has been moved into
//! a session and dropped.

use crate::backend::{AccessMode, Backend, EventSink, Target};
use crate::event::{SingleStepEvent, VcpuMask};
use crate::init_data::InitData;
use crate::VmiError;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Probe {
        target: Target,
        socket_path: Option<String>,
    },
    Attach {
        mode: AccessMode,
        socket_path: Option<String>,
    },
    VcpuCount,
    RegisterSingleStep {
        version: u32,
        vcpus: u64,
    },
    ClearSingleStep {
        vcpus: u64,
    },
    Listen {
        timeout: Duration,
    },
    Destroy,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Call>>>);

impl Journal {
    fn record(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.0.borrow().iter().filter(|c| *c == call).count()
    }

    pub fn listens(&self) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Listen { .. }))
            .count()
    }

    /// Calls made after the last `Listen`, i.e. the teardown sequence.
    pub fn after_last_listen(&self) -> Vec<Call> {
        let calls = self.0.borrow();
        let start = calls
            .iter()
            .rposition(|c| matches!(c, Call::Listen { .. }))
            .map(|i| i + 1)
            .unwrap_or(0);
        calls[start..].to_vec()
    }
}

type ListenHook = Box<dyn FnMut(usize)>;

pub struct ScriptedBackend {
    vcpus: u32,
    mode: AccessMode,
    journal: Journal,
    batches: VecDeque<Vec<SingleStepEvent>>,
    listen_hook: Option<ListenHook>,
    fail_probe: bool,
    fail_attach: bool,
    fail_register: bool,
    fail_unregister: bool,
    fail_listen_at: Option<usize>,
    listens: usize,
}

impl ScriptedBackend {
    pub fn new(vcpus: u32) -> Self {
        Self {
            vcpus,
            mode: AccessMode::Kvm,
            journal: Journal::default(),
            batches: VecDeque::new(),
            listen_hook: None,
            fail_probe: false,
            fail_attach: false,
            fail_register: false,
            fail_unregister: false,
            fail_listen_at: None,
            listens: 0,
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Deliver `events` during the next `listen` that has no batch yet.
    pub fn with_events(mut self, events: Vec<SingleStepEvent>) -> Self {
        self.batches.push_back(events);
        self
    }

    /// Run `hook` with the 1-based listen number at the start of every
    /// `listen`, before any event is delivered.
    pub fn on_listen(mut self, hook: impl FnMut(usize) + 'static) -> Self {
        self.listen_hook = Some(Box::new(hook));
        self
    }

    pub fn fail_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    pub fn fail_attach(mut self) -> Self {
        self.fail_attach = true;
        self
    }

    pub fn fail_register(mut self) -> Self {
        self.fail_register = true;
        self
    }

    pub fn fail_unregister(mut self) -> Self {
        self.fail_unregister = true;
        self
    }

    /// Make the `n`th (1-based) `listen` call fail.
    pub fn fail_listen_at(mut self, n: usize) -> Self {
        self.fail_listen_at = Some(n);
        self
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

fn socket_of(init_data: Option<&InitData>) -> Option<String> {
    init_data.and_then(|d| d.socket_path()).map(str::to_owned)
}

impl Backend for ScriptedBackend {
    fn probe_access_mode(
        &mut self,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<AccessMode, VmiError> {
        self.journal.record(Call::Probe {
            target: target.clone(),
            socket_path: socket_of(init_data),
        });
        if self.fail_probe {
            return Err(VmiError::AccessMode(format!("{} not found", target)));
        }
        Ok(self.mode)
    }

    fn attach(
        &mut self,
        mode: AccessMode,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<(), VmiError> {
        self.journal.record(Call::Attach {
            mode,
            socket_path: socket_of(init_data),
        });
        if self.fail_attach {
            return Err(VmiError::Attach(format!("cannot connect to {}", target)));
        }
        Ok(())
    }

    fn vcpu_count(&self) -> u32 {
        self.journal.record(Call::VcpuCount);
        self.vcpus
    }

    fn register_singlestep(&mut self, version: u32, vcpus: VcpuMask) -> Result<(), VmiError> {
        self.journal.record(Call::RegisterSingleStep {
            version,
            vcpus: vcpus.bits(),
        });
        if self.fail_register {
            return Err(VmiError::Registration("rejected by backend".to_string()));
        }
        Ok(())
    }

    fn clear_singlestep(&mut self, vcpus: VcpuMask) -> Result<(), VmiError> {
        self.journal.record(Call::ClearSingleStep { vcpus: vcpus.bits() });
        if self.fail_unregister {
            return Err(VmiError::Unregister("rejected by backend".to_string()));
        }
        Ok(())
    }

    fn listen(&mut self, timeout: Duration, sink: &mut EventSink<'_>) -> Result<(), VmiError> {
        self.journal.record(Call::Listen { timeout });
        self.listens += 1;

        if let Some(hook) = self.listen_hook.as_mut() {
            hook(self.listens);
        }
        if self.fail_listen_at == Some(self.listens) {
            return Err(VmiError::Listen("event channel closed".to_string()));
        }

        if let Some(batch) = self.batches.pop_front() {
            for event in &batch {
                sink(event);
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.journal.record(Call::Destroy);
    }
}
