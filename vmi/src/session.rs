//! Owned introspection session.
//!
//! A [`Session`] starts detached, is attached through a two-phase
//! negotiation (access-mode probe, then attach) and is destroyed exactly
//! once, either explicitly or when it is dropped.

use crate::backend::{AccessMode, Backend, Target};
use crate::event::{SingleStepEvent, SingleStepSubscription};
use crate::init_data::InitData;
use crate::VmiError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Detached,
    Attached(AccessMode),
    Destroyed,
}

pub struct Session<B: Backend> {
    backend: B,
    state: SessionState,
    subscription: Option<SingleStepSubscription>,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: SessionState::Detached,
            subscription: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.subscription.is_some()
    }

    /// Probe the access mode for `target` and attach with it.
    ///
    /// `init_data` is only read during this call.
    pub fn attach(
        &mut self,
        target: &Target,
        init_data: Option<&InitData>,
    ) -> Result<AccessMode, VmiError> {
        match self.state {
            SessionState::Detached => {}
            SessionState::Attached(_) => return Err(VmiError::AlreadyAttached),
            SessionState::Destroyed => return Err(VmiError::NotAttached),
        }

        let mode = self.backend.probe_access_mode(target, init_data)?;
        tracing::debug!(%target, %mode, "Access mode negotiated");

        self.backend.attach(mode, target, init_data)?;
        self.state = SessionState::Attached(mode);

        tracing::info!(%target, %mode, "Introspection session attached");
        Ok(mode)
    }

    pub fn vcpu_count(&self) -> Result<u32, VmiError> {
        self.ensure_attached()?;
        Ok(self.backend.vcpu_count())
    }

    /// Arm `subscription` on the backend. The session keeps it until
    /// [`Session::unregister`] or destruction.
    pub fn register(&mut self, subscription: SingleStepSubscription) -> Result<(), VmiError> {
        self.ensure_attached()?;
        if self.subscription.is_some() {
            return Err(VmiError::Registration(
                "a single-step event is already registered".to_string(),
            ));
        }

        self.backend
            .register_singlestep(subscription.version, subscription.vcpus)?;

        tracing::debug!(
            vcpus = format_args!("{:#b}", subscription.vcpus.bits()),
            "Single-step event registered"
        );
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Disarm the registered subscription. The subscription is forgotten
    /// even when the backend reports a failure.
    pub fn unregister(&mut self) -> Result<(), VmiError> {
        self.ensure_attached()?;
        let subscription = self.subscription.take().ok_or(VmiError::NotRegistered)?;
        self.backend.clear_singlestep(subscription.vcpus)?;
        tracing::debug!("Single-step event cleared");
        Ok(())
    }

    /// Wait up to `timeout` for events and run the subscription callback on
    /// each one. Returns the number of events delivered.
    pub fn listen(&mut self, timeout: Duration) -> Result<usize, VmiError> {
        self.ensure_attached()?;
        let Session {
            backend,
            subscription,
            ..
        } = self;
        let subscription = subscription.as_mut().ok_or(VmiError::NotRegistered)?;

        let mut delivered = 0;
        backend.listen(timeout, &mut |event: &SingleStepEvent| {
            delivered += 1;
            subscription.dispatch(event)
        })?;
        Ok(delivered)
    }

    /// Tear the session down. Only the first call reaches the backend.
    ///
    /// A still-registered subscription is cleared first; a failed clear is
    /// logged and does not stop the teardown.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        let was_attached = matches!(self.state, SessionState::Attached(_));
        if was_attached {
            if let Some(subscription) = self.subscription.take() {
                if let Err(e) = self.backend.clear_singlestep(subscription.vcpus) {
                    tracing::warn!(error = %e, "Failed to clear single-step event");
                }
            }
        }
        self.state = SessionState::Destroyed;
        self.subscription = None;
        self.backend.destroy();

        if was_attached {
            tracing::info!("Introspection session destroyed");
        } else {
            tracing::debug!("Destroyed session that was never attached");
        }
    }

    /// Consuming form of [`Session::destroy`].
    pub fn close(mut self) {
        self.destroy();
    }

    fn ensure_attached(&self) -> Result<(), VmiError> {
        match self.state {
            SessionState::Attached(_) => Ok(()),
            _ => Err(VmiError::NotAttached),
        }
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
