//! Single-step event subscription.

use crate::VmiError;
use serde::Serialize;
use std::fmt;

/// Events ABI version understood by the backend.
pub const EVENTS_VERSION: u32 = 0x0000_0006;

/// Width of the VCPU bitmask.
pub const MAX_VCPUS: u32 = u64::BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SingleStep,
}

/// Value returned by an event callback to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventResponse {
    /// Continue with the backend's default handling.
    #[default]
    None,
}

impl EventResponse {
    pub fn as_raw(self) -> u32 {
        match self {
            EventResponse::None => 0,
        }
    }
}

/// One delivered single-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SingleStepEvent {
    pub vcpu: u32,
    /// Guest linear address of the stepped instruction.
    pub gla: u64,
    /// Guest frame number backing `gla`.
    pub gfn: u64,
}

impl fmt::Display for SingleStepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Single-step event: VCPU:{}  GFN {:x} GLA {:016x}",
            self.vcpu, self.gfn, self.gla
        )
    }
}

/// Set of VCPUs an event is armed on, one bit per VCPU index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VcpuMask(u64);

impl VcpuMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask covering VCPUs `0..count`.
    pub fn first(count: u32) -> Result<Self, VmiError> {
        if count == 0 || count > MAX_VCPUS {
            return Err(VmiError::InvalidVcpuCount(count));
        }
        let mut mask = Self::empty();
        for vcpu in 0..count {
            mask.set(vcpu);
        }
        Ok(mask)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn set(&mut self, vcpu: u32) {
        debug_assert!(vcpu < MAX_VCPUS);
        self.0 |= 1u64 << vcpu;
    }

    pub fn contains(&self, vcpu: u32) -> bool {
        vcpu < MAX_VCPUS && self.0 & (1u64 << vcpu) != 0
    }

    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_VCPUS).filter(move |v| self.contains(*v))
    }
}

pub type EventCallback = Box<dyn FnMut(&SingleStepEvent) -> EventResponse>;

/// "Fire on single-step" for a set of VCPUs, bound to a callback.
pub struct SingleStepSubscription {
    pub version: u32,
    pub kind: EventKind,
    pub enabled: bool,
    pub vcpus: VcpuMask,
    callback: EventCallback,
}

impl SingleStepSubscription {
    /// A subscription that fires nowhere and ignores every event.
    pub fn disabled() -> Self {
        Self {
            version: EVENTS_VERSION,
            kind: EventKind::SingleStep,
            enabled: false,
            vcpus: VcpuMask::empty(),
            callback: Box::new(|_| EventResponse::None),
        }
    }

    /// Arm single-stepping on every VCPU in `0..vcpu_count`.
    pub fn build<F>(callback: F, vcpu_count: u32) -> Result<Self, VmiError>
    where
        F: FnMut(&SingleStepEvent) -> EventResponse + 'static,
    {
        let vcpus = VcpuMask::first(vcpu_count)?;
        Ok(Self {
            enabled: true,
            vcpus,
            callback: Box::new(callback),
            ..Self::disabled()
        })
    }

    pub(crate) fn dispatch(&mut self, event: &SingleStepEvent) -> EventResponse {
        if !self.enabled {
            return EventResponse::None;
        }
        (self.callback)(event)
    }
}

impl fmt::Debug for SingleStepSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleStepSubscription")
            .field("version", &self.version)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("vcpus", &format_args!("{:#b}", self.vcpus.bits()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_mask_covers_every_vcpu() {
        for n in 1..=MAX_VCPUS {
            let mask = VcpuMask::first(n).unwrap();
            assert_eq!(mask.len(), n);
            assert!((0..n).all(|v| mask.contains(v)));
            assert!(!mask.contains(n));
            assert_eq!(mask.iter().collect::<Vec<_>>(), (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_mask_rejects_bad_counts() {
        assert!(matches!(
            VcpuMask::first(0),
            Err(VmiError::InvalidVcpuCount(0))
        ));
        assert!(matches!(
            VcpuMask::first(MAX_VCPUS + 1),
            Err(VmiError::InvalidVcpuCount(65))
        ));
    }

    #[test]
    fn test_disabled_subscription() {
        let mut sub = SingleStepSubscription::disabled();
        assert!(!sub.enabled);
        assert!(sub.vcpus.is_empty());
        assert_eq!(sub.kind, EventKind::SingleStep);

        let event = SingleStepEvent {
            vcpu: 0,
            gla: 0x1000,
            gfn: 0x1,
        };
        assert_eq!(sub.dispatch(&event), EventResponse::None);
    }

    #[test]
    fn test_build_arms_all_vcpus() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut sub = SingleStepSubscription::build(
            move |ev| {
                sink.borrow_mut().push(ev.vcpu);
                EventResponse::None
            },
            2,
        )
        .unwrap();

        assert!(sub.enabled);
        assert_eq!(sub.version, EVENTS_VERSION);
        assert_eq!(sub.vcpus.bits(), 0b11);

        for vcpu in [0, 1] {
            let response = sub.dispatch(&SingleStepEvent {
                vcpu,
                gla: 0xffff_8000_0000_1000,
                gfn: 0x1234,
            });
            assert_eq!(response.as_raw(), 0);
        }
        assert_eq!(*seen.borrow(), vec![0, 1]);
    }

    #[test]
    fn test_event_display() {
        let event = SingleStepEvent {
            vcpu: 1,
            gla: 0xdead_beef,
            gfn: 0xdead,
        };
        assert_eq!(
            event.to_string(),
            "Single-step event: VCPU:1  GFN dead GLA 00000000deadbeef"
        );
    }
}
