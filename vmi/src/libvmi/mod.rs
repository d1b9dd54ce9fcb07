//! libvmi-backed introspection.
//!
//! The binding links against the system libvmi and is only compiled with the
//! `libvmi` feature. Without it, [`LibVmi`] still exists but refuses to
//! attach, so the monitor fails at startup with a clear diagnostic.

#[cfg(feature = "libvmi")]
mod ffi;

#[cfg(feature = "libvmi")]
mod live;
#[cfg(feature = "libvmi")]
pub use live::LibVmi;

#[cfg(not(feature = "libvmi"))]
mod unavailable;
#[cfg(not(feature = "libvmi"))]
pub use unavailable::LibVmi;
