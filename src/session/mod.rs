//! Seat session management.
//!
//! Device access goes through a seat broker (seatd or logind) instead of
//! root privileges: every privileged device node is opened by the broker
//! on the session's behalf, and the broker revokes and restores access
//! across VT switches.

mod device;
mod hotplug;
mod seat;

pub use device::SessionDevice;
pub use seat::SeatSession;
