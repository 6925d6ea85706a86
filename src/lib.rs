//! Seat, hotplug and input backend core for Linux display servers.
//!
//! A [`SeatSession`] bundles three pieces of Linux session plumbing:
//!
//! - a libseat connection to the seat broker (seatd or logind), which
//!   opens privileged device nodes on the compositor's behalf and
//!   revokes/restores them across VT switches,
//! - a udev monitor on the drm subsystem, surfacing GPU arrival,
//!   connector hotplug and lease changes,
//! - a libinput context whose raw events are translated into the
//!   normalized keyboard and pointer payloads in [`events`].
//!
//! The host owns the blocking wait. The intended loop:
//!
//! ```no_run
//! use brine::SeatSession;
//!
//! let mut session = SeatSession::establish()?;
//! let fds = session.poll_fds()?;
//! session.on_ready();
//! loop {
//!     // poll(2) / epoll on `fds`, then:
//!     session.dispatch_pending();
//!     while let Some(event) = session.next_event() {
//!         // route to the compositor
//!     }
//! #   break;
//! }
//! # anyhow::Ok(())
//! ```

pub mod events;
pub mod input;
pub mod session;

pub use events::{AxisEvent, AxisSource, DeviceChange, KeyEvent, PointerEvent, ScrollAxis, SessionEvent};
pub use input::{Capabilities, InputDevice, Keyboard, Pointer};
pub use session::{SeatSession, SessionDevice};
