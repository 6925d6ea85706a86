//! Input device wrapping and event translation.
//!
//! Wraps libinput devices into capability objects (keyboard, pointer) and
//! translates raw libinput events into the normalized payloads in
//! [`crate::events`].

mod device;
mod translate;

pub use device::{Capabilities, InputDevice, Keyboard, Pointer};

pub(crate) use device::device_key;
pub(crate) use translate::{
    button_transition_expected, scroll_events, usec_to_msec, AxisValue, ScrollSample,
};
