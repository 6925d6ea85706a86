//! Event payloads produced by the session core.
//!
//! Everything the session emits flows through one queue, drained by the
//! host after each `dispatch_pending()` call. Emission is synchronous on
//! the dispatch thread; the queue only decouples when the host reads.

use std::path::PathBuf;
use std::rc::Rc;

use crate::input::{Keyboard, Pointer};

/// Where a scroll sample originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSource {
    Wheel,
    Finger,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

/// A normalized keyboard key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Timestamp in whole milliseconds.
    pub time_ms: u32,
    /// evdev key code.
    pub key: u32,
    pub pressed: bool,
}

/// One scroll axis of one input sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisEvent {
    pub time_ms: u32,
    pub source: AxisSource,
    pub axis: ScrollAxis,
    pub delta: f64,
    /// v120 discrete step value, present for wheel-sourced axes only.
    pub discrete: Option<i32>,
    /// True when natural scrolling inverts the direction on this device.
    pub inverted: bool,
}

/// Normalized pointer events. A [`PointerEvent::Frame`] closes each
/// logically atomic batch of updates, mirroring libinput's own batching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Move {
        time_ms: u32,
        delta: (f64, f64),
        unaccel: (f64, f64),
    },
    Warp {
        time_ms: u32,
        /// Absolute position, normalized to `[0, 1]` on both axes.
        absolute: (f64, f64),
    },
    Button {
        time_ms: u32,
        button: u32,
        pressed: bool,
    },
    Axis(AxisEvent),
    Frame,
}

/// A `change` uevent on a tracked DRM device, classified by its properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Hotplug {
        connector_id: Option<u64>,
        property_id: Option<u64>,
    },
    Lease,
}

/// Everything a [`crate::session::SeatSession`] reports to its host.
pub enum SessionEvent {
    /// The seat was enabled or disabled; re-read `SeatSession::is_active`.
    ActiveChanged,
    /// A new DRM card appeared on the device bus.
    NewDrmCard { path: PathBuf },
    /// A tracked device saw a hotplug or lease change. `device` is the
    /// kernel device number of the matching session handle.
    DeviceChanged { device: u64, change: DeviceChange },
    /// A tracked device went away; its owner must release the handle.
    DeviceRemoved { device: u64 },
    NewKeyboard(Rc<Keyboard>),
    NewPointer(Rc<Pointer>),
    Keyboard {
        keyboard: Rc<Keyboard>,
        event: KeyEvent,
    },
    Pointer {
        pointer: Rc<Pointer>,
        event: PointerEvent,
    },
}
