//! Logical input devices and their capability objects.
//!
//! One [`InputDevice`] wraps one libinput device for the lifetime of its
//! added/removed window. Capability objects are created eagerly at wrap
//! time from the advertised capability bits and are destroyed with their
//! parent, never independently.

use std::rc::Rc;

use bitflags::bitflags;
use input::{AsRaw, Device, DeviceCapability};
use log::debug;

bitflags! {
    /// Capability bits advertised by a libinput device, fixed at wrap time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        const KEYBOARD = 1 << 0;
        const POINTER = 1 << 1;
    }
}

/// State shared between a wrapper and its capability objects.
struct DeviceInner {
    handle: Device,
    name: String,
}

/// Keyboard capability of a logical input device.
pub struct Keyboard {
    inner: Rc<DeviceInner>,
}

impl Keyboard {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The underlying libinput device, valid while the wrapper is alive.
    pub fn libinput_handle(&self) -> &Device {
        &self.inner.handle
    }
}

/// Pointer capability of a logical input device. Carries no mutable
/// state; everything per-event rides in the emitted payloads.
pub struct Pointer {
    inner: Rc<DeviceInner>,
}

impl Pointer {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn libinput_handle(&self) -> &Device {
        &self.inner.handle
    }
}

/// Wrapper around one libinput device and its capability objects.
pub struct InputDevice {
    inner: Rc<DeviceInner>,
    capabilities: Capabilities,
    keyboard: Option<Rc<Keyboard>>,
    pointer: Option<Rc<Pointer>>,
}

impl InputDevice {
    pub(crate) fn new(handle: Device) -> Self {
        let name = handle.name().to_string();
        debug!(
            "libinput: new device {}: {}-{}",
            name,
            handle.id_vendor(),
            handle.id_product()
        );

        let mut capabilities = Capabilities::empty();
        if handle.has_capability(DeviceCapability::Keyboard) {
            capabilities |= Capabilities::KEYBOARD;
        }
        if handle.has_capability(DeviceCapability::Pointer) {
            capabilities |= Capabilities::POINTER;
        }

        let inner = Rc::new(DeviceInner { handle, name });
        let keyboard = capabilities.contains(Capabilities::KEYBOARD).then(|| {
            Rc::new(Keyboard {
                inner: inner.clone(),
            })
        });
        let pointer = capabilities.contains(Capabilities::POINTER).then(|| {
            Rc::new(Pointer {
                inner: inner.clone(),
            })
        });

        Self {
            inner,
            capabilities,
            keyboard,
            pointer,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn keyboard(&self) -> Option<&Rc<Keyboard>> {
        self.keyboard.as_ref()
    }

    pub fn pointer(&self) -> Option<&Rc<Pointer>> {
        self.pointer.as_ref()
    }

    /// Identity of the wrapped libinput device, used to resolve events
    /// back to this wrapper without stashing pointers in foreign memory.
    pub(crate) fn key(&self) -> usize {
        device_key(&self.inner.handle)
    }
}

/// Stable identity for a libinput device object.
pub(crate) fn device_key(device: &Device) -> usize {
    device.as_raw() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits_are_distinct() {
        assert_eq!(Capabilities::KEYBOARD | Capabilities::POINTER, Capabilities::all());
        assert!(!Capabilities::KEYBOARD.contains(Capabilities::POINTER));
    }
}
