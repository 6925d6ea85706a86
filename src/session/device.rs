//! Broker-opened device handles.
//!
//! A [`SessionDevice`] is the session's exclusive ownership of one device
//! node: the libseat-opened descriptor plus the kernel device number that
//! udev messages are matched against.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use drm::control::Device as ControlDevice;
use drm::Device as BasicDevice;
use log::{debug, warn};

use super::seat::SeatHandle;

/// An exclusively owned, broker-opened device node.
pub struct SessionDevice {
    path: PathBuf,
    device_id: i32,
    fd: OwnedFd,
    devnum: u64,
    /// Broker-side registration; surrendered exactly once, through the
    /// seat, when the handle is released.
    broker: Option<libseat::Device>,
    /// Raw value of the fd loaned to the input stack, for close matching.
    libinput_fd: Option<RawFd>,
}

impl SessionDevice {
    /// Request `path` from the seat broker. The descriptor is stat'ed to
    /// capture the kernel device number; both failures deny the open.
    pub(crate) fn open(seat: &SeatHandle, device_id: i32, path: &Path) -> Result<Self> {
        let (broker, fd) = seat.open_device(path)?;
        let stat = nix::sys::stat::fstat(fd.as_raw_fd())
            .with_context(|| format!("libseat: couldn't stat device at {}", path.display()))?;

        debug!(
            "libseat: opened device {} (id={}, fd={})",
            path.display(),
            device_id,
            fd.as_raw_fd()
        );

        Ok(Self {
            path: path.to_path_buf(),
            device_id,
            fd,
            devnum: stat.st_rdev,
            broker: Some(broker),
            libinput_fd: None,
        })
    }

    /// Open `path` and keep it only if it is a mode-setting-capable node;
    /// anything else is handed back to the broker right away.
    pub(crate) fn open_if_display_capable(
        seat: &SeatHandle,
        device_id: i32,
        path: &Path,
    ) -> Option<Self> {
        let mut device = match Self::open(seat, device_id, path) {
            Ok(device) => device,
            Err(e) => {
                warn!("libseat: {:#}", e);
                return None;
            }
        };
        if device.is_display_capable() {
            Some(device)
        } else {
            if let Some(broker) = device.take_broker_registration() {
                seat.close_device(broker);
            }
            None
        }
    }

    /// Detach the broker-side registration for release through the seat.
    /// Subsequent calls return `None`; the local descriptor is unaffected.
    pub(crate) fn take_broker_registration(&mut self) -> Option<libseat::Device> {
        self.broker.take()
    }

    /// Whether the node answers mode-setting resource queries.
    pub fn is_display_capable(&self) -> bool {
        let capable = KmsProbe(self.fd.as_fd()).resource_handles().is_ok();
        if capable {
            debug!("libseat: device {} supports kms", self.path.display());
        } else {
            debug!("libseat: device {} does not support kms", self.path.display());
        }
        capable
    }

    /// Dup the descriptor for the input stack and remember its raw value
    /// so the matching close request can find this handle again.
    pub(crate) fn loan_to_input_stack(&mut self) -> std::io::Result<OwnedFd> {
        let fd = self.fd.try_clone()?;
        self.libinput_fd = Some(fd.as_raw_fd());
        Ok(fd)
    }

    pub(crate) fn libinput_fd(&self) -> Option<RawFd> {
        self.libinput_fd
    }

    pub(crate) fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Kernel device number (`st_rdev`) of the opened node.
    pub fn devnum(&self) -> u64 {
        self.devnum
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Insert a freshly opened handle, evicting any stale entry for the same
/// kernel device number so at most one handle per device ever exists.
/// The evicted handle is returned so the caller can release its broker
/// registration.
pub(crate) fn register_device(
    devices: &mut Vec<SessionDevice>,
    device: SessionDevice,
) -> Option<SessionDevice> {
    let evicted = devices
        .iter()
        .position(|d| d.devnum == device.devnum)
        .map(|pos| {
            warn!(
                "libseat: replacing stale handle for {} (devnum {})",
                devices[pos].path.display(),
                device.devnum
            );
            devices.remove(pos)
        });
    devices.push(device);
    evicted
}

/// Minimal DRM device view over a borrowed fd, used only to probe for
/// mode-setting support.
struct KmsProbe<'a>(BorrowedFd<'a>);

impl AsFd for KmsProbe<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0
    }
}

impl BasicDevice for KmsProbe<'_> {}
impl ControlDevice for KmsProbe<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn fake_device(devnum: u64) -> SessionDevice {
        let file = File::open("/dev/null").unwrap();
        SessionDevice {
            path: PathBuf::from("/dev/null"),
            device_id: 0,
            fd: OwnedFd::from(file),
            devnum,
            broker: None,
            libinput_fd: None,
        }
    }

    #[test]
    fn register_keeps_one_handle_per_devnum() {
        let mut devices = Vec::new();
        assert!(register_device(&mut devices, fake_device(7)).is_none());
        assert!(register_device(&mut devices, fake_device(9)).is_none());
        let evicted = register_device(&mut devices, fake_device(7));
        assert_eq!(evicted.map(|d| d.devnum), Some(7));
        assert_eq!(devices.len(), 2);
        assert_eq!(devices.iter().filter(|d| d.devnum == 7).count(), 1);
    }

    #[test]
    fn loan_records_the_raw_fd() {
        let mut device = fake_device(1);
        let fd = device.loan_to_input_stack().unwrap();
        assert_eq!(device.libinput_fd(), Some(fd.as_raw_fd()));
    }
}
