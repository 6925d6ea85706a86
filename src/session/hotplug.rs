//! DRM device-event monitoring via udev.
//!
//! Card `add` events surface new GPUs to the display pipeline; `change`
//! and `remove` events are resolved against the session's device handles
//! by kernel device number.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::events::DeviceChange;

/// One decoded message from the drm subsystem monitor.
pub(crate) struct DrmUevent {
    pub sysname: String,
    pub devnode: Option<PathBuf>,
    pub action: Option<String>,
    pub devnum: Option<u64>,
    pub hotplug: Option<String>,
    pub lease: Option<String>,
    pub connector: Option<String>,
    pub property: Option<String>,
}

/// udev monitor filtered to the drm subsystem.
pub(crate) struct DrmMonitor {
    socket: udev::MonitorSocket,
}

impl DrmMonitor {
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("udev: failed to create a monitor builder")?
            .match_subsystem("drm")
            .context("udev: failed to match drm subsystem")?
            .listen()
            .context("udev: failed to start receiving")?;

        info!("udev: drm monitor listening");
        Ok(Self { socket })
    }

    /// Pollable descriptor for the host's I/O multiplexer.
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Decode everything currently queued on the socket (non-blocking).
    pub fn drain(&mut self) -> Vec<DrmUevent> {
        self.socket
            .iter()
            .map(|event| DrmUevent {
                sysname: event.sysname().to_string_lossy().into_owned(),
                devnode: event.devnode().map(|p| p.to_path_buf()),
                action: event.action().map(|a| a.to_string_lossy().into_owned()),
                devnum: event.devnum(),
                hotplug: property(&event, "HOTPLUG"),
                lease: property(&event, "LEASE"),
                connector: property(&event, "CONNECTOR"),
                property: property(&event, "PROPERTY"),
            })
            .collect()
    }
}

fn property(event: &udev::Event, name: &str) -> Option<String> {
    event
        .property_value(name)
        .map(|v| v.to_string_lossy().into_owned())
}

/// Primary DRM nodes are named `card` followed by decimal digits.
pub(crate) fn is_drm_card(sysname: &str) -> bool {
    sysname
        .strip_prefix("card")
        .is_some_and(|rest| rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Classify a `change` message by its properties. `HOTPLUG=1` wins over
/// `LEASE=1`; anything else is unrecognized and dropped by the caller.
pub(crate) fn classify_change(event: &DrmUevent) -> Option<DeviceChange> {
    if event.hotplug.as_deref() == Some("1") {
        Some(DeviceChange::Hotplug {
            connector_id: event.connector.as_deref().and_then(|v| v.parse().ok()),
            property_id: event.property.as_deref().and_then(|v| v.parse().ok()),
        })
    } else if event.lease.as_deref() == Some("1") {
        Some(DeviceChange::Lease)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(
        hotplug: Option<&str>,
        lease: Option<&str>,
        connector: Option<&str>,
        property: Option<&str>,
    ) -> DrmUevent {
        DrmUevent {
            sysname: "card0".into(),
            devnode: Some("/dev/dri/card0".into()),
            action: Some("change".into()),
            devnum: Some(0xe200),
            hotplug: hotplug.map(str::to_owned),
            lease: lease.map(str::to_owned),
            connector: connector.map(str::to_owned),
            property: property.map(str::to_owned),
        }
    }

    #[test]
    fn card_names_match() {
        assert!(is_drm_card("card0"));
        assert!(is_drm_card("card12"));
        assert!(is_drm_card("card"));
        assert!(!is_drm_card("renderD128"));
        assert!(!is_drm_card("card0-DP-1"));
        assert!(!is_drm_card("Card0"));
        assert!(!is_drm_card("cardX"));
    }

    #[test]
    fn hotplug_change_carries_connector_and_property() {
        let event = change(Some("1"), None, Some("12"), Some("7"));
        assert_eq!(
            classify_change(&event),
            Some(DeviceChange::Hotplug {
                connector_id: Some(12),
                property_id: Some(7),
            })
        );
    }

    #[test]
    fn hotplug_ids_are_optional() {
        let event = change(Some("1"), None, None, None);
        assert_eq!(
            classify_change(&event),
            Some(DeviceChange::Hotplug {
                connector_id: None,
                property_id: None,
            })
        );
    }

    #[test]
    fn lease_change_is_recognized() {
        assert_eq!(
            classify_change(&change(None, Some("1"), None, None)),
            Some(DeviceChange::Lease)
        );
        // HOTPLUG must be exactly "1" for the hotplug classification
        assert_eq!(
            classify_change(&change(Some("0"), Some("1"), None, None)),
            Some(DeviceChange::Lease)
        );
    }

    #[test]
    fn unrecognized_change_is_dropped() {
        assert_eq!(classify_change(&change(None, None, None, None)), None);
        assert_eq!(classify_change(&change(Some("0"), None, None, None)), None);
    }
}
