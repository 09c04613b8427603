//! SysfsProbe - find accelerators through `/dev` and the USB sysfs tree.

use std::fs;
use std::path::{Path, PathBuf};

use crate::accelerator::AcceleratorKind;
use crate::ports::{DeviceInfo, DeviceProbe};

/// USB `(vendor, product)` pairs; `None` matches any product.
const CORAL_USB: &[(&str, Option<&str>)] = &[("1a6e", None), ("18d1", Some("9302"))];
const NCS2_USB: &[(&str, Option<&str>)] = &[("03e7", None)];

#[derive(Debug, Clone)]
pub struct SysfsProbe {
    /// Prefix for `/dev` and `/sys`; `/` on a real host.
    root: PathBuf,
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SysfsProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn usb_match(&self, ids: &[(&str, Option<&str>)]) -> Option<String> {
        let dir = self.root.join("sys/bus/usb/devices");
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        entries.into_iter().find_map(|device| {
            let vendor = read_id(&device, "idVendor")?;
            let product = read_id(&device, "idProduct")?;
            ids.iter()
                .any(|(v, p)| *v == vendor && p.is_none_or(|p| p == product))
                .then(|| {
                    let bus = device.file_name().map(|n| n.to_string_lossy().into_owned());
                    format!("usb:{}", bus.unwrap_or_default())
                })
        })
    }
}

fn read_id(device: &Path, file: &str) -> Option<String> {
    fs::read_to_string(device.join(file))
        .ok()
        .map(|s| s.trim().to_ascii_lowercase())
}

impl DeviceProbe for SysfsProbe {
    fn detect(&self, kind: AcceleratorKind) -> Result<DeviceInfo, String> {
        let address = match kind {
            AcceleratorKind::Cpu => Some("cpu".to_string()),
            AcceleratorKind::Coral => {
                let pcie = self.root.join("dev/apex_0");
                if pcie.exists() {
                    Some("/dev/apex_0".to_string())
                } else {
                    self.usb_match(CORAL_USB)
                }
            }
            AcceleratorKind::Ncs2 => self.usb_match(NCS2_USB),
        };
        address
            .map(|address| DeviceInfo { kind, address })
            .ok_or_else(|| match kind {
                AcceleratorKind::Coral => "no /dev/apex_0 and no Coral USB device".to_string(),
                _ => format!("no {kind} USB device"),
            })
    }
}
