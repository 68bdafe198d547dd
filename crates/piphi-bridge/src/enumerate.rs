//! Bridge adapter enumeration via sysfs
//!
//! Each serial tty under `<root>/class/tty` is resolved to its USB device
//! (the first ancestor carrying `idVendor`). Ttys whose USB device matches
//! the configured VID:PID become candidates.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use piphi_core::Candidate;
use tracing::debug;

use crate::config::BridgeConfig;

/// Lists candidate bridge adapters attached to the host
pub trait BridgeEnumerator: Send + Sync {
    /// Candidates in host enumeration order; empty when none are attached
    fn list_candidates(&self) -> Vec<Candidate>;
}

/// Enumerator reading the Linux sysfs tree
#[derive(Debug, Clone)]
pub struct SysfsEnumerator {
    root: PathBuf,
    vendor_id: u16,
    product_id: u16,
}

impl SysfsEnumerator {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            root: config.sysfs_root.clone(),
            vendor_id: config.vendor_id,
            product_id: config.product_id,
        }
    }

    fn candidate_for(&self, tty: &Path, name: &str) -> Option<Candidate> {
        let device = fs::canonicalize(tty.join("device")).ok()?;
        let usb = usb_ancestor(&device, &self.root)?;

        let vendor = read_hex_id(&usb.join("idVendor"))?;
        let product = read_hex_id(&usb.join("idProduct"))?;
        if vendor != self.vendor_id || product != self.product_id {
            return None;
        }

        let display_name = read_trimmed(usb.join("product")).unwrap_or_else(|_| name.to_string());
        let mut candidate =
            Candidate::new(format!("/dev/{name}"), display_name).with_usb_device(&usb);
        if let Ok(serial) = read_trimmed(usb.join("serial")) {
            candidate = candidate.with_serial(serial);
        }
        Some(candidate)
    }
}

impl BridgeEnumerator for SysfsEnumerator {
    fn list_candidates(&self) -> Vec<Candidate> {
        let class_dir = self.root.join("class/tty");
        let entries = match fs::read_dir(&class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %class_dir.display(), error = %e, "Cannot read tty class directory");
                return Vec::new();
            }
        };

        let mut ttys: Vec<(String, PathBuf)> = entries
            .flatten()
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        ttys.sort();

        ttys.into_iter()
            .filter_map(|(name, path)| {
                let candidate = self.candidate_for(&path, &name);
                if candidate.is_none() {
                    debug!(tty = %name, "Skipping tty without matching USB bridge");
                }
                candidate
            })
            .collect()
    }
}

/// First ancestor of `device` (inclusive) that describes a USB device
fn usb_ancestor(device: &Path, root: &Path) -> Option<PathBuf> {
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    device
        .ancestors()
        .take_while(|dir| dir.starts_with(&root) && *dir != root.as_path())
        .find(|dir| dir.join("idVendor").is_file())
        .map(Path::to_path_buf)
}

fn read_hex_id(path: &Path) -> Option<u16> {
    let text = read_trimmed(path).ok()?;
    u16::from_str_radix(&text, 16).ok()
}

fn read_trimmed<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut s = String::new();
    fs::File::open(path)?.read_to_string(&mut s)?;
    Ok(s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_hex_id() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("idVendor");
        fs::write(&path, "04d8\n").unwrap();
        assert_eq!(read_hex_id(&path), Some(0x04D8));

        fs::write(&path, "zz\n").unwrap();
        assert_eq!(read_hex_id(&path), None);
    }

    #[test]
    fn test_missing_root_yields_no_candidates() {
        let enumerator = SysfsEnumerator::new(&BridgeConfig {
            sysfs_root: PathBuf::from("/nonexistent/sysfs"),
            ..Default::default()
        });
        assert!(enumerator.list_candidates().is_empty());
    }
}
