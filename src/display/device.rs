// src/display/device.rs

//! DRM device nodes.
//!
//! `Card` wraps the open file descriptor for a kernel mode-setting device
//! and carries the `drm` crate's device traits, which turn ioctls into
//! methods. Device discovery probes `/dev/dri/card*` nodes in name order
//! and accepts the first one that answers a mode-setting resource query;
//! render-only nodes fail that query and are skipped.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use drm::control::{Device as ControlDevice, ResourceHandles};
use drm::Device;
use log::{debug, info};

use super::resolve::ResolveError;

const DRI_DIR: &str = "/dev/dri";

/// An open handle to a kernel mode-setting device.
///
/// Owns the file descriptor for the device's lifetime; exactly one per
/// process in this design.
#[derive(Debug)]
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

impl Card {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Card(file))
    }

    /// Duplicates the underlying descriptor, e.g. for handing to the
    /// buffer allocator while this handle keeps doing mode-setting.
    pub fn dup(&self) -> io::Result<Self> {
        Ok(Card(self.0.try_clone()?))
    }
}

/// Opens the configured device, or probes for the first usable one.
///
/// Returns the card together with its resource listing so callers don't
/// re-query what the probe already fetched.
pub fn open_device(explicit: Option<&Path>) -> Result<(Card, ResourceHandles), ResolveError> {
    match explicit {
        Some(path) => {
            let card = Card::open(path).map_err(|source| ResolveError::DeviceAccess {
                path: path.to_owned(),
                source,
            })?;
            let resources = card.resource_handles().map_err(|_| {
                // EOPNOTSUPP here means a render node or other non-KMS device.
                ResolveError::NotModeSetting {
                    path: path.to_owned(),
                }
            })?;
            info!("Opened display device {:?}", path);
            Ok((card, resources))
        }
        None => probe_devices(),
    }
}

/// Scans `/dev/dri` for primary nodes and takes the first that both opens
/// and answers a resource query.
fn probe_devices() -> Result<(Card, ResourceHandles), ResolveError> {
    let mut candidates = candidate_paths().map_err(|_| ResolveError::NoDeviceFound)?;
    candidates.sort();

    for path in candidates {
        let card = match Card::open(&path) {
            Ok(card) => card,
            Err(err) => {
                debug!("Skipping {:?}: {}", path, err);
                continue;
            }
        };
        match card.resource_handles() {
            Ok(resources) => {
                info!("Opened display device {:?}", path);
                return Ok((card, resources));
            }
            Err(err) => {
                debug!("{:?} is not a mode-setting device: {}", path, err);
            }
        }
    }

    Err(ResolveError::NoDeviceFound)
}

fn candidate_paths() -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(DRI_DIR)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // Primary nodes only; renderD* nodes cannot mode-set.
        if name.starts_with("card") {
            paths.push(entry.path());
        }
    }
    Ok(paths)
}
