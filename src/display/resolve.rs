// src/display/resolve.rs

//! Connector, mode, and CRTC selection.
//!
//! Given an open card, pick the output to drive: a connected connector
//! (optionally forced by index), a timing mode (requested name/refresh,
//! else the connector's preferred mode, else the largest by pixel area),
//! and the CRTC that can scan out to that connector.

use std::io;
use std::path::PathBuf;

use drm::control::{connector, crtc, Device as ControlDevice, Mode, ModeTypeFlags, ResourceHandles};
use log::{info, warn};
use thiserror::Error;

use crate::config::Config;
use crate::display::device::{open_device, Card};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no usable mode-setting device found")]
    NoDeviceFound,
    #[error("failed to open display device {path:?}: {source}")]
    DeviceAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path:?} does not look like a mode-setting device")]
    NotModeSetting { path: PathBuf },
    #[error("no connected output")]
    NoConnectedOutput,
    #[error("connector reports no usable display modes")]
    NoModeAvailable,
    #[error("no compatible display controller for the selected output")]
    NoCompatibleController,
}

/// The resolved display pipeline endpoints: device, output, timing, CRTC.
pub struct ResolvedDisplay {
    pub card: Card,
    pub connector: connector::Handle,
    pub mode: Mode,
    pub crtc: crtc::Handle,
    /// Index of the CRTC within the device's CRTC list.
    pub crtc_index: usize,
}

impl ResolvedDisplay {
    pub fn width(&self) -> u32 {
        u32::from(self.mode.size().0)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.mode.size().1)
    }
}

/// Resolves device, connector, mode, and CRTC per the configuration.
pub fn resolve(config: &Config) -> Result<ResolvedDisplay, ResolveError> {
    let (card, resources) = open_device(config.device.as_deref())?;

    info!(
        "Display resources: {} CRTCs, {} connectors",
        resources.crtcs().len(),
        resources.connectors().len()
    );

    let connectors: Vec<connector::Info> = resources
        .connectors()
        .iter()
        .filter_map(|&handle| card.get_connector(handle, false).ok())
        .collect();

    let connected: Vec<bool> = connectors
        .iter()
        .map(|info| info.state() == connector::State::Connected)
        .collect();
    let connector_index =
        pick_connector(&connected, config.connector).ok_or(ResolveError::NoConnectedOutput)?;
    let connector_info = &connectors[connector_index];

    let candidates: Vec<ModeCandidate> = connector_info
        .modes()
        .iter()
        .map(ModeCandidate::from_mode)
        .collect();
    if let Some(name) = config.mode.as_deref() {
        let matched = candidates
            .iter()
            .any(|m| m.name == name && (config.vrefresh == 0 || m.vrefresh == config.vrefresh));
        if !matched {
            warn!("Requested mode {:?} not found, using default mode", name);
        }
    }
    let mode_index = pick_mode(&candidates, config.mode.as_deref(), config.vrefresh)
        .ok_or(ResolveError::NoModeAvailable)?;
    let mode = connector_info.modes()[mode_index];

    let (crtc, crtc_index) = resolve_crtc(&card, &resources, connector_info)?;

    info!(
        "Resolved output {:?}-{}: mode {}x{}@{}Hz on CRTC {:?}",
        connector_info.interface(),
        connector_info.interface_id(),
        mode.size().0,
        mode.size().1,
        mode.vrefresh(),
        crtc,
    );

    Ok(ResolvedDisplay {
        connector: connector_info.handle(),
        mode,
        crtc,
        crtc_index,
        card,
    })
}

/// Picks a connector index: an explicit index must be in range and
/// connected; otherwise the first connected connector wins.
fn pick_connector(connected: &[bool], explicit: Option<usize>) -> Option<usize> {
    match explicit {
        Some(index) => {
            if connected.get(index).copied().unwrap_or(false) {
                Some(index)
            } else {
                None
            }
        }
        None => connected.iter().position(|&up| up),
    }
}

/// A timing mode reduced to the attributes selection cares about.
#[derive(Debug, Clone)]
struct ModeCandidate {
    name: String,
    vrefresh: u32,
    preferred: bool,
    width: u32,
    height: u32,
}

impl ModeCandidate {
    fn from_mode(mode: &Mode) -> Self {
        let (width, height) = mode.size();
        ModeCandidate {
            name: mode.name().to_string_lossy().into_owned(),
            vrefresh: mode.vrefresh(),
            preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
            width: u32::from(width),
            height: u32::from(height),
        }
    }

    fn area(&self) -> u32 {
        self.width * self.height
    }
}

/// Mode preference order: exact name (plus refresh when constrained),
/// then the connector's preferred mode, then the largest pixel area.
fn pick_mode(candidates: &[ModeCandidate], name: Option<&str>, vrefresh: u32) -> Option<usize> {
    if let Some(name) = name {
        let found = candidates
            .iter()
            .position(|m| m.name == name && (vrefresh == 0 || m.vrefresh == vrefresh));
        if found.is_some() {
            return found;
        }
    }

    if let Some(index) = candidates.iter().position(|m| m.preferred) {
        return Some(index);
    }

    let mut best = None;
    let mut best_area = 0;
    for (index, mode) in candidates.iter().enumerate() {
        if mode.area() > best_area {
            best = Some(index);
            best_area = mode.area();
        }
    }
    best
}

/// Resolves the CRTC for a connector.
///
/// Prefers the encoder currently driving the connector and its assigned
/// CRTC; otherwise searches the connector's encoders for one whose
/// `possible_crtcs` mask intersects the device's CRTC list.
fn resolve_crtc(
    card: &Card,
    resources: &ResourceHandles,
    connector: &connector::Info,
) -> Result<(crtc::Handle, usize), ResolveError> {
    if let Some(encoder) = connector.current_encoder() {
        if let Ok(info) = card.get_encoder(encoder) {
            if let Some(crtc) = info.crtc() {
                if let Some(index) = crtc_index(resources, crtc) {
                    return Ok((crtc, index));
                }
            }
        }
    }

    for &encoder in connector.encoders() {
        let Ok(info) = card.get_encoder(encoder) else {
            continue;
        };
        let compatible = resources.filter_crtcs(info.possible_crtcs());
        if let Some(&crtc) = compatible.first() {
            if let Some(index) = crtc_index(resources, crtc) {
                return Ok((crtc, index));
            }
        }
    }

    Err(ResolveError::NoCompatibleController)
}

fn crtc_index(resources: &ResourceHandles, crtc: crtc::Handle) -> Option<usize> {
    resources.crtcs().iter().position(|&handle| handle == crtc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(name: &str, vrefresh: u32, preferred: bool, width: u32, height: u32) -> ModeCandidate {
        ModeCandidate {
            name: name.to_string(),
            vrefresh,
            preferred,
            width,
            height,
        }
    }

    fn demo_modes() -> Vec<ModeCandidate> {
        vec![
            mode("1920x1080", 60, false, 1920, 1080),
            mode("1280x720", 60, true, 1280, 720),
        ]
    }

    #[test]
    fn named_mode_with_refresh_wins() {
        let modes = demo_modes();
        assert_eq!(pick_mode(&modes, Some("1920x1080"), 60), Some(0));
    }

    #[test]
    fn preferred_beats_larger_area() {
        let modes = demo_modes();
        assert_eq!(pick_mode(&modes, None, 0), Some(1));
    }

    #[test]
    fn max_area_without_preferred_flag() {
        let modes = vec![
            mode("1280x720", 60, false, 1280, 720),
            mode("1920x1080", 60, false, 1920, 1080),
            mode("1024x768", 75, false, 1024, 768),
        ];
        assert_eq!(pick_mode(&modes, None, 0), Some(1));
    }

    #[test]
    fn refresh_constraint_skips_wrong_rate() {
        let modes = vec![
            mode("1920x1080", 144, false, 1920, 1080),
            mode("1920x1080", 60, false, 1920, 1080),
        ];
        assert_eq!(pick_mode(&modes, Some("1920x1080"), 60), Some(1));
        // Unconstrained rate takes the first name match.
        assert_eq!(pick_mode(&modes, Some("1920x1080"), 0), Some(0));
    }

    #[test]
    fn unknown_name_falls_back_to_preferred() {
        let modes = demo_modes();
        assert_eq!(pick_mode(&modes, Some("640x480"), 0), Some(1));
    }

    #[test]
    fn no_modes_yields_none() {
        assert_eq!(pick_mode(&[], None, 0), None);
    }

    #[test]
    fn explicit_connector_must_be_connected_and_in_range() {
        let connected = [false, true, false];
        assert_eq!(pick_connector(&connected, Some(1)), Some(1));
        assert_eq!(pick_connector(&connected, Some(0)), None);
        assert_eq!(pick_connector(&connected, Some(7)), None);
    }

    #[test]
    fn first_connected_wins_without_explicit_index() {
        assert_eq!(pick_connector(&[false, false, true, true], None), Some(2));
        assert_eq!(pick_connector(&[false, false], None), None);
    }
}
