// src/buffer.rs

//! GBM swap chain allocation.
//!
//! Builds the allocator device on a duplicate of the card descriptor and
//! creates the scannable surface the rendering context draws into. Buffer
//! rotation itself (lock front / release) is driven by the presentation
//! loop; this module only owns the allocation.

use std::io;
use std::os::raw::c_void;

use gbm::{AsRaw, BufferObject, BufferObjectFlags, Device as AllocatorDevice, Modifier, Surface};
use log::{info, warn};
use thiserror::Error;

use crate::config::MODIFIER_LINEAR;
use crate::display::Card;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to create allocator device: {0}")]
    DeviceCreationFailed(#[source] io::Error),
    #[error("buffer modifier {0:#018x} requested but modifier support is unavailable")]
    ModifierUnsupported(u64),
    #[error("failed to create allocator surface: {0}")]
    SurfaceCreationFailed(#[source] io::Error),
}

/// The rotating set of scannable buffer objects backing the screen.
pub struct SwapChain {
    // Dropped in declaration order: the surface must go before the device.
    surface: Surface<()>,
    device: AllocatorDevice<Card>,
    width: u32,
    height: u32,
    format: gbm::Format,
}

impl SwapChain {
    pub fn new(
        card: &Card,
        width: u32,
        height: u32,
        format: gbm::Format,
        modifier: u64,
    ) -> Result<Self, BufferError> {
        let dup = card.dup().map_err(BufferError::DeviceCreationFailed)?;
        let device = AllocatorDevice::new(dup).map_err(BufferError::DeviceCreationFailed)?;
        let surface = create_surface(&device, width, height, format, modifier)?;

        info!("Allocated {}x{} swap chain surface ({:?})", width, height, format);

        Ok(SwapChain {
            surface,
            device,
            width,
            height,
            format,
        })
    }

    /// Acquires the most recently swapped buffer for scanout.
    ///
    /// The buffer returns to the allocator when the handle is dropped;
    /// the loop holds it until the successor's flip has completed.
    pub fn lock_front(&self) -> Result<BufferObject<()>, gbm::FrontBufferError> {
        // SAFETY: the caller contract (documented above) ensures the prior
        // front buffer handle has been dropped before the next lock.
        unsafe { self.surface.lock_front_buffer() }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> gbm::Format {
        self.format
    }

    /// Raw allocator device pointer, for binding the rendering context.
    pub fn raw_device(&self) -> *mut c_void {
        self.device.as_raw() as *mut c_void
    }

    /// Raw surface pointer, for binding the on-screen rendering surface.
    pub fn raw_surface(&self) -> *mut c_void {
        self.surface.as_raw() as *mut c_void
    }
}

/// Creates the allocator surface, preferring the requested modifier.
///
/// A failed modifier allocation falls back to a plain scanout+rendering
/// allocation only when the request was linear; any other modifier
/// request without modifier support is a hard failure, not a silent
/// downgrade.
fn create_surface(
    device: &AllocatorDevice<Card>,
    width: u32,
    height: u32,
    format: gbm::Format,
    modifier: u64,
) -> Result<Surface<()>, BufferError> {
    match device.create_surface_with_modifiers::<()>(
        width,
        height,
        format,
        std::iter::once(Modifier::from(modifier)),
    ) {
        Ok(surface) => Ok(surface),
        Err(err) => {
            if modifier != MODIFIER_LINEAR {
                return Err(BufferError::ModifierUnsupported(modifier));
            }
            warn!(
                "Modifier-based surface creation failed ({}); using linear allocation",
                err
            );
            device
                .create_surface::<()>(
                    width,
                    height,
                    format,
                    BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
                )
                .map_err(BufferError::SurfaceCreationFailed)
        }
    }
}
