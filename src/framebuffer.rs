// src/framebuffer.rs

//! Scanout framebuffer registration cache.
//!
//! The display controller can only scan out buffers that have been
//! registered with the kernel as framebuffers. Registration is memoized
//! per buffer object in an explicit arena keyed by the buffer's primary
//! plane handle: repeated lookups return the cached registration, and an
//! explicit release deregisters exactly once. There is no destruction
//! hook hidden in the allocator; teardown is a synchronous call.
//!
//! Registration prefers the multi-plane path (per-plane handles, strides,
//! offsets, and the layout modifier) when the buffer carries a concrete
//! non-linear modifier, and falls back to single-plane registration from
//! the primary handle and stride otherwise.

use std::collections::HashMap;
use std::io;
use std::num::NonZeroU32;

use drm::buffer::{Buffer, DrmModifier, PlanarBuffer};
use drm::control::{framebuffer, Device as ControlDevice, FbCmd2Flags};
use log::{debug, warn};
use thiserror::Error;

use crate::display::Card;

#[derive(Debug, Error)]
pub enum FbError {
    #[error("failed to register scanout framebuffer: {0}")]
    FramebufferCreationFailed(#[source] io::Error),
}

/// Identity of a buffer object within the cache: its primary plane handle.
pub type BufferKey = u32;

pub fn buffer_key<B: Buffer>(buffer: &B) -> BufferKey {
    NonZeroU32::from(buffer.handle()).get()
}

/// The kernel registration interface, as a seam so cache behavior can be
/// tested without a live device.
pub trait FbRegistrar {
    /// Multi-plane registration carrying the buffer's layout modifier.
    fn register_planar<B: PlanarBuffer>(&self, buffer: &B) -> io::Result<framebuffer::Handle>;
    /// Single-plane registration from the primary handle and stride.
    fn register_single<B: Buffer>(&self, buffer: &B) -> io::Result<framebuffer::Handle>;
    fn unregister(&self, handle: framebuffer::Handle) -> io::Result<()>;
}

impl FbRegistrar for Card {
    fn register_planar<B: PlanarBuffer>(&self, buffer: &B) -> io::Result<framebuffer::Handle> {
        self.add_planar_framebuffer(buffer, FbCmd2Flags::MODIFIERS)
    }

    fn register_single<B: Buffer>(&self, buffer: &B) -> io::Result<framebuffer::Handle> {
        self.add_framebuffer(buffer, 24, 32)
    }

    fn unregister(&self, handle: framebuffer::Handle) -> io::Result<()> {
        self.destroy_framebuffer(handle)
    }
}

/// Arena of live framebuffer registrations, keyed by buffer identity.
#[derive(Debug, Default)]
pub struct FramebufferCache {
    entries: HashMap<BufferKey, framebuffer::Handle>,
}

impl FramebufferCache {
    pub fn new() -> Self {
        FramebufferCache::default()
    }

    /// Returns the framebuffer for a buffer object, registering it on
    /// first use. Idempotent: a cache hit performs no kernel calls.
    pub fn get_or_create<R, B>(
        &mut self,
        device: &R,
        buffer: &B,
    ) -> Result<framebuffer::Handle, FbError>
    where
        R: FbRegistrar,
        B: Buffer + PlanarBuffer,
    {
        let key = buffer_key(buffer);
        if let Some(&handle) = self.entries.get(&key) {
            return Ok(handle);
        }

        let modifier = PlanarBuffer::modifier(buffer);
        let wants_planar =
            matches!(modifier, Some(m) if m != DrmModifier::Invalid && m != DrmModifier::Linear);

        let handle = if wants_planar {
            match device.register_planar(buffer) {
                Ok(handle) => handle,
                Err(err) => {
                    // Could mask a real driver incompatibility as a cosmetic
                    // quality loss, so it is at least visible in the log.
                    warn!(
                        "Multi-plane framebuffer registration failed ({}); \
                         falling back to single-plane",
                        err
                    );
                    device
                        .register_single(buffer)
                        .map_err(FbError::FramebufferCreationFailed)?
                }
            }
        } else {
            device
                .register_single(buffer)
                .map_err(FbError::FramebufferCreationFailed)?
        };

        debug!("Registered framebuffer {:?} for buffer {}", handle, key);
        self.entries.insert(key, handle);
        Ok(handle)
    }

    /// Deregisters the framebuffer attached to `key`, if any.
    ///
    /// A key without an entry is a no-op; a key with one deregisters it
    /// exactly once and frees the arena slot.
    pub fn release<R: FbRegistrar>(&mut self, device: &R, key: BufferKey) {
        if let Some(handle) = self.entries.remove(&key) {
            if let Err(err) = device.unregister(handle) {
                warn!("Failed to deregister framebuffer {:?}: {}", handle, err);
            }
        }
    }

    /// Tears down every live registration. Called before the swap chain
    /// that owns the underlying buffers is dropped.
    pub fn release_all<R: FbRegistrar>(&mut self, device: &R) {
        for (key, handle) in self.entries.drain() {
            debug!("Deregistering framebuffer {:?} for buffer {}", handle, key);
            if let Err(err) = device.unregister(handle) {
                warn!("Failed to deregister framebuffer {:?}: {}", handle, err);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
