// src/egl.rs

//! EGL rendering context setup over the GBM allocator surface.
//!
//! Config selection mirrors what the swap chain was allocated with:
//! filter on window renderability, channel sizes, and sample count, then
//! require the config whose native visual id equals the chain's fourcc —
//! EGL reports GBM formats through `NATIVE_VISUAL_ID`, and a mismatched
//! config would render into buffers the controller cannot scan out.

use std::os::raw::c_void;

use khronos_egl as egl;
use log::{debug, info};
use thiserror::Error;

use crate::config::PixelFormat;

/// EGL_PLATFORM_GBM_KHR from EGL_KHR_platform_gbm.
const PLATFORM_GBM_KHR: egl::Enum = 0x31D7;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no EGL display for the allocator device")]
    NoDisplay,
    #[error("EGL initialization failed: {0}")]
    InitFailed(#[source] egl::Error),
    #[error("no compatible EGL config for format {0:#010x}")]
    NoCompatibleConfig(u32),
    #[error("failed to create rendering context: {0}")]
    ContextCreationFailed(#[source] egl::Error),
    #[error("failed to bind rendering surface: {0}")]
    SurfaceBindFailed(#[source] egl::Error),
}

/// An initialized EGL context with an optional on-screen surface, made
/// current on construction.
pub struct RenderContext {
    egl: egl::Instance<egl::Static>,
    display: egl::Display,
    context: egl::Context,
    surface: Option<egl::Surface>,
}

impl RenderContext {
    /// Creates a GLES2 context for the allocator device and binds a window
    /// surface over `native_window` when one is given (headless operation
    /// passes `None` and skips surface creation).
    pub fn new(
        native_display: *mut c_void,
        native_window: Option<*mut c_void>,
        format: PixelFormat,
        samples: u32,
    ) -> Result<Self, ContextError> {
        let instance = egl::Instance::new(egl::Static);

        let display = match unsafe {
            instance.get_platform_display(PLATFORM_GBM_KHR, native_display, &[egl::ATTRIB_NONE])
        } {
            Ok(display) => display,
            // Pre-1.5 implementations: the legacy entry point accepts the
            // GBM device pointer directly.
            Err(_) => unsafe { instance.get_display(native_display) }
                .ok_or(ContextError::NoDisplay)?,
        };

        let (major, minor) = instance
            .initialize(display)
            .map_err(ContextError::InitFailed)?;
        info!("Using EGL {}.{}", major, minor);
        if let (Ok(version), Ok(vendor)) = (
            instance.query_string(Some(display), egl::VERSION),
            instance.query_string(Some(display), egl::VENDOR),
        ) {
            info!(
                "EGL version {:?}, vendor {:?}",
                version.to_string_lossy(),
                vendor.to_string_lossy()
            );
        }

        instance
            .bind_api(egl::OPENGL_ES_API)
            .map_err(ContextError::InitFailed)?;

        let config = choose_config(&instance, display, format, samples)?;

        let context = instance
            .create_context(
                display,
                config,
                None,
                &[egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE],
            )
            .map_err(ContextError::ContextCreationFailed)?;

        let surface = match native_window {
            Some(window) => Some(
                unsafe { instance.create_window_surface(display, config, window, None) }
                    .map_err(ContextError::SurfaceBindFailed)?,
            ),
            None => None,
        };

        instance
            .make_current(display, surface, surface, Some(context))
            .map_err(ContextError::SurfaceBindFailed)?;

        Ok(RenderContext {
            egl: instance,
            display,
            context,
            surface,
        })
    }

    /// Publishes the back buffer. A headless context has nothing to swap.
    pub fn swap_buffers(&self) -> Result<(), egl::Error> {
        match self.surface {
            Some(surface) => self.egl.swap_buffers(self.display, surface),
            None => Ok(()),
        }
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let _ = self.egl.make_current(self.display, None, None, None);
        if let Some(surface) = self.surface.take() {
            let _ = self.egl.destroy_surface(self.display, surface);
        }
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.terminate(self.display);
    }
}

/// Filters configs on buffer attributes, then matches the native visual
/// id against the swap chain's fourcc.
fn choose_config(
    instance: &egl::Instance<egl::Static>,
    display: egl::Display,
    format: PixelFormat,
    samples: u32,
) -> Result<egl::Config, ContextError> {
    let mut attribs = vec![
        egl::SURFACE_TYPE,
        egl::WINDOW_BIT,
        egl::RED_SIZE,
        8,
        egl::GREEN_SIZE,
        8,
        egl::BLUE_SIZE,
        8,
        egl::ALPHA_SIZE,
        if format.has_alpha() { 8 } else { 0 },
        egl::RENDERABLE_TYPE,
        egl::OPENGL_ES2_BIT,
        egl::SAMPLES,
        samples as egl::Int,
    ];
    if format.has_alpha() {
        attribs.extend_from_slice(&[egl::DEPTH_SIZE, 24, egl::STENCIL_SIZE, 8]);
    }
    attribs.push(egl::NONE);

    let count = instance
        .matching_config_count(display, &attribs)
        .map_err(ContextError::InitFailed)?;
    if count == 0 {
        return Err(ContextError::NoCompatibleConfig(format.fourcc()));
    }

    let mut configs = Vec::with_capacity(count);
    instance
        .choose_config(display, &attribs, &mut configs)
        .map_err(ContextError::InitFailed)?;

    let target = format.fourcc() as egl::Int;
    for &config in &configs {
        match instance.get_config_attrib(display, config, egl::NATIVE_VISUAL_ID) {
            Ok(id) if id == target => {
                debug!("Matched EGL config with native visual {:#010x}", id);
                return Ok(config);
            }
            _ => continue,
        }
    }

    Err(ContextError::NoCompatibleConfig(format.fourcc()))
}
