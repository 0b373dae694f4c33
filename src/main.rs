// src/main.rs

//! Entry point: bring up the display pipeline stage by stage, then hand
//! control to the presentation loop.
//!
//! Each fatal stage has its own exit code so a harness can tell where
//! bring-up failed: 1 resource resolution, 2 buffer backend, 3 context
//! setup, 4 scene (shader compile/link), 5 presentation loop. A clean
//! run — including a user-requested early stop — exits 0.

use std::process::ExitCode;

use log::{error, info};

use kms_flip::buffer::SwapChain;
use kms_flip::config::Config;
use kms_flip::demo::Scene;
use kms_flip::display;
use kms_flip::egl::RenderContext;
use kms_flip::present::{self, DrmScanout, GbmFrames, LoopOptions};

const EXIT_RESOLVE: u8 = 1;
const EXIT_BUFFER: u8 = 2;
const EXIT_CONTEXT: u8 = 3;
const EXIT_SCENE: u8 = 4;
const EXIT_PRESENT: u8 = 5;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting kms-flip...");

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {:#}", err);
            return ExitCode::from(EXIT_RESOLVE);
        }
    };

    let resolved = match display::resolve(&config) {
        Ok(resolved) => resolved,
        Err(err) => {
            error!("Display resolution failed: {}", err);
            return ExitCode::from(EXIT_RESOLVE);
        }
    };

    let chain = match SwapChain::new(
        &resolved.card,
        resolved.width(),
        resolved.height(),
        config.format.gbm(),
        config.modifier,
    ) {
        Ok(chain) => chain,
        Err(err) => {
            error!("Buffer backend setup failed: {}", err);
            return ExitCode::from(EXIT_BUFFER);
        }
    };

    let context = match RenderContext::new(
        chain.raw_device(),
        Some(chain.raw_surface()),
        config.format,
        config.samples,
    ) {
        Ok(context) => context,
        Err(err) => {
            error!("Rendering context setup failed: {}", err);
            return ExitCode::from(EXIT_CONTEXT);
        }
    };

    let scene = match Scene::new(chain.width(), chain.height()) {
        Ok(scene) => scene,
        Err(err) => {
            error!("Scene setup failed: {:#}", err);
            return ExitCode::from(EXIT_SCENE);
        }
    };

    let options = LoopOptions {
        count: config.count,
        mode_set_only: config.mode_set_only,
    };
    let mut frames = GbmFrames::new(&resolved.card, &chain, &context);
    let mut scanout = DrmScanout::new(&resolved, !config.ignore_input);

    let result = present::run_loop(&mut frames, &mut scanout, &options, |index| {
        scene.draw(index)
    });
    frames.finish();

    match result {
        Ok(summary) => {
            if summary.stopped_early {
                info!("Stopped early after {} frames", summary.frames);
            }
            info!("kms-flip exited successfully.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("Presentation failed: {}", err);
            ExitCode::from(EXIT_PRESENT)
        }
    }
}
