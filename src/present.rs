// src/present.rs

//! The page-flip presentation loop.
//!
//! Frame sequencing runs `Priming → Steady(n) → Stopped`; any failure
//! unwinds the loop after reporting the frames rendered so far. Priming
//! populates the first buffer and programs the controller with a
//! synchronous modeset; every Steady iteration renders, swaps, realizes
//! the new buffer's framebuffer, submits an asynchronous flip, and blocks
//! until the completion event arrives before releasing the buffer that
//! just left the screen. A flip is therefore never submitted while the
//! previous one is outstanding, and a buffer is never handed back to the
//! allocator until its successor is on scanout.
//!
//! The loop is written against two seams — `SwapSource` for the buffer
//! side, `ScanoutLink` for the controller side — with the live GBM/DRM
//! implementations below and mocks in the tests.

use std::collections::VecDeque;
use std::io;
use std::os::fd::AsFd;
use std::time::{Duration, Instant};

use drm::control::{connector, crtc, framebuffer, Device as ControlDevice, Event, Mode,
    PageFlipFlags};
use gbm::BufferObject;
use log::{debug, info};
use thiserror::Error;

use crate::buffer::SwapChain;
use crate::display::{Card, ResolvedDisplay};
use crate::egl::RenderContext;
use crate::framebuffer::{FbError, FramebufferCache};
use crate::io::wait_readable;

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("failed to program display mode: {0}")]
    ModesetFailed(#[source] io::Error),
    #[error("failed to queue page flip: {0}")]
    FlipSubmissionFailed(#[source] io::Error),
    #[error("display event wait failed: {0}")]
    WaitFailed(#[source] io::Error),
    #[error("display event wait returned no readiness")]
    EventWaitTimeout,
    #[error("buffer swap failed: {0}")]
    SwapFailed(#[source] khronos_egl::Error),
    #[error("failed to acquire front buffer: {0}")]
    BufferAcquireFailed(#[source] gbm::FrontBufferError),
    #[error(transparent)]
    Framebuffer(#[from] FbError),
}

/// Outcome of blocking on a submitted flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipWait {
    /// The completion event for the pending flip arrived.
    Completed,
    /// The auxiliary input signal became readable; stop cleanly.
    UserStop,
}

/// The buffer side of the loop: swap, acquire, realize, release.
pub trait SwapSource {
    /// Swaps the rendering surface, acquires the newly produced buffer,
    /// and returns its realized framebuffer.
    fn acquire(&mut self) -> Result<framebuffer::Handle, PresentError>;

    /// Returns the oldest still-held buffer to the allocator.
    fn release_oldest(&mut self);
}

/// The controller side of the loop: modeset, flip, completion wait.
pub trait ScanoutLink {
    fn set_mode(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError>;
    fn submit_flip(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError>;
    fn wait_flip(&mut self) -> Result<FlipWait, PresentError>;
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Total frame budget, including the primed frame.
    pub count: u64,
    /// Program every frame with a synchronous modeset instead of flipping.
    pub mode_set_only: bool,
}

#[derive(Debug, Clone)]
pub struct LoopSummary {
    /// Steady-state frames presented; the primed frame is not counted.
    pub frames: u64,
    pub elapsed: Duration,
    pub stopped_early: bool,
}

impl LoopSummary {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Runs the presentation loop to completion, early stop, or failure.
pub fn run_loop<S, L, F>(
    source: &mut S,
    link: &mut L,
    options: &LoopOptions,
    mut render: F,
) -> Result<LoopSummary, PresentError>
where
    S: SwapSource,
    L: ScanoutLink,
    F: FnMut(u64),
{
    // Priming: populate the first buffer and scan it out synchronously.
    render(0);
    let first = source.acquire()?;
    link.set_mode(first)?;
    debug!("Primed first frame via synchronous modeset");

    // Timing starts after the primed frame; it carries one-time setup and
    // shader-compile cost that would skew the fps report.
    let mut timer = FrameTimer::start();
    let mut frames: u64 = 0;

    for index in 1..options.count {
        render(index);
        let next = source.acquire()?;

        if options.mode_set_only {
            link.set_mode(next)?;
        } else {
            link.submit_flip(next)?;
            match link.wait_flip()? {
                FlipWait::Completed => {}
                FlipWait::UserStop => {
                    info!("User interrupt, stopping presentation");
                    let summary = timer.summarize(frames, true);
                    log_summary(&summary);
                    return Ok(summary);
                }
            }
        }

        frames += 1;
        timer.report_progress(frames);

        // The previously displayed buffer is off-screen now; hand it back
        // so the allocator can render into it again.
        source.release_oldest();
    }

    let summary = timer.summarize(frames, false);
    log_summary(&summary);
    Ok(summary)
}

fn log_summary(summary: &LoopSummary) {
    info!(
        "Rendered {} frames in {:.3} s ({:.1} fps)",
        summary.frames,
        summary.elapsed.as_secs_f64(),
        summary.fps(),
    );
}

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

struct FrameTimer {
    start: Instant,
    last_report: Instant,
}

impl FrameTimer {
    fn start() -> Self {
        let now = Instant::now();
        FrameTimer {
            start: now,
            last_report: now,
        }
    }

    fn report_progress(&mut self, frames: u64) {
        if self.last_report.elapsed() >= REPORT_INTERVAL {
            let secs = self.start.elapsed().as_secs_f64();
            info!(
                "Rendered {} frames in {:.3} s ({:.1} fps)",
                frames,
                secs,
                frames as f64 / secs,
            );
            self.last_report = Instant::now();
        }
    }

    fn summarize(&self, frames: u64, stopped_early: bool) -> LoopSummary {
        LoopSummary {
            frames,
            elapsed: self.start.elapsed(),
            stopped_early,
        }
    }
}

// ---------------------------------------------------------------------------
// Live implementations
// ---------------------------------------------------------------------------

/// `SwapSource` over the EGL context, GBM swap chain, and framebuffer
/// arena. Holds at most two locked buffers: the one on scanout and the one
/// pending a flip.
pub struct GbmFrames<'a> {
    card: &'a Card,
    chain: &'a SwapChain,
    context: &'a RenderContext,
    cache: FramebufferCache,
    live: VecDeque<BufferObject<()>>,
}

impl<'a> GbmFrames<'a> {
    pub fn new(card: &'a Card, chain: &'a SwapChain, context: &'a RenderContext) -> Self {
        GbmFrames {
            card,
            chain,
            context,
            cache: FramebufferCache::new(),
            live: VecDeque::with_capacity(2),
        }
    }

    /// Releases held buffers and deregisters every cached framebuffer.
    /// Must run before the swap chain is dropped.
    pub fn finish(mut self) {
        self.live.clear();
        self.cache.release_all(self.card);
    }
}

impl SwapSource for GbmFrames<'_> {
    fn acquire(&mut self) -> Result<framebuffer::Handle, PresentError> {
        self.context
            .swap_buffers()
            .map_err(PresentError::SwapFailed)?;
        let bo = self
            .chain
            .lock_front()
            .map_err(PresentError::BufferAcquireFailed)?;
        let fb = self.cache.get_or_create(self.card, &bo)?;
        self.live.push_back(bo);
        Ok(fb)
    }

    fn release_oldest(&mut self) {
        // Dropping the handle releases the buffer back to the surface.
        self.live.pop_front();
    }
}

/// `ScanoutLink` over the resolved CRTC/connector/mode, with the blocking
/// multiplexed wait on the card descriptor and stdin.
pub struct DrmScanout<'a> {
    card: &'a Card,
    crtc: crtc::Handle,
    connector: connector::Handle,
    mode: Mode,
    stdin: Option<std::io::Stdin>,
    pending_flip: bool,
}

impl<'a> DrmScanout<'a> {
    /// `stop_on_input` wires stdin into the wait so a keypress ends the
    /// loop cleanly.
    pub fn new(resolved: &'a ResolvedDisplay, stop_on_input: bool) -> Self {
        DrmScanout {
            card: &resolved.card,
            crtc: resolved.crtc,
            connector: resolved.connector,
            mode: resolved.mode,
            stdin: stop_on_input.then(std::io::stdin),
            pending_flip: false,
        }
    }
}

impl ScanoutLink for DrmScanout<'_> {
    fn set_mode(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
        self.card
            .set_crtc(self.crtc, Some(fb), (0, 0), &[self.connector], Some(self.mode))
            .map_err(PresentError::ModesetFailed)
    }

    fn submit_flip(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
        debug_assert!(!self.pending_flip, "flip submitted while one is outstanding");
        self.card
            .page_flip(self.crtc, fb, PageFlipFlags::EVENT, None)
            .map_err(PresentError::FlipSubmissionFailed)?;
        self.pending_flip = true;
        Ok(())
    }

    fn wait_flip(&mut self) -> Result<FlipWait, PresentError> {
        while self.pending_flip {
            let readiness = wait_readable(
                self.card.as_fd(),
                self.stdin.as_ref().map(|stdin| stdin.as_fd()),
            )
            .map_err(PresentError::WaitFailed)?;

            if !readiness.display && !readiness.input {
                return Err(PresentError::EventWaitTimeout);
            }
            if readiness.input {
                return Ok(FlipWait::UserStop);
            }

            for event in self
                .card
                .receive_events()
                .map_err(PresentError::WaitFailed)?
            {
                if let Event::PageFlip(flip) = event {
                    if flip.crtc == self.crtc {
                        self.pending_flip = false;
                    }
                }
            }
        }
        Ok(FlipWait::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn fb(id: u32) -> framebuffer::Handle {
        NonZeroU32::new(id).unwrap().into()
    }

    #[derive(Default)]
    struct MockFrames {
        acquired: u32,
        released: u32,
    }

    impl SwapSource for MockFrames {
        fn acquire(&mut self) -> Result<framebuffer::Handle, PresentError> {
            self.acquired += 1;
            Ok(fb(self.acquired))
        }

        fn release_oldest(&mut self) {
            self.released += 1;
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum WaitScript {
        Done,
        Stop,
        Timeout,
    }

    #[derive(Default)]
    struct MockLink {
        set_modes: Vec<u32>,
        flips: Vec<u32>,
        pending: bool,
        script: VecDeque<WaitScript>,
    }

    impl MockLink {
        fn scripted(script: impl IntoIterator<Item = WaitScript>) -> Self {
            MockLink {
                script: script.into_iter().collect(),
                ..MockLink::default()
            }
        }
    }

    impl ScanoutLink for MockLink {
        fn set_mode(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
            self.set_modes.push(NonZeroU32::from(fb).get());
            Ok(())
        }

        fn submit_flip(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
            assert!(
                !self.pending,
                "flip submitted before the previous completion was observed"
            );
            self.pending = true;
            self.flips.push(NonZeroU32::from(fb).get());
            Ok(())
        }

        fn wait_flip(&mut self) -> Result<FlipWait, PresentError> {
            assert!(self.pending, "wait without a submitted flip");
            match self.script.pop_front().unwrap_or(WaitScript::Done) {
                WaitScript::Done => {
                    self.pending = false;
                    Ok(FlipWait::Completed)
                }
                WaitScript::Stop => Ok(FlipWait::UserStop),
                WaitScript::Timeout => Err(PresentError::EventWaitTimeout),
            }
        }
    }

    #[test_log::test]
    fn five_frame_budget_issues_four_flips() {
        let mut frames = MockFrames::default();
        let mut link = MockLink::default();
        let options = LoopOptions {
            count: 5,
            mode_set_only: false,
        };

        let summary = run_loop(&mut frames, &mut link, &options, |_| {}).unwrap();

        assert_eq!(link.set_modes.len(), 1, "priming is a modeset, not a flip");
        assert_eq!(link.flips.len(), 4);
        assert_eq!(summary.frames, 4);
        assert!(!summary.stopped_early);
        assert_eq!(frames.acquired, 5);
        assert_eq!(frames.released, 4);
    }

    #[test]
    fn render_callback_sees_every_frame_index() {
        let mut frames = MockFrames::default();
        let mut link = MockLink::default();
        let options = LoopOptions {
            count: 4,
            mode_set_only: false,
        };

        let mut indices = Vec::new();
        run_loop(&mut frames, &mut link, &options, |i| indices.push(i)).unwrap();

        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test_log::test]
    fn input_during_steady_wait_stops_cleanly() {
        let mut frames = MockFrames::default();
        let mut link = MockLink::scripted([WaitScript::Done, WaitScript::Stop]);
        let options = LoopOptions {
            count: 10,
            mode_set_only: false,
        };

        let summary = run_loop(&mut frames, &mut link, &options, |_| {}).unwrap();

        assert!(summary.stopped_early);
        assert_eq!(summary.frames, 1);
        assert_eq!(link.flips.len(), 2, "stopped before the budget was spent");
        // The interrupted flip's buffer is never released behind the
        // controller's back.
        assert_eq!(frames.released, 1);
    }

    #[test]
    fn wait_timeout_is_fatal() {
        let mut frames = MockFrames::default();
        let mut link = MockLink::scripted([WaitScript::Done, WaitScript::Timeout]);
        let options = LoopOptions {
            count: 10,
            mode_set_only: false,
        };

        let err = run_loop(&mut frames, &mut link, &options, |_| {}).unwrap_err();
        assert!(matches!(err, PresentError::EventWaitTimeout));
    }

    #[test]
    fn direct_modeset_variant_never_flips() {
        let mut frames = MockFrames::default();
        let mut link = MockLink::default();
        let options = LoopOptions {
            count: 3,
            mode_set_only: true,
        };

        let summary = run_loop(&mut frames, &mut link, &options, |_| {}).unwrap();

        assert_eq!(link.flips.len(), 0);
        assert_eq!(link.set_modes.len(), 3);
        assert_eq!(summary.frames, 2);
    }

    #[test]
    fn single_frame_budget_only_primes() {
        let mut frames = MockFrames::default();
        let mut link = MockLink::default();
        let options = LoopOptions {
            count: 1,
            mode_set_only: false,
        };

        let summary = run_loop(&mut frames, &mut link, &options, |_| {}).unwrap();

        assert_eq!(link.set_modes.len(), 1);
        assert!(link.flips.is_empty());
        assert_eq!(summary.frames, 0);
    }
}
