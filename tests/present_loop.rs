// tests/present_loop.rs

//! End-to-end exercise of the presentation loop through the public trait
//! seams, the way an embedder would drive it.

use std::collections::VecDeque;
use std::num::NonZeroU32;

use drm::control::framebuffer;
use kms_flip::present::{
    run_loop, FlipWait, LoopOptions, PresentError, ScanoutLink, SwapSource,
};

fn fb(id: u32) -> framebuffer::Handle {
    NonZeroU32::new(id).unwrap().into()
}

/// Swap source handing out a rotating two-buffer chain, like GBM does.
#[derive(Default)]
struct TwoBufferChain {
    acquires: u32,
    held: VecDeque<u32>,
}

impl SwapSource for TwoBufferChain {
    fn acquire(&mut self) -> Result<framebuffer::Handle, PresentError> {
        assert!(
            self.held.len() < 2,
            "chain exhausted: a buffer was not released before the next acquire"
        );
        self.acquires += 1;
        let id = 1 + (self.acquires % 2);
        self.held.push_back(id);
        Ok(fb(id))
    }

    fn release_oldest(&mut self) {
        self.held.pop_front();
    }
}

/// Scanout link that records the exact call sequence.
#[derive(Default)]
struct RecordingLink {
    sequence: Vec<String>,
    pending: bool,
    stop_after_flips: Option<usize>,
    flips: usize,
}

impl ScanoutLink for RecordingLink {
    fn set_mode(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
        self.sequence.push(format!("modeset:{}", NonZeroU32::from(fb)));
        Ok(())
    }

    fn submit_flip(&mut self, fb: framebuffer::Handle) -> Result<(), PresentError> {
        assert!(!self.pending, "flip overrun");
        self.pending = true;
        self.flips += 1;
        self.sequence.push(format!("flip:{}", NonZeroU32::from(fb)));
        Ok(())
    }

    fn wait_flip(&mut self) -> Result<FlipWait, PresentError> {
        assert!(self.pending);
        if self.stop_after_flips == Some(self.flips) {
            return Ok(FlipWait::UserStop);
        }
        self.pending = false;
        self.sequence.push("wait".to_string());
        Ok(FlipWait::Completed)
    }
}

#[test]
fn loop_alternates_the_two_buffers_in_order() {
    let mut chain = TwoBufferChain::default();
    let mut link = RecordingLink::default();
    let options = LoopOptions {
        count: 4,
        mode_set_only: false,
    };

    let summary = run_loop(&mut chain, &mut link, &options, |_| {}).unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(
        link.sequence,
        vec![
            "modeset:2", // primed frame
            "flip:1",
            "wait",
            "flip:2",
            "wait",
            "flip:1",
            "wait",
        ]
    );
}

#[test]
fn user_stop_leaves_the_held_buffers_alone() {
    let mut chain = TwoBufferChain::default();
    let mut link = RecordingLink {
        stop_after_flips: Some(2),
        ..RecordingLink::default()
    };
    let options = LoopOptions {
        count: 100,
        mode_set_only: false,
    };

    let summary = run_loop(&mut chain, &mut link, &options, |_| {}).unwrap();

    assert!(summary.stopped_early);
    assert_eq!(summary.frames, 1);
    // The buffer pending on the interrupted flip and the one on scanout
    // are both still held; only the first steady frame released one.
    assert_eq!(chain.held.len(), 2);
}

#[test]
fn chain_never_runs_dry_over_a_long_run() {
    let mut chain = TwoBufferChain::default();
    let mut link = RecordingLink::default();
    let options = LoopOptions {
        count: 64,
        mode_set_only: false,
    };

    let summary = run_loop(&mut chain, &mut link, &options, |_| {}).unwrap();

    assert_eq!(summary.frames, 63);
    assert_eq!(chain.acquires, 64);
    assert_eq!(chain.held.len(), 1, "only the scanout buffer remains held");
}
