// src/io.rs

//! Readiness multiplexing for the presentation loop.
//!
//! One blocking `poll(2)` over the display event descriptor and an
//! optional auxiliary input descriptor. No timeout: the kernel owes us a
//! flip-completion event, so an indefinite wait is correct and a
//! zero-readiness return is something the caller treats as an error
//! rather than retrying.

use std::io;
use std::os::fd::BorrowedFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// Which descriptors came back readable from a wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub display: bool,
    pub input: bool,
}

/// Blocks until the display descriptor or the auxiliary input descriptor
/// (when present) becomes readable.
pub fn wait_readable(
    display: BorrowedFd<'_>,
    input: Option<BorrowedFd<'_>>,
) -> io::Result<Readiness> {
    let mut fds = Vec::with_capacity(2);
    fds.push(PollFd::new(display, PollFlags::POLLIN));
    if let Some(input) = input {
        fds.push(PollFd::new(input, PollFlags::POLLIN));
    }

    poll(&mut fds, PollTimeout::NONE).map_err(io::Error::from)?;

    let readable = |fd: &PollFd| {
        fd.revents()
            .map(|flags| flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
            .unwrap_or(false)
    };

    Ok(Readiness {
        display: readable(&fds[0]),
        input: fds.get(1).map(readable).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{pipe, write};
    use std::os::fd::AsFd;

    #[test]
    fn reports_display_readiness() {
        let (read_end, write_end) = pipe().unwrap();
        write(&write_end, b"x").unwrap();

        let readiness = wait_readable(read_end.as_fd(), None).unwrap();
        assert!(readiness.display);
        assert!(!readiness.input);
    }

    #[test]
    fn reports_input_readiness_independently() {
        let (display_read, _display_write) = pipe().unwrap();
        let (input_read, input_write) = pipe().unwrap();
        write(&input_write, b"\n").unwrap();

        let readiness = wait_readable(display_read.as_fd(), Some(input_read.as_fd())).unwrap();
        assert!(!readiness.display);
        assert!(readiness.input);
    }

    #[test]
    fn reports_both_when_both_are_ready() {
        let (display_read, display_write) = pipe().unwrap();
        let (input_read, input_write) = pipe().unwrap();
        write(&display_write, b"e").unwrap();
        write(&input_write, b"q").unwrap();

        let readiness = wait_readable(display_read.as_fd(), Some(input_read.as_fd())).unwrap();
        assert!(readiness.display);
        assert!(readiness.input);
    }

    #[test]
    fn closed_writer_counts_as_readable() {
        let (read_end, write_end) = pipe().unwrap();
        drop(write_end);

        let readiness = wait_readable(read_end.as_fd(), None).unwrap();
        assert!(readiness.display);
    }
}
