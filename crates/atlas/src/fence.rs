//! GPU completion fences.
//!
//! wgpu has no standalone fence object; a fence here is an
//! `on_submitted_work_done` callback feeding a channel, waited on with a
//! bounded poll loop. The wait cap is sized for interactive framerates:
//! a frame that takes longer than the cap has already missed its slot,
//! so the waiter reports a timeout instead of stalling the emulator.

use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Re-poll interval while a fence is pending.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Default wait cap for intra-frame fences.
pub const FRAME_WAIT: Duration = Duration::from_millis(50);

/// Teardown drains all outstanding work; resolution changes and shutdown
/// may legitimately take much longer than a frame.
pub const TEARDOWN_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWaitError {
    TimedOut,
}

#[derive(Debug)]
pub struct FrameFence {
    receiver: mpsc::Receiver<()>,
    signaled: bool,
}

impl FrameFence {
    /// Record a fence after the most recent submission on `queue`.
    pub fn record(queue: &wgpu::Queue) -> Self {
        let (sender, receiver) = mpsc::channel();
        queue.on_submitted_work_done(move || {
            let _ = sender.send(());
        });
        Self {
            receiver,
            signaled: false,
        }
    }

    /// A fence that is already signaled; used for surfaces with no
    /// in-flight GPU work.
    pub fn signaled() -> Self {
        let (sender, receiver) = mpsc::channel();
        sender.send(()).expect("receiver held locally");
        Self {
            receiver,
            signaled: true,
        }
    }

    pub fn is_signaled(&mut self) -> bool {
        if self.signaled {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(()) => {
                self.signaled = true;
                true
            }
            Err(mpsc::TryRecvError::Empty) => false,
            // A disconnected sender means the queue dropped the callback,
            // which only happens when the device is lost; treat the work
            // as done rather than wedging the frame loop.
            Err(mpsc::TryRecvError::Disconnected) => {
                self.signaled = true;
                true
            }
        }
    }

    /// Block until the fence signals, re-polling the device so the
    /// callback can fire, up to `cap`.
    pub fn wait(&mut self, device: &wgpu::Device, cap: Duration) -> Result<(), FenceWaitError> {
        if self.is_signaled() {
            return Ok(());
        }
        let deadline = Instant::now() + cap;
        loop {
            let _ = device.poll(wgpu::PollType::Poll);
            if self.is_signaled() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FenceWaitError::TimedOut);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn wait_for_frame(&mut self, device: &wgpu::Device) -> Result<(), FenceWaitError> {
        self.wait(device, FRAME_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_signaled_fence_reports_signaled() {
        let mut fence = FrameFence::signaled();
        assert!(fence.is_signaled());
        assert!(fence.is_signaled());
    }

    #[test]
    fn dropped_sender_counts_as_signaled() {
        let (sender, receiver) = mpsc::channel::<()>();
        drop(sender);
        let mut fence = FrameFence {
            receiver,
            signaled: false,
        };
        assert!(fence.is_signaled());
    }
}
