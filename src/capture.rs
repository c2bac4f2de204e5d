//! Periodic screen capture while the VM runs freely.
//!
//! The scheduler owns one `TimerSlot`. Each tick disarms the slot, grabs a
//! frame, forwards it to the display and re-arms for the next period. A
//! control interface that cannot produce a frame costs one skipped tick and
//! a warning, never the schedule.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::frontend::FrameDisplay;
use crate::scheduler::{TaskQueue, TimerSlot};
use crate::vm_control::{VmControl, VmError};

/// Result of one capture tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A fresh frame was forwarded to the display
    Delivered,
    /// The control interface could not produce a frame
    Skipped(VmError),
}

#[derive(Debug)]
pub struct ScreenCaptureScheduler {
    slot: TimerSlot,
    screendump_path: PathBuf,
    update_delay: Duration,
    frames_delivered: u64,
    ticks_skipped: u64,
}

impl ScreenCaptureScheduler {
    pub fn new(screendump_path: PathBuf, update_delay: Duration) -> Self {
        Self {
            slot: TimerSlot::new(),
            screendump_path,
            update_delay,
            frames_delivered: 0,
            ticks_skipped: 0,
        }
    }

    /// Cancel any pending tick, then arm `task` after `delay` if one is given.
    pub fn reschedule<T>(
        &mut self,
        queue: &mut TaskQueue<T>,
        now: Instant,
        delay: Duration,
        task: Option<T>,
    ) {
        self.slot.reschedule(queue, now, delay, task);
    }

    /// Disarm; no tick is pending afterwards.
    pub fn stop<T>(&mut self, queue: &mut TaskQueue<T>, now: Instant) {
        self.slot.reschedule(queue, now, Duration::ZERO, None);
    }

    /// Arm the next periodic tick.
    pub fn rearm<T>(&mut self, queue: &mut TaskQueue<T>, now: Instant, task: T) {
        self.slot.reschedule(queue, now, self.update_delay, Some(task));
    }

    pub fn is_armed<T>(&self, queue: &TaskQueue<T>) -> bool {
        self.slot.is_armed(queue)
    }

    pub fn update_delay(&self) -> Duration {
        self.update_delay
    }

    pub fn screendump_path(&self) -> &Path {
        &self.screendump_path
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped
    }

    /// Grab one frame and hand it to `display`.
    ///
    /// Does not touch the timer; the caller re-arms after this returns.
    pub fn capture_frame(
        &mut self,
        vm: &mut dyn VmControl,
        display: &mut dyn FrameDisplay,
    ) -> CaptureOutcome {
        remove_stale_frame(&self.screendump_path);

        match vm.screendump(&self.screendump_path) {
            Ok(()) => {
                display.show_frame(&self.screendump_path);
                self.frames_delivered += 1;
                debug!("Frame {} delivered", self.frames_delivered);
                CaptureOutcome::Delivered
            }
            Err(e) => {
                warn!("Screen capture skipped: {}", e);
                self.ticks_skipped += 1;
                CaptureOutcome::Skipped(e)
            }
        }
    }
}

fn remove_stale_frame(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove stale frame {:?}: {}", path, e),
    }
}
