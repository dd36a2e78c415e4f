//! Per-frame acquire, submit and present cycle.
//!
//! The [`FrameScheduler`] drives [`MAX_FRAMES_IN_FLIGHT`](crate::MAX_FRAMES_IN_FLIGHT)
//! frame slots through the cycle below. Each slot owns a command buffer, two
//! semaphores and a fence, and slots are reused round-robin.
//!
//! ```text
//!  Idle ──wait slot fence──acquire──▶ Acquired ──submit──▶ Submitted ──present──▶ Presented
//!   ▲          │                        │                                          │
//!   │          └─ out of date: recreate, │ image fence from another slot:          │
//!   │             slot index unchanged   │ wait on it first                        │
//!   └────────────────────────────────────┴──── advance slot, recreate if needed ───┘
//! ```
//!
//! The scheduler talks to the GPU only through [`FrameTarget`], so the
//! ordering rules can be exercised without a device.
//!
//! # Example
//!
//! ```no_run
//! use cadence_renderer::frame_scheduler::{FrameOutcome, FrameScheduler, FrameTarget};
//!
//! # fn example<T: FrameTarget>(
//! #     scheduler: &mut FrameScheduler,
//! #     target: &mut T,
//! # ) -> cadence_rhi::RhiResult<()> {
//! let outcome = scheduler.run_frame(target, |_target, frame| {
//!     // Record into frame.slot.command_buffer for image frame.image_index.
//!     let _ = frame.slot.command_buffer;
//!     Ok(())
//! })?;
//! if let FrameOutcome::Skipped(reason) = outcome {
//!     println!("frame skipped: {reason:?}");
//! }
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use cadence_rhi::swapchain::{AcquireOutcome, PresentOutcome, RecreateOutcome};
use cadence_rhi::{RhiError, RhiResult};

use crate::image_fences::ImageFenceTable;

/// Synchronization handles and command buffer of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    /// Command buffer re-recorded every time the slot is used.
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquisition, waited on by submission.
    pub image_available: vk::Semaphore,
    /// Signaled by submission, waited on by presentation.
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's last submission retires.
    pub in_flight: vk::Fence,
}

/// Position of the scheduler within a frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame in progress.
    Idle,
    /// An image is acquired and the caller may record.
    Acquired,
    /// Work for the frame is on the queue.
    Submitted,
    /// The image was handed to the presentation engine.
    Presented,
}

/// Why a frame produced no image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Acquisition reported out-of-date; the swapchain was recreated.
    SwapchainOutOfDate,
    /// The surface has zero area; recreation is deferred.
    SurfaceUnavailable,
}

/// Result of [`FrameScheduler::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginFrame {
    /// Record into the frame, then call [`FrameScheduler::end_frame`].
    Ready(FrameContext),
    /// Nothing to record this time around.
    Skipped(SkipReason),
}

/// Result of [`FrameScheduler::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented.
    Presented(PresentOutcome),
    /// The frame was skipped.
    Skipped(SkipReason),
}

/// What the caller records against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameContext {
    /// Index of the frame slot in use.
    pub slot_index: usize,
    /// Acquired swapchain image.
    pub image_index: u32,
    /// Handles of the slot in use.
    pub slot: FrameSlot,
    /// Acquisition reported the swapchain as suboptimal.
    pub suboptimal: bool,
}

/// Counters kept across the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Cycles that reached the slot fence wait.
    pub cycles_started: u64,
    /// Cycles that were submitted and presented.
    pub cycles_completed: u64,
    /// Waits on the current slot's fence.
    pub slot_fence_waits: u64,
    /// Waits on a fence recorded for the acquired image.
    pub image_fence_waits: u64,
    /// Swapchain rebuilds that produced a new generation.
    pub recreations: u64,
    /// Calls that returned without presenting.
    pub skipped: u64,
}

/// GPU-facing operations the scheduler sequences.
///
/// Implemented over the device and swapchain by the renderer, and by
/// recording fakes in tests.
pub trait FrameTarget {
    /// Blocks until `fence` is signaled or `timeout` nanoseconds pass.
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;

    /// Returns `fence` to the unsignaled state.
    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()>;

    /// Acquires the next image, signaling `semaphore` when it is ready.
    fn acquire_next_image(
        &mut self,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> RhiResult<AcquireOutcome>;

    /// Submits the slot's command buffer.
    ///
    /// The submission waits on `image_available` at the color attachment
    /// output stage, signals `render_finished` and signals `in_flight`.
    fn submit(&mut self, slot: &FrameSlot) -> RhiResult<()>;

    /// Presents `image_index` once `wait_semaphore` is signaled.
    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore)
    -> RhiResult<PresentOutcome>;

    /// Rebuilds the swapchain against the current surface.
    fn recreate_swapchain(&mut self) -> RhiResult<RecreateOutcome>;
}

/// Drives frame slots through acquire, submit and present.
///
/// Not thread-safe; owned by the render thread.
pub struct FrameScheduler {
    slots: Vec<FrameSlot>,
    image_fences: ImageFenceTable,
    current_slot: usize,
    state: FrameState,
    image_index: Option<u32>,
    resize_pending: bool,
    recreate_pending: bool,
    timeout: u64,
    stats: FrameStats,
}

impl FrameScheduler {
    /// Creates a scheduler over `slots`.
    ///
    /// Slot fences must start signaled. `timeout` bounds fence waits and
    /// acquisition in nanoseconds; `u64::MAX` waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidUsage`] if `slots` is empty.
    pub fn new(slots: Vec<FrameSlot>, image_count: usize, timeout: u64) -> RhiResult<Self> {
        if slots.is_empty() {
            return Err(RhiError::InvalidUsage(
                "frame scheduler needs at least one slot".to_string(),
            ));
        }

        info!(
            "Frame scheduler created: {} slots, {} swapchain images",
            slots.len(),
            image_count
        );

        Ok(Self {
            slots,
            image_fences: ImageFenceTable::new(image_count),
            current_slot: 0,
            state: FrameState::Idle,
            image_index: None,
            resize_pending: false,
            recreate_pending: false,
            timeout,
            stats: FrameStats::default(),
        })
    }

    /// Starts a frame cycle.
    ///
    /// Waits on the current slot's fence, acquires an image and waits out
    /// any other slot still rendering into that image. On success the slot's
    /// fence has been reset and the caller must record into
    /// `slot.command_buffer` and then call [`end_frame`](Self::end_frame).
    ///
    /// # Errors
    ///
    /// Fence, acquisition and recreation failures are fatal. Calling this
    /// with a frame already in progress is [`RhiError::InvalidUsage`].
    pub fn begin_frame<T: FrameTarget>(&mut self, target: &mut T) -> RhiResult<BeginFrame> {
        if self.state != FrameState::Idle {
            return Err(RhiError::InvalidUsage(format!(
                "begin_frame called in state {:?}",
                self.state
            )));
        }

        if self.recreate_pending && self.recreate(target)? == RecreateOutcome::Deferred {
            self.stats.skipped += 1;
            return Ok(BeginFrame::Skipped(SkipReason::SurfaceUnavailable));
        }

        let slot_index = self.current_slot;
        let slot = self.slots[slot_index];

        self.stats.cycles_started += 1;
        target.wait_for_fence(slot.in_flight, self.timeout)?;
        self.stats.slot_fence_waits += 1;

        let (image_index, suboptimal) =
            match target.acquire_next_image(slot.image_available, self.timeout)? {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => (image_index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    debug!("Acquire reported out of date, recreating swapchain");
                    self.recreate(target)?;
                    self.stats.skipped += 1;
                    return Ok(BeginFrame::Skipped(SkipReason::SwapchainOutOfDate));
                }
            };

        if suboptimal {
            debug!("Acquired image {} from a suboptimal swapchain", image_index);
        }

        if let Some(image_fence) = self.image_fences.get(image_index)
            && image_fence != slot.in_flight
        {
            debug!("Image {} still in use by another slot, waiting", image_index);
            target.wait_for_fence(image_fence, self.timeout)?;
            self.stats.image_fence_waits += 1;
        }
        self.image_fences.assign(image_index, slot.in_flight);

        target.reset_fence(slot.in_flight)?;

        self.image_index = Some(image_index);
        self.state = FrameState::Acquired;

        Ok(BeginFrame::Ready(FrameContext {
            slot_index,
            image_index,
            slot,
            suboptimal,
        }))
    }

    /// Submits and presents the frame started by
    /// [`begin_frame`](Self::begin_frame), then advances to the next slot.
    ///
    /// An out-of-date presentation or a pending resize recreates the
    /// swapchain after presenting. Suboptimal presentation is tolerated.
    ///
    /// # Errors
    ///
    /// Submission, presentation and recreation failures are fatal. Calling
    /// this without an acquired image is [`RhiError::InvalidUsage`].
    pub fn end_frame<T: FrameTarget>(&mut self, target: &mut T) -> RhiResult<PresentOutcome> {
        let image_index = match (self.state, self.image_index) {
            (FrameState::Acquired, Some(image_index)) => image_index,
            _ => {
                return Err(RhiError::InvalidUsage(format!(
                    "end_frame called in state {:?}",
                    self.state
                )));
            }
        };
        let slot = self.slots[self.current_slot];

        target.submit(&slot)?;
        self.state = FrameState::Submitted;

        let outcome = target.present(image_index, slot.render_finished)?;
        self.state = FrameState::Presented;

        self.image_index = None;
        self.current_slot = (self.current_slot + 1) % self.slots.len();
        self.stats.cycles_completed += 1;

        if outcome == PresentOutcome::OutOfDate || self.resize_pending {
            debug!(
                "Recreating swapchain after present (out of date: {}, resize: {})",
                outcome == PresentOutcome::OutOfDate,
                self.resize_pending
            );
            self.recreate(target)?;
        }

        self.state = FrameState::Idle;
        Ok(outcome)
    }

    /// Runs one full cycle, handing the acquired frame to `record`.
    pub fn run_frame<T, F>(&mut self, target: &mut T, record: F) -> RhiResult<FrameOutcome>
    where
        T: FrameTarget,
        F: FnOnce(&mut T, &FrameContext) -> RhiResult<()>,
    {
        match self.begin_frame(target)? {
            BeginFrame::Skipped(reason) => Ok(FrameOutcome::Skipped(reason)),
            BeginFrame::Ready(frame) => {
                record(target, &frame)?;
                self.end_frame(target).map(FrameOutcome::Presented)
            }
        }
    }

    /// Requests swapchain recreation after the next presentation.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Index of the slot the next cycle will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of frame slots.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Current position within the cycle.
    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Returns `true` while a deferred recreation waits for a usable surface.
    #[inline]
    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }

    /// Lifetime counters.
    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Fences recorded per swapchain image.
    #[inline]
    pub fn image_fences(&self) -> &ImageFenceTable {
        &self.image_fences
    }

    fn recreate<T: FrameTarget>(&mut self, target: &mut T) -> RhiResult<RecreateOutcome> {
        self.resize_pending = false;

        let outcome = target.recreate_swapchain()?;
        match outcome {
            RecreateOutcome::Recreated { image_count, .. } => {
                self.image_fences.reset(image_count);
                self.recreate_pending = false;
                self.stats.recreations += 1;
            }
            RecreateOutcome::Deferred => {
                if !self.recreate_pending {
                    debug!("Swapchain recreation deferred until the surface has area");
                }
                self.image_fences.reset(0);
                self.recreate_pending = true;
            }
        }
        Ok(outcome)
    }
}
