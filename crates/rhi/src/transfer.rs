//! Batched host-to-device transfers.
//!
//! [`TransferEngine::queue_copy`] hands out a mapped, host-coherent staging
//! region per destination; the caller writes straight into it.
//! [`TransferEngine::flush`] then records every pending copy, in insertion
//! order, into one single-time command buffer and waits once, however many
//! copies are pending. Staging memory is released only after that wait
//! returns.
//!
//! The engine talks to the GPU through [`TransferBackend`], implemented for
//! `Arc<DeviceContext>`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence_rhi::buffer::{Buffer, BufferUsage};
//! use cadence_rhi::device::DeviceContext;
//! use cadence_rhi::transfer::TransferEngine;
//!
//! # fn example(device: Arc<DeviceContext>) -> Result<(), cadence_rhi::RhiError> {
//! let vertices = Buffer::new(device.clone(), BufferUsage::Vertex, 48)?;
//! let indices = Buffer::new(device.clone(), BufferUsage::Index, 12)?;
//!
//! let mut transfers = TransferEngine::new(device);
//! transfers.queue_write_pod(vertices.handle(), &[0.0f32; 12])?;
//! transfers.queue_write_pod(indices.handle(), &[0u32, 1, 2])?;
//! transfers.flush()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferUsage};
use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult};
use crate::single_time::SingleTimeCommands;

/// Host-visible memory a copy reads from.
pub trait StagingMemory {
    /// Buffer handle used as the copy source.
    fn handle(&self) -> vk::Buffer;
    /// Mapped bytes, exactly the requested size.
    fn mapped_mut(&mut self) -> RhiResult<&mut [u8]>;
}

/// Records copy commands into an open command buffer.
pub trait CopyRecorder {
    /// Records a copy of `size` bytes from the start of `src` to the start of `dst`.
    fn record_copy(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
}

/// GPU operations the transfer engine needs.
pub trait TransferBackend {
    /// Staging allocation type; dropping it releases the memory.
    type Staging: StagingMemory;
    /// Open command buffer type.
    type Recorder: CopyRecorder;

    /// Allocates host-visible, host-coherent staging memory of `size` bytes.
    fn create_staging(&self, size: vk::DeviceSize) -> RhiResult<Self::Staging>;
    /// Opens a one-time command buffer.
    fn begin_commands(&self) -> RhiResult<Self::Recorder>;
    /// Submits the recorded commands and blocks until they have executed.
    fn submit_and_wait(&self, recorder: Self::Recorder) -> RhiResult<()>;
}

impl StagingMemory for Buffer {
    fn handle(&self) -> vk::Buffer {
        Buffer::handle(self)
    }

    fn mapped_mut(&mut self) -> RhiResult<&mut [u8]> {
        self.mapped_slice_mut()
    }
}

impl CopyRecorder for SingleTimeCommands {
    fn record_copy(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.recorder().copy_buffer(src, dst, size);
    }
}

impl TransferBackend for Arc<DeviceContext> {
    type Staging = Buffer;
    type Recorder = SingleTimeCommands;

    fn create_staging(&self, size: vk::DeviceSize) -> RhiResult<Buffer> {
        Buffer::new(self.clone(), BufferUsage::Staging, size)
    }

    fn begin_commands(&self) -> RhiResult<SingleTimeCommands> {
        SingleTimeCommands::begin(self.clone())
    }

    fn submit_and_wait(&self, recorder: SingleTimeCommands) -> RhiResult<()> {
        recorder.end(self.graphics_queue())
    }
}

struct PendingCopy<S> {
    staging: S,
    destination: vk::Buffer,
    size: vk::DeviceSize,
}

/// Running totals over the engine's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Flushes that submitted work.
    pub submissions: u64,
    /// Copies submitted.
    pub copies: u64,
    /// Bytes submitted.
    pub bytes: u64,
}

/// Accumulates host-to-device buffer writes and commits them together.
///
/// Single-threaded; owned by the render thread. Dropping the engine with
/// pending copies releases their staging memory and discards the copies.
pub struct TransferEngine<B: TransferBackend = Arc<DeviceContext>> {
    backend: B,
    pending: Vec<PendingCopy<B::Staging>>,
    stats: TransferStats,
}

impl<B: TransferBackend> TransferEngine<B> {
    /// Creates an engine with an empty batch.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pending: Vec::new(),
            stats: TransferStats::default(),
        }
    }

    /// Stages a copy of `size` bytes into `destination`.
    ///
    /// Returns the mapped staging bytes; whatever the caller writes there
    /// before [`flush`](Self::flush) is what lands in `destination`.
    ///
    /// # Errors
    ///
    /// A zero size is [`RhiError::InvalidUsage`]; staging allocation failure
    /// is [`RhiError::AllocationFailed`] with the requested size.
    pub fn queue_copy(
        &mut self,
        destination: vk::Buffer,
        size: vk::DeviceSize,
    ) -> RhiResult<&mut [u8]> {
        if size == 0 {
            return Err(RhiError::InvalidUsage(
                "queue_copy requires a non-zero size".to_string(),
            ));
        }

        let staging = self.backend.create_staging(size)?;
        self.pending.push(PendingCopy {
            staging,
            destination,
            size,
        });
        debug!("Queued {} byte copy ({} pending)", size, self.pending.len());

        match self.pending.last_mut() {
            Some(entry) => entry.staging.mapped_mut(),
            None => Err(RhiError::InvalidUsage("transfer batch is empty".to_string())),
        }
    }

    /// Stages `data` for `destination`.
    pub fn queue_write(&mut self, destination: vk::Buffer, data: &[u8]) -> RhiResult<()> {
        let mapped = self.queue_copy(destination, data.len() as vk::DeviceSize)?;
        mapped[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Stages a slice of plain-old-data values for `destination`.
    pub fn queue_write_pod<T: bytemuck::Pod>(
        &mut self,
        destination: vk::Buffer,
        values: &[T],
    ) -> RhiResult<()> {
        self.queue_write(destination, bytemuck::cast_slice(values))
    }

    /// Submits every pending copy in one command buffer and waits for it.
    ///
    /// Returns the number of copies submitted. An empty batch does no GPU
    /// work. On error the batch is left in place; the caller either retries
    /// or calls [`discard`](Self::discard).
    pub fn flush(&mut self) -> RhiResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let mut recorder = self.backend.begin_commands()?;
        let mut bytes = 0;
        for copy in &self.pending {
            recorder.record_copy(copy.staging.handle(), copy.destination, copy.size);
            bytes += copy.size;
        }
        self.backend.submit_and_wait(recorder)?;

        let copies = self.pending.len();
        // The wait above retired every command reading these buffers.
        self.pending.clear();

        self.stats.submissions += 1;
        self.stats.copies += copies as u64;
        self.stats.bytes += bytes;
        debug!("Flushed {} copies ({} bytes)", copies, bytes);

        Ok(copies)
    }

    /// Drops every pending copy without submitting it and releases its
    /// staging memory. Returns the number of copies discarded.
    ///
    /// The caller must call this before releasing any destination buffer
    /// that is still queued. If a failed [`flush`](Self::flush) may have
    /// reached the GPU, the device must be idle first.
    pub fn discard(&mut self) -> usize {
        let count = self.pending.len();
        if count > 0 {
            debug!("Discarding {} pending copies", count);
            self.pending.clear();
        }
        count
    }

    /// Number of pending copies.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes waiting to be flushed.
    pub fn pending_bytes(&self) -> vk::DeviceSize {
        self.pending.iter().map(|copy| copy.size).sum()
    }

    /// Lifetime totals.
    #[inline]
    pub fn stats(&self) -> TransferStats {
        self.stats
    }
}

impl<B: TransferBackend> Drop for TransferEngine<B> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Transfer engine dropped with {} unflushed copies; discarding",
                self.pending.len()
            );
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use ash::vk::Handle;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        CreateStaging(u64),
        Begin,
        Copy { src: u64, dst: u64, size: u64 },
        SubmitAndWait,
        Release { src: u64, bytes: Vec<u8> },
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct FakeStaging {
        log: Log,
        handle: u64,
        bytes: Vec<u8>,
    }

    impl StagingMemory for FakeStaging {
        fn handle(&self) -> vk::Buffer {
            vk::Buffer::from_raw(self.handle)
        }

        fn mapped_mut(&mut self) -> RhiResult<&mut [u8]> {
            Ok(&mut self.bytes)
        }
    }

    impl Drop for FakeStaging {
        fn drop(&mut self) {
            self.log.borrow_mut().push(Event::Release {
                src: self.handle,
                bytes: self.bytes.clone(),
            });
        }
    }

    struct FakeRecorder {
        log: Log,
    }

    impl CopyRecorder for FakeRecorder {
        fn record_copy(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
            self.log.borrow_mut().push(Event::Copy {
                src: src.as_raw(),
                dst: dst.as_raw(),
                size,
            });
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        log: Log,
        next_handle: RefCell<u64>,
        fail_submit: bool,
        // Staging allocations that succeed before every later one fails.
        staging_budget: Option<u64>,
    }

    impl TransferBackend for FakeBackend {
        type Staging = FakeStaging;
        type Recorder = FakeRecorder;

        fn create_staging(&self, size: vk::DeviceSize) -> RhiResult<FakeStaging> {
            let mut next = self.next_handle.borrow_mut();
            if self.staging_budget.is_some_and(|budget| *next >= budget) {
                return Err(RhiError::AllocationFailed {
                    operation: "create_staging",
                    size,
                    source: gpu_allocator::AllocationError::OutOfMemory,
                });
            }
            *next += 1;
            self.log.borrow_mut().push(Event::CreateStaging(size));
            Ok(FakeStaging {
                log: self.log.clone(),
                handle: 1000 + *next,
                bytes: vec![0; size as usize],
            })
        }

        fn begin_commands(&self) -> RhiResult<FakeRecorder> {
            self.log.borrow_mut().push(Event::Begin);
            Ok(FakeRecorder {
                log: self.log.clone(),
            })
        }

        fn submit_and_wait(&self, _recorder: FakeRecorder) -> RhiResult<()> {
            if self.fail_submit {
                return Err(RhiError::VulkanOperation {
                    operation: "queue_submit",
                    result: vk::Result::ERROR_DEVICE_LOST,
                });
            }
            self.log.borrow_mut().push(Event::SubmitAndWait);
            Ok(())
        }
    }

    fn engine() -> (TransferEngine<FakeBackend>, Log) {
        let backend = FakeBackend::default();
        let log = backend.log.clone();
        (TransferEngine::new(backend), log)
    }

    fn count(log: &Log, wanted: &Event) -> usize {
        log.borrow().iter().filter(|e| *e == wanted).count()
    }

    const DST_A: u64 = 0xA;
    const DST_B: u64 = 0xB;

    #[test]
    fn test_empty_flush_does_no_gpu_work() {
        let (mut engine, log) = engine();
        assert_eq!(engine.flush().unwrap(), 0);
        assert!(log.borrow().is_empty());
        assert_eq!(engine.stats(), TransferStats::default());
    }

    #[test]
    fn test_two_copies_share_one_command_buffer() {
        let (mut engine, log) = engine();
        engine
            .queue_copy(vk::Buffer::from_raw(DST_A), 64)
            .unwrap()
            .fill(0x11);
        engine
            .queue_copy(vk::Buffer::from_raw(DST_B), 128)
            .unwrap()
            .fill(0x22);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.pending_bytes(), 192);

        assert_eq!(engine.flush().unwrap(), 2);

        let events = log.borrow().clone();
        assert_eq!(
            events,
            vec![
                Event::CreateStaging(64),
                Event::CreateStaging(128),
                Event::Begin,
                Event::Copy {
                    src: 1001,
                    dst: DST_A,
                    size: 64
                },
                Event::Copy {
                    src: 1002,
                    dst: DST_B,
                    size: 128
                },
                Event::SubmitAndWait,
                Event::Release {
                    src: 1001,
                    bytes: vec![0x11; 64]
                },
                Event::Release {
                    src: 1002,
                    bytes: vec![0x22; 128]
                },
            ]
        );
        assert!(engine.is_empty());
        assert_eq!(
            engine.stats(),
            TransferStats {
                submissions: 1,
                copies: 2,
                bytes: 192
            }
        );
    }

    #[test]
    fn test_one_submission_regardless_of_batch_size() {
        for k in [1usize, 7, 64] {
            let (mut engine, log) = engine();
            for i in 0..k {
                engine
                    .queue_write(vk::Buffer::from_raw(i as u64 + 1), &[i as u8; 16])
                    .unwrap();
            }
            assert_eq!(engine.flush().unwrap(), k);
            assert_eq!(count(&log, &Event::Begin), 1);
            assert_eq!(count(&log, &Event::SubmitAndWait), 1);

            let copies: Vec<u64> = log
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    Event::Copy { dst, .. } => Some(*dst),
                    _ => None,
                })
                .collect();
            let expected: Vec<u64> = (1..=k as u64).collect();
            assert_eq!(copies, expected, "copies must keep insertion order");
        }
    }

    #[test]
    fn test_staging_outlives_the_wait() {
        let (mut engine, log) = engine();
        engine.queue_write(vk::Buffer::from_raw(DST_A), b"abc").unwrap();
        engine.flush().unwrap();

        let events = log.borrow();
        let submit = events
            .iter()
            .position(|e| *e == Event::SubmitAndWait)
            .unwrap();
        let release = events
            .iter()
            .position(|e| matches!(e, Event::Release { .. }))
            .unwrap();
        assert!(release > submit);
    }

    #[test]
    fn test_queue_write_pod() {
        let (mut engine, log) = engine();
        engine
            .queue_write_pod(vk::Buffer::from_raw(DST_A), &[1u32, 2, 3])
            .unwrap();
        engine.flush().unwrap();

        let expected: Vec<u8> = [1u32, 2, 3]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        assert!(log.borrow().contains(&Event::Release {
            src: 1001,
            bytes: expected
        }));
    }

    #[test]
    fn test_zero_size_copy_is_rejected() {
        let (mut engine, log) = engine();
        let result = engine.queue_copy(vk::Buffer::from_raw(DST_A), 0);
        assert!(matches!(result, Err(RhiError::InvalidUsage(_))));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_drop_releases_unflushed_staging() {
        let (mut engine, log) = engine();
        engine.queue_write(vk::Buffer::from_raw(DST_A), &[7; 8]).unwrap();
        engine.queue_write(vk::Buffer::from_raw(DST_B), &[9; 4]).unwrap();
        drop(engine);

        assert_eq!(count(&log, &Event::Begin), 0);
        assert_eq!(count(&log, &Event::SubmitAndWait), 0);
        let releases = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, Event::Release { .. }))
            .count();
        assert_eq!(releases, 2);
    }

    #[test]
    fn test_failed_submit_is_fatal_and_keeps_batch() {
        let backend = FakeBackend {
            fail_submit: true,
            ..FakeBackend::default()
        };
        let log = backend.log.clone();
        let mut engine = TransferEngine::new(backend);
        engine.queue_write(vk::Buffer::from_raw(DST_A), &[1; 4]).unwrap();

        let err = engine.flush().unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.stats().submissions, 0);
        assert!(
            !log.borrow()
                .iter()
                .any(|e| matches!(e, Event::Release { .. }))
        );
    }

    #[test]
    fn test_discard_after_staging_failure_empties_batch() {
        let backend = FakeBackend {
            staging_budget: Some(1),
            ..FakeBackend::default()
        };
        let log = backend.log.clone();
        let mut engine = TransferEngine::new(backend);

        engine.queue_write(vk::Buffer::from_raw(DST_A), &[1; 16]).unwrap();
        let result = engine.queue_write(vk::Buffer::from_raw(DST_B), &[2; 16]);
        assert!(matches!(result, Err(RhiError::AllocationFailed { .. })));
        assert_eq!(engine.len(), 1);

        assert_eq!(engine.discard(), 1);
        assert!(engine.is_empty());
        assert_eq!(engine.pending_bytes(), 0);

        // Nothing queued before the failure may reach a later flush.
        assert_eq!(engine.flush().unwrap(), 0);
        assert_eq!(count(&log, &Event::Begin), 0);
        assert!(
            !log.borrow()
                .iter()
                .any(|e| matches!(e, Event::Copy { dst, .. } if *dst == DST_A))
        );
        assert_eq!(
            count(
                &log,
                &Event::Release {
                    src: 1001,
                    bytes: vec![1; 16]
                }
            ),
            1
        );
    }

    #[test]
    fn test_discard_after_failed_submit() {
        let backend = FakeBackend {
            fail_submit: true,
            ..FakeBackend::default()
        };
        let mut engine = TransferEngine::new(backend);
        engine.queue_write(vk::Buffer::from_raw(DST_A), &[3; 4]).unwrap();
        assert!(engine.flush().is_err());

        assert_eq!(engine.discard(), 1);
        assert!(engine.is_empty());
        assert_eq!(engine.discard(), 0);
        assert_eq!(engine.stats(), TransferStats::default());
    }
}
