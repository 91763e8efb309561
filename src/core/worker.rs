//! Ring copy worker
//!
//! Each worker thread owns one ring, one buffer pool, and one pipe pool,
//! all sized to the ring depth. Its context slab bounds parallelism at
//! `queue_depth` files in flight. The loop tops the pipeline up from the
//! work queue, submits, blocks on at least one completion, runs the state
//! machine over the drained batch, and submits whatever the transitions
//! queued.
//!
//! Pool exhaustion is not an error: a job that cannot get a buffer goes
//! back to the queue and the worker stops topping up until completions
//! free a slot.

use crate::core::context::{BufferSlot, ContextSlab, FileContext, FileState, OpKind};
use crate::core::machine::{advance, CopyTuning};
use crate::core::queue::WorkQueue;
use crate::core::stats::Stats;
use crate::error::Result;
use crate::fs::FileJob;
use crate::pool::{BufferPool, PipePool};
use crate::ring::RingManager;

/// One worker's ring, pools, and in-flight contexts
pub struct Worker {
    ring: RingManager,
    buffers: BufferPool,
    pipes: PipePool,
    slab: ContextSlab,
    tuning: CopyTuning,
}

impl Worker {
    /// Set up a worker with `queue_depth` ring entries, buffers, and pipes
    pub fn new(queue_depth: u32, tuning: CopyTuning) -> Result<Self> {
        let depth = queue_depth as usize;
        let pipe_size = tuning.use_splice.then_some(tuning.chunk_size);
        Ok(Self {
            ring: RingManager::new(queue_depth)?,
            buffers: BufferPool::new(depth, tuning.chunk_size),
            pipes: PipePool::new(depth, pipe_size)?,
            slab: ContextSlab::new(depth),
            tuning,
        })
    }

    fn start_file(&mut self, job: FileJob, stats: &Stats) -> std::result::Result<(), FileJob> {
        let Some((ptr, index)) = self.buffers.acquire() else {
            return Err(job);
        };
        let buffer = BufferSlot { ptr, index };

        let ctx = match FileContext::new(job.src_path.clone(), job.dst_path.clone(), buffer) {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::warn!(src = %job.src_path.display(), error = %err, "cannot start file");
                self.buffers.release(index);
                stats.file_failed();
                return Ok(());
            }
        };

        let Some(slot) = self.slab.insert(ctx) else {
            self.buffers.release(index);
            return Err(job);
        };

        let ctx = self
            .slab
            .get_mut(slot)
            .expect("slot was just inserted");
        ctx.user_data = slot as u64;
        ctx.state = FileState::OpeningSrc;
        ctx.op = OpKind::OpenSrc;

        let (src_ptr, user_data) = (ctx.src_c.as_ptr(), ctx.user_data);
        self.ring
            .prepare_openat(libc::AT_FDCWD, src_ptr, libc::O_RDONLY, 0, user_data);
        Ok(())
    }

    /// Drain the work queue, copying files until it is exhausted
    pub fn run(&mut self, queue: &WorkQueue<FileJob>, stats: &Stats) -> Result<()> {
        let depth = self.slab.capacity();
        let mut queue_exhausted = false;

        while !queue_exhausted || !self.slab.is_empty() {
            // Top up the pipeline.
            while !queue_exhausted && self.slab.len() < depth {
                match queue.try_pop() {
                    Some(job) => {
                        if let Err(job) = self.start_file(job, stats) {
                            queue.push(job);
                            break;
                        }
                    }
                    None => {
                        if queue.is_done() {
                            queue_exhausted = true;
                        }
                        break;
                    }
                }
            }

            if self.slab.is_empty() {
                if queue_exhausted {
                    break;
                }
                // Nothing in flight: block on the queue rather than the ring.
                match queue.wait_pop() {
                    Some(job) => {
                        if let Err(job) = self.start_file(job, stats) {
                            queue.push(job);
                        }
                        continue;
                    }
                    None => {
                        queue_exhausted = true;
                        continue;
                    }
                }
            }

            self.ring.submit()?;

            for completion in self.ring.wait_and_drain()? {
                let slot = completion.user_data as usize;
                let Worker {
                    ring,
                    buffers,
                    pipes,
                    slab,
                    tuning,
                } = self;
                let Some(ctx) = slab.get_mut(slot) else {
                    tracing::warn!(slot, "completion for unknown context");
                    continue;
                };

                advance(ctx, completion.result, ring, pipes, stats, tuning);

                if ctx.state.is_terminal() {
                    if let Some(buffer) = ctx.buffer.take() {
                        buffers.release(buffer.index);
                    }
                    if let Some(pipe) = ctx.pipe.take() {
                        pipes.release(pipe.index);
                    }
                    slab.remove(slot);
                }
            }

            // Flush follow-up submissions queued by the transitions.
            self.ring.submit()?;
        }

        debug_assert_eq!(self.buffers.available_count(), self.buffers.capacity());
        debug_assert_eq!(self.pipes.available_count(), self.pipes.capacity());
        tracing::debug!("worker finished");
        Ok(())
    }
}
