//! Pause/resume flow control for the data stream.
//!
//! When the data queue grows past `max_queue_size` the controller asks the
//! producer to pause and starts a recheck timer. Every tick compares the
//! queue depth against half the limit; once below it, the producer is told to
//! start again. The threshold rounds up, so a limit of 1 resumes once the
//! queue is empty. Commands are advisory: reading from the transport continues
//! while paused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::JungleBusError;
use crate::queue::QueueDepth;
use crate::transport::FlowCommand;

/// Destination for flow-control commands.
pub trait CommandSink: Send + Sync {
    /// Publish `command` to the producer.
    fn send_command(&self, command: FlowCommand) -> Result<(), JungleBusError>;
}

/// Tracks the paused state of one data stream.
pub struct BackpressureController {
    max_queue_size: usize,
    recheck_interval: Duration,
    depth: QueueDepth,
    sink: Weak<dyn CommandSink>,
    paused: Arc<AtomicBool>,
    recheck: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl BackpressureController {
    /// Create a controller watching `depth` and publishing through `sink`.
    ///
    /// The recheck timer runs on `runtime` even when pushes arrive from
    /// transport threads.
    pub fn new(
        max_queue_size: usize,
        recheck_interval: Duration,
        depth: QueueDepth,
        sink: Weak<dyn CommandSink>,
        runtime: Handle,
    ) -> Self {
        Self {
            max_queue_size,
            recheck_interval,
            depth,
            sink,
            paused: Arc::new(AtomicBool::new(false)),
            recheck: Mutex::new(None),
            runtime,
        }
    }

    /// Depth above which the stream is paused.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// Depth below which a paused stream is resumed: half the limit,
    /// rounded up.
    pub fn resume_threshold(&self) -> usize {
        self.max_queue_size.div_ceil(2)
    }

    /// Whether a pause command is outstanding.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Evaluate the queue after a push that left it at `depth`.
    ///
    /// Returns `true` only for the push that moved the stream into the paused
    /// state. Any push over the limit replaces the pending recheck timer.
    pub fn on_push(&self, depth: usize) -> bool {
        if depth <= self.max_queue_size {
            return false;
        }

        let newly_paused = self
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if newly_paused {
            info!(depth, max = self.max_queue_size, "pausing subscription to catch up");
            self.send(FlowCommand::Pause);
        }

        self.arm_recheck();
        newly_paused
    }

    /// Cancel the recheck timer and forget the paused state.
    pub fn reset(&self) {
        self.cancel_recheck();
        self.paused.store(false, Ordering::SeqCst);
    }

    fn send(&self, command: FlowCommand) {
        send_command(&self.sink, command);
    }

    fn arm_recheck(&self) {
        let mut slot = self.recheck.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let interval = self.recheck_interval;
        let threshold = self.resume_threshold();
        let depth = self.depth.clone();
        let sink = self.sink.clone();
        let paused = Arc::clone(&self.paused);

        *slot = Some(self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let current = depth.get();
                if current < threshold {
                    info!(depth = current, "resuming paused subscription");
                    send_command(&sink, FlowCommand::Start);
                    paused.store(false, Ordering::SeqCst);
                    break;
                }
                debug!(depth = current, threshold, "subscription still catching up");
            }
        }));
    }

    fn cancel_recheck(&self) {
        let mut slot = self.recheck.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for BackpressureController {
    fn drop(&mut self) {
        self.cancel_recheck();
    }
}

fn send_command(sink: &Weak<dyn CommandSink>, command: FlowCommand) {
    let Some(sink) = sink.upgrade() else {
        return;
    };
    if let Err(e) = sink.send_command(command) {
        warn!(?command, error = %e, "failed to publish flow command");
    }
}
