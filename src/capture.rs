//! Capture coordination.
//!
//! The coordinator owns the single [`SampleBuffer`] and enforces that at most
//! one capture is in flight. Arming moves the buffer into the driver's
//! completion callback; the callback fetches samples into it on the driver
//! thread and posts a [`CaptureCompletion`] carrying the buffer back over a
//! capacity-1 channel. Only the reactor receives from that channel, so the
//! buffer has exactly one owner at every point in the cycle.
//!
//! ```text
//!   Idle(buffer) --arm--> InFlight --completion--> Ready(buffer) --take_payload--> Idle(buffer)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::hardware::driver::{
    CaptureRequest, CompletionCallback, FetchResult, ScopeDriver, ScopeError, ScopeStatus,
};

/// Default buffer capacity, in samples.
pub const DEFAULT_BUFFER_SAMPLES: usize = 1024 * 1024;

/// Receiving end of the completion channel, drained by the reactor.
pub type WakeupReceiver = mpsc::Receiver<CaptureCompletion>;

/// Fixed-capacity sample storage shared by one capture at a time.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Box<[i16]>,
}

impl SampleBuffer {
    /// Zeroed buffer holding `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![0i16; capacity].into_boxed_slice(),
        }
    }

    /// Whole buffer, for the driver to fill.
    pub fn as_mut_slice(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    /// The first `count` samples.
    pub fn samples(&self, count: usize) -> &[i16] {
        &self.samples[..count.min(self.samples.len())]
    }

    /// The first `count` samples as little-endian bytes.
    pub fn to_le_bytes(&self, count: usize) -> Bytes {
        let samples = self.samples(count);
        let mut out = BytesMut::with_capacity(std::mem::size_of_val(samples));
        for sample in samples {
            out.put_i16_le(*sample);
        }
        out.freeze()
    }
}

/// What the completion callback observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Samples were fetched into the buffer.
    Ready(FetchResult),
    /// The capture or the transfer failed; nothing was delivered.
    Failed(ScopeError),
}

/// Cross-thread completion event. Carries the buffer back to the reactor.
#[derive(Debug)]
pub struct CaptureCompletion {
    /// Sequence number assigned when the capture was armed.
    pub sequence: u64,
    /// Result of the capture.
    pub outcome: CaptureOutcome,
    buffer: SampleBuffer,
}

/// Observable coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Buffer held, no capture running.
    Idle,
    /// A capture is running; the buffer belongs to the callback.
    CaptureInFlight,
    /// Samples fetched and waiting to be sent.
    DataReady,
}

/// Result of a request to start a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A new capture was started with this sequence number.
    Started(u64),
    /// Rejected: the previous capture has not been consumed yet.
    Busy(CaptureState),
}

enum Slot {
    Idle(SampleBuffer),
    InFlight { sequence: u64, started: Instant },
    Ready { buffer: SampleBuffer, fetch: FetchResult },
}

/// Owner of the sample buffer and of the capture state machine.
pub struct CaptureCoordinator {
    driver: Arc<dyn ScopeDriver>,
    request: CaptureRequest,
    slot: Slot,
    sequence: u64,
    wakeup_tx: mpsc::Sender<CaptureCompletion>,
}

impl CaptureCoordinator {
    /// Create the coordinator and the receiver the reactor must poll.
    pub fn new(
        driver: Arc<dyn ScopeDriver>,
        request: CaptureRequest,
        buffer_samples: usize,
    ) -> (Self, WakeupReceiver) {
        // One capture in flight means at most one completion queued.
        let (wakeup_tx, wakeup_rx) = mpsc::channel(1);
        let coordinator = Self {
            driver,
            request,
            slot: Slot::Idle(SampleBuffer::with_capacity(buffer_samples)),
            sequence: 0,
            wakeup_tx,
        };
        (coordinator, wakeup_rx)
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        match self.slot {
            Slot::Idle(_) => CaptureState::Idle,
            Slot::InFlight { .. } => CaptureState::CaptureInFlight,
            Slot::Ready { .. } => CaptureState::DataReady,
        }
    }

    /// Start a capture if idle.
    ///
    /// A busy coordinator returns [`ArmOutcome::Busy`] and leaves the running
    /// capture untouched. A driver error while starting is fatal.
    pub fn arm(&mut self) -> Result<ArmOutcome, ScopeError> {
        let sequence = self.sequence + 1;
        let in_flight = Slot::InFlight {
            sequence,
            started: Instant::now(),
        };
        let buffer = match std::mem::replace(&mut self.slot, in_flight) {
            Slot::Idle(buffer) => buffer,
            other => {
                self.slot = other;
                let state = self.state();
                debug!(?state, "Capture already pending, not re-arming");
                return Ok(ArmOutcome::Busy(state));
            }
        };
        self.sequence = sequence;

        let callback = completion_callback(
            Arc::clone(&self.driver),
            self.wakeup_tx.clone(),
            sequence,
            buffer,
        );
        self.driver.start_capture(&self.request, callback)?;
        info!(
            sequence,
            pre_trigger = self.request.pre_trigger_samples,
            post_trigger = self.request.post_trigger_samples,
            timebase = self.request.timebase,
            "Capture armed"
        );
        Ok(ArmOutcome::Started(sequence))
    }

    /// Take back the buffer from a drained completion.
    ///
    /// Returns the fetch result on success. A failed capture is returned as
    /// an error and must be treated as fatal. A completion that does not match
    /// the running capture is dropped.
    pub fn complete(
        &mut self,
        completion: CaptureCompletion,
    ) -> Result<Option<FetchResult>, ScopeError> {
        let started = match self.slot {
            Slot::InFlight { sequence, started } if sequence == completion.sequence => started,
            _ => {
                warn!(
                    sequence = completion.sequence,
                    state = ?self.state(),
                    "Dropping completion that does not match the running capture"
                );
                return Ok(None);
            }
        };

        let CaptureCompletion {
            sequence,
            outcome,
            buffer,
        } = completion;
        match outcome {
            CaptureOutcome::Ready(fetch) => {
                info!(
                    sequence,
                    samples = fetch.sample_count,
                    overflow = fetch.overflow,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Capture complete"
                );
                self.slot = Slot::Ready { buffer, fetch };
                Ok(Some(fetch))
            }
            CaptureOutcome::Failed(err) => {
                error!(sequence, status = %err.status, operation = err.operation, "Capture failed");
                self.slot = Slot::Idle(buffer);
                Err(err)
            }
        }
    }

    /// Encode the ready samples for the data client and return to idle.
    ///
    /// The payload is `sample_count * 2` bytes of little-endian `i16`.
    pub fn take_payload(&mut self) -> Option<Bytes> {
        let Slot::Ready { buffer, fetch } = &mut self.slot else {
            return None;
        };
        let payload = buffer.to_le_bytes(fetch.sample_count);
        self.slot = Slot::Idle(std::mem::take(buffer));
        Some(payload)
    }
}

/// Build the callback that runs on the driver thread.
///
/// It only fetches into the buffer it owns and posts the result; it never
/// touches sockets or channel configuration.
fn completion_callback(
    driver: Arc<dyn ScopeDriver>,
    wakeup_tx: mpsc::Sender<CaptureCompletion>,
    sequence: u64,
    mut buffer: SampleBuffer,
) -> CompletionCallback {
    Box::new(move |status: ScopeStatus| {
        let outcome = if status.is_ok() {
            match driver.fetch_samples(buffer.as_mut_slice()) {
                Ok(fetch) => CaptureOutcome::Ready(fetch),
                Err(err) => CaptureOutcome::Failed(err),
            }
        } else {
            CaptureOutcome::Failed(ScopeError::new("capture", status))
        };

        let completion = CaptureCompletion {
            sequence,
            outcome,
            buffer,
        };
        if let Err(e) = wakeup_tx.try_send(completion) {
            error!(sequence, error = %e, "Failed to post capture completion");
        }
    })
}
