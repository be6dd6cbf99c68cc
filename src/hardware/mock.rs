//! Simulated oscilloscope.
//!
//! `MockScope` implements [`ScopeDriver`] entirely in-process so the server
//! can run and be tested without the vendor SDK. Every driver call is
//! recorded for later inspection.
//!
//! Captures complete on a separate thread, like the real SDK:
//!
//! - `CompletionMode::Automatic` spawns a timer thread per capture.
//! - `CompletionMode::Manual` parks the callback until
//!   [`MockScope::fire_completion`] is called.
//!
//! # Example
//!
//! ```rust,ignore
//! let scope = Arc::new(MockScope::new().with_sample_count(10_000));
//! scope.start_capture(&CaptureRequest::default(), Box::new(|status| { ... }))?;
//! scope.fire_completion(ScopeStatus::OK).unwrap().join().unwrap();
//! ```

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::SimulationConfig;
use crate::hardware::driver::{
    CaptureRequest, ChannelConfig, ChannelIndex, CompletionCallback, FetchResult,
    GeneratorConfig, ScopeDriver, ScopeError, ScopeStatus, TriggerConfig,
};

/// Half-period of the synthetic square wave, in samples.
const SQUARE_HALF_PERIOD: usize = 32;
/// Amplitude of the synthetic square wave, in ADC counts.
const SQUARE_AMPLITUDE: i16 = 0x7F00 / 5 * 2;
/// Peak noise added to every synthetic sample, in ADC counts.
const NOISE_COUNTS: i16 = 16;

/// A recorded driver invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// `open`
    Open,
    /// `close`
    Close,
    /// `change_power_source`
    ChangePowerSource(ScopeStatus),
    /// `flash_led`
    FlashLed(i16),
    /// `configure_channel`
    ConfigureChannel(ChannelIndex, ChannelConfig),
    /// `configure_generator`
    ConfigureGenerator(GeneratorConfig),
    /// `configure_trigger`
    ConfigureTrigger(TriggerConfig, i16),
    /// `configure_block_mode`
    ConfigureBlockMode {
        /// Memory segments.
        segments: u32,
        /// Captures per run.
        captures: u32,
    },
    /// `start_capture`
    StartCapture(CaptureRequest),
    /// `fetch_samples`, with the buffer length offered.
    FetchSamples(usize),
    /// `identity`
    Identity,
}

/// How a started capture reaches its completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Complete on a timer thread after `delay`.
    Automatic {
        /// Simulated capture duration.
        delay: Duration,
    },
    /// Wait for [`MockScope::fire_completion`].
    Manual,
}

/// In-process stand-in for the acquisition device.
pub struct MockScope {
    identity: Vec<String>,
    completion: CompletionMode,
    sample_count: Option<usize>,
    open_status: ScopeStatus,
    calls: Mutex<Vec<DriverCall>>,
    failures: Mutex<HashMap<&'static str, ScopeStatus>>,
    completion_status: Mutex<ScopeStatus>,
    pending: Mutex<Option<CompletionCallback>>,
    last_request: Mutex<CaptureRequest>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockScope {
    /// Manual-completion scope with the default identity.
    pub fn new() -> Self {
        Self {
            identity: SimulationConfig::default_identity(),
            completion: CompletionMode::Manual,
            sample_count: None,
            open_status: ScopeStatus::OK,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            completion_status: Mutex::new(ScopeStatus::OK),
            pending: Mutex::new(None),
            last_request: Mutex::new(CaptureRequest::default()),
        }
    }

    /// Scope whose captures complete by themselves after `delay`.
    pub fn automatic(delay: Duration) -> Self {
        Self {
            completion: CompletionMode::Automatic { delay },
            ..Self::new()
        }
    }

    /// Replace the unit information strings.
    pub fn with_identity(mut self, identity: Vec<String>) -> Self {
        self.identity = identity;
        self
    }

    /// Report exactly `count` samples per fetch, regardless of the request.
    pub fn with_sample_count(mut self, count: usize) -> Self {
        self.sample_count = Some(count);
        self
    }

    /// Status `open` reports.
    pub fn with_open_status(mut self, status: ScopeStatus) -> Self {
        self.open_status = status;
        self
    }

    /// Make every later call to `operation` fail with `status`.
    pub fn fail_operation(&self, operation: &'static str, status: ScopeStatus) {
        lock(&self.failures).insert(operation, status);
    }

    /// Status handed to completion callbacks in automatic mode.
    pub fn set_completion_status(&self, status: ScopeStatus) {
        *lock(&self.completion_status) = status;
    }

    /// Snapshot of every call made so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    /// Whether a manual-mode capture is waiting for completion.
    pub fn has_pending_capture(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Run the parked completion callback on a fresh thread.
    ///
    /// Returns `None` if no capture is pending.
    pub fn fire_completion(&self, status: ScopeStatus) -> Option<JoinHandle<()>> {
        let callback = lock(&self.pending).take()?;
        debug!(%status, "MockScope: firing completion");
        thread::Builder::new()
            .name("mock-scope-completion".to_string())
            .spawn(move || callback(status))
            .map_err(|e| warn!(error = %e, "MockScope: failed to spawn completion thread"))
            .ok()
    }

    fn record(&self, call: DriverCall) {
        trace!(?call, "MockScope call");
        lock(&self.calls).push(call);
    }

    fn injected(&self, operation: &'static str) -> Result<(), ScopeError> {
        match lock(&self.failures).get(operation) {
            Some(status) => Err(ScopeError::new(operation, *status)),
            None => Ok(()),
        }
    }
}

impl Default for MockScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeDriver for MockScope {
    fn open(&self) -> Result<(), ScopeError> {
        self.record(DriverCall::Open);
        self.injected("open")?;
        self.open_status.check("open")
    }

    fn close(&self) {
        self.record(DriverCall::Close);
        lock(&self.pending).take();
    }

    fn change_power_source(&self, status: ScopeStatus) -> Result<(), ScopeError> {
        self.record(DriverCall::ChangePowerSource(status));
        self.injected("change_power_source")
    }

    fn flash_led(&self, count: i16) -> Result<(), ScopeError> {
        self.record(DriverCall::FlashLed(count));
        self.injected("flash_led")
    }

    fn configure_channel(
        &self,
        channel: ChannelIndex,
        config: &ChannelConfig,
    ) -> Result<(), ScopeError> {
        self.record(DriverCall::ConfigureChannel(channel, *config));
        self.injected("configure_channel")
    }

    fn configure_generator(&self, config: &GeneratorConfig) -> Result<(), ScopeError> {
        self.record(DriverCall::ConfigureGenerator(*config));
        self.injected("configure_generator")
    }

    fn configure_trigger(
        &self,
        config: &TriggerConfig,
        threshold_adc: i16,
    ) -> Result<(), ScopeError> {
        self.record(DriverCall::ConfigureTrigger(*config, threshold_adc));
        self.injected("configure_trigger")
    }

    fn configure_block_mode(&self, segments: u32, captures: u32) -> Result<(), ScopeError> {
        self.record(DriverCall::ConfigureBlockMode { segments, captures });
        self.injected("configure_block_mode")
    }

    fn start_capture(
        &self,
        request: &CaptureRequest,
        on_complete: CompletionCallback,
    ) -> Result<(), ScopeError> {
        self.record(DriverCall::StartCapture(*request));
        self.injected("start_capture")?;
        *lock(&self.last_request) = *request;

        match self.completion {
            CompletionMode::Manual => {
                *lock(&self.pending) = Some(on_complete);
            }
            CompletionMode::Automatic { delay } => {
                let status = *lock(&self.completion_status);
                thread::Builder::new()
                    .name("mock-scope-capture".to_string())
                    .spawn(move || {
                        thread::sleep(delay);
                        on_complete(status);
                    })
                    .map_err(|_| ScopeError::new("start_capture", ScopeStatus::DRIVER_FUNCTION))?;
            }
        }
        Ok(())
    }

    fn fetch_samples(&self, buffer: &mut [i16]) -> Result<FetchResult, ScopeError> {
        self.record(DriverCall::FetchSamples(buffer.len()));
        self.injected("fetch_samples")?;

        let requested = self
            .sample_count
            .unwrap_or_else(|| lock(&self.last_request).total_samples());
        let sample_count = requested.min(buffer.len());

        let mut rng = rand::thread_rng();
        for (i, sample) in buffer[..sample_count].iter_mut().enumerate() {
            let level = if (i / SQUARE_HALF_PERIOD) % 2 == 0 {
                SQUARE_AMPLITUDE
            } else {
                -SQUARE_AMPLITUDE
            };
            *sample = level + rng.gen_range(-NOISE_COUNTS..=NOISE_COUNTS);
        }

        Ok(FetchResult {
            sample_count,
            overflow: 0,
        })
    }

    fn identity(&self) -> Result<Vec<String>, ScopeError> {
        self.record(DriverCall::Identity);
        self.injected("identity")?;
        Ok(self.identity.clone())
    }
}
