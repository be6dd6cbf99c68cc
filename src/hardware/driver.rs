//! Oscilloscope driver boundary.
//!
//! `ScopeDriver` is the only way the server touches the acquisition device.
//! Every call is synchronous except `start_capture`, which returns as soon as
//! the capture is armed and later invokes the supplied callback on a thread
//! owned by the driver.
//!
//! # Thread Safety
//! - Implementations must be `Send + Sync`; the completion callback holds an
//!   `Arc` to the driver so it can call `fetch_samples` from its own thread.
//! - Configuration calls are only ever issued from the reactor thread.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raw status code reported by the device SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeStatus(pub u32);

impl ScopeStatus {
    /// Operation completed successfully.
    pub const OK: Self = Self(0x0000);
    /// Device is present but the external supply is not connected.
    pub const POWER_SUPPLY_NOT_CONNECTED: Self = Self(0x0119);
    /// No device could be opened.
    pub const NOT_FOUND: Self = Self(0x0003);
    /// Generic driver failure, used by the simulated device.
    pub const DRIVER_FUNCTION: Self = Self(0x0043);

    /// Whether the status means success.
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Convert into a `Result`, tagging failures with the operation name.
    pub fn check(self, operation: &'static str) -> Result<(), ScopeError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(ScopeError::new(operation, self))
        }
    }
}

impl fmt::Display for ScopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A non-success status returned by a driver call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed with status {status}")]
pub struct ScopeError {
    /// Driver operation that failed.
    pub operation: &'static str,
    /// Status code reported by the device.
    pub status: ScopeStatus,
}

impl ScopeError {
    /// Create an error for `operation`.
    pub fn new(operation: &'static str, status: ScopeStatus) -> Self {
        Self { operation, status }
    }
}

/// Input coupling of an analogue channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Coupling {
    /// AC coupled.
    Ac,
    /// DC coupled.
    #[default]
    Dc,
}

impl FromStr for Coupling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AC" => Ok(Coupling::Ac),
            "DC" => Ok(Coupling::Dc),
            other => Err(format!("invalid coupling '{other}'")),
        }
    }
}

/// Full-scale input range of an analogue channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoltageRange {
    /// ±10 mV
    #[serde(rename = "10MV")]
    Mv10,
    /// ±20 mV
    #[serde(rename = "20MV")]
    Mv20,
    /// ±50 mV
    #[serde(rename = "50MV")]
    Mv50,
    /// ±100 mV
    #[serde(rename = "100MV")]
    Mv100,
    /// ±200 mV
    #[serde(rename = "200MV")]
    Mv200,
    /// ±500 mV
    #[serde(rename = "500MV")]
    Mv500,
    /// ±1 V
    #[serde(rename = "1V")]
    V1,
    /// ±2 V
    #[serde(rename = "2V")]
    V2,
    /// ±5 V
    #[default]
    #[serde(rename = "5V")]
    V5,
    /// ±10 V
    #[serde(rename = "10V")]
    V10,
    /// ±20 V
    #[serde(rename = "20V")]
    V20,
    /// ±50 V
    #[serde(rename = "50V")]
    V50,
}

impl VoltageRange {
    /// Every range, smallest first.
    pub const ALL: [VoltageRange; 12] = [
        VoltageRange::Mv10,
        VoltageRange::Mv20,
        VoltageRange::Mv50,
        VoltageRange::Mv100,
        VoltageRange::Mv200,
        VoltageRange::Mv500,
        VoltageRange::V1,
        VoltageRange::V2,
        VoltageRange::V5,
        VoltageRange::V10,
        VoltageRange::V20,
        VoltageRange::V50,
    ];

    /// Full-scale voltage in volts.
    pub fn volts(self) -> f32 {
        match self {
            VoltageRange::Mv10 => 0.01,
            VoltageRange::Mv20 => 0.02,
            VoltageRange::Mv50 => 0.05,
            VoltageRange::Mv100 => 0.1,
            VoltageRange::Mv200 => 0.2,
            VoltageRange::Mv500 => 0.5,
            VoltageRange::V1 => 1.0,
            VoltageRange::V2 => 2.0,
            VoltageRange::V5 => 5.0,
            VoltageRange::V10 => 10.0,
            VoltageRange::V20 => 20.0,
            VoltageRange::V50 => 50.0,
        }
    }

    /// Protocol spelling, e.g. `500MV` or `5V`.
    pub fn label(self) -> &'static str {
        match self {
            VoltageRange::Mv10 => "10MV",
            VoltageRange::Mv20 => "20MV",
            VoltageRange::Mv50 => "50MV",
            VoltageRange::Mv100 => "100MV",
            VoltageRange::Mv200 => "200MV",
            VoltageRange::Mv500 => "500MV",
            VoltageRange::V1 => "1V",
            VoltageRange::V2 => "2V",
            VoltageRange::V5 => "5V",
            VoltageRange::V10 => "10V",
            VoltageRange::V20 => "20V",
            VoltageRange::V50 => "50V",
        }
    }
}

impl FromStr for VoltageRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VoltageRange::ALL
            .into_iter()
            .find(|range| range.label() == s)
            .ok_or_else(|| format!("invalid range '{s}'"))
    }
}

/// A validated 1-based channel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    /// Number of analogue channels on the device.
    pub const COUNT: usize = 4;

    /// Returns `None` unless `number` is in `1..=4`.
    pub fn new(number: u8) -> Option<Self> {
        (1..=Self::COUNT as u8)
            .contains(&number)
            .then_some(Self(number))
    }

    /// 1-based channel number as used by the protocol.
    pub fn number(self) -> u8 {
        self.0
    }

    /// 0-based slot, as used by the device SDK.
    pub fn slot(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// All channels in order.
    pub fn all() -> impl Iterator<Item = ChannelIndex> {
        (1..=Self::COUNT as u8).map(ChannelIndex)
    }
}

impl TryFrom<u8> for ChannelIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ChannelIndex::new(value).ok_or_else(|| format!("channel {value} out of range 1-4"))
    }
}

impl From<ChannelIndex> for u8 {
    fn from(value: ChannelIndex) -> Self {
        value.0
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Settings of one analogue channel, sent whole on every change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel is acquiring.
    pub enabled: bool,
    /// Input coupling.
    pub coupling: Coupling,
    /// Full-scale range.
    pub range: VoltageRange,
    /// Analogue offset in volts.
    pub offset: f32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            coupling: Coupling::Dc,
            range: VoltageRange::V5,
            offset: 0.0,
        }
    }
}

/// Parameters of one block-mode capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRequest {
    /// Samples kept before the trigger point.
    pub pre_trigger_samples: u32,
    /// Samples kept after the trigger point.
    pub post_trigger_samples: u32,
    /// Device timebase index.
    pub timebase: u32,
    /// Oversampling factor.
    pub oversample: u16,
    /// Memory segment to capture into.
    pub segment_index: u32,
}

impl CaptureRequest {
    /// Total samples the capture will produce.
    pub fn total_samples(&self) -> usize {
        self.pre_trigger_samples as usize + self.post_trigger_samples as usize
    }
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            pre_trigger_samples: 0,
            post_trigger_samples: 10_000,
            timebase: 256,
            oversample: 1,
            segment_index: 0,
        }
    }
}

/// Built-in signal generator waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    /// Sine wave.
    Sine,
    /// Square wave.
    Square,
    /// Triangle wave.
    Triangle,
    /// Constant output at the offset voltage.
    DcVoltage,
}

/// Built-in signal generator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Output shape.
    pub waveform: Waveform,
    /// DC offset in microvolts.
    pub offset_uv: i32,
    /// Peak-to-peak amplitude in microvolts.
    pub pk_to_pk_uv: u32,
    /// Start frequency in hertz.
    pub start_hz: f32,
    /// Stop frequency in hertz; equal to `start_hz` for a fixed tone.
    pub stop_hz: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            waveform: Waveform::Square,
            offset_uv: 0,
            pk_to_pk_uv: 4_000_000,
            start_hz: 1_000_000.0,
            stop_hz: 1_000_000.0,
        }
    }
}

/// Edge the trigger fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDirection {
    /// Rising edge.
    Rising,
    /// Falling edge.
    Falling,
    /// Trigger disabled for this channel.
    None,
}

/// Simple level trigger on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Channel the trigger watches.
    pub source: ChannelIndex,
    /// Threshold in volts.
    pub level_volts: f32,
    /// Edge direction.
    pub direction: TriggerDirection,
    /// Delay after the trigger event, in sample periods.
    pub delay_samples: u32,
    /// Fire automatically after this many ms without a trigger; 0 waits forever.
    pub auto_trigger_ms: u16,
}

impl TriggerConfig {
    /// ADC full-scale count for a 16-bit sample.
    pub const ADC_FULL_SCALE: i16 = 0x7F00;

    /// Threshold in ADC counts for a source channel set to `range`.
    pub fn threshold_adc(&self, range: VoltageRange) -> i16 {
        let ratio = (self.level_volts / range.volts()).clamp(-1.0, 1.0);
        (ratio * f32::from(Self::ADC_FULL_SCALE)) as i16
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            source: ChannelIndex(1),
            level_volts: 1.0,
            direction: TriggerDirection::Rising,
            delay_samples: 0,
            auto_trigger_ms: 0,
        }
    }
}

/// Result of a successful sample transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchResult {
    /// Samples written to the front of the buffer.
    pub sample_count: usize,
    /// Per-channel over-voltage bitfield.
    pub overflow: u16,
}

/// Invoked once by the driver, on a driver-owned thread, when a capture ends.
pub type CompletionCallback = Box<dyn FnOnce(ScopeStatus) + Send + 'static>;

/// Operations the server needs from the acquisition device.
pub trait ScopeDriver: Send + Sync {
    /// Open the first available device.
    ///
    /// A `POWER_SUPPLY_NOT_CONNECTED` status means the unit is open but
    /// waiting for a decision about USB power.
    fn open(&self) -> Result<(), ScopeError>;

    /// Release the device. Safe to call more than once.
    fn close(&self);

    /// Accept the supply state reported by `open`.
    fn change_power_source(&self, status: ScopeStatus) -> Result<(), ScopeError>;

    /// Blink the front LED `count` times.
    fn flash_led(&self, count: i16) -> Result<(), ScopeError>;

    /// Program one channel with its full configuration.
    fn configure_channel(
        &self,
        channel: ChannelIndex,
        config: &ChannelConfig,
    ) -> Result<(), ScopeError>;

    /// Program the built-in signal generator.
    fn configure_generator(&self, config: &GeneratorConfig) -> Result<(), ScopeError>;

    /// Program the trigger; `threshold_adc` is already scaled to the source range.
    fn configure_trigger(
        &self,
        config: &TriggerConfig,
        threshold_adc: i16,
    ) -> Result<(), ScopeError>;

    /// Split capture memory into `segments` and capture `captures` blocks per run.
    fn configure_block_mode(&self, segments: u32, captures: u32) -> Result<(), ScopeError>;

    /// Arm a capture. `on_complete` runs exactly once on a driver thread.
    fn start_capture(
        &self,
        request: &CaptureRequest,
        on_complete: CompletionCallback,
    ) -> Result<(), ScopeError>;

    /// Copy the last capture into `buffer`.
    fn fetch_samples(&self, buffer: &mut [i16]) -> Result<FetchResult, ScopeError>;

    /// Unit information strings (driver version, model, serial, ...).
    fn identity(&self) -> Result<Vec<String>, ScopeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_index_bounds() {
        assert!(ChannelIndex::new(0).is_none());
        assert!(ChannelIndex::new(5).is_none());
        let ch = ChannelIndex::new(4).unwrap();
        assert_eq!(ch.number(), 4);
        assert_eq!(ch.slot(), 3);
        assert_eq!(ChannelIndex::all().count(), 4);
    }

    #[test]
    fn range_labels_parse_back() {
        for range in VoltageRange::ALL {
            assert_eq!(range.label().parse::<VoltageRange>().unwrap(), range);
        }
        assert!("5v".parse::<VoltageRange>().is_err());
    }

    #[test]
    fn trigger_threshold_scales_with_range() {
        let trigger = TriggerConfig::default();
        assert_eq!(trigger.threshold_adc(VoltageRange::V5), 0x7F00 / 5);
        // Level above full scale saturates
        assert_eq!(
            trigger.threshold_adc(VoltageRange::Mv500),
            TriggerConfig::ADC_FULL_SCALE
        );
    }

    #[test]
    fn status_check() {
        assert!(ScopeStatus::OK.check("open").is_ok());
        let err = ScopeStatus::NOT_FOUND.check("open").unwrap_err();
        assert_eq!(err.to_string(), "open failed with status 0x3");
    }
}
