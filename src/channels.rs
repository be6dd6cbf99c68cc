//! Channel configuration store.
//!
//! Holds the four analogue channel records for the lifetime of the server.
//! Every setter updates the record in place and then pushes the complete
//! record to the driver, so the device always mirrors the store. A failed
//! push is returned as a hardware error and is not retried.

use std::sync::Arc;
use tracing::debug;

use crate::hardware::driver::{
    ChannelConfig, ChannelIndex, Coupling, ScopeDriver, ScopeError, VoltageRange,
};

/// In-memory channel state, mirrored to the device on every change.
pub struct ChannelConfigStore {
    channels: [ChannelConfig; ChannelIndex::COUNT],
    driver: Arc<dyn ScopeDriver>,
}

impl ChannelConfigStore {
    /// All channels start disabled, DC coupled, 5 V range, no offset.
    ///
    /// Nothing is sent to the device until the first setter call.
    pub fn new(driver: Arc<dyn ScopeDriver>) -> Self {
        Self {
            channels: [ChannelConfig::default(); ChannelIndex::COUNT],
            driver,
        }
    }

    /// Current record for `channel`.
    pub fn get(&self, channel: ChannelIndex) -> ChannelConfig {
        self.channels[channel.slot()]
    }

    /// Enable or disable acquisition on `channel`.
    pub fn set_enabled(&mut self, channel: ChannelIndex, enabled: bool) -> Result<(), ScopeError> {
        self.update(channel, |config| config.enabled = enabled)
    }

    /// Change the input coupling of `channel`.
    pub fn set_coupling(
        &mut self,
        channel: ChannelIndex,
        coupling: Coupling,
    ) -> Result<(), ScopeError> {
        self.update(channel, |config| config.coupling = coupling)
    }

    /// Change the full-scale range of `channel`.
    pub fn set_range(&mut self, channel: ChannelIndex, range: VoltageRange) -> Result<(), ScopeError> {
        self.update(channel, |config| config.range = range)
    }

    /// Change the analogue offset of `channel`, in volts.
    pub fn set_offset(&mut self, channel: ChannelIndex, offset: f32) -> Result<(), ScopeError> {
        self.update(channel, |config| config.offset = offset)
    }

    fn update(
        &mut self,
        channel: ChannelIndex,
        apply: impl FnOnce(&mut ChannelConfig),
    ) -> Result<(), ScopeError> {
        let config = &mut self.channels[channel.slot()];
        apply(config);
        debug!(%channel, ?config, "Pushing channel configuration");
        self.driver.configure_channel(channel, config)
    }
}
