//! Device bring-up.
//!
//! Fixed startup sequence run once before the listeners open:
//!
//! 1. Open the unit, falling back to USB power if allowed
//! 2. Flash the LED so the operator can see which unit was opened
//! 3. Program the signal generator
//! 4. Program the trigger
//! 5. Force channel 1 on
//! 6. One memory segment, one capture per run
//!
//! Any failure after `open` leaves the device half-configured; the caller
//! must close it and stop.

use tracing::{info, warn};

use crate::channels::ChannelConfigStore;
use crate::config::DeviceConfig;
use crate::hardware::driver::{
    ChannelIndex, GeneratorConfig, ScopeDriver, ScopeError, ScopeStatus, TriggerConfig,
    VoltageRange,
};

/// Channel enabled by default so the first capture has data.
const DEFAULT_CHANNEL: u8 = 1;

/// Open the device, accepting USB power when `device.allow_usb_power` is set.
pub fn open_device(driver: &dyn ScopeDriver, device: &DeviceConfig) -> Result<(), ScopeError> {
    match driver.open() {
        Ok(()) => Ok(()),
        Err(err) if err.status == ScopeStatus::POWER_SUPPLY_NOT_CONNECTED => {
            if !device.allow_usb_power {
                warn!("External supply not connected and USB power not allowed");
                return Err(err);
            }
            warn!("External supply not connected, switching to USB power");
            driver.change_power_source(err.status)
        }
        Err(err) => Err(err),
    }
}

/// Program the trigger with its level scaled to the source channel's `range`.
///
/// Must be re-run whenever the source channel's range changes, since the
/// device compares against raw ADC counts.
pub fn program_trigger(
    driver: &dyn ScopeDriver,
    trigger: &TriggerConfig,
    range: VoltageRange,
) -> Result<(), ScopeError> {
    let threshold = trigger.threshold_adc(range);
    driver.configure_trigger(trigger, threshold)?;
    info!(
        source = %trigger.source,
        level_volts = trigger.level_volts,
        range = range.label(),
        threshold_adc = threshold,
        direction = ?trigger.direction,
        "Trigger configured"
    );
    Ok(())
}

/// Run the full startup sequence against an unopened device.
pub fn initialize(
    driver: &dyn ScopeDriver,
    store: &mut ChannelConfigStore,
    device: &DeviceConfig,
    generator: &GeneratorConfig,
    trigger: &TriggerConfig,
) -> Result<(), ScopeError> {
    open_device(driver, device)?;

    if device.led_flashes > 0 {
        driver.flash_led(device.led_flashes)?;
    }

    driver.configure_generator(generator)?;
    info!(
        waveform = ?generator.waveform,
        pk_to_pk_uv = generator.pk_to_pk_uv,
        start_hz = generator.start_hz,
        "Signal generator configured"
    );

    program_trigger(driver, trigger, store.get(trigger.source).range)?;

    if let Some(channel) = ChannelIndex::new(DEFAULT_CHANNEL) {
        store.set_enabled(channel, true)?;
    }

    driver.configure_block_mode(1, 1)?;
    info!("Device ready");
    Ok(())
}
