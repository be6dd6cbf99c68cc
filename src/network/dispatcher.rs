//! Command dispatch.
//!
//! Maps a parsed [`ScpiCommand`] to a channel store mutation or a query
//! reply. Protocol errors are logged and swallowed; only driver failures are
//! returned, and those are fatal to the server.
//!
//! A range change on the trigger source channel also reprograms the trigger,
//! since its threshold is held in ADC counts relative to that range.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channels::ChannelConfigStore;
use crate::hardware::bring_up;
use crate::hardware::driver::{ScopeDriver, ScopeError, TriggerConfig};
use crate::network::protocol::{identity_line, parse_command, strip_line_ending, ParseError, ScpiCommand};

/// Runs control commands on the reactor thread.
pub struct CommandDispatcher {
    driver: Arc<dyn ScopeDriver>,
    trigger: TriggerConfig,
}

impl CommandDispatcher {
    /// Dispatcher answering queries from `driver`, with the trigger that
    /// bring-up programmed.
    pub fn new(driver: Arc<dyn ScopeDriver>, trigger: TriggerConfig) -> Self {
        Self { driver, trigger }
    }

    /// Handle one line of input.
    ///
    /// Returns the reply to send back, if the command has one.
    pub fn dispatch(
        &self,
        input: &str,
        store: &mut ChannelConfigStore,
    ) -> Result<Option<String>, ScopeError> {
        debug!(command = strip_line_ending(input), "Received command");

        let command = match parse_command(input) {
            Ok(command) => command,
            Err(err) => {
                log_rejected(&err);
                return Ok(None);
            }
        };

        match command {
            ScpiCommand::Identify => {
                let fields = self.driver.identity()?;
                Ok(Some(identity_line(&fields)))
            }
            ScpiCommand::SetEnabled(channel, enabled) => {
                store.set_enabled(channel, enabled)?;
                info!(%channel, enabled, "Channel state changed");
                Ok(None)
            }
            ScpiCommand::SetCoupling(channel, coupling) => {
                store.set_coupling(channel, coupling)?;
                info!(%channel, ?coupling, "Channel coupling changed");
                Ok(None)
            }
            ScpiCommand::SetRange(channel, range) => {
                store.set_range(channel, range)?;
                info!(%channel, range = range.label(), "Channel range changed");
                if channel == self.trigger.source {
                    bring_up::program_trigger(self.driver.as_ref(), &self.trigger, range)?;
                }
                Ok(None)
            }
            ScpiCommand::SetOffset(channel, offset) => {
                store.set_offset(channel, offset)?;
                info!(%channel, offset, "Channel offset changed");
                Ok(None)
            }
        }
    }
}

fn log_rejected(err: &ParseError) {
    match err {
        ParseError::Empty => debug!("Ignoring empty command"),
        ParseError::Unknown(line) => warn!(command = %line, "Unknown command"),
        ParseError::ChannelOutOfRange(byte) => {
            debug!(channel = %char::from(*byte), "Ignoring command for channel outside 1-4")
        }
        ParseError::UnknownChannelCommand(rest) => {
            warn!(command = %rest, "Unknown channel command")
        }
        ParseError::InvalidArgument(reason) => warn!(%reason, "Invalid channel command argument"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::driver::{ChannelConfig, ChannelIndex, ScopeStatus, VoltageRange};
    use crate::hardware::mock::{DriverCall, MockScope};
    use tracing_test::traced_test;

    fn setup() -> (Arc<MockScope>, CommandDispatcher, ChannelConfigStore) {
        let scope = Arc::new(MockScope::new());
        let dispatcher = CommandDispatcher::new(scope.clone(), TriggerConfig::default());
        let store = ChannelConfigStore::new(scope.clone());
        (scope, dispatcher, store)
    }

    #[test]
    fn enable_pushes_default_record() {
        let (scope, dispatcher, mut store) = setup();

        let reply = dispatcher.dispatch("CH1:EN\r\n", &mut store).unwrap();
        assert!(reply.is_none());

        let ch1 = ChannelIndex::new(1).unwrap();
        let expected = ChannelConfig {
            enabled: true,
            ..ChannelConfig::default()
        };
        assert_eq!(scope.calls(), vec![DriverCall::ConfigureChannel(ch1, expected)]);
    }

    #[test]
    fn malformed_channels_touch_nothing() {
        let (scope, dispatcher, mut store) = setup();

        for line in ["CH5:EN", "CH0:EN", "CH:EN", "CH9:DIS\r\n", ""] {
            assert!(dispatcher.dispatch(line, &mut store).unwrap().is_none());
        }

        assert!(scope.calls().is_empty());
        for channel in ChannelIndex::all() {
            assert_eq!(store.get(channel), ChannelConfig::default());
        }
    }

    #[test]
    fn identify_is_repeatable() {
        let (_scope, dispatcher, mut store) = setup();

        let first = dispatcher.dispatch("*IDN?\n", &mut store).unwrap().unwrap();
        let second = dispatcher.dispatch("*IDN?", &mut store).unwrap().unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with('\n'));
        assert_eq!(first.lines().count(), 1);
    }

    #[test]
    fn hardware_failure_propagates() {
        let (scope, dispatcher, mut store) = setup();
        scope.fail_operation("identity", ScopeStatus::DRIVER_FUNCTION);

        let err = dispatcher.dispatch("*IDN?", &mut store).unwrap_err();
        assert_eq!(err.operation, "identity");
    }

    #[test]
    fn trigger_source_range_change_rescales_threshold() {
        let (scope, dispatcher, mut store) = setup();

        dispatcher.dispatch("CH1:RANG 500MV\n", &mut store).unwrap();

        let trigger = TriggerConfig::default();
        let expected = trigger.threshold_adc(VoltageRange::Mv500);
        assert_eq!(expected, TriggerConfig::ADC_FULL_SCALE);
        assert_eq!(
            scope.calls().last(),
            Some(&DriverCall::ConfigureTrigger(trigger, expected))
        );

        dispatcher.dispatch("CH1:RANG 50V\n", &mut store).unwrap();
        assert_eq!(
            scope.calls().last(),
            Some(&DriverCall::ConfigureTrigger(trigger, 0x7F00 / 50))
        );
    }

    #[test]
    fn other_channel_range_leaves_trigger_alone() {
        let (scope, dispatcher, mut store) = setup();

        dispatcher.dispatch("CH2:RANG 500MV\n", &mut store).unwrap();
        dispatcher.dispatch("CH1:COUP AC\n", &mut store).unwrap();

        assert_eq!(
            scope.count_calls(|c| matches!(c, DriverCall::ConfigureTrigger(..))),
            0
        );
    }

    #[test]
    fn trigger_reprogram_failure_propagates() {
        let (scope, dispatcher, mut store) = setup();
        scope.fail_operation("configure_trigger", ScopeStatus::DRIVER_FUNCTION);

        let err = dispatcher.dispatch("CH1:RANG 2V", &mut store).unwrap_err();
        assert_eq!(err.operation, "configure_trigger");
        assert_eq!(store.get(ChannelIndex::new(1).unwrap()).range, VoltageRange::V2);
    }

    #[traced_test]
    #[test]
    fn unknown_command_is_logged() {
        let (scope, dispatcher, mut store) = setup();

        assert!(dispatcher.dispatch("MEAS:VOLT?\n", &mut store).unwrap().is_none());
        assert!(logs_contain("Unknown command"));
        assert!(scope.calls().is_empty());
    }
}
