//! Control protocol parsing.
//!
//! Commands are ASCII, one per line, case-sensitive:
//!
//! | Command            | Effect                          |
//! |--------------------|---------------------------------|
//! | `*IDN?`            | reply with the unit information |
//! | `CH<n>:EN`         | enable channel n                |
//! | `CH<n>:DIS`        | disable channel n               |
//! | `CH<n>:COUP AC|DC` | set input coupling              |
//! | `CH<n>:RANG <r>`   | set range, e.g. `5V`, `200MV`   |
//! | `CH<n>:OFFS <v>`   | set analogue offset in volts    |
//!
//! A channel command is only recognised when byte 3 is the `:` separator, so
//! the channel number is always a single digit.

use crate::hardware::driver::{ChannelIndex, Coupling, VoltageRange};

/// Separator between the channel prefix and its sub-command.
const CHANNEL_SEPARATOR: u8 = b':';

/// A parsed control command.
#[derive(Debug, Clone, PartialEq)]
pub enum ScpiCommand {
    /// `*IDN?`
    Identify,
    /// `CH<n>:EN` / `CH<n>:DIS`
    SetEnabled(ChannelIndex, bool),
    /// `CH<n>:COUP <coupling>`
    SetCoupling(ChannelIndex, Coupling),
    /// `CH<n>:RANG <range>`
    SetRange(ChannelIndex, VoltageRange),
    /// `CH<n>:OFFS <volts>`
    SetOffset(ChannelIndex, f32),
}

/// Why a line did not produce a command.
///
/// None of these are reported to the client; they are only logged.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Nothing left after stripping line endings.
    Empty,
    /// Not a known command.
    Unknown(String),
    /// Channel prefix with a number outside 1-4.
    ChannelOutOfRange(u8),
    /// Valid channel, unknown sub-command.
    UnknownChannelCommand(String),
    /// Valid sub-command, bad argument.
    InvalidArgument(String),
}

/// Remove trailing `\r` and `\n` characters.
pub fn strip_line_ending(input: &str) -> &str {
    input.trim_end_matches(['\r', '\n'])
}

/// Parse one line, after stripping its line ending.
pub fn parse_command(input: &str) -> Result<ScpiCommand, ParseError> {
    let line = strip_line_ending(input);
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    if line == "*IDN?" {
        return Ok(ScpiCommand::Identify);
    }

    let bytes = line.as_bytes();
    if bytes.starts_with(b"CH") && bytes.get(3) == Some(&CHANNEL_SEPARATOR) {
        let number = bytes[2].wrapping_sub(b'0');
        let channel = ChannelIndex::new(number).ok_or(ParseError::ChannelOutOfRange(bytes[2]))?;
        // Byte 3 is ASCII, so index 4 is a char boundary.
        return parse_channel_command(channel, &line[4..]);
    }

    Err(ParseError::Unknown(line.to_string()))
}

fn parse_channel_command(channel: ChannelIndex, rest: &str) -> Result<ScpiCommand, ParseError> {
    let (verb, argument) = match rest.split_once(' ') {
        Some((verb, argument)) => (verb, Some(argument.trim())),
        None => (rest, None),
    };

    match (verb, argument) {
        ("EN", None) => Ok(ScpiCommand::SetEnabled(channel, true)),
        ("DIS", None) => Ok(ScpiCommand::SetEnabled(channel, false)),
        ("COUP", Some(arg)) => arg
            .parse()
            .map(|coupling| ScpiCommand::SetCoupling(channel, coupling))
            .map_err(ParseError::InvalidArgument),
        ("RANG", Some(arg)) => arg
            .parse()
            .map(|range| ScpiCommand::SetRange(channel, range))
            .map_err(ParseError::InvalidArgument),
        ("OFFS", Some(arg)) => arg
            .parse::<f32>()
            .ok()
            .filter(|volts| volts.is_finite())
            .map(|volts| ScpiCommand::SetOffset(channel, volts))
            .ok_or_else(|| ParseError::InvalidArgument(format!("invalid offset '{arg}'"))),
        _ => Err(ParseError::UnknownChannelCommand(rest.to_string())),
    }
}

/// Encode unit information as the `*IDN?` reply line.
pub fn identity_line(fields: &[String]) -> String {
    let mut line = fields.join(" ");
    line.push('\n');
    line
}
