//! Command construction for the Anova text protocol
//!
//! Operations are rendered into whitespace-separated ASCII tokens and
//! validated here, before anything reaches the correlator. A [`Command`] is
//! the opaque, terminator-normalized payload the correlator writes.

use std::fmt;
use std::str::FromStr;

use crate::protocol::*;
use crate::{Error, Result};

/// A terminator-normalized command ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    wire: Vec<u8>,
}

impl Command {
    /// Build a command from text, trimming it and appending the terminator.
    pub fn new(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim().to_string();
        let mut wire = Vec::with_capacity(text.len() + 1);
        wire.extend_from_slice(text.as_bytes());
        wire.push(TERMINATOR);
        Self { text, wire }
    }

    /// Build a command from unvalidated user text.
    ///
    /// Only checks that the text is a non-empty, printable ASCII line; the
    /// device decides whether it understands it.
    pub fn raw(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_param("Command is empty"));
        }
        if !trimmed.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(Error::invalid_param(format!(
                "Command must be printable ASCII: {:?}",
                trimmed
            )));
        }
        Ok(Self::new(trimmed))
    }

    /// Command text without the terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bytes written to the device, terminator included
    pub fn as_bytes(&self) -> &[u8] {
        &self.wire
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Temperature unit understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Protocol token for this unit
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "c",
            TemperatureUnit::Fahrenheit => "f",
        }
    }

    /// Settable target temperature range for this unit
    pub fn target_range(&self) -> (f32, f32) {
        match self {
            TemperatureUnit::Celsius => CELSIUS_RANGE,
            TemperatureUnit::Fahrenheit => FAHRENHEIT_RANGE,
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemperatureUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(TemperatureUnit::Celsius),
            "f" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(Error::invalid_param(format!(
                "Expected unit to be either 'c' or 'f', found: {}",
                other
            ))),
        }
    }
}

/// A temperature value tagged with its unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature {
    pub value: f32,
    pub unit: TemperatureUnit,
}

impl Temperature {
    pub fn celsius(value: f32) -> Self {
        Self {
            value,
            unit: TemperatureUnit::Celsius,
        }
    }

    pub fn fahrenheit(value: f32) -> Self {
        Self {
            value,
            unit: TemperatureUnit::Fahrenheit,
        }
    }
}

/// Typed device operations
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    // Readers
    ReadStatus,
    ReadCalibrationFactor,
    ReadTemperatureHistory,
    ReadTargetTemperature,
    ReadCurrentTemperature,
    ReadTimer,
    ReadUnit,

    // Setters
    SetCalibrationFactor(f32),
    SetTargetTemperature(Temperature),
    /// Timer in minutes
    SetTimer(u32),
    SetUnit(TemperatureUnit),

    // Controllers
    Start,
    Stop,
    StartTimer,
    StopTimer,

    // WiFi models only
    ReadDate,
    ClearAlarm,
    GetIdCard,
    ServerParameters { host: String, port: u16 },
    SetDeviceName(String),
    SetSecretKey(String),
    SetSpeakerOff,
}

/// Renders [`Operation`]s into validated [`Command`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandBuilder;

impl CommandBuilder {
    /// Render an operation, validating its parameters
    pub fn build(op: &Operation) -> Result<Command> {
        let text = match op {
            Operation::ReadStatus => READ_DEVICE_STATUS.to_string(),
            Operation::ReadCalibrationFactor => READ_CALIBRATION_FACTOR.to_string(),
            Operation::ReadTemperatureHistory => READ_TEMP_HISTORY.to_string(),
            Operation::ReadTargetTemperature => READ_TARGET_TEMP.to_string(),
            Operation::ReadCurrentTemperature => READ_CURRENT_TEMP.to_string(),
            Operation::ReadTimer => READ_TIMER.to_string(),
            Operation::ReadUnit => READ_UNIT.to_string(),

            Operation::SetCalibrationFactor(factor) => {
                check_range("calibration factor", *factor, CALIBRATION_RANGE)?;
                format!("cal {:.1}", factor)
            }
            Operation::SetTargetTemperature(temp) => {
                check_range("target temperature", temp.value, temp.unit.target_range())?;
                format!("set temp {:.1}", temp.value)
            }
            Operation::SetTimer(minutes) => {
                if *minutes > MAX_TIMER_MINUTES {
                    return Err(Error::invalid_param(format!(
                        "timer must be within [0, {}] minutes, found: {}",
                        MAX_TIMER_MINUTES, minutes
                    )));
                }
                format!("set timer {}", minutes)
            }
            Operation::SetUnit(unit) => format!("set unit {}", unit),

            Operation::Start => CTL_START.to_string(),
            Operation::Stop => CTL_STOP.to_string(),
            Operation::StartTimer => CTL_TIMER_START.to_string(),
            Operation::StopTimer => CTL_TIMER_STOP.to_string(),

            Operation::ReadDate => READ_DATE.to_string(),
            Operation::ClearAlarm => CLEAR_ALARM.to_string(),
            Operation::GetIdCard => GET_ID_CARD.to_string(),
            Operation::ServerParameters { host, port } => {
                format!("server para {} {}", check_token("server host", host)?, port)
            }
            Operation::SetDeviceName(name) => {
                format!("set name {}", check_token("device name", name)?)
            }
            Operation::SetSecretKey(key) => {
                format!("set number {}", check_token("secret key", key)?)
            }
            Operation::SetSpeakerOff => SET_SPEAKER_OFF.to_string(),
        };

        Ok(Command::new(text))
    }
}

fn check_range(what: &str, value: f32, (lo, hi): (f32, f32)) -> Result<()> {
    // NaN fails `contains`, so it is rejected here too
    if !(lo..=hi).contains(&value) {
        return Err(Error::invalid_param(format!(
            "{} must be within [{:.1}, {:.1}], found: {}",
            what, lo, hi, value
        )));
    }
    Ok(())
}

/// Arguments are single grammar tokens
fn check_token<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(Error::invalid_param(format!(
            "{} must be a single printable ASCII token, found: {:?}",
            what, value
        )));
    }
    Ok(value)
}
