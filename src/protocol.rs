//! Protocol constants for the Anova Bluetooth command channel

use std::time::Duration;

/// Byte terminating every command and every response
pub const TERMINATOR: u8 = b'\r';

/// Length of the framing prefix preceding each response
pub const FRAME_PREFIX_LEN: usize = 3;

/// Attribute handle of the command/notification characteristic
pub const COMMAND_HANDLE: u16 = 0x25;

/// Address prefix shared by Anova devices
pub const DEFAULT_ADDRESS_PREFIX: &str = "01:02:03:04";

/// Response text the device sends for commands it does not understand
pub const RESP_INVALID_COMMAND: &str = "Invalid Command";

/// Default wait for a single command response
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default BLE scan duration
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of scan attempts before giving up
pub const DEFAULT_SCAN_RETRIES: u32 = 2;

// Readers
pub const READ_DEVICE_STATUS: &str = "status";
pub const READ_CALIBRATION_FACTOR: &str = "read cal";
pub const READ_TEMP_HISTORY: &str = "read data";
pub const READ_TARGET_TEMP: &str = "read set temp";
pub const READ_CURRENT_TEMP: &str = "read temp";
pub const READ_TIMER: &str = "read timer";
pub const READ_UNIT: &str = "read unit";

// Controllers
pub const CTL_START: &str = "start";
pub const CTL_STOP: &str = "stop";
pub const CTL_TIMER_START: &str = "start time";
pub const CTL_TIMER_STOP: &str = "stop time";

// Not available on Bluetooth-only models
pub const READ_DATE: &str = "read date";
pub const CLEAR_ALARM: &str = "clear alarm";
pub const GET_ID_CARD: &str = "get id card";
pub const SET_SPEAKER_OFF: &str = "set speaker off";

/// Calibration factor range
pub const CALIBRATION_RANGE: (f32, f32) = (-9.9, 9.9);

/// Target temperature range in Celsius
pub const CELSIUS_RANGE: (f32, f32) = (5.0, 99.9);

/// Target temperature range in Fahrenheit
pub const FAHRENHEIT_RANGE: (f32, f32) = (41.0, 211.8);

/// Maximum timer value in minutes
pub const MAX_TIMER_MINUTES: u32 = 6000;
