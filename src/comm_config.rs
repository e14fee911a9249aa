use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommConfigError {
    #[error("'{0}' is not a supported COMM_HEADER value (expected LONG, SHORT or OFF)")]
    UnknownHeaderFormat(String),

    #[error("'{0}' is not a supported COMM_FORMAT data type (expected DEF9,BYTE,BIN or DEF9,WORD,BIN)")]
    UnknownSampleWidth(String),

    #[error("'{0}' is not a supported TRIG_MODE value (expected AUTO, NORM, SINGLE or STOP)")]
    UnknownTriggerMode(String),

    #[error("'{0}' is not an analogue channel (expected C1 to C4)")]
    UnknownChannel(String),

    #[error("Could not parse register value from '{0}'")]
    InvalidRegister(String),
}

/// Strip an optional command echo (`CHDR`, `COMM_HEADER`, ...) from a reply.
///
/// Depending on the header format the instrument answers `CHDR?` with
/// `CHDR SHORT`, `COMM_HEADER SHORT` or plain `SHORT`.
fn reply_value<'a>(reply: &'a str, prefixes: &[&str]) -> &'a str {
    let reply = reply.trim();
    if let Some((head, value)) = reply.split_once(char::is_whitespace) {
        if prefixes.iter().any(|p| head.eq_ignore_ascii_case(p)) {
            return value.trim();
        }
    }
    reply
}

/// Formatting of query responses (`COMM_HEADER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    Off,
    Short,
    Long,
}

impl HeaderFormat {
    /// Fixed part of a waveform frame header, present in every format.
    pub const FIXED_HEADER_LEN: usize = 16;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Short => "SHORT",
            Self::Long => "LONG",
        }
    }

    /// Header bytes added on top of the fixed part, `None` when the format
    /// carries no frame header.
    pub fn overhead(&self) -> Option<usize> {
        match self {
            Self::Off => None,
            Self::Short => Some(6),
            Self::Long => Some(12),
        }
    }

    pub fn header_len(&self) -> Option<usize> {
        self.overhead().map(|o| Self::FIXED_HEADER_LEN + o)
    }

    pub fn to_command(&self) -> String {
        format!("CHDR {}", self.as_str())
    }

    /// Parse a `CHDR?` reply.
    pub fn from_reply(reply: &str) -> Result<Self, CommConfigError> {
        reply_value(reply, &["CHDR", "COMM_HEADER"]).parse()
    }
}

impl FromStr for HeaderFormat {
    type Err = CommConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "SHORT" => Ok(Self::Short),
            "LONG" => Ok(Self::Long),
            _ => Err(CommConfigError::UnknownHeaderFormat(s.trim().to_string())),
        }
    }
}

impl fmt::Display for HeaderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes per waveform sample (`COMM_FORMAT` data type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    Byte,
    Word,
}

impl SampleWidth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Byte => "BYTE",
            Self::Word => "WORD",
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
        }
    }

    /// Argument of the `CFMT` command, e.g. `DEF9,WORD,BIN`.
    pub fn as_format(&self) -> &'static str {
        match self {
            Self::Byte => "DEF9,BYTE,BIN",
            Self::Word => "DEF9,WORD,BIN",
        }
    }

    pub fn to_command(&self) -> String {
        format!("CFMT {}", self.as_format())
    }

    /// Parse a `CFMT?` reply.
    pub fn from_reply(reply: &str) -> Result<Self, CommConfigError> {
        let value = reply_value(reply, &["CFMT", "COMM_FORMAT"]);
        match value.to_ascii_uppercase().as_str() {
            "DEF9,BYTE,BIN" => Ok(Self::Byte),
            "DEF9,WORD,BIN" => Ok(Self::Word),
            _ => Err(CommConfigError::UnknownSampleWidth(value.to_string())),
        }
    }
}

impl FromStr for SampleWidth {
    type Err = CommConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BYTE" => Ok(Self::Byte),
            "WORD" => Ok(Self::Word),
            _ => Self::from_reply(s),
        }
    }
}

impl fmt::Display for SampleWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Auto,
    Norm,
    Single,
    Stop,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Norm => "NORM",
            Self::Single => "SINGLE",
            Self::Stop => "STOP",
        }
    }

    pub fn to_command(&self) -> String {
        format!("TRMD {}", self.as_str())
    }

    /// Parse a `TRMD?` reply.
    pub fn from_reply(reply: &str) -> Result<Self, CommConfigError> {
        reply_value(reply, &["TRMD", "TRIG_MODE"]).parse()
    }
}

impl FromStr for TriggerMode {
    type Err = CommConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "NORM" => Ok(Self::Norm),
            "SINGLE" => Ok(Self::Single),
            "STOP" => Ok(Self::Stop),
            _ => Err(CommConfigError::UnknownTriggerMode(s.trim().to_string())),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analogue input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    C1,
    C2,
    C3,
    C4,
}

impl Channel {
    pub const ALL: [Self; 4] = [Self::C1, Self::C2, Self::C3, Self::C4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C1 => "C1",
            Self::C2 => "C2",
            Self::C3 => "C3",
            Self::C4 => "C4",
        }
    }
}

impl FromStr for Channel {
    type Err = CommConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C1" => Ok(Self::C1),
            "C2" => Ok(Self::C2),
            "C3" => Ok(Self::C3),
            "C4" => Ok(Self::C4),
            _ => Err(CommConfigError::UnknownChannel(s.trim().to_string())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vertical ADC resolution of a scope model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    Bits8,
    Bits12,
}

impl Resolution {
    pub fn bits(&self) -> u8 {
        match self {
            Self::Bits8 => 8,
            Self::Bits12 => 12,
        }
    }

    /// Whether one BYTE sample can hold a full-resolution reading.
    pub fn fits_in(&self, width: SampleWidth) -> bool {
        usize::from(self.bits()) <= width.bytes_per_sample() * 8
    }
}

/// Scope models this driver knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeModel {
    Waverunner625Zi,
    /// Based on the MAUI Oscilloscopes Remote Control and Automation Manual,
    /// April 2019.
    Wavepro404Hd,
    Other(String),
}

impl ScopeModel {
    pub fn from_model_id(model: &str) -> Self {
        match model.trim().to_ascii_uppercase().as_str() {
            "WR625ZI" => Self::Waverunner625Zi,
            "WP404HD" => Self::Wavepro404Hd,
            _ => Self::Other(model.trim().to_string()),
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            Self::Waverunner625Zi => "WR625ZI",
            Self::Wavepro404Hd => "WP404HD",
            Self::Other(model) => model,
        }
    }

    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::Wavepro404Hd => Some(Resolution::Bits12),
            Self::Waverunner625Zi | Self::Other(_) => None,
        }
    }

    /// Analogue channels; empty when the model's channel list is unknown.
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            Self::Wavepro404Hd => &Channel::ALL,
            Self::Waverunner625Zi | Self::Other(_) => &[],
        }
    }
}

impl fmt::Display for ScopeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_id())
    }
}

/// INternal state change Register, as returned (and cleared) by `INR?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InternalStateRegister(pub u16);

impl InternalStateRegister {
    /// A new signal has been acquired and read out into main memory.
    pub const NEW_SIGNAL_ACQUIRED: u16 = 1 << 0;
    pub const SCREEN_DUMP_TERMINATED: u16 = 1 << 1;
    pub const RETURN_TO_LOCAL: u16 = 1 << 2;
    pub const BLOCK_TRANSFER_TIMEOUT: u16 = 1 << 3;
    /// A segment of a sequence waveform is in acquisition memory but not yet
    /// read out into main memory.
    pub const SEGMENT_ACQUIRED: u16 = 1 << 4;
    /// Storage filled up in AutoStore Fill mode.
    pub const STORAGE_FULL: u16 = 1 << 6;
    pub const DISK_EXCHANGED: u16 = 1 << 7;
    pub const PASS_FAIL_OUTCOME: u16 = 1 << 12;
    pub const TRIGGER_READY: u16 = 1 << 13;
    pub const PROBE_CHANGED: u16 = 1 << 14;

    const NAMES: [(u16, &'static str); 10] = [
        (Self::NEW_SIGNAL_ACQUIRED, "new signal acquired"),
        (Self::SCREEN_DUMP_TERMINATED, "screen dump terminated"),
        (Self::RETURN_TO_LOCAL, "return to local"),
        (Self::BLOCK_TRANSFER_TIMEOUT, "block transfer time-out"),
        (Self::SEGMENT_ACQUIRED, "sequence segment acquired"),
        (Self::STORAGE_FULL, "storage full"),
        (Self::DISK_EXCHANGED, "disk exchanged"),
        (Self::PASS_FAIL_OUTCOME, "pass/fail outcome detected"),
        (Self::TRIGGER_READY, "trigger ready"),
        (Self::PROBE_CHANGED, "probe changed"),
    ];

    pub fn contains(&self, bit: u16) -> bool {
        self.0 & bit == bit
    }

    pub fn new_signal_acquired(&self) -> bool {
        self.contains(Self::NEW_SIGNAL_ACQUIRED)
    }

    pub fn trigger_ready(&self) -> bool {
        self.contains(Self::TRIGGER_READY)
    }

    /// Names of all documented bits that are set
    pub fn active_flags(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Parse an `INR?` reply such as `INR 8193` or `8193`.
    pub fn from_reply(reply: &str) -> Result<Self, CommConfigError> {
        reply
            .split_whitespace()
            .last()
            .and_then(|v| v.parse().ok())
            .map(Self)
            .ok_or_else(|| CommConfigError::InvalidRegister(reply.trim().to_string()))
    }
}

/// Infer the reply termination from a raw reply, typically the `*IDN?` one.
pub fn infer_termination(reply: &str) -> Option<&'static str> {
    if reply.ends_with("\r\n") {
        Some("\r\n")
    } else if reply.ends_with('\r') {
        Some("\r")
    } else if reply.ends_with('\n') {
        Some("\n")
    } else {
        None
    }
}
