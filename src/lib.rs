//! # LeCroy RS
//!
//! A Rust library for controlling LeCroy oscilloscopes and reading their binary waveforms.
//!
//! The scope is driven through plain SCPI-style commands over a raw TCP socket or a
//! serial / USB-CDC port. Acquisition control and status queries are single commands;
//! waveform transfers are decoded from the scope's binary `WF? DAT1` frames.
//!
//! ## Features
//!
//! - **Resource strings**: `TCPIP0::<host>::<port>::SOCKET` and `ASRL<port>::INSTR`
//! - **Acquisition control**: arm, stop, force trigger, clear sweeps
//! - **Typed settings**: header format, data type and trigger mode as closed enums
//! - **Waveform decoding**: BYTE and WORD samples, tolerant of short reads
//! - **DataFrame output**: Uses `polars` to scale samples to volts and seconds
//! - **Layered configuration**: defaults, TOML file and environment variables
//!
//! ## Examples
//!
//! ### Reading a Waveform
//!
//! ```rust,no_run
//! use lecroy_rs::{Channel, LeCroyScope, ScopeConfig};
//!
//! let mut config = ScopeConfig::default();
//! config.connection.resource = "TCPIP0::192.168.1.20::5025::SOCKET".to_string();
//!
//! let mut scope = LeCroyScope::connect(&config)?;
//! scope.arm_acquisition()?;
//! scope.force_trigger()?;
//!
//! let waveform = scope.get_waveform(Channel::C1)?;
//! println!("Captured {} samples", waveform.len());
//!
//! let descriptor = scope.wave_descriptor(Channel::C1)?;
//! let df = waveform.to_lazy_frame(&descriptor)?.collect()?;
//! println!("{} rows of time, raw and volts", df.height());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Explicit Frame Layout
//!
//! ```rust,no_run
//! use lecroy_rs::{Channel, HeaderFormat, LeCroyScope, SampleWidth, ScopeConfig, WaveformConfig};
//!
//! let mut scope = LeCroyScope::connect(&ScopeConfig::default())?;
//! scope.set_comm_header(HeaderFormat::Short)?;
//! scope.set_comm_format_data_type(SampleWidth::Word)?;
//!
//! let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);
//! let waveform = scope.read_waveform(Channel::C2, &config)?;
//! if let Some(warning) = &waveform.warning {
//!     eprintln!("{}", warning);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Decoding From Any Transport
//!
//! ```rust
//! use lecroy_rs::{decode_waveform, HeaderFormat, LoopbackTransport, SampleWidth, WaveformConfig};
//!
//! let mut transport = LoopbackTransport::new();
//! transport.push_read(&b"C1:WF DAT1,#9000000004"[..]);
//! transport.push_read(vec![0x01, 0x00, 0xFF, 0xFF]);
//! transport.push_read(&b"\n"[..]);
//!
//! let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);
//! let waveform = decode_waveform(&mut transport, &config)?;
//! assert_eq!(waveform.samples, vec![1, -1]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod comm_config;
pub mod config;
pub mod lecroy_connector;
pub mod lecroy_scope;
pub mod visa_terminal;
pub mod waveform;

// Re-export the main types for convenience
pub use comm_config::{
    Channel, CommConfigError, HeaderFormat, InternalStateRegister, Resolution, SampleWidth,
    ScopeModel, TriggerMode,
};

pub use config::{load_config, load_config_or_default, ScopeConfig};

pub use visa_terminal::{
    LoopbackTransport, SerialTransport, TcpTransport, TerminalError, Transport, VisaTerminal,
};

pub use lecroy_connector::{ConnectorError, LeCroyConnector, LeCroyDevice, ResourceAddress};

pub use lecroy_scope::{Identity, LeCroyScope, ScopeError};

pub use waveform::{
    decode_waveform, DecodedWaveform, TruncatedPayloadWarning, WaveDescriptor, WaveformConfig,
    WaveformError,
};
