use std::collections::BTreeMap;

use crate::comm_config::{
    infer_termination, Channel, CommConfigError, HeaderFormat, InternalStateRegister, Resolution,
    SampleWidth, ScopeModel, TriggerMode,
};
use crate::config::{ScopeConfig, WaveformSettings};
use crate::lecroy_connector::{ConnectorError, LeCroyConnector};
use crate::visa_terminal::{TerminalError, Transport, VisaTerminal};
use crate::waveform::{decode_waveform, DecodedWaveform, WaveDescriptor, WaveformConfig, WaveformError};

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Terminal error: {0}")]
    Terminal(#[from] TerminalError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    CommConfig(#[from] CommConfigError),

    #[error("Waveform error: {0}")]
    Waveform(#[from] WaveformError),

    #[error("Unexpected reply to '{command}': '{reply}'")]
    UnexpectedReply { command: String, reply: String },

    #[error("Oscilloscope model is {actual} while expecting {expected}")]
    ModelMismatch { expected: String, actual: String },

    #[error("{channel} is not in the list of accepted channels {available:?}")]
    UnknownChannel {
        channel: Channel,
        available: Vec<Channel>,
    },

    #[error("{0} is not in the list of accepted wave descriptor parameters")]
    UnknownWaveParam(String),
}

/// Fields of an `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
}

impl Identity {
    pub fn from_reply(reply: &str) -> Result<Self, ScopeError> {
        match reply.trim().split(',').collect::<Vec<_>>().as_slice() {
            [manufacturer, model, serial_number, firmware] => Ok(Self {
                manufacturer: manufacturer.trim().to_string(),
                model: model.trim().to_string(),
                serial_number: serial_number.trim().to_string(),
                firmware: firmware.trim().to_string(),
            }),
            _ => Err(ScopeError::UnexpectedReply {
                command: "*IDN?".to_string(),
                reply: reply.trim().to_string(),
            }),
        }
    }
}

/// Text between the first pair of double quotes.
fn quoted_body(reply: &str) -> Option<&str> {
    reply.split('"').nth(1)
}

/// `TAG : value` lines of a wave descriptor block.
///
/// Only the first colon separates tag from value, so entries such as
/// `TRIGGER_TIME : Date = ..., Time = 12:30:00` keep their full value.
fn parse_descriptor_block(body: &str) -> BTreeMap<String, String> {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(tag, value)| (tag.trim().to_string(), value.trim().to_string()))
        .filter(|(tag, _)| !tag.is_empty())
        .collect()
}

pub struct LeCroyScope<T: Transport = Box<dyn Transport>> {
    terminal: VisaTerminal<T>,
    identity: Identity,
    model: ScopeModel,
    waveform_params: Vec<String>,
    settings: WaveformSettings,
}

impl LeCroyScope {
    /// Connect to the scope named in `config.connection.resource`
    pub fn connect(config: &ScopeConfig) -> Result<Self, ScopeError> {
        let terminal = LeCroyConnector::connect(
            Some(&config.connection.resource),
            config.connection.timeout(),
        )?;
        Self::new(terminal, config)
    }
}

impl<T: Transport> LeCroyScope<T> {
    /// Identify the scope behind an open terminal
    pub fn new(mut terminal: VisaTerminal<T>, config: &ScopeConfig) -> Result<Self, ScopeError> {
        let raw_idn = terminal.query_line_ending("*IDN?")?;
        if let Some(termination) = infer_termination(&raw_idn) {
            terminal.set_read_termination(termination);
        }

        let identity = Identity::from_reply(&raw_idn)?;
        let model = ScopeModel::from_model_id(&identity.model);

        if let Some(expected) = &config.connection.expected_model {
            if !expected.eq_ignore_ascii_case(model.model_id()) {
                return Err(ScopeError::ModelMismatch {
                    expected: expected.clone(),
                    actual: model.model_id().to_string(),
                });
            }
        }

        log::info!("Connected to {} {}", identity.manufacturer, model);
        log::debug!("Analogue channels: {:?}", model.channels());
        log::debug!("Resolution: {:?}", model.resolution());
        if model.channels().is_empty() {
            log::warn!("Channels are not defined for scope model {}", model);
        }

        let mut scope = Self {
            terminal,
            identity,
            model,
            waveform_params: Vec::new(),
            settings: config.waveform.clone(),
        };

        if let Some(&first) = scope.model.channels().first() {
            scope.waveform_params = scope.get_all_waveparams(first)?.into_keys().collect();
            log::debug!(
                "Accessible analogue waveform parameters: {:?}",
                scope.waveform_params
            );
        }

        Ok(scope)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn scope_model(&self) -> &ScopeModel {
        &self.model
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.model.resolution()
    }

    pub fn channels(&self) -> &'static [Channel] {
        self.model.channels()
    }

    /// Wave descriptor parameter names collected at connection time
    pub fn waveform_params(&self) -> &[String] {
        &self.waveform_params
    }

    pub fn into_terminal(self) -> VisaTerminal<T> {
        self.terminal
    }

    /// Restart cumulative processing (averages, extrema, histograms,
    /// persistence, pass/fail counters)
    pub fn clear_sweeps(&mut self) -> Result<(), ScopeError> {
        Ok(self.terminal.write("CLSW")?)
    }

    /// Arm the scope, forcing a single acquisition if it is already armed
    pub fn arm_acquisition(&mut self) -> Result<(), ScopeError> {
        Ok(self.terminal.write("ARM")?)
    }

    /// Stop acquiring immediately
    pub fn stop_acquisition(&mut self) -> Result<(), ScopeError> {
        Ok(self.terminal.write("STOP")?)
    }

    /// Make one acquisition
    pub fn force_trigger(&mut self) -> Result<(), ScopeError> {
        Ok(self.terminal.write("FRTR")?)
    }

    /// Display a message on the scope screen
    pub fn message(&mut self, text: &str) -> Result<(), ScopeError> {
        Ok(self.terminal.write(&format!("MSG \"{text}\""))?)
    }

    /// Read and clear the INternal state change Register
    pub fn inr_query(&mut self) -> Result<InternalStateRegister, ScopeError> {
        let reply = self.terminal.query("INR?")?;
        Ok(InternalStateRegister::from_reply(&reply)?)
    }

    /// Read and clear all status registers except the MAV bit of STB
    pub fn alst_query(&mut self) -> Result<String, ScopeError> {
        Ok(self.terminal.query("ALST?")?)
    }

    pub fn comm_format(&mut self) -> Result<String, ScopeError> {
        Ok(self.terminal.query("CFMT?")?)
    }

    pub fn sequence(&mut self) -> Result<String, ScopeError> {
        Ok(self.terminal.query("SEQ?")?)
    }

    /// Model reported by the scope right now
    pub fn model(&mut self) -> Result<String, ScopeError> {
        let reply = self.terminal.query("*IDN?")?;
        Ok(Identity::from_reply(&reply)?.model)
    }

    pub fn comm_header(&mut self) -> Result<HeaderFormat, ScopeError> {
        let reply = self.terminal.query("CHDR?")?;
        Ok(HeaderFormat::from_reply(&reply)?)
    }

    pub fn set_comm_header(&mut self, format: HeaderFormat) -> Result<(), ScopeError> {
        Ok(self.terminal.write(&format.to_command())?)
    }

    pub fn comm_format_data_type(&mut self) -> Result<SampleWidth, ScopeError> {
        let reply = self.terminal.query("CFMT?")?;
        Ok(SampleWidth::from_reply(&reply)?)
    }

    pub fn set_comm_format_data_type(&mut self, width: SampleWidth) -> Result<(), ScopeError> {
        Ok(self.terminal.write(&width.to_command())?)
    }

    pub fn trig_mode(&mut self) -> Result<TriggerMode, ScopeError> {
        let reply = self.terminal.query("TRMD?")?;
        Ok(TriggerMode::from_reply(&reply)?)
    }

    pub fn set_trig_mode(&mut self, mode: TriggerMode) -> Result<(), ScopeError> {
        Ok(self.terminal.write(&mode.to_command())?)
    }

    /// Description of the logical entities that make up a waveform
    pub fn read_template(&mut self) -> Result<String, ScopeError> {
        self.query_block("TMPL?")
    }

    pub fn get_all_waveparams(
        &mut self,
        channel: Channel,
    ) -> Result<BTreeMap<String, String>, ScopeError> {
        self.check_channel(channel)?;
        let body = self.query_block(&format!("{channel}:INSP? 'WAVEDESC'"))?;
        Ok(parse_descriptor_block(&body))
    }

    pub fn get_waveparam(&mut self, channel: Channel, param: &str) -> Result<String, ScopeError> {
        self.check_channel(channel)?;

        let param = param.trim().to_ascii_uppercase();
        if !self.waveform_params.is_empty() && !self.waveform_params.contains(&param) {
            return Err(ScopeError::UnknownWaveParam(param));
        }

        let command = format!("{channel}:INSP? '{param}'");
        let body = self.query_block(&command)?;
        body.split_once(':')
            .map(|(_, value)| value.trim().to_string())
            .ok_or(ScopeError::UnexpectedReply {
                command,
                reply: body,
            })
    }

    /// Scaling of the trace currently held by `channel`
    pub fn wave_descriptor(&mut self, channel: Channel) -> Result<WaveDescriptor, ScopeError> {
        let params = self.get_all_waveparams(channel)?;
        Ok(WaveDescriptor::from_params(&params)?)
    }

    /// Read one trace with an explicit frame layout.
    ///
    /// `config` must match the scope's current `CHDR` and `CFMT` settings.
    pub fn read_waveform(
        &mut self,
        channel: Channel,
        config: &WaveformConfig,
    ) -> Result<DecodedWaveform, ScopeError> {
        self.check_channel(channel)?;
        if config.header_format.header_len().is_none() {
            return Err(WaveformError::UnsupportedHeaderFormat(config.header_format).into());
        }

        let command = format!("{channel}:WF? DAT1");
        self.terminal
            .with_timeout(self.settings.binary_timeout(), |terminal| {
                terminal.write(&command)?;
                let waveform = decode_waveform(terminal.transport_mut(), config)?;
                terminal.finish_line(&waveform.terminator)?;
                Ok(waveform)
            })
    }

    /// Read one trace using the scope's current header and data format.
    ///
    /// When the model resolution does not fit in BYTE samples the scope is
    /// switched to WORD first, unless `upgrade_byte_to_word` is off.
    pub fn get_waveform(&mut self, channel: Channel) -> Result<DecodedWaveform, ScopeError> {
        let header_format = self.comm_header()?;
        let mut sample_width = self.comm_format_data_type()?;

        if let Some(resolution) = self.model.resolution() {
            if !resolution.fits_in(sample_width) {
                log::warn!(
                    "Waveform data type {} is less than oscilloscope resolution of {} bits",
                    sample_width,
                    resolution.bits()
                );
                if self.settings.upgrade_byte_to_word {
                    log::warn!("Changing the data type to WORD");
                    self.set_comm_format_data_type(SampleWidth::Word)?;
                    sample_width = SampleWidth::Word;
                }
            }
        }

        let config = WaveformConfig::new(header_format, sample_width)
            .with_max_stalled_reads(self.settings.max_stalled_reads);
        self.read_waveform(channel, &config)
    }

    fn check_channel(&self, channel: Channel) -> Result<(), ScopeError> {
        let available = self.model.channels();
        if available.is_empty() || available.contains(&channel) {
            Ok(())
        } else {
            Err(ScopeError::UnknownChannel {
                channel,
                available: available.to_vec(),
            })
        }
    }

    fn query_block(&mut self, command: &str) -> Result<String, ScopeError> {
        let reply = self
            .terminal
            .with_timeout(self.settings.binary_timeout(), |terminal| {
                terminal.query_quoted(command)
            })?;

        quoted_body(&reply)
            .map(str::to_string)
            .ok_or_else(|| ScopeError::UnexpectedReply {
                command: command.to_string(),
                reply: reply.trim().to_string(),
            })
    }
}
