//! Binary waveform frames (`<channel>:WF? DAT1` replies).
//!
//! A frame is a text header ending in a 9-digit byte count, e.g.
//! `C1:WF DAT1,#9000000010` for SHORT headers, followed by the binary samples
//! and a terminator. The frame layout depends on the `COMM_HEADER` and
//! `COMM_FORMAT` settings, which are passed in explicitly as a
//! [`WaveformConfig`] rather than read from connection state.

use crate::comm_config::{HeaderFormat, SampleWidth};
use crate::visa_terminal::{TerminalError, Transport};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Width of the ASCII byte count field at the end of the frame header.
pub const BYTE_COUNT_DIGITS: usize = 9;

/// Consecutive empty reads tolerated before a decode is abandoned.
pub const DEFAULT_MAX_STALLED_READS: u32 = 64;

const TERMINATOR_READ_LEN: usize = 16;

pub const TIME_COLUMN_NAME: &str = "time";
pub const RAW_COLUMN_NAME: &str = "raw";
pub const VOLTS_COLUMN_NAME: &str = "volts";

fn header_text(header: &[u8]) -> String {
    String::from_utf8_lossy(header).escape_debug().to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum WaveformError {
    #[error("Header format {0} carries no frame header, waveforms need SHORT or LONG")]
    UnsupportedHeaderFormat(HeaderFormat),

    #[error("Invalid byte count in waveform header '{}'", header_text(.header))]
    HeaderParse { header: Vec<u8> },

    #[error("Transport read failed after {received} of {expected} bytes: {source}")]
    TransportRead {
        received: usize,
        expected: usize,
        #[source]
        source: TerminalError,
    },

    #[error("Transport stalled: {reads} consecutive empty reads after {received} of {expected} bytes")]
    Stalled {
        received: usize,
        expected: usize,
        reads: u32,
    },

    #[error("Wave descriptor has no {0} entry")]
    MissingDescriptorParam(&'static str),

    #[error("Wave descriptor entry {param} has non-numeric value '{value}'")]
    InvalidDescriptorValue { param: &'static str, value: String },
}

/// The declared byte count is not a whole number of samples.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Payload of {declared_byte_count} bytes is not a multiple of {bytes_per_sample}, {leftover} trailing byte(s) ignored"
)]
pub struct TruncatedPayloadWarning {
    pub declared_byte_count: usize,
    pub bytes_per_sample: usize,
    pub leftover: usize,
}

/// Frame layout for one decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformConfig {
    pub header_format: HeaderFormat,
    pub sample_width: SampleWidth,
    /// Zero disables the stall guard.
    pub max_stalled_reads: u32,
}

impl WaveformConfig {
    pub fn new(header_format: HeaderFormat, sample_width: SampleWidth) -> Self {
        Self {
            header_format,
            sample_width,
            max_stalled_reads: DEFAULT_MAX_STALLED_READS,
        }
    }

    pub fn with_max_stalled_reads(mut self, max_stalled_reads: u32) -> Self {
        self.max_stalled_reads = max_stalled_reads;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedWaveform {
    /// Sample values; BYTE samples are sign-extended.
    pub samples: Vec<i16>,
    pub header: Vec<u8>,
    pub declared_byte_count: usize,
    pub sample_width: SampleWidth,
    /// Physical reads needed to collect the payload.
    pub payload_reads: usize,
    pub warning: Option<TruncatedPayloadWarning>,
    /// Bytes swallowed by the trailing terminator read.
    pub terminator: Vec<u8>,
}

impl DecodedWaveform {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Scaled samples as a lazy frame with `time`, `raw` and `volts` columns.
    pub fn to_lazy_frame(&self, descriptor: &WaveDescriptor) -> Result<LazyFrame, PolarsError> {
        let raw: Vec<f64> = self.samples.iter().copied().map(f64::from).collect();
        let df = DataFrame::new(vec![Series::new(RAW_COLUMN_NAME.into(), raw).into()])?;

        Ok(df
            .lazy()
            .with_row_index("row_index", Some(0))
            .with_columns([
                (col("row_index").cast(DataType::Float64) * lit(descriptor.horiz_interval)
                    + lit(descriptor.horiz_offset))
                .alias(TIME_COLUMN_NAME),
                (col(RAW_COLUMN_NAME) * lit(descriptor.vertical_gain)
                    - lit(descriptor.vertical_offset))
                .alias(VOLTS_COLUMN_NAME),
            ])
            .select([
                col(TIME_COLUMN_NAME),
                col(RAW_COLUMN_NAME),
                col(VOLTS_COLUMN_NAME),
            ]))
    }
}

/// Parse the trailing byte count field of a frame header.
pub fn parse_byte_count(header: &[u8]) -> Result<usize, WaveformError> {
    header
        .len()
        .checked_sub(BYTE_COUNT_DIGITS)
        .and_then(|start| std::str::from_utf8(&header[start..]).ok())
        .map(str::trim)
        .filter(|field| !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| WaveformError::HeaderParse {
            header: header.to_vec(),
        })
}

/// Reinterpret a payload as signed samples.
///
/// Returns the samples and the number of trailing bytes that did not make up
/// a whole sample.
pub fn samples_from_payload(payload: &[u8], width: SampleWidth) -> (Vec<i16>, usize) {
    match width {
        SampleWidth::Byte => (
            payload
                .iter()
                .map(|&b| i16::from(i8::from_le_bytes([b])))
                .collect(),
            0,
        ),
        SampleWidth::Word => {
            let chunks = payload.chunks_exact(2);
            let leftover = chunks.remainder().len();
            (
                chunks.map(|c| i16::from_le_bytes([c[0], c[1]])).collect(),
                leftover,
            )
        }
    }
}

/// Read until `buf` is full, returning the number of read calls made.
fn fill<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    max_stalled_reads: u32,
) -> Result<usize, WaveformError> {
    let expected = buf.len();
    let mut cursor = 0;
    let mut reads = 0;
    let mut stalled = 0;

    while cursor < expected {
        let n = transport
            .read_bytes(&mut buf[cursor..])
            .map_err(|source| WaveformError::TransportRead {
                received: cursor,
                expected,
                source,
            })?;
        reads += 1;

        if n == 0 {
            stalled += 1;
            if max_stalled_reads > 0 && stalled >= max_stalled_reads {
                return Err(WaveformError::Stalled {
                    received: cursor,
                    expected,
                    reads: stalled,
                });
            }
            continue;
        }

        stalled = 0;
        cursor += n;
        tracing::trace!(received = cursor, expected, "waveform chunk");
    }

    Ok(reads)
}

/// Decode one waveform frame from `transport`.
///
/// The waveform request (`<channel>:WF? DAT1`) must already have been sent.
/// The header is read first, then the payload is collected across as many
/// short reads as the transport needs, then one more read swallows the
/// terminator. Any error aborts the decode without returning samples.
///
/// The trailing read is a single raw read of at most 16 bytes. A terminator
/// split across reads is only partly consumed; the bytes that were read are
/// returned in [`DecodedWaveform::terminator`] so a line-oriented caller can
/// finish the line.
pub fn decode_waveform<T: Transport + ?Sized>(
    transport: &mut T,
    config: &WaveformConfig,
) -> Result<DecodedWaveform, WaveformError> {
    let _span = tracing::debug_span!(
        "decode_waveform",
        header_format = %config.header_format,
        sample_width = %config.sample_width
    )
    .entered();

    let header_len = config
        .header_format
        .header_len()
        .ok_or(WaveformError::UnsupportedHeaderFormat(config.header_format))?;

    let mut header = vec![0u8; header_len];
    fill(transport, &mut header, config.max_stalled_reads)?;

    let declared_byte_count = parse_byte_count(&header)?;
    log::debug!(
        "Waveform header '{}' declares {} bytes",
        header_text(&header),
        declared_byte_count
    );

    let mut payload = vec![0u8; declared_byte_count];
    let payload_reads = fill(transport, &mut payload, config.max_stalled_reads)?;

    let mut terminator = vec![0u8; TERMINATOR_READ_LEN];
    let terminator_len = transport
        .read_bytes(&mut terminator)
        .map_err(|source| WaveformError::TransportRead {
            received: declared_byte_count,
            expected: declared_byte_count,
            source,
        })?;
    terminator.truncate(terminator_len);

    let (samples, leftover) = samples_from_payload(&payload, config.sample_width);
    let warning = (leftover > 0).then_some(TruncatedPayloadWarning {
        declared_byte_count,
        bytes_per_sample: config.sample_width.bytes_per_sample(),
        leftover,
    });
    if let Some(w) = &warning {
        log::warn!("{}", w);
    }

    log::debug!(
        "Decoded {} samples from {} bytes in {} reads",
        samples.len(),
        declared_byte_count,
        payload_reads
    );

    Ok(DecodedWaveform {
        samples,
        header,
        declared_byte_count,
        sample_width: config.sample_width,
        payload_reads,
        warning,
        terminator,
    })
}

/// Scaling taken from a channel's `WAVEDESC` block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveDescriptor {
    pub vertical_gain: f64,
    pub vertical_offset: f64,
    pub horiz_interval: f64,
    pub horiz_offset: f64,
}

impl Default for WaveDescriptor {
    fn default() -> Self {
        Self {
            vertical_gain: 1.0,
            vertical_offset: 0.0,
            horiz_interval: 1.0,
            horiz_offset: 0.0,
        }
    }
}

impl WaveDescriptor {
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, WaveformError> {
        Ok(Self {
            vertical_gain: descriptor_value(params, "VERTICAL_GAIN")?,
            vertical_offset: descriptor_value(params, "VERTICAL_OFFSET")?,
            horiz_interval: descriptor_value(params, "HORIZ_INTERVAL")?,
            horiz_offset: descriptor_value(params, "HORIZ_OFFSET")?,
        })
    }

    pub fn volts(&self, raw: i16) -> f64 {
        self.vertical_gain.mul_add(f64::from(raw), -self.vertical_offset)
    }

    pub fn time(&self, index: usize) -> f64 {
        self.horiz_interval.mul_add(index as f64, self.horiz_offset)
    }
}

fn descriptor_value(
    params: &BTreeMap<String, String>,
    param: &'static str,
) -> Result<f64, WaveformError> {
    let value = params
        .get(param)
        .ok_or(WaveformError::MissingDescriptorParam(param))?;

    value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| WaveformError::InvalidDescriptorValue {
            param,
            value: value.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visa_terminal::LoopbackTransport;

    const SHORT_PREFIX: &str = "C1:WF DAT1,#9";
    const LONG_PREFIX: &str = "C1:WAVEFORM DAT1,#9";

    fn header(format: HeaderFormat, byte_count: usize) -> Vec<u8> {
        let prefix = match format {
            HeaderFormat::Long => LONG_PREFIX,
            _ => SHORT_PREFIX,
        };
        format!("{prefix}{byte_count:09}").into_bytes()
    }

    /// Transport holding one frame, payload split at `splits`.
    fn frame(format: HeaderFormat, payload: &[u8], splits: &[usize]) -> LoopbackTransport {
        let mut transport = LoopbackTransport::new();
        transport.push_read(header(format, payload.len()));

        let mut start = 0;
        for &split in splits {
            transport.push_read(&payload[start..split]);
            start = split;
        }
        transport.push_read(&payload[start..]);
        transport.push_read(&b"\n"[..]);
        transport
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_header_matches_declared_length() {
        assert_eq!(header(HeaderFormat::Short, 10).len(), 22);
        assert_eq!(header(HeaderFormat::Long, 10).len(), 28);
    }

    #[test]
    fn test_decode_short_word_example() {
        let payload = [0x01, 0x00, 0x02, 0x00, 0xFF, 0xFF, 0x00, 0x80, 0xFF, 0x7F];
        let mut transport = frame(HeaderFormat::Short, &payload, &[]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let waveform = decode_waveform(&mut transport, &config).unwrap();

        assert_eq!(waveform.samples, vec![1, 2, -1, -32768, 32767]);
        assert_eq!(waveform.declared_byte_count, 10);
        assert_eq!(waveform.header, b"C1:WF DAT1,#9000000010");
        assert_eq!(waveform.warning, None);
        assert_eq!(transport.pending_reads(), 0);
    }

    #[test]
    fn test_decode_long_byte() {
        let payload = [0x00, 0x01, 0x7F, 0x80, 0xFF];
        let mut transport = frame(HeaderFormat::Long, &payload, &[]);
        let config = WaveformConfig::new(HeaderFormat::Long, SampleWidth::Byte);

        let waveform = decode_waveform(&mut transport, &config).unwrap();

        assert_eq!(waveform.samples, vec![0, 1, 127, -128, -1]);
        assert_eq!(waveform.warning, None);
    }

    #[test]
    fn test_sample_count_for_every_layout() {
        let payload: Vec<u8> = (0..=255).collect();
        for format in [HeaderFormat::Short, HeaderFormat::Long] {
            for width in [SampleWidth::Byte, SampleWidth::Word] {
                let mut transport = frame(format, &payload, &[]);
                let config = WaveformConfig::new(format, width);

                let waveform = decode_waveform(&mut transport, &config).unwrap();
                assert_eq!(waveform.len(), payload.len() / width.bytes_per_sample());
            }
        }
    }

    #[test]
    fn test_off_header_is_rejected_without_reading() {
        let mut transport = frame(HeaderFormat::Short, &[1, 2], &[]);
        let config = WaveformConfig::new(HeaderFormat::Off, SampleWidth::Word);

        let err = decode_waveform(&mut transport, &config).unwrap_err();

        assert!(matches!(
            err,
            WaveformError::UnsupportedHeaderFormat(HeaderFormat::Off)
        ));
        assert_eq!(transport.read_calls(), 0);
    }

    #[test]
    fn test_non_numeric_byte_count_is_rejected() {
        let mut transport = LoopbackTransport::new();
        transport.push_read(&b"C1:WF DAT1,#900000X010"[..]);
        transport.push_read(vec![0u8; 10]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let err = decode_waveform(&mut transport, &config).unwrap_err();

        match err {
            WaveformError::HeaderParse { header } => {
                assert_eq!(header, b"C1:WF DAT1,#900000X010");
            }
            other => unreachable!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_negative_byte_count_is_rejected() {
        assert!(parse_byte_count(b"C1:WF DAT1,#9-00000010").is_err());
        assert!(parse_byte_count(b"C1:WF DAT1,#9         ").is_err());
        assert_eq!(parse_byte_count(b"C1:WF DAT1,#9 00000010").unwrap(), 10);
    }

    #[test]
    fn test_fragmented_payload_decodes_identically() {
        let payload: Vec<u8> = (0u8..64).map(|i| i.wrapping_mul(37)).collect();
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let mut whole = frame(HeaderFormat::Short, &payload, &[]);
        let expected = decode_waveform(&mut whole, &config).unwrap();
        assert_eq!(expected.payload_reads, 1);

        let one_byte_splits: Vec<usize> = (1..payload.len()).collect();
        for splits in [vec![1], vec![3, 4, 33], vec![31, 32, 63], one_byte_splits] {
            let mut transport = frame(HeaderFormat::Short, &payload, &splits);
            let waveform = decode_waveform(&mut transport, &config).unwrap();

            assert_eq!(waveform.samples, expected.samples);
            assert_eq!(waveform.payload_reads, splits.len() + 1);
            assert_eq!(transport.pending_reads(), 0);
        }
    }

    #[test]
    fn test_empty_reads_are_tolerated_below_the_limit() {
        let mut transport = LoopbackTransport::new();
        transport.push_read(header(HeaderFormat::Short, 4));
        transport.push_read(vec![1, 0]);
        transport.push_read(Vec::new());
        transport.push_read(Vec::new());
        transport.push_read(vec![2, 0]);
        transport.push_read(&b"\n"[..]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let waveform = decode_waveform(&mut transport, &config).unwrap();
        assert_eq!(waveform.samples, vec![1, 2]);
    }

    #[test]
    fn test_stalled_transport_is_abandoned() {
        let mut transport = LoopbackTransport::new();
        transport.push_read(header(HeaderFormat::Short, 4));
        transport.push_read(vec![1, 0]);
        for _ in 0..3 {
            transport.push_read(Vec::new());
        }
        let config =
            WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word).with_max_stalled_reads(3);

        let err = decode_waveform(&mut transport, &config).unwrap_err();

        assert!(matches!(
            err,
            WaveformError::Stalled {
                received: 2,
                expected: 4,
                reads: 3
            }
        ));
    }

    #[test]
    fn test_timeout_mid_payload_returns_no_samples() {
        let mut transport = LoopbackTransport::new();
        transport.push_read(header(HeaderFormat::Short, 8));
        transport.push_read(vec![1, 0, 2]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let err = decode_waveform(&mut transport, &config).unwrap_err();

        assert!(matches!(
            err,
            WaveformError::TransportRead {
                received: 3,
                expected: 8,
                source: TerminalError::ReadTimeout(_)
            }
        ));
    }

    #[test]
    fn test_odd_word_payload_warns_and_keeps_complete_samples() {
        let payload = [0x01, 0x00, 0x02, 0x00, 0x7F];
        let mut transport = frame(HeaderFormat::Short, &payload, &[2]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let waveform = decode_waveform(&mut transport, &config).unwrap();

        assert_eq!(waveform.samples, vec![1, 2]);
        assert_eq!(
            waveform.warning,
            Some(TruncatedPayloadWarning {
                declared_byte_count: 5,
                bytes_per_sample: 2,
                leftover: 1,
            })
        );
    }

    #[test]
    fn test_terminator_is_consumed_with_one_read() {
        let mut transport = frame(HeaderFormat::Short, &[5, 0], &[]);
        transport.push_reply("INR 1");
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let waveform = decode_waveform(&mut transport, &config).unwrap();

        assert_eq!(transport.read_calls(), 3);
        assert_eq!(transport.pending_reads(), 1);
        assert_eq!(waveform.terminator, b"\n");
    }

    #[test]
    fn test_fragmented_header_decodes_identically() {
        let payload = [0x01, 0x00, 0xFF, 0xFF];
        let whole = decode_waveform(
            &mut frame(HeaderFormat::Short, &payload, &[]),
            &WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word),
        )
        .unwrap();

        let framed = header(HeaderFormat::Short, payload.len());
        let mut transport = LoopbackTransport::new();
        transport.push_read(&framed[..5]);
        transport.push_read(&framed[5..]);
        transport.push_read(&payload[..]);
        transport.push_read(&b"\n"[..]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let split = decode_waveform(&mut transport, &config).unwrap();

        assert_eq!(split, whole);
        assert_eq!(split.samples, vec![1, -1]);
        assert_eq!(transport.pending_reads(), 0);
    }

    #[test]
    fn test_missing_terminator_aborts_after_full_payload() {
        let mut transport = LoopbackTransport::new();
        transport.push_read(header(HeaderFormat::Short, 4));
        transport.push_read(vec![0x01, 0x00, 0x02, 0x00]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let err = decode_waveform(&mut transport, &config).unwrap_err();

        assert!(matches!(
            err,
            WaveformError::TransportRead {
                received: 4,
                expected: 4,
                source: TerminalError::ReadTimeout(_)
            }
        ));
    }

    #[test]
    fn test_split_terminator_is_reported_partially() {
        let mut transport = LoopbackTransport::new();
        transport.push_read(header(HeaderFormat::Short, 2));
        transport.push_read(vec![5, 0]);
        transport.push_read(&b"\r"[..]);
        transport.push_read(&b"\n"[..]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);

        let waveform = decode_waveform(&mut transport, &config).unwrap();

        assert_eq!(waveform.terminator, b"\r");
        assert_eq!(transport.pending_reads(), 1);
    }

    #[test]
    fn test_zero_length_frame() {
        let mut transport = frame(HeaderFormat::Long, &[], &[]);
        let config = WaveformConfig::new(HeaderFormat::Long, SampleWidth::Word);

        let waveform = decode_waveform(&mut transport, &config).unwrap();
        assert!(waveform.is_empty());
        assert_eq!(waveform.payload_reads, 0);
    }

    #[test]
    fn test_wave_descriptor_scaling() {
        let params: BTreeMap<String, String> = [
            ("VERTICAL_GAIN", "2.0000e-03"),
            ("VERTICAL_OFFSET", "1.0000e-01"),
            ("HORIZ_INTERVAL", "1.0000e-09"),
            ("HORIZ_OFFSET", "-5.0000e-09 "),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let descriptor = WaveDescriptor::from_params(&params).unwrap();
        assert!(approx_eq(descriptor.volts(100), 0.1));
        assert!(approx_eq(descriptor.time(5), 0.0));
    }

    #[test]
    fn test_wave_descriptor_missing_entry() {
        let params = BTreeMap::new();
        assert!(matches!(
            WaveDescriptor::from_params(&params),
            Err(WaveformError::MissingDescriptorParam("VERTICAL_GAIN"))
        ));
    }

    #[test]
    fn test_to_lazy_frame() {
        let mut transport = frame(HeaderFormat::Short, &[10, 0, 20, 0, 30, 0], &[]);
        let config = WaveformConfig::new(HeaderFormat::Short, SampleWidth::Word);
        let waveform = decode_waveform(&mut transport, &config).unwrap();
        let descriptor = WaveDescriptor {
            vertical_gain: 0.5,
            vertical_offset: 1.0,
            horiz_interval: 0.25,
            horiz_offset: 0.0,
        };

        let df = waveform.to_lazy_frame(&descriptor).unwrap().collect().unwrap();
        assert_eq!(df.height(), 3);

        let volts: Vec<f64> = df
            .column(VOLTS_COLUMN_NAME)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let time: Vec<f64> = df
            .column(TIME_COLUMN_NAME)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();

        assert!(volts.iter().zip([4.0, 9.0, 14.0]).all(|(a, b)| approx_eq(*a, b)));
        assert!(time.iter().zip([0.0, 0.25, 0.5]).all(|(a, b)| approx_eq(*a, b)));
    }
}
