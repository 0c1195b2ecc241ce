//! Turns raw acquisition payloads into per-channel waveforms.

use crate::acquisition_config::{AcquisitionConfig, BitDepth, ChannelMask, VoltmeterConfig};
use crate::trigger_config::CHANNELS;
use std::collections::VecDeque;

/// Samples kept per voltmeter channel before the oldest is evicted.
pub const VM_WINDOW: usize = 500;

const VM_FIELDS: usize = CHANNELS as usize + 1;

type AnalogChannels = [Option<Vec<f64>>; CHANNELS as usize];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("12-bit payload must hold whole samples, got {len} bytes")]
    OddLength { len: usize },

    #[error("Payload of {len} bytes but no channel is enabled")]
    NoChannels { len: usize },

    #[error("Expected {expected} comma-separated fields, got {actual}: '{line}'")]
    FieldCount {
        expected: usize,
        actual: usize,
        line: String,
    },

    #[error("Field {index} is not a number: '{value}'")]
    InvalidNumber { index: usize, value: String },

    #[error("Invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("Voltmeter reply is not valid text")]
    NotText,
}

/// Waveforms of one acquisition, indexed by channel (0 = channel 1).
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedChannels {
    /// Volts for every enabled channel, `None` for disabled ones.
    Scope(AnalogChannels),
    /// Logic levels of all four inputs.
    LogicAnalyzer([Vec<bool>; CHANNELS as usize]),
    VoltMeter {
        channels: AnalogChannels,
        vcc: Option<Vec<f64>>,
    },
}

impl DecodedChannels {
    pub fn analog(&self, index: usize) -> Option<&[f64]> {
        match self {
            Self::Scope(channels) | Self::VoltMeter { channels, .. } => {
                channels.get(index)?.as_deref()
            }
            Self::LogicAnalyzer(_) => None,
        }
    }

    pub fn digital(&self, index: usize) -> Option<&[bool]> {
        match self {
            Self::LogicAnalyzer(channels) => channels.get(index).map(Vec::as_slice),
            _ => None,
        }
    }

    pub fn vcc(&self) -> Option<&[f64]> {
        match self {
            Self::VoltMeter { vcc, .. } => vcc.as_deref(),
            _ => None,
        }
    }

    /// Length of the longest channel.
    pub fn samples_per_channel(&self) -> usize {
        match self {
            Self::Scope(channels) | Self::VoltMeter { channels, .. } => channels
                .iter()
                .flatten()
                .map(Vec::len)
                .max()
                .unwrap_or(0),
            Self::LogicAnalyzer(channels) => channels.iter().map(Vec::len).max().unwrap_or(0),
        }
    }
}

/// Decode `payload` the way `config`'s mode lays samples out.
///
/// For the voltmeter the payload is the text reply to `VM:READ?` and the
/// result holds that single reading; use [`VoltmeterHistory`] to keep a
/// rolling window.
pub fn decode(payload: &[u8], config: &AcquisitionConfig) -> Result<DecodedChannels, DecodeError> {
    #[cfg(feature = "cpu-profiling")]
    let _zone = tracy_client::Client::running()
        .map(|client| client.span(tracy_client::span_location!("decode"), 0));

    match config {
        AcquisitionConfig::Scope(scope) => decode_scope(payload, scope.bits, scope.channels),
        AcquisitionConfig::LogicAnalyzer(_) => Ok(decode_logic(payload)),
        AcquisitionConfig::VoltMeter(vm) => {
            let line = std::str::from_utf8(payload).map_err(|_| DecodeError::NotText)?;
            let sample = decode_voltmeter_line(line)?;
            let mut history = VoltmeterHistory::with_capacity(1);
            history.push(sample);
            Ok(history.snapshot(vm))
        }
    }
}

/// Scale raw samples to volts and split them into one contiguous block per
/// enabled channel, lowest channel first.
pub fn decode_scope(
    payload: &[u8],
    bits: BitDepth,
    channels: ChannelMask,
) -> Result<DecodedChannels, DecodeError> {
    if payload.len() % bits.sample_size() != 0 {
        return Err(DecodeError::OddLength { len: payload.len() });
    }
    let enabled = channels.count();
    if enabled == 0 && !payload.is_empty() {
        return Err(DecodeError::NoChannels { len: payload.len() });
    }

    let scale = bits.scale();
    let samples: Vec<f64> = match bits {
        BitDepth::Eight => payload.iter().map(|&raw| f64::from(raw) / scale).collect(),
        BitDepth::Twelve => payload
            .chunks_exact(2)
            .map(|pair| f64::from(u16::from_le_bytes([pair[0], pair[1]])) / scale)
            .collect(),
    };

    let mut out = AnalogChannels::default();
    if enabled == 0 {
        return Ok(DecodedChannels::Scope(out));
    }

    // Blocks differ by at most one sample; the leading ones take the extra.
    let base = samples.len() / enabled;
    let extra = samples.len() % enabled;
    let mut rest = samples.as_slice();
    for (block, index) in channels.enabled().enumerate() {
        let len = base + usize::from(block < extra);
        let (head, tail) = rest.split_at(len);
        out[index] = Some(head.to_vec());
        rest = tail;
    }

    Ok(DecodedChannels::Scope(out))
}

/// Bit `n` of every byte is the level of channel `n + 1`.
pub fn decode_logic(payload: &[u8]) -> DecodedChannels {
    let mut channels: [Vec<bool>; CHANNELS as usize] = Default::default();
    for channel in &mut channels {
        channel.reserve(payload.len());
    }

    for &byte in payload {
        for (bit, channel) in channels.iter_mut().enumerate() {
            channel.push(byte & (1 << bit) != 0);
        }
    }

    DecodedChannels::LogicAnalyzer(channels)
}

/// One `VM:READ?` reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltmeterSample {
    pub channels: [f64; CHANNELS as usize],
    pub vcc: f64,
}

/// Parse `ch1,ch2,ch3,ch4,vcc`.
pub fn decode_voltmeter_line(line: &str) -> Result<VoltmeterSample, DecodeError> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() != VM_FIELDS {
        return Err(DecodeError::FieldCount {
            expected: VM_FIELDS,
            actual: fields.len(),
            line: line.to_string(),
        });
    }

    let mut values = [0.0; VM_FIELDS];
    for (index, (slot, field)) in values.iter_mut().zip(&fields).enumerate() {
        *slot = field.parse().map_err(|_| DecodeError::InvalidNumber {
            index,
            value: field.to_string(),
        })?;
    }

    let [ch1, ch2, ch3, ch4, vcc] = values;
    Ok(VoltmeterSample {
        channels: [ch1, ch2, ch3, ch4],
        vcc,
    })
}

/// Fixed-capacity FIFO of voltmeter readings.
#[derive(Debug, Clone)]
pub struct VoltmeterHistory {
    capacity: usize,
    channels: [VecDeque<f64>; CHANNELS as usize],
    vcc: VecDeque<f64>,
}

impl Default for VoltmeterHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl VoltmeterHistory {
    pub fn new() -> Self {
        Self::with_capacity(VM_WINDOW)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity + 1)),
            vcc: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.vcc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vcc.is_empty()
    }

    pub fn clear(&mut self) {
        self.channels.iter_mut().for_each(VecDeque::clear);
        self.vcc.clear();
    }

    /// Append a reading, evicting the oldest once the window is full.
    pub fn push(&mut self, sample: VoltmeterSample) {
        for (history, value) in self.channels.iter_mut().zip(sample.channels) {
            history.push_back(value);
        }
        self.vcc.push_back(sample.vcc);

        if self.vcc.len() > self.capacity {
            self.channels.iter_mut().for_each(|history| {
                history.pop_front();
            });
            self.vcc.pop_front();
        }
    }

    pub fn channel(&self, index: usize) -> Option<&VecDeque<f64>> {
        self.channels.get(index)
    }

    pub fn vcc(&self) -> &VecDeque<f64> {
        &self.vcc
    }

    /// Copy the window out, keeping only what `config` asks to show.
    pub fn snapshot(&self, config: &VoltmeterConfig) -> DecodedChannels {
        let mut channels = AnalogChannels::default();
        for index in config.channels.enabled() {
            channels[index] = Some(self.channels[index].iter().copied().collect());
        }
        let vcc = config.show_vcc.then(|| self.vcc.iter().copied().collect());

        DecodedChannels::VoltMeter { channels, vcc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition_config::{LogicAnalyzerConfig, ScopeConfig};

    fn scope_config(bits: BitDepth, channels: &str) -> AcquisitionConfig {
        AcquisitionConfig::Scope(ScopeConfig {
            bits,
            channels: channels.parse().unwrap(),
            ..ScopeConfig::default()
        })
    }

    fn le_samples(raw: &[u16]) -> Vec<u8> {
        raw.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_twelve_bit_samples_are_little_endian_tenths_of_millivolts() {
        let payload = le_samples(&[33_000, 0, 16_500]);

        let decoded = decode(&payload, &scope_config(BitDepth::Twelve, "TFFF")).unwrap();

        assert_eq!(decoded.analog(0).unwrap(), &[3.3, 0.0, 1.65]);
        assert_eq!(decoded.analog(1), None);
    }

    #[test]
    fn test_eight_bit_samples_are_hundredths_of_volts() {
        let decoded = decode(&[0, 165, 255], &scope_config(BitDepth::Eight, "FFTF")).unwrap();

        assert_eq!(decoded.analog(2).unwrap(), &[0.0, 1.65, 2.55]);
        assert_eq!(decoded.analog(0), None);
    }

    #[test]
    fn test_odd_twelve_bit_payload_is_rejected() {
        for len in [1usize, 3, 7, 501] {
            let payload = vec![0u8; len];
            assert_eq!(
                decode(&payload, &scope_config(BitDepth::Twelve, "TFFF")),
                Err(DecodeError::OddLength { len })
            );
        }
    }

    #[test]
    fn test_two_channels_split_at_half_in_ascending_order() {
        let raw: Vec<u16> = (0..100).collect();
        let payload = le_samples(&raw);

        let decoded = decode(&payload, &scope_config(BitDepth::Twelve, "FTFT")).unwrap();

        let first: Vec<f64> = raw[..50].iter().map(|&s| f64::from(s) / 10_000.0).collect();
        let second: Vec<f64> = raw[50..].iter().map(|&s| f64::from(s) / 10_000.0).collect();
        assert_eq!(decoded.analog(1).unwrap(), first.as_slice());
        assert_eq!(decoded.analog(3).unwrap(), second.as_slice());
        assert_eq!(decoded.analog(0), None);
        assert_eq!(decoded.analog(2), None);
    }

    #[test]
    fn test_uneven_split_gives_leading_channels_the_extra_sample() {
        let decoded = decode(&[1, 2, 3, 4, 5], &scope_config(BitDepth::Eight, "TTTF")).unwrap();

        assert_eq!(decoded.analog(0).unwrap().len(), 2);
        assert_eq!(decoded.analog(1).unwrap().len(), 2);
        assert_eq!(decoded.analog(2).unwrap(), &[0.05]);
        assert_eq!(decoded.samples_per_channel(), 2);
    }

    #[test]
    fn test_no_enabled_channel() {
        assert_eq!(
            decode_scope(&[1, 2], BitDepth::Eight, ChannelMask::default()),
            Err(DecodeError::NoChannels { len: 2 })
        );
        assert!(decode_scope(&[], BitDepth::Eight, ChannelMask::default()).is_ok());
    }

    #[test]
    fn test_logic_analyzer_bits_map_to_channels() {
        let config = AcquisitionConfig::LogicAnalyzer(LogicAnalyzerConfig::default());

        let decoded = decode(&[0b0000_1010, 0b1111_0001], &config).unwrap();

        let levels: Vec<Vec<bool>> = (0..4)
            .map(|ch| decoded.digital(ch).unwrap().to_vec())
            .collect();
        assert_eq!(levels[0], [false, true]);
        assert_eq!(levels[1], [true, false]);
        assert_eq!(levels[2], [false, false]);
        assert_eq!(levels[3], [true, false]);

        let first: Vec<bool> = levels.iter().map(|ch| ch[0]).collect();
        assert_eq!(first, [false, true, false, true]);
    }

    #[test]
    fn test_voltmeter_line() {
        let sample = decode_voltmeter_line("1.2500,0.0000,3.3000,0.5000,3.2980").unwrap();
        assert_eq!(sample.channels, [1.25, 0.0, 3.3, 0.5]);
        assert_eq!(sample.vcc, 3.298);

        assert!(matches!(
            decode_voltmeter_line("1.0,2.0,3.0,4.0"),
            Err(DecodeError::FieldCount { expected: 5, actual: 4, .. })
        ));
        assert!(matches!(
            decode_voltmeter_line("1.0,2.0,x,4.0,3.3"),
            Err(DecodeError::InvalidNumber { index: 2, .. })
        ));
    }

    #[test]
    fn test_voltmeter_decode_respects_mask_and_vcc() {
        let config = AcquisitionConfig::VoltMeter(VoltmeterConfig {
            channels: "TFFF".parse().unwrap(),
            averaging: 1,
            show_vcc: false,
        });

        let decoded = decode(b"1.0,2.0,3.0,4.0,3.3", &config).unwrap();

        assert_eq!(decoded.analog(0).unwrap(), &[1.0]);
        assert_eq!(decoded.analog(1), None);
        assert_eq!(decoded.vcc(), None);
    }

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let mut history = VoltmeterHistory::new();
        for i in 0..=VM_WINDOW {
            let v = i as f64;
            history.push(VoltmeterSample {
                channels: [v, v, v, v],
                vcc: 3.3,
            });
        }

        let first = history.channel(0).unwrap();
        assert_eq!(first.len(), VM_WINDOW);
        assert_eq!(first.front(), Some(&1.0));
        assert_eq!(first.back(), Some(&(VM_WINDOW as f64)));
        assert_eq!(history.vcc().len(), VM_WINDOW);

        let snapshot = history.snapshot(&VoltmeterConfig::default());
        assert_eq!(snapshot.analog(1).unwrap().len(), VM_WINDOW);
        assert_eq!(snapshot.vcc().unwrap().len(), VM_WINDOW);
    }
}
