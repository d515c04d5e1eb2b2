//! # Audio Format Conversion
//!
//! Converts a question's buffered source-format bytes into canonical WAV for
//! the transcription backend. Runs exactly once per question, at the
//! question boundary, on the finalization task - never per-chunk.
//!
//! ## Key Functions:
//! - **PCM wrapping**: Raw little-endian PCM frames get a WAV header stamped on
//! - **WAV passthrough**: Already-canonical input is validated and passed through
//! - **Container decode**: Compressed browser recordings (WebM/Ogg/MP4) are
//!   decoded with symphonia, downmixed to mono, and re-encoded as WAV

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Audio encodings the streaming endpoint accepts from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Raw 16-bit little-endian PCM frames
    Pcm,
    /// Complete WAV stream (header in the first chunk)
    Wav,
    /// WebM container (what browser MediaRecorder produces by default)
    Webm,
    /// Ogg container
    Ogg,
    /// MP4/M4A container
    Mp4,
}

impl SourceFormat {
    /// File-extension hint for the container probe.
    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Pcm => "pcm",
            SourceFormat::Wav => "wav",
            SourceFormat::Webm => "webm",
            SourceFormat::Ogg => "ogg",
            SourceFormat::Mp4 => "mp4",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcm" => Ok(SourceFormat::Pcm),
            "wav" => Ok(SourceFormat::Wav),
            "webm" => Ok(SourceFormat::Webm),
            "ogg" | "oga" => Ok(SourceFormat::Ogg),
            "mp4" | "m4a" => Ok(SourceFormat::Mp4),
            other => Err(format!("Unknown audio source format: '{}'", other)),
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Errors from format conversion.
#[derive(Debug)]
pub enum ConvertError {
    /// No bytes were buffered for the question
    EmptyInput,

    /// The bytes do not form a decodable stream of the declared format
    Malformed(String),

    /// The declared format is not handled by this converter
    Unsupported(String),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::EmptyInput => write!(f, "No audio data to convert"),
            ConvertError::Malformed(msg) => write!(f, "Malformed audio data: {}", msg),
            ConvertError::Unsupported(msg) => write!(f, "Unsupported audio format: {}", msg),
        }
    }
}

impl std::error::Error for ConvertError {}

/// Capability trait for converting buffered source audio to canonical WAV.
///
/// ## Contract:
/// Input is the complete byte stream of one question's answer; output is a
/// self-contained WAV stream the transcription backend can decode. Fails on
/// empty or malformed input, never panics.
pub trait FormatConverter: Send + Sync {
    fn convert(&self, raw: &[u8], source: SourceFormat) -> Result<Vec<u8>, ConvertError>;
}

/// Converter for uncompressed input: raw PCM frames or complete WAV streams.
///
/// ## Configuration:
/// `sample_rate` and `channels` describe the raw PCM the client sends; they
/// only matter for the `Pcm` source format (a WAV stream carries its own
/// header).
pub struct PcmWavConverter {
    sample_rate: u32,
    channels: u16,
}

impl PcmWavConverter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Stamp a WAV header onto raw 16-bit little-endian PCM bytes.
    fn wrap_pcm(&self, raw: &[u8]) -> Result<Vec<u8>, ConvertError> {
        if raw.len() % 2 != 0 {
            return Err(ConvertError::Malformed(
                "PCM byte stream length must be even for 16-bit samples".to_string(),
            ));
        }

        // Read each 16-bit sample (little-endian format)
        let mut cursor = Cursor::new(raw);
        let mut samples = Vec::with_capacity(raw.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        encode_wav(&samples, self.sample_rate, self.channels)
    }

    /// Validate that the buffered stream is actually a WAV file.
    fn check_wav(raw: &[u8]) -> Result<Vec<u8>, ConvertError> {
        // A WAV header is 44 bytes; anything shorter can't carry audio
        if raw.len() <= 44 {
            return Err(ConvertError::Malformed(format!(
                "WAV stream too short: {} bytes",
                raw.len()
            )));
        }

        if &raw[0..4] != b"RIFF" || &raw[8..12] != b"WAVE" {
            return Err(ConvertError::Malformed(
                "Missing RIFF/WAVE header".to_string(),
            ));
        }

        Ok(raw.to_vec())
    }
}

impl FormatConverter for PcmWavConverter {
    fn convert(&self, raw: &[u8], source: SourceFormat) -> Result<Vec<u8>, ConvertError> {
        if raw.is_empty() {
            return Err(ConvertError::EmptyInput);
        }

        match source {
            SourceFormat::Pcm => self.wrap_pcm(raw),
            SourceFormat::Wav => Self::check_wav(raw),
            other => Err(ConvertError::Unsupported(format!(
                "PcmWavConverter cannot handle '{}' input",
                other
            ))),
        }
    }
}

/// Converter for compressed container input (WebM/Ogg/MP4).
///
/// ## Decode Strategy:
/// The full byte stream is probed and decoded with symphonia, all channels
/// are downmixed to mono by averaging, and the result is re-encoded as
/// 16-bit WAV at the stream's native sample rate. No resampling happens
/// here; the transcription backend accepts any rate.
pub struct MediaConverter;

impl MediaConverter {
    pub fn new() -> Self {
        Self
    }

    fn decode(raw: &[u8], source: SourceFormat) -> Result<(Vec<i16>, u32, u16), ConvertError> {
        let stream = MediaSourceStream::new(Box::new(Cursor::new(raw.to_vec())), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(source.extension());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| ConvertError::Malformed(format!("Container probe failed: {}", e)))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| ConvertError::Malformed("No decodable audio track".to_string()))?;

        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| ConvertError::Unsupported(format!("Codec not supported: {}", e)))?;

        let mut interleaved: Vec<i16> = Vec::new();
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(16_000);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1);
        let mut sample_buf: Option<SampleBuffer<i16>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                // End of stream
                Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(ConvertError::Malformed(format!("Packet read failed: {}", e)))
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;

                    if sample_buf.is_none() {
                        sample_buf = Some(SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));
                    }

                    if let Some(buf) = sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        interleaved.extend_from_slice(buf.samples());
                    }
                }
                // Recoverable decode error: skip the bad packet and continue
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(ConvertError::Malformed(format!("Decode failed: {}", e))),
            }
        }

        if interleaved.is_empty() {
            return Err(ConvertError::Malformed(
                "Stream decoded to zero samples".to_string(),
            ));
        }

        Ok((interleaved, sample_rate, channels))
    }

    /// Average interleaved channels down to mono.
    fn downmix(interleaved: &[i16], channels: u16) -> Vec<i16> {
        if channels <= 1 {
            return interleaved.to_vec();
        }

        let channels = channels as usize;
        interleaved
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    }
}

impl Default for MediaConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatConverter for MediaConverter {
    fn convert(&self, raw: &[u8], source: SourceFormat) -> Result<Vec<u8>, ConvertError> {
        if raw.is_empty() {
            return Err(ConvertError::EmptyInput);
        }

        match source {
            SourceFormat::Webm | SourceFormat::Ogg | SourceFormat::Mp4 => {
                let (interleaved, sample_rate, channels) = Self::decode(raw, source)?;
                let mono = Self::downmix(&interleaved, channels);

                debug!(
                    "Decoded {} container bytes to {} mono samples at {}Hz",
                    raw.len(),
                    mono.len(),
                    sample_rate
                );

                encode_wav(&mono, sample_rate, 1)
            }
            other => Err(ConvertError::Unsupported(format!(
                "MediaConverter cannot handle '{}' input",
                other
            ))),
        }
    }
}

/// Encode 16-bit samples as an in-memory WAV stream.
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, ConvertError> {
    if samples.is_empty() {
        return Err(ConvertError::EmptyInput);
    }

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ConvertError::Malformed(format!("WAV encode failed: {}", e)))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| ConvertError::Malformed(format!("WAV encode failed: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| ConvertError::Malformed(format!("WAV encode failed: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_round_trip_through_wav() {
        let converter = PcmWavConverter::new(16000, 1);
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        let raw: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = converter.convert(&raw, SourceFormat::Pcm).unwrap();

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_pcm_odd_length_rejected() {
        let converter = PcmWavConverter::new(16000, 1);
        let result = converter.convert(&[1, 2, 3], SourceFormat::Pcm);
        assert!(matches!(result, Err(ConvertError::Malformed(_))));
    }

    #[test]
    fn test_empty_input_rejected() {
        let converter = PcmWavConverter::new(16000, 1);
        assert!(matches!(
            converter.convert(&[], SourceFormat::Pcm),
            Err(ConvertError::EmptyInput)
        ));

        let media = MediaConverter::new();
        assert!(matches!(
            media.convert(&[], SourceFormat::Webm),
            Err(ConvertError::EmptyInput)
        ));
    }

    #[test]
    fn test_wav_passthrough_validates_header() {
        let converter = PcmWavConverter::new(16000, 1);

        // Not a WAV stream at all
        let garbage = vec![7u8; 128];
        assert!(matches!(
            converter.convert(&garbage, SourceFormat::Wav),
            Err(ConvertError::Malformed(_))
        ));

        // A real WAV stream passes through untouched
        let wav = encode_wav(&[1, 2, 3, 4], 16000, 1).unwrap();
        let out = converter.convert(&wav, SourceFormat::Wav).unwrap();
        assert_eq!(out, wav);
    }

    #[test]
    fn test_media_converter_rejects_garbage() {
        let media = MediaConverter::new();
        let garbage = vec![0u8; 256];
        assert!(matches!(
            media.convert(&garbage, SourceFormat::Webm),
            Err(ConvertError::Malformed(_))
        ));
    }

    #[test]
    fn test_media_converter_rejects_raw_pcm_format() {
        let media = MediaConverter::new();
        assert!(matches!(
            media.convert(&[0u8; 32], SourceFormat::Pcm),
            Err(ConvertError::Unsupported(_))
        ));
    }

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = vec![100, 200, -100, -200, 0, 50];
        let mono = MediaConverter::downmix(&stereo, 2);
        assert_eq!(mono, vec![150, -150, 25]);
    }

    #[test]
    fn test_source_format_parsing() {
        assert_eq!("webm".parse::<SourceFormat>().unwrap(), SourceFormat::Webm);
        assert_eq!("WAV".parse::<SourceFormat>().unwrap(), SourceFormat::Wav);
        assert_eq!("m4a".parse::<SourceFormat>().unwrap(), SourceFormat::Mp4);
        assert!("flv".parse::<SourceFormat>().is_err());
    }
}
