//! PCM16 WAV encoding and artifact validation via the `hound` crate.
//!
//! Segments are encoded entirely in memory (44-byte canonical header plus
//! little-endian PCM16 data) and handed to the caller as raw bytes, so disk
//! writes stay a single atomic `fs::write`.  Validation is the mirror image:
//! a file only counts as a recoverable artifact when it exists, carries a
//! plausible RIFF/WAVE header and decodes to a positive duration.

use std::io::{Cursor, Read};
use std::path::Path;

use log::warn;

/// Sample rate every encoded segment uses, in Hz.
pub const WAV_SAMPLE_RATE: u32 = 16_000;

/// Mono PCM16 spec shared by every segment this crate writes.
fn segment_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

// ---------------------------------------------------------------------------
// float_to_pcm16
// ---------------------------------------------------------------------------

/// Convert `f32` samples in [-1, 1] to PCM16.
///
/// Non-finite samples (NaN, ±inf) are skipped entirely rather than clamped,
/// so the output may be shorter than the input.  Finite samples outside
/// [-1, 1] are clamped.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len());
    let mut skipped = 0usize;

    for &s in samples {
        if !s.is_finite() {
            skipped += 1;
            continue;
        }
        let clamped = s.clamp(-1.0, 1.0);
        out.push((clamped * i16::MAX as f32) as i16);
    }

    if skipped > 0 {
        warn!("dropped {skipped} non-finite samples during PCM conversion");
    }

    out
}

// ---------------------------------------------------------------------------
// encode_wav
// ---------------------------------------------------------------------------

/// Encode mono `f32` samples as a complete in-memory WAV file.
///
/// Returns an empty vector (never an error) when `samples` is empty or
/// `sample_rate` is zero, so callers can uniformly discard tiny artifacts by
/// byte length.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    if samples.is_empty() || sample_rate == 0 {
        return Vec::new();
    }

    let pcm = float_to_pcm16(samples);
    if pcm.is_empty() {
        return Vec::new();
    }

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = match hound::WavWriter::new(&mut cursor, segment_spec(sample_rate)) {
            Ok(w) => w,
            Err(e) => {
                warn!("wav writer init failed ({e}); segment dropped");
                return Vec::new();
            }
        };
        for s in &pcm {
            if let Err(e) = writer.write_sample(*s) {
                warn!("wav write failed ({e}); segment dropped");
                return Vec::new();
            }
        }
        if let Err(e) = writer.finalize() {
            warn!("wav finalize failed ({e}); segment dropped");
            return Vec::new();
        }
    }
    cursor.into_inner()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Why an audio artifact failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WavRejection {
    Missing,
    TooSmall { bytes: u64 },
    BadHeader,
    Undecodable(String),
    ZeroDuration,
}

impl std::fmt::Display for WavRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "file does not exist"),
            Self::TooSmall { bytes } => write!(f, "file too small ({bytes} bytes)"),
            Self::BadHeader => write!(f, "missing RIFF/WAVE markers"),
            Self::Undecodable(e) => write!(f, "undecodable: {e}"),
            Self::ZeroDuration => write!(f, "decodes to zero duration"),
        }
    }
}

/// Validate an on-disk WAV artifact.
///
/// Checks, in order: existence, minimum byte size, RIFF marker at offset 0,
/// WAVE marker at offset 8, and that `hound` can open it with a positive
/// sample count.  Returns the decoded duration in seconds on success.
pub fn validate_wav_file(path: &Path, min_bytes: u64) -> Result<f32, WavRejection> {
    let meta = std::fs::metadata(path).map_err(|_| WavRejection::Missing)?;
    if meta.len() < min_bytes {
        return Err(WavRejection::TooSmall { bytes: meta.len() });
    }

    // Only the 12 marker bytes are needed here; never read the whole file.
    let mut header = [0u8; 12];
    let mut file = std::fs::File::open(path).map_err(|_| WavRejection::Missing)?;
    file.read_exact(&mut header)
        .map_err(|_| WavRejection::BadHeader)?;
    drop(file);
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(WavRejection::BadHeader);
    }

    let reader =
        hound::WavReader::open(path).map_err(|e| WavRejection::Undecodable(e.to_string()))?;
    let spec = reader.spec();
    let frames = reader.duration();
    if frames == 0 || spec.sample_rate == 0 {
        return Err(WavRejection::ZeroDuration);
    }

    Ok(frames as f32 / spec.sample_rate as f32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- float_to_pcm16 ----------------------------------------------------

    #[test]
    fn pcm_clamps_out_of_range() {
        let pcm = float_to_pcm16(&[2.0, -2.0, 0.0]);
        assert_eq!(pcm, vec![i16::MAX, -i16::MAX, 0]);
    }

    #[test]
    fn pcm_skips_non_finite() {
        let pcm = float_to_pcm16(&[0.5, f32::NAN, f32::INFINITY, -0.5]);
        assert_eq!(pcm.len(), 2);
        assert!(pcm[0] > 0 && pcm[1] < 0);
    }

    #[test]
    fn pcm_empty_input() {
        assert!(float_to_pcm16(&[]).is_empty());
    }

    // ---- encode_wav --------------------------------------------------------

    #[test]
    fn encode_has_canonical_header() {
        let samples = vec![0.1_f32; 160];
        let bytes = encode_wav(&samples, WAV_SAMPLE_RATE);

        // 44-byte header followed by 2 bytes per PCM16 sample.
        assert_eq!(bytes.len(), 44 + 160 * 2);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        // Mono, 16-bit, 16 kHz
        assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 1);
        assert_eq!(
            u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            16_000
        );
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
    }

    #[test]
    fn encode_empty_or_invalid_yields_empty() {
        assert!(encode_wav(&[], WAV_SAMPLE_RATE).is_empty());
        assert!(encode_wav(&[0.5; 100], 0).is_empty());
        assert!(encode_wav(&[f32::NAN; 100], WAV_SAMPLE_RATE).is_empty());
    }

    #[test]
    fn encode_decode_duration_matches() {
        let samples = vec![0.2_f32; 16_000]; // 1 s
        let bytes = encode_wav(&samples, WAV_SAMPLE_RATE);

        let reader = hound::WavReader::new(Cursor::new(bytes)).expect("decode");
        assert_eq!(reader.duration(), 16_000);
        assert_eq!(reader.spec().channels, 1);
    }

    // ---- validate_wav_file -------------------------------------------------

    #[test]
    fn validate_accepts_real_segment() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("seg.wav");
        let bytes = encode_wav(&vec![0.3_f32; 16_000], WAV_SAMPLE_RATE);
        std::fs::write(&path, &bytes).expect("write");

        let dur = validate_wav_file(&path, 1024).expect("valid");
        assert!((dur - 1.0).abs() < 1e-3);
    }

    #[test]
    fn validate_rejects_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = validate_wav_file(&dir.path().join("nope.wav"), 1024).unwrap_err();
        assert_eq!(err, WavRejection::Missing);
    }

    #[test]
    fn validate_rejects_tiny_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tiny.wav");
        std::fs::write(&path, b"RIFFxxxxWAVE").expect("write");

        match validate_wav_file(&path, 1024).unwrap_err() {
            WavRejection::TooSmall { bytes } => assert_eq!(bytes, 12),
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_bad_header() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, vec![0u8; 4096]).expect("write");

        assert_eq!(
            validate_wav_file(&path, 1024).unwrap_err(),
            WavRejection::BadHeader
        );
    }

    #[test]
    fn validate_rejects_file_shorter_than_marker_bytes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("stub.wav");
        std::fs::write(&path, b"RIFF1234").expect("write");

        assert_eq!(
            validate_wav_file(&path, 4).unwrap_err(),
            WavRejection::BadHeader
        );
    }

    #[test]
    fn validate_rejects_undecodable_body() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("truncated.wav");
        // RIFF/WAVE markers in place but no fmt or data chunk follows, so
        // the header check passes and decoding fails.
        let mut bytes = Vec::with_capacity(2048);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&2040u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.resize(2048, 0);
        std::fs::write(&path, &bytes).expect("write");

        assert!(matches!(
            validate_wav_file(&path, 1024),
            Err(WavRejection::Undecodable(_))
        ));
    }
}
