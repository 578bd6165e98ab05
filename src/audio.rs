//! Audio decoding through an external ffmpeg process.
//!
//! Uploaded bytes are written to a scratch directory, transcoded to
//! 16 kHz mono WAV by ffmpeg and read back with `hound`. The scratch
//! directory is a `tempfile::TempDir` so it is removed whenever the guard
//! goes out of scope, including on early returns.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::Builder;

use crate::error::AppError;

pub const SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    program: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegDecoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs `<program> -version` and reports whether it exited cleanly.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Decodes arbitrary container bytes into mono f32 samples at 16 kHz.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>, AppError> {
        if !self.is_available() {
            return Err(AppError::DecoderUnavailable);
        }

        let workdir = Builder::new().prefix("emotion_audio").tempdir()?;
        let in_path = workdir.path().join("input");
        let out_path = workdir.path().join("output.wav");

        let mut f = File::create(&in_path)?;
        f.write_all(bytes)?;
        f.flush()?;
        drop(f);

        self.transcode(&in_path, &out_path)?;
        read_wav_mono(&out_path)
    }

    fn transcode(&self, in_path: &Path, out_path: &Path) -> Result<(), AppError> {
        let output = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(in_path)
            .args(["-ac", "1", "-ar"])
            .arg(SAMPLE_RATE.to_string())
            .args(["-f", "wav"])
            .arg(out_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::debug!(
                "ffmpeg exited with {:?} for {}",
                output.status.code(),
                in_path.display()
            );
            return Err(AppError::DecodeFailed(stderr.into_owned()));
        }
        Ok(())
    }
}

/// Reads a WAV file into mono f32 samples in [-1, 1].
///
/// Integer PCM is scaled by `2^(bits - 1)`; extra channels are averaged.
/// Anything not at 16 kHz is refused since no resampling happens here.
pub fn read_wav_mono(path: &Path) -> Result<Vec<f32>, AppError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate != SAMPLE_RATE {
        return Err(AppError::InvalidWav(format!(
            "expected {} Hz, decoder produced {} Hz",
            SAMPLE_RATE, spec.sample_rate
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AppError::InvalidWav(format!(
                    "unsupported bits per sample: {}",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
    };

    let channels = spec.channels.max(1) as usize;
    if channels == 1 {
        return Ok(interleaved);
    }

    Ok(interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect())
}
