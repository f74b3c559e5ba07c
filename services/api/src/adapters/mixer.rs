//! services/api/src/adapters/mixer.rs
//!
//! This module wraps the external FFmpeg binaries behind the `AudioMixer`
//! port. All audio passes through temp files because FFmpeg's looping and
//! filter graph options do not compose well with piped stdin.

use async_trait::async_trait;
use dubber_core::ports::{AudioMixer, PortError, PortResult};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AudioMixer` port by shelling out to
/// ffmpeg/ffprobe.
#[derive(Clone)]
pub struct FfmpegMixer {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegMixer {
    /// Creates a new `FfmpegMixer`.
    pub fn new(ffmpeg_path: String, ffprobe_path: String) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    /// Writes an audio buffer to a scratch file ffmpeg can read.
    async fn write_temp(&self, data: &[u8]) -> PortResult<NamedTempFile> {
        let file = tempfile::Builder::new()
            .suffix(".mp3")
            .tempfile()
            .map_err(|e| PortError::Unexpected(format!("Failed to create temp file: {}", e)))?;
        tokio::fs::write(file.path(), data)
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to write temp file: {}", e)))?;
        Ok(file)
    }
}

//=========================================================================================
// `AudioMixer` Trait Implementation
//=========================================================================================

#[async_trait]
impl AudioMixer for FfmpegMixer {
    /// Probes the duration of an audio buffer in seconds.
    async fn probe_duration(&self, audio: &[u8]) -> PortResult<f64> {
        let input = self.write_temp(audio).await?;

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input.path())
            .output()
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PortError::Validation(format!(
                "Could not read audio track: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.trim().parse::<f64>().map_err(|_| {
            PortError::Unexpected(format!("ffprobe returned unparsable duration '{}'", stdout.trim()))
        })
    }

    /// Overlays synthesized voice over a background track.
    ///
    /// The background input is looped indefinitely and `amix=duration=first`
    /// cuts the mix at the voice's duration, so the output always matches the
    /// synthesized voice regardless of background length.
    async fn overlay_background(&self, voice: &[u8], background: &[u8]) -> PortResult<Vec<u8>> {
        let voice_file = self.write_temp(voice).await?;
        let background_file = self.write_temp(background).await?;
        let output_file = tempfile::Builder::new()
            .suffix(".mp3")
            .tempfile()
            .map_err(|e| PortError::Unexpected(format!("Failed to create temp file: {}", e)))?;

        debug!("Mixing voice over background track with ffmpeg");
        let output = Command::new(&self.ffmpeg_path)
            .args(["-v", "error", "-i"])
            .arg(voice_file.path())
            .args(["-stream_loop", "-1", "-i"])
            .arg(background_file.path())
            .args([
                "-filter_complex",
                "[1:a]volume=0.3[bg];[0:a][bg]amix=inputs=2:duration=first:dropout_transition=0",
                "-f",
                "mp3",
                "-y",
            ])
            .arg(output_file.path())
            .output()
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to run ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PortError::Unexpected(format!(
                "ffmpeg mixing failed: {}",
                stderr.trim()
            )));
        }

        tokio::fs::read(output_file.path())
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to read mixed output: {}", e)))
    }
}
