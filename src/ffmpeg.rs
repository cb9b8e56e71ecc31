use crate::error::Error;
use crate::filtergraph::{ClipDescriptor, FilterGraph};
use crate::logw;
use std::path::{Path, PathBuf};
use tokio::process::Command;

// Fixed output encoding. These are a playback-compatibility contract for
// mobile devices (baseline-friendly profile/level, yuv420p, faststart moov,
// 48 kHz stereo AAC), not tunable defaults.
const ENCODE_CONTRACT: &[&str] = &[
    "-c:v",
    "libx264",
    "-preset",
    "medium",
    "-crf",
    "23",
    "-profile:v",
    "high",
    "-level",
    "4.0",
    "-pix_fmt",
    "yuv420p",
    "-movflags",
    "+faststart",
    "-c:a",
    "aac",
    "-b:a",
    "192k",
    "-ar",
    "48000",
    "-ac",
    "2",
];

/// Invokes the external media tools. Paths come from config so packaged
/// binaries can ship their own ffmpeg.
#[derive(Debug, Clone)]
pub struct MediaTool {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for MediaTool {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

fn command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    // No console window popping up per invocation on desktop builds.
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

impl MediaTool {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run_ffmpeg(&self, args: &[String], context: &'static str) -> Result<(), Error> {
        let output = command(&self.ffmpeg)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::MediaTool {
                context,
                diagnostics: format!("failed to launch {}: {}", self.ffmpeg, e),
            })?;

        if !output.status.success() {
            return Err(Error::MediaTool {
                context,
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn run_ffprobe(&self, args: &[&str], path: &Path) -> Result<String, Error> {
        let output = command(&self.ffprobe)
            .args(args)
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::MediaTool {
                context: "probe",
                diagnostics: format!("failed to launch {}: {}", self.ffprobe, e),
            })?;

        if !output.status.success() {
            return Err(Error::MediaTool {
                context: "probe",
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn probe_duration(&self, path: &Path) -> Result<f64, Error> {
        let text = self
            .run_ffprobe(
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
                path,
            )
            .await?;

        let duration = text.parse::<f64>().unwrap_or(-1.0);
        if duration <= 0.1 {
            return Err(Error::MediaTool {
                context: "probe",
                diagnostics: format!("invalid duration '{}' for {}", text, path.display()),
            });
        }
        Ok(duration)
    }

    pub async fn probe_dimensions(&self, path: &Path) -> Result<(i32, i32), Error> {
        let text = self
            .run_ffprobe(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=width,height",
                    "-of",
                    "csv=s=x:p=0",
                ],
                path,
            )
            .await?;

        let mut parts = text.split('x');
        let w = parts.next().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
        let h = parts.next().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
        if w <= 0 || h <= 0 {
            return Err(Error::MediaTool {
                context: "probe",
                diagnostics: format!("invalid dimensions '{}' for {}", text, path.display()),
            });
        }
        Ok((w, h))
    }

    pub async fn has_audio_stream(&self, path: &Path) -> bool {
        let result = self
            .run_ffprobe(
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "a:0",
                    "-show_entries",
                    "stream=codec_type",
                    "-of",
                    "csv=p=0",
                ],
                path,
            )
            .await;

        match result {
            Ok(text) => text.to_ascii_lowercase().contains("audio"),
            Err(_) => false,
        }
    }

    /// Full probe of one clip: duration is mandatory, dimensions are nice to
    /// have (some containers hide them behind a decode).
    pub async fn probe_clip(&self, path: &Path) -> Result<ClipDescriptor, Error> {
        let duration = self.probe_duration(path).await?;
        let (width, height) = match self.probe_dimensions(path).await {
            Ok((w, h)) => (Some(w), Some(h)),
            Err(_) => (None, None),
        };
        let has_audio = self.has_audio_stream(path).await;
        Ok(ClipDescriptor {
            path: path.to_path_buf(),
            duration,
            width,
            height,
            has_audio,
        })
    }

    /// Cut `trim_seconds` off the head of a clip into `scratch`. A stream
    /// copy is tried first; when the cut point lands badly for the container
    /// it falls back to a full re-encode. Ok(None) means neither worked and
    /// the caller should use the clip unmodified.
    pub async fn trim_head(
        &self,
        input: &Path,
        trim_seconds: f64,
        scratch: &Path,
    ) -> Result<Option<PathBuf>, Error> {
        if trim_seconds <= 0.0 {
            return Ok(None);
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());
        let output = scratch.join(format!("{}_trimmed.mp4", stem));

        let copy_args = trim_copy_args(input, trim_seconds, &output);
        if self.run_ffmpeg(&copy_args, "trim").await.is_ok() {
            return Ok(Some(output));
        }

        logw(format!(
            "stream-copy trim failed for {}; re-encoding",
            input.display()
        ));
        let reencode_args = trim_reencode_args(input, trim_seconds, &output);
        match self.run_ffmpeg(&reencode_args, "trim").await {
            Ok(()) => Ok(Some(output)),
            Err(err) => {
                logw(format!("re-encode trim failed: {}", err));
                let _ = tokio::fs::remove_file(&output).await;
                Ok(None)
            }
        }
    }

    /// Run a planned concat graph over the clips and encode the result with
    /// the fixed mobile-compat contract.
    pub async fn concat_with_graph(
        &self,
        clips: &[ClipDescriptor],
        graph: &FilterGraph,
        output: &Path,
    ) -> Result<(), Error> {
        let args = concat_args(clips, graph, output);
        self.run_ffmpeg(&args, "concat").await
    }

    /// Single-clip short-circuit: nothing to merge, just copy the file.
    pub async fn copy_single(&self, input: &Path, output: &Path) -> Result<(), Error> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

fn trim_copy_args(input: &Path, trim_seconds: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", trim_seconds),
        "-i".to_string(),
        input.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ]
}

fn trim_reencode_args(input: &Path, trim_seconds: f64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.3}", trim_seconds),
        "-i".to_string(),
        input.display().to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        output.display().to_string(),
    ]
}

fn concat_args(clips: &[ClipDescriptor], graph: &FilterGraph, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];
    for clip in clips {
        args.push("-i".to_string());
        args.push(clip.path.display().to_string());
    }
    args.push("-filter_complex".to_string());
    args.push(graph.render());
    args.push("-map".to_string());
    args.push(format!("[{}]", graph.video_out));
    args.push("-map".to_string());
    args.push(format!("[{}]", graph.audio_out));
    args.extend(ENCODE_CONTRACT.iter().map(|s| s.to_string()));
    args.push(output.display().to_string());
    args
}
