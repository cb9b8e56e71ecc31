use crate::error::Error;
use crate::ffmpeg::MediaTool;
use crate::filtergraph::{plan_crossfade, plan_hard_cut, ClipDescriptor, TransitionSpec};
use crate::{logi, logok, logw};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use walkdir::WalkDir;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    /// Seconds removed from the head of every clip except the first, so the
    /// duplicated frames at an extension seam never appear twice.
    pub seam_trim_seconds: f64,
    pub transition: TransitionSpec,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            seam_trim_seconds: 1.0,
            transition: TransitionSpec::default(),
        }
    }
}

fn clip_filename(index: usize) -> String {
    // Zero-padded so lexicographic order matches scene order past clip 9.
    format!("clip_{:03}.mp4", index + 1)
}

fn validate_urls(urls: &[String]) -> Result<(), Error> {
    if urls.is_empty() {
        return Err(Error::precondition("no clip URLs to download"));
    }
    for (i, url) in urls.iter().enumerate() {
        if url.trim().is_empty() {
            return Err(Error::precondition(format!(
                "clip URL {}/{} is empty",
                i + 1,
                urls.len()
            )));
        }
    }
    Ok(())
}

/// Best-effort scratch sweep, contents first. Failures are logged, never
/// raised, so cleanup can't mask the error that got us here.
async fn sweep_scratch(dir: &Path) {
    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir(path).await
        } else {
            fs::remove_file(path).await
        };
        if let Err(err) = removed {
            logw(format!("could not remove {}: {}", path.display(), err));
        }
    }
}

async fn download_clip(http: &Client, url: &str, dest: &Path) -> Result<(), Error> {
    let resp = http
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;
    let bytes = resp.bytes().await?;
    fs::write(dest, &bytes).await?;

    let size = fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(Error::UnexpectedPayload {
            context: "download",
            detail: format!("{} downloaded to an empty file", url),
        });
    }
    Ok(())
}

/// Download every clip URL in order and merge them into `output`. Scratch
/// files live in a uniquely named directory next to the output and are swept
/// on success and failure alike.
pub async fn download_and_assemble(
    tool: &MediaTool,
    http: &Client,
    urls: &[String],
    output: &Path,
    opts: &AssemblyOptions,
) -> Result<PathBuf, Error> {
    validate_urls(urls)?;

    let target_dir = output.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = target_dir {
        fs::create_dir_all(dir).await?;
    }
    let scratch = tempfile::Builder::new()
        .prefix("flowstitch_clips_")
        .tempdir_in(target_dir.unwrap_or(Path::new(".")))?;

    let result = download_then_merge(tool, http, urls, scratch.path(), output, opts).await;

    sweep_scratch(scratch.path()).await;
    if let Err(err) = scratch.close() {
        logw(format!("scratch directory not fully removed: {}", err));
    }

    result
}

async fn download_then_merge(
    tool: &MediaTool,
    http: &Client,
    urls: &[String],
    scratch: &Path,
    output: &Path,
    opts: &AssemblyOptions,
) -> Result<PathBuf, Error> {
    logi(format!("downloading {} clips", urls.len()));
    let mut files = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        let dest = scratch.join(clip_filename(i));
        download_clip(http, url, &dest).await?;
        let size_mb = fs::metadata(&dest).await.map(|m| m.len()).unwrap_or(0) as f64 / 1_048_576.0;
        logok(format!(
            "downloaded clip {}/{} ({:.2} MB)",
            i + 1,
            urls.len(),
            size_mb
        ));
        files.push(dest);
    }

    if files.len() != urls.len() {
        return Err(Error::CountMismatch {
            what: "downloaded clips",
            expected: urls.len(),
            actual: files.len(),
        });
    }

    assemble_clips(tool, &files, output, opts).await
}

/// Merge already-local clips, preserving order: seam-trim every clip but the
/// first, probe, then concatenate with either hard cuts or crossfades.
pub async fn assemble_clips(
    tool: &MediaTool,
    files: &[PathBuf],
    output: &Path,
    opts: &AssemblyOptions,
) -> Result<PathBuf, Error> {
    if files.is_empty() {
        return Err(Error::precondition("no clips to assemble"));
    }

    if files.len() == 1 {
        tool.copy_single(&files[0], output).await?;
        logok(format!("single clip copied to {}", output.display()));
        return Ok(output.to_path_buf());
    }

    let mut prepared = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        if i == 0 || opts.seam_trim_seconds <= 0.0 {
            prepared.push(file.clone());
            continue;
        }
        let scratch = file.parent().unwrap_or(Path::new("."));
        match tool.trim_head(file, opts.seam_trim_seconds, scratch).await? {
            Some(trimmed) => prepared.push(trimmed),
            None => {
                logw(format!(
                    "could not trim {:.2}s from {}; using it unmodified",
                    opts.seam_trim_seconds,
                    file.display()
                ));
                prepared.push(file.clone());
            }
        }
    }

    let mut clips: Vec<ClipDescriptor> = Vec::with_capacity(prepared.len());
    for path in &prepared {
        clips.push(tool.probe_clip(path).await?);
    }

    let graph = if opts.transition.is_hard_cut() {
        logi(format!("concatenating {} clips with hard cuts", clips.len()));
        plan_hard_cut(&clips)
    } else {
        logi(format!(
            "concatenating {} clips with {:.2}s {} transitions",
            clips.len(),
            opts.transition.duration,
            opts.transition.style
        ));
        plan_crossfade(&clips, &opts.transition)
    };

    tool.concat_with_graph(&clips, &graph, output).await?;
    logok(format!("wrote {}", output.display()));
    Ok(output.to_path_buf())
}
