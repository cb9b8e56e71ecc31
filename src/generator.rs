use crate::api::flow::{AspectRatio, FlowClient, ImageRequest};
use crate::error::Error;
use crate::normalize::{normalize, GenerationStatus, NormalizedGeneration};
use crate::poller::{PollOptions, TrackedJob};
use crate::{logi, logok, logw};
use rand::Rng;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    TextToVideo,
    ImageToVideo,
    PhotoToVideo,
    TextToImage,
}

impl Mode {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "t2v" => Some(Mode::TextToVideo),
            "i2v" => Some(Mode::ImageToVideo),
            "p2v" => Some(Mode::PhotoToVideo),
            "t2i" => Some(Mode::TextToImage),
            _ => None,
        }
    }

    fn needs_reference_images(&self) -> bool {
        matches!(self, Mode::ImageToVideo | Mode::PhotoToVideo)
    }
}

/// Called after each scene or image completes: (completed, total, info).
/// Panics inside the hook are caught and logged; they never abort the chain.
pub type ProgressHook = Arc<dyn Fn(usize, usize, Option<&str>) + Send + Sync>;

#[derive(Clone)]
pub struct ChainRequest {
    pub project_id: String,
    pub mode: Mode,
    pub prompts: Vec<String>,
    /// Display ids for progress reporting; reconciled against the prompt
    /// count before use.
    pub scene_ids: Option<Vec<u32>>,
    pub ratio: AspectRatio,
    pub base_seed: Option<i64>,
    /// Local images to upload as reference media (i2v/p2v/t2i).
    pub reference_images: Vec<PathBuf>,
    /// t2i only: rotate uploaded references across prompts instead of
    /// pinning every prompt to the first one.
    pub rotate_references: bool,
    /// Bounds for resolving a pending submission to a ready artifact.
    pub poll: PollOptions,
    pub progress: Option<ProgressHook>,
}

impl ChainRequest {
    pub fn new(project_id: impl Into<String>, mode: Mode, prompts: Vec<String>) -> Self {
        Self {
            project_id: project_id.into(),
            mode,
            prompts,
            scene_ids: None,
            ratio: AspectRatio::Landscape,
            base_seed: None,
            reference_images: Vec::new(),
            rotate_references: false,
            poll: PollOptions::default(),
            progress: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChainOutput {
    /// Playable URLs in scene order (video modes).
    pub urls: Vec<String>,
    /// Generated media ids (t2i mode).
    pub media_ids: Vec<String>,
    /// Reference media that was uploaded along the way. Deletion has already
    /// been attempted by the time this is returned.
    pub uploaded_media: Vec<String>,
}

/// Base seed for the chain. Absent → random; non-positive → 1, with a
/// recorded warning.
fn coerce_base_seed(seed: Option<i64>) -> i64 {
    match seed {
        None => rand::thread_rng().gen_range(1..1_000_000),
        Some(s) if s <= 0 => {
            logw(format!("base seed {} is not positive, using 1", s));
            1
        }
        Some(s) => s,
    }
}

/// Seed carried forward from the previous scene's result.
fn chain_seed(prev: &NormalizedGeneration) -> i64 {
    match prev.seed.as_ref().and_then(|s| s.as_positive()) {
        Some(s) => s,
        None => {
            logw("previous scene returned an unusable seed, using 1");
            1
        }
    }
}

/// The identifier the next extend request must reference. Operation name
/// wins over media generation id; a record with neither cannot be chained
/// from and is rejected here, before anything is submitted.
fn resolve_chain_handle(prev: &NormalizedGeneration, scene: usize) -> Result<String, Error> {
    prev.chain_handle()
        .map(str::to_string)
        .ok_or_else(|| Error::chain(scene, "no operationName or mediaGenerationId to extend from"))
}

/// Display ids for progress lines. A count mismatch is an upstream data
/// error; it is reported loudly and replaced with 1..=n rather than silently
/// truncated or padded.
fn reconcile_scene_ids(scene_ids: Option<&[u32]>, prompt_count: usize) -> Vec<u32> {
    match scene_ids {
        Some(ids) if ids.len() == prompt_count => ids.to_vec(),
        Some(ids) => {
            logw(format!(
                "scene id count ({}) does not match prompt count ({}); renumbering 1..={}",
                ids.len(),
                prompt_count,
                prompt_count
            ));
            (1..=prompt_count as u32).collect()
        }
        None => (1..=prompt_count as u32).collect(),
    }
}

fn emit_progress(hook: Option<&ProgressHook>, completed: usize, total: usize, info: Option<&str>) {
    if let Some(hook) = hook {
        let hook = Arc::clone(hook);
        if catch_unwind(AssertUnwindSafe(|| hook(completed, total, info))).is_err() {
            logw("progress callback panicked; continuing");
        }
    }
}

fn check_preconditions(req: &ChainRequest) -> Result<(), Error> {
    if req.prompts.is_empty() {
        return Err(Error::precondition("prompt list is empty"));
    }
    if req.prompts[0].trim().is_empty() {
        return Err(Error::precondition("first prompt is blank"));
    }
    if req.mode.needs_reference_images() && req.reference_images.is_empty() {
        return Err(Error::precondition(
            "image-to-video mode requires at least one reference image",
        ));
    }
    Ok(())
}

/// Drive a full generation run: upload any reference media, generate every
/// scene (chained) or image (fan-out), then best-effort delete the uploaded
/// references — on the failure path too, so a failed chain never leaks media
/// on the remote.
pub async fn generate_scenes(client: &FlowClient, req: &ChainRequest) -> Result<ChainOutput, Error> {
    check_preconditions(req)?;

    let base_seed = coerce_base_seed(req.base_seed);
    let uploaded = if req.mode.needs_reference_images()
        || (req.mode == Mode::TextToImage && !req.reference_images.is_empty())
    {
        upload_reference_images(client, &req.reference_images, req.ratio).await
    } else {
        Vec::new()
    };

    let result = match req.mode {
        Mode::TextToImage => fan_out_images(client, req, base_seed, &uploaded).await,
        _ => run_chain(client, req, base_seed, &uploaded).await,
    };

    cleanup_uploaded_media(client, &uploaded).await;

    result.map(|mut out| {
        out.uploaded_media = uploaded;
        out
    })
}

async fn upload_reference_images(
    client: &FlowClient,
    paths: &[PathBuf],
    ratio: AspectRatio,
) -> Vec<String> {
    let mut uploaded = Vec::new();
    for path in paths {
        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(err) => {
                logw(format!("cannot read {}: {}", path.display(), err));
                continue;
            }
        };
        match client.upload_reference_image(bytes, ratio).await {
            Ok(media_id) => {
                logok(format!(
                    "uploaded {} -> {}",
                    path.display(),
                    shorten(&media_id)
                ));
                uploaded.push(media_id);
            }
            Err(err) => {
                logw(format!("upload failed for {}: {}", path.display(), err));
            }
        }
    }
    uploaded
}

async fn cleanup_uploaded_media(client: &FlowClient, media_ids: &[String]) {
    if media_ids.is_empty() {
        return;
    }
    logi(format!("deleting {} uploaded reference media", media_ids.len()));
    for id in media_ids {
        if let Err(err) = client.delete_reference_media(id).await {
            logw(format!("could not delete media {}: {}", shorten(id), err));
        }
    }
}

/// Scene-by-scene chained generation. Scene i+1 extends scene i's artifact,
/// so the loop is strictly ordered and any failure aborts the remainder; the
/// caller never sees a partial URL list dressed up as a complete one.
async fn run_chain(
    client: &FlowClient,
    req: &ChainRequest,
    base_seed: i64,
    uploaded: &[String],
) -> Result<ChainOutput, Error> {
    let total = req.prompts.len();
    let scene_ids = reconcile_scene_ids(req.scene_ids.as_deref(), total);
    logi(format!("generating {} scenes", total));

    let raw_first = match req.mode {
        Mode::TextToVideo => {
            client
                .text_to_video(&req.project_id, &req.prompts[0], base_seed, req.ratio)
                .await?
        }
        Mode::ImageToVideo | Mode::PhotoToVideo => {
            if uploaded.is_empty() {
                return Err(Error::chain(1, "no reference images could be uploaded"));
            }
            client
                .photo_to_video(
                    &req.project_id,
                    &req.prompts[0],
                    base_seed,
                    req.ratio,
                    &uploaded[0],
                )
                .await?
        }
        Mode::TextToImage => unreachable!("t2i handled by fan_out_images"),
    };

    let first = normalize(&raw_first);
    if first.is_empty() {
        return Err(Error::chain(1, "remote returned no usable result"));
    }
    first.require_chain_fields(1)?;
    let (mut previous, first_url) = resolve_ready(client, first, 1, &req.poll).await?;

    let mut urls = vec![first_url];
    logok(format!("scene {}/{} ready", scene_ids[0], total));
    emit_progress(
        req.progress.as_ref(),
        scene_ids[0] as usize,
        total,
        Some(&req.prompts[0]),
    );

    for (idx, prompt) in req.prompts.iter().enumerate().skip(1) {
        let scene = idx + 1;
        if prompt.trim().is_empty() {
            return Err(Error::chain(scene, "prompt is blank"));
        }

        let handle = resolve_chain_handle(&previous, scene)?;
        let seed = chain_seed(&previous);
        logi(format!(
            "extending into scene {}/{} (handle {})",
            scene_ids[idx],
            total,
            shorten(&handle)
        ));

        let raw = client
            .extend_video(&req.project_id, &handle, prompt, seed, req.ratio)
            .await?;
        let next = normalize(&raw);
        if next.is_empty() {
            return Err(Error::chain(scene, "extend returned no usable result"));
        }
        next.require_chain_fields(scene)?;
        let (next, url) = resolve_ready(client, next, scene, &req.poll).await?;

        urls.push(url);
        logok(format!("scene {}/{} ready", scene_ids[idx], total));
        previous = next;
        emit_progress(
            req.progress.as_ref(),
            scene_ids[idx] as usize,
            total,
            Some(prompt),
        );
    }

    if urls.len() != total {
        return Err(Error::CountMismatch {
            what: "scenes produced",
            expected: total,
            actual: urls.len(),
        });
    }

    logok(format!("all {} scenes generated", total));
    Ok(ChainOutput {
        urls,
        ..ChainOutput::default()
    })
}

/// A submission that comes back pending carries no playable URL yet. When it
/// at least named its operation, poll the status endpoint until the artifact
/// is ready (or the caller's bounds run out); only a result with neither URL
/// nor operation name is an immediate chain failure.
async fn resolve_ready(
    client: &FlowClient,
    mut result: NormalizedGeneration,
    scene: usize,
    opts: &PollOptions,
) -> Result<(NormalizedGeneration, String), Error> {
    if let Some(url) = result.fife_url.clone() {
        return Ok((result, url));
    }

    let Some(op_name) = result.operation_name.clone() else {
        return Err(Error::chain(scene, "result has no playable URL"));
    };

    logi(format!("scene {} is still pending; polling", scene));
    let jobs = vec![TrackedJob::new(op_name, result.scene_id.clone())];
    let outcome = client.poll_operations(jobs, opts).await;

    let url = outcome
        .jobs
        .into_iter()
        .next()
        .and_then(|job| job.fife_url)
        .ok_or_else(|| Error::chain(scene, "no playable URL after polling"))?;

    result.fife_url = Some(url.clone());
    result.status = Some(GenerationStatus::Successful);
    Ok((result, url))
}

/// t2i is not a chain: every prompt is submitted independently, with the
/// uploaded references either pinned to the first or rotated across prompts.
/// Individual failures are logged and skipped rather than aborting the batch.
async fn fan_out_images(
    client: &FlowClient,
    req: &ChainRequest,
    base_seed: i64,
    uploaded: &[String],
) -> Result<ChainOutput, Error> {
    let total = req.prompts.len();
    if uploaded.is_empty() {
        logi("no reference images; generating from text only");
    } else {
        logi(format!("using {} reference images", uploaded.len()));
    }

    let mut media_ids = Vec::new();
    for (idx, prompt) in req.prompts.iter().enumerate() {
        if prompt.trim().is_empty() {
            logw(format!("prompt {} is blank, skipping", idx + 1));
            continue;
        }

        let reference_names = if uploaded.is_empty() {
            Vec::new()
        } else if req.rotate_references {
            vec![uploaded[idx % uploaded.len()].clone()]
        } else {
            vec![uploaded[0].clone()]
        };

        let request = ImageRequest {
            prompt: prompt.clone(),
            seed: base_seed + idx as i64,
            ratio: req.ratio,
            reference_names,
        };

        let batch = client
            .batch_generate_images(&req.project_id, &[request])
            .await?;
        match batch.media_ids.first() {
            Some(id) => {
                logok(format!("image {}/{} -> {}", idx + 1, total, shorten(id)));
                media_ids.push(id.clone());
                emit_progress(req.progress.as_ref(), idx + 1, total, Some(id));
            }
            None => {
                logw(format!("no media id returned for prompt {}/{}", idx + 1, total));
            }
        }
    }

    Ok(ChainOutput {
        media_ids,
        ..ChainOutput::default()
    })
}

fn shorten(id: &str) -> String {
    if id.len() > 24 {
        format!("{}...", &id[..24])
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::token::StaticTokenProvider;
    use crate::retry::ModelPreferences;
    use serde_json::json;

    fn normalized(raw: serde_json::Value) -> NormalizedGeneration {
        normalize(&raw)
    }

    fn test_client() -> FlowClient {
        FlowClient::new(
            "http://127.0.0.1:9",
            Arc::new(StaticTokenProvider {
                access: "a".to_string(),
                challenge: "c".to_string(),
            }),
            ModelPreferences::default(),
        )
        .unwrap()
    }

    #[test]
    fn mode_parses_short_names() {
        assert_eq!(Mode::parse("t2v"), Some(Mode::TextToVideo));
        assert_eq!(Mode::parse(" I2V "), Some(Mode::ImageToVideo));
        assert_eq!(Mode::parse("p2v"), Some(Mode::PhotoToVideo));
        assert_eq!(Mode::parse("t2i"), Some(Mode::TextToImage));
        assert_eq!(Mode::parse("v2v"), None);
    }

    #[test]
    fn base_seed_coercion() {
        assert_eq!(coerce_base_seed(Some(42)), 42);
        assert_eq!(coerce_base_seed(Some(0)), 1);
        assert_eq!(coerce_base_seed(Some(-9)), 1);
        let random = coerce_base_seed(None);
        assert!(random >= 1);
    }

    #[test]
    fn chain_seed_falls_back_to_one() {
        let good = normalized(json!({
            "operations": [{"operation": {"metadata": {"video": {"seed": 99}}}}]
        }));
        assert_eq!(chain_seed(&good), 99);

        let zero = normalized(json!({
            "operations": [{"operation": {"metadata": {"video": {"seed": 0}}}}]
        }));
        assert_eq!(chain_seed(&zero), 1);

        let garbage = normalized(json!({
            "operations": [{"operation": {"metadata": {"video": {"seed": "nope"}}}}]
        }));
        assert_eq!(chain_seed(&garbage), 1);
    }

    #[test]
    fn handle_prefers_operation_name_over_media_id() {
        let both = normalized(json!({
            "operations": [{
                "mediaGenerationId": "mg-1",
                "operation": {"name": "op-1", "metadata": {"video": {"seed": 1}}}
            }]
        }));
        assert_eq!(resolve_chain_handle(&both, 2).unwrap(), "op-1");

        let id_only = normalized(json!({
            "operations": [{
                "mediaGenerationId": "mg-2",
                "operation": {"metadata": {"video": {"seed": 1}}}
            }]
        }));
        assert_eq!(resolve_chain_handle(&id_only, 2).unwrap(), "mg-2");

        let neither = normalized(json!({
            "operations": [{"operation": {"metadata": {"video": {"seed": 1}}}}]
        }));
        assert!(matches!(
            resolve_chain_handle(&neither, 3),
            Err(Error::ChainIntegrity { scene: 3, .. })
        ));
    }

    #[test]
    fn scene_id_mismatch_renumbers() {
        assert_eq!(reconcile_scene_ids(Some(&[5, 6, 7]), 3), vec![5, 6, 7]);
        assert_eq!(reconcile_scene_ids(Some(&[5, 6]), 3), vec![1, 2, 3]);
        assert_eq!(reconcile_scene_ids(None, 2), vec![1, 2]);
    }

    #[test]
    fn panicking_progress_hook_is_contained() {
        let hook: ProgressHook = Arc::new(|_, _, _| panic!("listener bug"));
        emit_progress(Some(&hook), 1, 3, Some("scene one"));
    }

    #[tokio::test]
    async fn empty_prompt_list_fails_before_any_network_call() {
        let client = test_client();
        let req = ChainRequest::new("proj", Mode::TextToVideo, Vec::new());
        assert!(matches!(
            generate_scenes(&client, &req).await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn blank_first_prompt_fails_fast() {
        let client = test_client();
        let req = ChainRequest::new("proj", Mode::TextToVideo, vec!["   ".to_string()]);
        assert!(matches!(
            generate_scenes(&client, &req).await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn image_mode_without_references_fails_fast() {
        let client = test_client();
        let req = ChainRequest::new(
            "proj",
            Mode::ImageToVideo,
            vec!["a boat on a lake".to_string()],
        );
        assert!(matches!(
            generate_scenes(&client, &req).await,
            Err(Error::Precondition(_))
        ));
    }
}
