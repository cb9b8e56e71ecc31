use crate::api::token::SharedTokenProvider;
use crate::error::Error;
use crate::normalize::{media_ids_from_batch, media_names_from_batch};
use crate::poller::{self, PollOptions, PollOutcome, TrackedJob};
use crate::retry::{classify_status, FailureKind, ModelPreferences, ModelVariant, RetryPolicy};
use crate::{logi, logok, logw};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

// Throttling on the batch image endpoint kicks in above this many requests
// per call, so larger batches are always split.
const MAX_IMAGE_REQUESTS_PER_CALL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn wire_name(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "IMAGE_ASPECT_RATIO_LANDSCAPE",
            AspectRatio::Portrait => "IMAGE_ASPECT_RATIO_PORTRAIT",
        }
    }

    /// Accepts "16:9", "9:16", "16x9" and the wire constants themselves,
    /// case- and whitespace-insensitively.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .trim()
            .to_ascii_uppercase()
            .replace(' ', "")
            .replace('X', ":");
        match normalized.as_str() {
            "16:9" | "IMAGE_ASPECT_RATIO_LANDSCAPE" => Some(AspectRatio::Landscape),
            "9:16" | "IMAGE_ASPECT_RATIO_PORTRAIT" => Some(AspectRatio::Portrait),
            _ => None,
        }
    }

    pub fn parse_or_default(input: &str) -> Self {
        Self::parse(input).unwrap_or_default()
    }
}

/// One entry of a batch image generation call.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub seed: i64,
    pub ratio: AspectRatio,
    /// Reference media handles attached as image inputs.
    pub reference_names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct BatchImageOutput {
    pub media_ids: Vec<String>,
    pub media_names: Vec<String>,
}

/// Per-attempt material the retry loop hands to a body builder: the freshly
/// minted challenge token, a session id, and the model variant to use.
pub struct AttemptContext {
    pub challenge_token: String,
    pub session_id: String,
    pub variant: ModelVariant,
}

/// Client for the remote media generation service. One instance per process
/// is fine; it is cheap to clone and every clone shares the same model
/// preference state.
#[derive(Clone)]
pub struct FlowClient {
    http: Client,
    base_url: String,
    tokens: SharedTokenProvider,
    policy: RetryPolicy,
    models: ModelPreferences,
    request_timeout: Duration,
}

impl FlowClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: SharedTokenProvider,
        models: ModelPreferences,
    ) -> Result<Self, Error> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            tokens,
            policy: RetryPolicy::default(),
            models,
            request_timeout: Duration::from_secs(180),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn models(&self) -> &ModelPreferences {
        &self.models
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn session_id() -> String {
        format!(";{}", Utc::now().timestamp_millis())
    }

    /// Submission loop shared by every generation endpoint. Each attempt
    /// refetches the access token and mints a fresh single-use challenge
    /// token. Throttled/transient failures back off and retry without limit;
    /// any other HTTP status propagates immediately. Variant bookkeeping:
    /// once attempts exceed `fallback_after`, every further attempt records a
    /// failure against the variant in use, and a threshold crossing flips the
    /// shared preference before the body is rebuilt.
    async fn submit_with_retry<B>(
        &self,
        context: &'static str,
        url: &str,
        build_body: B,
    ) -> Result<Value, Error>
    where
        B: Fn(&AttemptContext) -> Value,
    {
        let mut attempt: u32 = 1;
        let mut variant = self.models.preferred();

        loop {
            if attempt > self.policy.fallback_after {
                if let Some(switched) = self.models.record_failure(variant) {
                    logw(format!(
                        "{}: {} failed {} attempts in a row, switching to {}",
                        context,
                        variant.wire_name(),
                        self.policy.fallback_after,
                        switched.wire_name()
                    ));
                    variant = switched;
                }
            }

            let tokens = match self.fetch_tokens(context).await {
                Ok(pair) => pair,
                Err(err) => {
                    let delay = self
                        .policy
                        .delay_for(&FailureKind::Connection, attempt)
                        .unwrap_or(Duration::from_secs(2));
                    logw(format!(
                        "{}: token fetch failed ({}); retrying in {:.0}s",
                        context,
                        err,
                        delay.as_secs_f64()
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            };
            let (access_token, challenge_token) = tokens;

            let ctx = AttemptContext {
                challenge_token,
                session_id: Self::session_id(),
                variant,
            };
            let body = build_body(&ctx);

            let sent = self
                .http
                .post(url)
                .bearer_auth(&access_token)
                .json(&body)
                .timeout(self.request_timeout)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: Value = resp.json().await?;
                    self.models.record_success(variant);
                    if attempt > 1 {
                        logok(format!("{}: succeeded on attempt {}", context, attempt));
                    }
                    return Ok(parsed);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let text = resp.text().await.unwrap_or_default();
                    match classify_status(status, &text) {
                        FailureKind::Fatal { status, body } => {
                            return Err(Error::RemoteStatus { status, body });
                        }
                        kind => {
                            // delay_for is total for non-fatal kinds
                            let delay = self
                                .policy
                                .delay_for(&kind, attempt)
                                .unwrap_or(Duration::from_secs(2));
                            logw(format!(
                                "{}: HTTP {} (attempt {}); retrying in {:.0}s",
                                context,
                                status,
                                attempt,
                                delay.as_secs_f64()
                            ));
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
                Err(err) => {
                    let delay = self
                        .policy
                        .delay_for(&FailureKind::Connection, attempt)
                        .unwrap_or(Duration::from_secs(2));
                    logw(format!(
                        "{}: connection error ({}); retrying in {:.0}s",
                        context,
                        err,
                        delay.as_secs_f64()
                    ));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_tokens(&self, context: &'static str) -> Result<(String, String), Error> {
        let access = self.tokens.access_token().await?;
        if access.trim().is_empty() {
            return Err(Error::Token(format!("{}: empty access token", context)));
        }
        let challenge = self.tokens.challenge_token().await?;
        Ok((access, challenge))
    }

    /// Plain authenticated POST without the retry loop, for the thin
    /// bookkeeping endpoints (projects, media housekeeping, status checks).
    async fn post_simple(&self, context: &'static str, path: &str, body: Value) -> Result<Value, Error> {
        let access = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(&access)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            logw(format!("{}: HTTP {}", context, status.as_u16()));
            return Err(Error::RemoteStatus {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn create_project(&self, name: &str) -> Result<String, Error> {
        let body = json!({"projectName": name});
        let resp = self.post_simple("create project", "projects:create", body).await?;
        resp.get("projectId")
            .and_then(Value::as_str)
            .or_else(|| {
                resp.get("project")
                    .and_then(|p| p.get("projectId"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
            .ok_or_else(|| Error::UnexpectedPayload {
                context: "create project",
                detail: "no projectId in response".to_string(),
            })
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<(), Error> {
        let path = format!("projects/{}:delete", project_id);
        self.post_simple("delete project", &path, json!({})).await?;
        Ok(())
    }

    /// Upload one reference image; returns its media generation id.
    pub async fn upload_reference_image(
        &self,
        image_bytes: Vec<u8>,
        ratio: AspectRatio,
    ) -> Result<String, Error> {
        let access = self.tokens.access_token().await?;
        let url = format!(
            "{}?aspectRatio={}",
            self.endpoint("media:uploadImage"),
            ratio.wire_name()
        );
        let resp = self
            .http
            .post(url)
            .bearer_auth(&access)
            .header("Content-Type", "application/octet-stream")
            .body(image_bytes)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::RemoteStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: Value = resp.json().await?;
        parsed
            .get("mediaGenerationId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| media_ids_from_batch(&parsed).into_iter().next())
            .ok_or_else(|| Error::UnexpectedPayload {
                context: "upload image",
                detail: "no mediaGenerationId in response".to_string(),
            })
    }

    pub async fn delete_reference_media(&self, media_id: &str) -> Result<(), Error> {
        let body = json!({"mediaGenerationId": media_id});
        self.post_simple("delete media", "media:deleteMedia", body).await?;
        Ok(())
    }

    pub async fn text_to_video(
        &self,
        project_id: &str,
        prompt: &str,
        seed: i64,
        ratio: AspectRatio,
    ) -> Result<Value, Error> {
        let url = self.endpoint("video:batchAsyncGenerateVideoText");
        let project = project_id.to_string();
        let prompt = prompt.to_string();
        self.submit_with_retry("text-to-video", &url, move |ctx| {
            json!({
                "clientContext": client_context(&project, ctx),
                "requests": [{
                    "aspectRatio": ratio.wire_name(),
                    "seed": seed,
                    "textInput": {"prompt": prompt.as_str()},
                }]
            })
        })
        .await
    }

    pub async fn photo_to_video(
        &self,
        project_id: &str,
        prompt: &str,
        seed: i64,
        ratio: AspectRatio,
        media_id: &str,
    ) -> Result<Value, Error> {
        let url = self.endpoint("video:batchAsyncGenerateVideoFromImage");
        let project = project_id.to_string();
        let prompt = prompt.to_string();
        let media_id = media_id.to_string();
        self.submit_with_retry("photo-to-video", &url, move |ctx| {
            json!({
                "clientContext": client_context(&project, ctx),
                "requests": [{
                    "aspectRatio": ratio.wire_name(),
                    "seed": seed,
                    "textInput": {"prompt": prompt.as_str()},
                    "imageInput": {
                        "mediaGenerationId": media_id.as_str(),
                        "imageInputType": "IMAGE_INPUT_TYPE_REFERENCE",
                    },
                }]
            })
        })
        .await
    }

    /// Submit a continuation of an earlier generation. `handle` is the prior
    /// scene's chaining handle (operation name, or media generation id when
    /// no operation name was returned).
    pub async fn extend_video(
        &self,
        project_id: &str,
        handle: &str,
        prompt: &str,
        seed: i64,
        ratio: AspectRatio,
    ) -> Result<Value, Error> {
        let url = self.endpoint("video:batchAsyncExtendVideo");
        let project = project_id.to_string();
        let prompt = prompt.to_string();
        let handle = handle.to_string();
        self.submit_with_retry("extend-video", &url, move |ctx| {
            json!({
                "clientContext": client_context(&project, ctx),
                "requests": [{
                    "aspectRatio": ratio.wire_name(),
                    "seed": seed,
                    "textInput": {"prompt": prompt.as_str()},
                    "videoInput": {"mediaGenerationId": handle.as_str()},
                }]
            })
        })
        .await
    }

    /// Batch image generation, chunked to stay under the remote's throttle
    /// ceiling. Ids/names are accumulated across chunks in request order.
    pub async fn batch_generate_images(
        &self,
        project_id: &str,
        requests: &[ImageRequest],
    ) -> Result<BatchImageOutput, Error> {
        let mut out = BatchImageOutput::default();
        if requests.is_empty() {
            return Ok(out);
        }

        let url = self.endpoint(&format!(
            "projects/{}/flowMedia:batchGenerateImages",
            project_id
        ));
        let total_chunks = requests.len().div_ceil(MAX_IMAGE_REQUESTS_PER_CALL);

        for (chunk_idx, chunk) in requests.chunks(MAX_IMAGE_REQUESTS_PER_CALL).enumerate() {
            logi(format!(
                "Submitting image chunk {}/{} ({} requests)",
                chunk_idx + 1,
                total_chunks,
                chunk.len()
            ));
            let project = project_id.to_string();
            let chunk_owned: Vec<ImageRequest> = chunk.to_vec();
            let response = self
                .submit_with_retry("batch-generate-images", &url, move |ctx| {
                    let entries: Vec<Value> = chunk_owned
                        .iter()
                        .map(|req| image_request_body(req, &project, ctx))
                        .collect();
                    json!({
                        "clientContext": client_context(&project, ctx),
                        "requests": entries,
                    })
                })
                .await?;

            out.media_ids.extend(media_ids_from_batch(&response));
            out.media_names.extend(media_names_from_batch(&response));
        }

        Ok(out)
    }

    pub async fn check_status(&self, operations: Vec<Value>) -> Result<Value, Error> {
        self.post_simple(
            "check status",
            "video:batchCheckAsyncVideoGenerationStatus",
            json!({"operations": operations}),
        )
        .await
    }

    /// Poll the batch status endpoint until every job succeeds or the bounds
    /// in `opts` are exhausted (returning the last snapshot either way).
    pub async fn poll_operations(
        &self,
        jobs: Vec<TrackedJob>,
        opts: &PollOptions,
    ) -> PollOutcome {
        let client = self;
        poller::poll_until_ready(
            move |ops| async move { client.check_status(ops).await },
            jobs,
            opts,
        )
        .await
    }
}

fn client_context(project_id: &str, ctx: &AttemptContext) -> Value {
    json!({
        "projectId": project_id,
        "sessionId": ctx.session_id.as_str(),
        "recaptchaToken": ctx.challenge_token.as_str(),
        "tool": "PINHOLE",
    })
}

fn image_request_body(req: &ImageRequest, project_id: &str, ctx: &AttemptContext) -> Value {
    let mut body = json!({
        "clientContext": client_context(project_id, ctx),
        "seed": req.seed,
        "imageModelName": ctx.variant.wire_name(),
        "imageAspectRatio": req.ratio.wire_name(),
        "prompt": req.prompt.as_str(),
    });

    let inputs: Vec<Value> = req
        .reference_names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| {
            json!({
                "name": n.as_str(),
                "imageInputType": "IMAGE_INPUT_TYPE_REFERENCE",
            })
        })
        .collect();
    if !inputs.is_empty() {
        body["imageInputs"] = Value::Array(inputs);
    }

    body
}
