use anyhow::{bail, Context, Result};
use flowstitch::api::flow::{AspectRatio, FlowClient};
use flowstitch::api::token::EnvTokenProvider;
use flowstitch::assemble::{self, AssemblyOptions};
use flowstitch::config::Config;
use flowstitch::ffmpeg::MediaTool;
use flowstitch::filtergraph::TransitionSpec;
use flowstitch::generator::{self, ChainRequest, Mode, ProgressHook};
use flowstitch::init;
use flowstitch::poller::PollOptions;
use flowstitch::retry::{ModelPreferences, ModelVariant};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: flowstitch-cli <prompts.txt> [t2v|i2v|p2v|t2i] [16:9|9:16]");
    }

    init::ensure_directories().await?;

    let cfg = match Config::load("config.json").await {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("[INFO] {}; using built-in defaults", err);
            Config::default()
        }
    };

    let tool = MediaTool::new(&cfg.ffmpeg_path, &cfg.ffprobe_path);
    if !init::check_media_tools(&tool).await {
        eprintln!("[WARNING] ffmpeg/ffprobe not found. Assembly will fail without them.");
    }

    let prompts_text = tokio::fs::read_to_string(&args[0])
        .await
        .with_context(|| format!("read prompts from {}", args[0]))?;
    let prompts: Vec<String> = prompts_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let mode = args
        .get(1)
        .map(|m| Mode::parse(m).with_context(|| format!("unknown mode: {}", m)))
        .transpose()?
        .unwrap_or(Mode::TextToVideo);
    let ratio = args
        .get(2)
        .map(|r| AspectRatio::parse_or_default(r))
        .unwrap_or_default();

    let models = ModelPreferences::new(ModelVariant::GemPix2, cfg.model_switch_threshold);
    let client = FlowClient::new(&cfg.base_url, Arc::new(EnvTokenProvider::default()), models)?
        .with_request_timeout(cfg.request_timeout());

    let project_id = client.create_project("flowstitch run").await?;
    eprintln!("[INFO] Project: {}", project_id);

    let progress: ProgressHook = Arc::new(|completed, total, info| {
        eprintln!(
            "[PROGRESS] {}/{} {}",
            completed,
            total,
            info.unwrap_or_default()
        );
    });

    let mut request = ChainRequest::new(&project_id, mode, prompts);
    request.ratio = ratio;
    request.poll = PollOptions {
        interval: cfg.poll_interval(),
        max_attempts: cfg.poll_max_attempts,
        timeout: cfg.poll_timeout_secs.map(Duration::from_secs_f64),
    };
    request.progress = Some(progress);

    let outcome = generator::generate_scenes(&client, &request).await;

    let run_result = match outcome {
        Ok(out) if mode == Mode::TextToImage => {
            for id in &out.media_ids {
                println!("{}", id);
            }
            Ok(())
        }
        Ok(out) => {
            let opts = AssemblyOptions {
                seam_trim_seconds: cfg.seam_trim_seconds,
                transition: TransitionSpec {
                    duration: cfg.transition_duration,
                    style: cfg.transition_style.clone(),
                },
            };
            let http = reqwest::Client::new();
            match assemble::download_and_assemble(
                &tool,
                &http,
                &out.urls,
                Path::new("output/final_video.mp4"),
                &opts,
            )
            .await
            {
                Ok(final_path) => {
                    println!("{}", final_path.display());
                    Ok(())
                }
                Err(err) => Err(anyhow::Error::from(err)),
            }
        }
        Err(err) => Err(anyhow::Error::from(err)),
    };

    if let Err(err) = client.delete_project(&project_id).await {
        eprintln!("[WARNING] Could not delete project {}: {}", project_id, err);
    }

    run_result
}
