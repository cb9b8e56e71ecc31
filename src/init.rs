use crate::ffmpeg::MediaTool;
use std::io;
use std::path::Path;
use tokio::fs;

const REQUIRED_DIRS: &[&str] = &["output", "reference_images"];

pub async fn ensure_directories() -> io::Result<()> {
    for dir in REQUIRED_DIRS {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).await?;
            eprintln!("[INFO] Created directory: {}", dir);
        }
    }
    Ok(())
}

pub async fn check_media_tools(tool: &MediaTool) -> bool {
    for program in [&tool.ffmpeg, &tool.ffprobe] {
        let ok = match tokio::process::Command::new(program)
            .arg("-version")
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        };
        if !ok {
            return false;
        }
    }
    true
}
