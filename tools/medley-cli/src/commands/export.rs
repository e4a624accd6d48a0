//! Compose a timeline of segments into one video.

use std::path::PathBuf;

use medley_common::EngineConfig;
use medley_compositor::{CompositionJob, MediaCompositor};

pub fn run(cfg: &EngineConfig, segments: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&segments)
        .map_err(|e| anyhow::anyhow!("failed to read '{}': {e}", segments.display()))?;
    let mut job: CompositionJob = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("malformed segments file '{}': {e}", segments.display()))?;
    if let Some(output) = output {
        job.output_path = output;
    }

    println!(
        "Composing {} primary segment(s) + {} audio segment(s)",
        job.primary.len(),
        job.audio.len()
    );
    let written = MediaCompositor::new(cfg).compose(&job)?;
    println!("Wrote {}", written.display());
    Ok(())
}
