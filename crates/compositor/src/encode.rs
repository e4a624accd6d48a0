//! Plan execution through ffmpeg.

use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use medley_common::{EngineConfig, MedleyError, MedleyResult};

use crate::plan::{CompositionJob, CompositionPlan, Planner};
use crate::probe::{toolchain_available, FfprobeProbe};

/// Composes a timeline of generated media into a single MP4.
pub struct MediaCompositor<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> MediaCompositor<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    pub fn is_available() -> bool {
        toolchain_available()
    }

    /// Plan and encode. Returns the output path on success.
    pub fn compose(&self, job: &CompositionJob) -> MedleyResult<PathBuf> {
        if !Self::is_available() {
            return Err(MedleyError::upstream(
                "ffmpeg/ffprobe not found on the path",
            ));
        }
        let probe = FfprobeProbe;
        let plan = Planner::new(self.cfg, &probe).build(job)?;
        tracing::info!(
            primary_secs = plan.primary_duration_secs,
            audio_secs = plan.audio_duration_secs,
            canvas = ?plan.canvas,
            output = %job.output_path.display(),
            "Composition planned"
        );

        if let Some(parent) = job.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        run_ffmpeg(&plan)?;
        if let Err(e) = verify_output(&job.output_path) {
            // Exit code 0 with nothing written still counts as a failed
            // encode; no partial file is retained.
            let _ = std::fs::remove_file(&job.output_path);
            return Err(e);
        }
        Ok(job.output_path.clone())
    }
}

fn run_ffmpeg(plan: &CompositionPlan) -> MedleyResult<()> {
    tracing::debug!(args = ?plan.ffmpeg_args, "Running ffmpeg");
    let mut child = Command::new("ffmpeg")
        .args(&plan.ffmpeg_args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MedleyError::upstream(format!("failed to start ffmpeg: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| MedleyError::upstream("failed to capture ffmpeg stderr"))?;

    // Drain stderr concurrently to avoid ffmpeg blocking on a full pipe.
    let stderr_task = std::thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
        }
    });

    let status = child
        .wait()
        .map_err(|e| MedleyError::upstream(format!("failed to wait on ffmpeg: {e}")))?;
    let stderr_output = stderr_task
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    if !status.success() {
        // The last argv entry is the output path; drop any partial file.
        if let Some(output) = plan.ffmpeg_args.last() {
            let _ = std::fs::remove_file(output);
        }
        return Err(MedleyError::upstream(format!(
            "ffmpeg composition failed (status {}): {}",
            status,
            stderr_output.trim()
        )));
    }
    Ok(())
}

fn verify_output(path: &std::path::Path) -> MedleyResult<()> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() == 0 {
        return Err(MedleyError::upstream(format!(
            "composed output '{}' is empty",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_rejects_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            verify_output(&path),
            Err(MedleyError::Upstream { .. })
        ));
    }

    #[test]
    fn test_verify_accepts_nonempty_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        std::fs::write(&path, b"mp4 bytes").unwrap();
        assert!(verify_output(&path).is_ok());
    }

    #[test]
    fn test_verify_missing_output_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(verify_output(&dir.path().join("nope.mp4")).is_err());
    }
}
