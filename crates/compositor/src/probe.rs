//! Media metadata probing.

use std::path::Path;
use std::process::Command;

use medley_common::MedleyResult;

/// What a probe learned about one media file. Either field may be absent
/// (images have no duration, audio has no dimensions).
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub dimensions: Option<(u32, u32)>,
}

/// Seam over `ffprobe` so composition planning is testable without media
/// files or the binary itself.
pub trait MediaProbe {
    fn probe(&self, path: &Path) -> MedleyResult<MediaInfo>;
}

/// Production probe shelling out to `ffprobe`.
#[derive(Debug, Default)]
pub struct FfprobeProbe;

impl MediaProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> MedleyResult<MediaInfo> {
        Ok(MediaInfo {
            duration_secs: probe_duration_secs(path),
            dimensions: probe_dimensions(path),
        })
    }
}

fn probe_duration_secs(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    let secs = raw.trim().parse::<f64>().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

fn probe_dimensions(path: &Path) -> Option<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    let line = raw.lines().next()?.trim();
    let (w, h) = line.split_once('x')?;
    let width = w.parse::<u32>().ok()?;
    let height = h.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// True when both `ffmpeg` and `ffprobe` are on the path.
pub fn toolchain_available() -> bool {
    command_exists("ffmpeg") && command_exists("ffprobe")
}

fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
