//! Composition planning: timeline in, full ffmpeg argv out.
//!
//! Planning is pure given probed metadata, so the duration laws are
//! checked in unit tests without touching ffmpeg.

use std::path::{Path, PathBuf};

use medley_common::{EngineConfig, MedleyError, MedleyResult};
use medley_graph_model::{AssetUri, MediaKind, StorageClass};
use serde::Deserialize;

use crate::probe::MediaProbe;

/// Seconds an image occupies on the primary track when no duration is
/// declared.
pub const DEFAULT_IMAGE_SECS: f64 = 3.0;

/// Fixed output frame rate.
pub const TARGET_FPS: u32 = 24;

/// Canvas used when no primary segment has probeable dimensions.
pub const FALLBACK_CANVAS: (u32, u32) = (1280, 720);

/// One clip on the primary (visual) track.
#[derive(Debug, Clone, Deserialize)]
pub struct PrimarySegment {
    pub uri: AssetUri,
    pub kind: MediaKind,
    /// Trim window start, seconds into the clip. Videos only.
    #[serde(default)]
    pub trim_start: Option<f64>,
    /// Trim window end. Videos only.
    #[serde(default)]
    pub trim_end: Option<f64>,
    /// Display duration. Images only.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// One clip on the audio track.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioSegment {
    pub uri: AssetUri,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// A full composition request: ordered primary track, ordered audio
/// track, target output file.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositionJob {
    pub primary: Vec<PrimarySegment>,
    #[serde(default)]
    pub audio: Vec<AudioSegment>,
    pub output_path: PathBuf,
}

/// The computed plan: complete argv plus the quantities the duration laws
/// are stated over.
#[derive(Debug, Clone)]
pub struct CompositionPlan {
    pub ffmpeg_args: Vec<String>,
    pub primary_duration_secs: f64,
    pub audio_duration_secs: f64,
    pub has_audio: bool,
    pub canvas: (u32, u32),
}

struct PlannedClip {
    path: PathBuf,
    kind: MediaKind,
    /// Input-level trim window for videos.
    window: Option<(f64, f64)>,
    duration_secs: f64,
}

struct PlannedAudio {
    path: PathBuf,
    clip_secs: Option<f64>,
}

/// Builds a [`CompositionPlan`] from a job and probed metadata.
pub struct Planner<'a> {
    cfg: &'a EngineConfig,
    probe: &'a dyn MediaProbe,
}

impl<'a> Planner<'a> {
    pub fn new(cfg: &'a EngineConfig, probe: &'a dyn MediaProbe) -> Self {
        Self { cfg, probe }
    }

    pub fn build(&self, job: &CompositionJob) -> MedleyResult<CompositionPlan> {
        if job.primary.is_empty() {
            return Err(MedleyError::validation(
                "composition requires at least one primary segment",
            ));
        }

        let mut clips = Vec::with_capacity(job.primary.len());
        let mut canvas: Option<(u32, u32)> = None;
        for segment in &job.primary {
            let clip = self.plan_primary(segment)?;
            if let Some(dims) = self.probe.probe(&clip.path)?.dimensions {
                canvas = Some(match canvas {
                    Some((w, h)) => (w.max(dims.0), h.max(dims.1)),
                    None => dims,
                });
            }
            clips.push(clip);
        }
        let canvas = canvas.unwrap_or(FALLBACK_CANVAS);
        let primary_duration_secs: f64 = clips.iter().map(|c| c.duration_secs).sum();

        let mut audio_clips = Vec::with_capacity(job.audio.len());
        let mut audio_total = 0.0f64;
        let mut audio_unbounded = false;
        for segment in &job.audio {
            let clip = self.plan_audio(segment)?;
            match clip.clip_secs {
                Some(secs) => audio_total += secs,
                // No declared or probeable length: the clip runs until
                // the final truncation cuts it, so the track is treated
                // as filling the whole primary duration.
                None => audio_unbounded = true,
            }
            audio_clips.push(clip);
        }
        let has_audio = !audio_clips.is_empty();
        // The audio track never outlives the visuals.
        let audio_duration_secs = if !has_audio {
            0.0
        } else if audio_unbounded {
            primary_duration_secs
        } else {
            audio_total.min(primary_duration_secs)
        };

        let ffmpeg_args = build_args(
            &clips,
            &audio_clips,
            canvas,
            primary_duration_secs,
            &job.output_path,
        );

        Ok(CompositionPlan {
            ffmpeg_args,
            primary_duration_secs,
            audio_duration_secs,
            has_audio,
            canvas,
        })
    }

    fn plan_primary(&self, segment: &PrimarySegment) -> MedleyResult<PlannedClip> {
        let path = self.resolve(&segment.uri, segment.kind)?;
        match segment.kind {
            MediaKind::Video => {
                let real = self.probe.probe(&path)?.duration_secs.ok_or_else(|| {
                    MedleyError::parse(format!(
                        "could not determine duration of '{}'",
                        path.display()
                    ))
                })?;
                let start = segment.trim_start.unwrap_or(0.0).clamp(0.0, real);
                let end = segment.trim_end.unwrap_or(real).clamp(0.0, real);
                // A degenerate window falls back to the whole clip.
                let (start, end) = if start >= end { (0.0, real) } else { (start, end) };
                Ok(PlannedClip {
                    path,
                    kind: segment.kind,
                    window: Some((start, end)),
                    duration_secs: end - start,
                })
            }
            MediaKind::Image => {
                let duration_secs = segment
                    .duration
                    .filter(|secs| *secs > 0.0)
                    .unwrap_or(DEFAULT_IMAGE_SECS);
                Ok(PlannedClip {
                    path,
                    kind: segment.kind,
                    window: None,
                    duration_secs,
                })
            }
            MediaKind::Audio => Err(MedleyError::validation(
                "audio segments belong on the audio track, not the primary track",
            )),
        }
    }

    fn plan_audio(&self, segment: &AudioSegment) -> MedleyResult<PlannedAudio> {
        let path = self.resolve(&segment.uri, MediaKind::Audio)?;
        let real = self.probe.probe(&path)?.duration_secs;
        // Declared duration is capped at what the file actually holds.
        let clip_secs = match (segment.duration.filter(|secs| *secs > 0.0), real) {
            (Some(declared), Some(real)) => Some(declared.min(real)),
            (Some(declared), None) => Some(declared),
            (None, real) => real,
        };
        Ok(PlannedAudio { path, clip_secs })
    }

    /// Kind-aware path resolution: staged inputs live in the input dir,
    /// rendered outputs in the output dir (videos also under the nested
    /// video subfolder).
    fn resolve(&self, uri: &AssetUri, kind: MediaKind) -> MedleyResult<PathBuf> {
        let mut candidates = Vec::new();
        match uri.class {
            StorageClass::Input => candidates.push(self.cfg.input_dir.join(&uri.filename)),
            StorageClass::Output => {
                candidates.push(self.cfg.output_dir.join(&uri.subfolder).join(&uri.filename));
                if kind == MediaKind::Video {
                    candidates.push(
                        self.cfg
                            .output_dir
                            .join(&self.cfg.video_subfolder)
                            .join(&uri.filename),
                    );
                }
            }
        }
        candidates
            .into_iter()
            .find(|path| path.exists())
            .ok_or_else(|| MedleyError::not_found(format!("media file '{}'", uri.filename)))
    }
}

fn build_args(
    clips: &[PlannedClip],
    audio: &[PlannedAudio],
    canvas: (u32, u32),
    primary_total: f64,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut filters: Vec<String> = Vec::new();
    let (width, height) = canvas;

    for (index, clip) in clips.iter().enumerate() {
        match clip.kind {
            MediaKind::Video => {
                if let Some((start, end)) = clip.window {
                    args.extend(["-ss".into(), format_secs(start)]);
                    args.extend(["-to".into(), format_secs(end)]);
                }
            }
            MediaKind::Image => {
                args.extend(["-loop".into(), "1".into()]);
                args.extend(["-t".into(), format_secs(clip.duration_secs)]);
                args.extend(["-framerate".into(), TARGET_FPS.to_string()]);
            }
            MediaKind::Audio => {}
        }
        args.extend(["-i".into(), clip.path.display().to_string()]);

        // Normalize every clip onto the shared canvas so mixed
        // resolutions and frame rates concatenate cleanly.
        filters.push(format!(
            "[{index}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}[v{index}]",
            fps = TARGET_FPS,
        ));
    }

    for clip in audio {
        args.extend(["-i".into(), clip.path.display().to_string()]);
    }

    let video_labels: String = (0..clips.len()).map(|i| format!("[v{i}]")).collect();
    filters.push(format!(
        "{video_labels}concat=n={}:v=1:a=0[vout]",
        clips.len()
    ));

    if !audio.is_empty() {
        for (offset, clip) in audio.iter().enumerate() {
            let input_index = clips.len() + offset;
            match clip.clip_secs {
                Some(secs) => filters.push(format!(
                    "[{input_index}:a]atrim=0:{}[a{offset}]",
                    format_secs(secs)
                )),
                None => filters.push(format!("[{input_index}:a]anull[a{offset}]")),
            }
        }
        let audio_labels: String = (0..audio.len()).map(|i| format!("[a{i}]")).collect();
        filters.push(format!(
            "{audio_labels}concat=n={}:v=0:a=1[acat]",
            audio.len()
        ));
        filters.push(format!(
            "[acat]atrim=0:{}[aout]",
            format_secs(primary_total)
        ));
    }

    args.extend(["-filter_complex".into(), filters.join(";")]);
    args.extend(["-map".into(), "[vout]".into()]);
    if audio.is_empty() {
        // Embedded audio in the primary clips is never carried over.
        args.push("-an".into());
    } else {
        args.extend(["-map".into(), "[aout]".into()]);
        args.extend(["-c:a".into(), "aac".into()]);
    }
    args.extend(["-c:v".into(), "libx264".into()]);
    args.extend(["-pix_fmt".into(), "yuv420p".into()]);
    args.extend(["-r".into(), TARGET_FPS.to_string()]);
    args.extend(["-movflags".into(), "+faststart".into()]);
    args.push("-y".into());
    args.push(output.display().to_string());
    args
}

fn format_secs(secs: f64) -> String {
    format!("{secs:.3}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MediaInfo;
    use std::collections::HashMap;

    struct FakeProbe {
        by_name: HashMap<String, MediaInfo>,
    }

    impl MediaProbe for FakeProbe {
        fn probe(&self, path: &Path) -> MedleyResult<MediaInfo> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            Ok(self.by_name.get(name).copied().unwrap_or_default())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        cfg: EngineConfig,
        probe: FakeProbe,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.input_dir = dir.path().join("input");
        cfg.output_dir = dir.path().join("output");
        std::fs::create_dir_all(&cfg.input_dir).unwrap();
        std::fs::create_dir_all(cfg.output_dir.join("video")).unwrap();
        Fixture {
            _dir: dir,
            cfg,
            probe: FakeProbe {
                by_name: HashMap::new(),
            },
        }
    }

    impl Fixture {
        fn add_output(&mut self, name: &str, info: MediaInfo) {
            std::fs::write(self.cfg.output_dir.join(name), b"media").unwrap();
            self.probe.by_name.insert(name.to_string(), info);
        }

        fn plan(&self, job: &CompositionJob) -> MedleyResult<CompositionPlan> {
            Planner::new(&self.cfg, &self.probe).build(job)
        }
    }

    fn video(info_secs: f64, dims: (u32, u32)) -> MediaInfo {
        MediaInfo {
            duration_secs: Some(info_secs),
            dimensions: Some(dims),
        }
    }

    fn job(primary: Vec<PrimarySegment>, audio: Vec<AudioSegment>) -> CompositionJob {
        CompositionJob {
            primary,
            audio,
            output_path: PathBuf::from("/tmp/out.mp4"),
        }
    }

    fn video_segment(name: &str, trim: Option<(f64, f64)>) -> PrimarySegment {
        PrimarySegment {
            uri: AssetUri::output(name, "", 1),
            kind: MediaKind::Video,
            trim_start: trim.map(|t| t.0),
            trim_end: trim.map(|t| t.1),
            duration: None,
        }
    }

    fn image_segment(name: &str, duration: Option<f64>) -> PrimarySegment {
        PrimarySegment {
            uri: AssetUri::output(name, "", 1),
            kind: MediaKind::Image,
            trim_start: None,
            trim_end: None,
            duration,
        }
    }

    #[test]
    fn test_trimmed_video_plus_image_duration() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(10.0, (1920, 1080)));
        fx.add_output("still.png", MediaInfo {
            duration_secs: None,
            dimensions: Some((1024, 1024)),
        });

        let plan = fx
            .plan(&job(
                vec![
                    video_segment("clip.mp4", Some((2.0, 5.0))),
                    image_segment("still.png", Some(4.0)),
                ],
                vec![],
            ))
            .unwrap();

        let frame_time = 1.0 / TARGET_FPS as f64;
        assert!((plan.primary_duration_secs - 7.0).abs() < frame_time);
        assert_eq!(plan.canvas, (1920, 1080));
    }

    #[test]
    fn test_degenerate_trim_window_falls_back_to_full_clip() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(8.0, (1280, 720)));

        let plan = fx
            .plan(&job(vec![video_segment("clip.mp4", Some((6.0, 2.0)))], vec![]))
            .unwrap();

        assert!((plan.primary_duration_secs - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_trim_clamped_to_real_duration() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(5.0, (1280, 720)));

        let plan = fx
            .plan(&job(vec![video_segment("clip.mp4", Some((1.0, 60.0)))], vec![]))
            .unwrap();

        assert!((plan.primary_duration_secs - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_image_default_duration() {
        let mut fx = fixture();
        fx.add_output("still.png", MediaInfo::default());

        let plan = fx
            .plan(&job(vec![image_segment("still.png", None)], vec![]))
            .unwrap();

        assert!((plan.primary_duration_secs - DEFAULT_IMAGE_SECS).abs() < f64::EPSILON);
        assert_eq!(plan.canvas, FALLBACK_CANVAS);
    }

    #[test]
    fn test_audio_truncated_to_primary_duration() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(6.0, (1280, 720)));
        fx.add_output("song.mp3", MediaInfo {
            duration_secs: Some(10.0),
            dimensions: None,
        });

        let plan = fx
            .plan(&job(
                vec![video_segment("clip.mp4", None)],
                vec![AudioSegment {
                    uri: AssetUri::output("song.mp3", "", 1),
                    duration: None,
                }],
            ))
            .unwrap();

        assert!(plan.has_audio);
        assert!((plan.audio_duration_secs - 6.0).abs() < f64::EPSILON);
        assert!(plan.ffmpeg_args.iter().any(|a| a.contains("atrim=0:6.000")));
        assert!(plan.ffmpeg_args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn test_audio_clip_capped_at_real_duration() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(30.0, (1280, 720)));
        fx.add_output("song.mp3", MediaInfo {
            duration_secs: Some(4.0),
            dimensions: None,
        });

        let plan = fx
            .plan(&job(
                vec![video_segment("clip.mp4", None)],
                vec![AudioSegment {
                    uri: AssetUri::output("song.mp3", "", 1),
                    duration: Some(20.0),
                }],
            ))
            .unwrap();

        assert!((plan.audio_duration_secs - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unprobeable_audio_fills_primary_duration() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(6.0, (1280, 720)));
        // No declared duration and nothing probeable.
        fx.add_output("stream.mp3", MediaInfo::default());

        let plan = fx
            .plan(&job(
                vec![video_segment("clip.mp4", None)],
                vec![AudioSegment {
                    uri: AssetUri::output("stream.mp3", "", 1),
                    duration: None,
                }],
            ))
            .unwrap();

        // The final truncation bounds the stream, so the plan reports the
        // full primary duration rather than zero.
        assert!((plan.audio_duration_secs - 6.0).abs() < f64::EPSILON);
        let filter = plan
            .ffmpeg_args
            .iter()
            .position(|a| a == "-filter_complex")
            .map(|i| plan.ffmpeg_args[i + 1].clone())
            .unwrap();
        assert!(filter.contains("anull[a0]"));
        assert!(filter.contains("[acat]atrim=0:6.000[aout]"));
    }

    #[test]
    fn test_no_audio_is_silent_not_an_error() {
        let mut fx = fixture();
        fx.add_output("clip.mp4", video(5.0, (1280, 720)));

        let plan = fx
            .plan(&job(vec![video_segment("clip.mp4", None)], vec![]))
            .unwrap();

        assert!(!plan.has_audio);
        assert!(plan.ffmpeg_args.contains(&"-an".to_string()));
        assert!(!plan.ffmpeg_args.contains(&"-c:a".to_string()));
    }

    #[test]
    fn test_empty_primary_is_validation_error() {
        let fx = fixture();
        assert!(matches!(
            fx.plan(&job(vec![], vec![])),
            Err(MedleyError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_media_file_is_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.plan(&job(vec![video_segment("ghost.mp4", None)], vec![])),
            Err(MedleyError::NotFound { .. })
        ));
    }

    #[test]
    fn test_canvas_is_max_of_probed_dimensions() {
        let mut fx = fixture();
        fx.add_output("wide.mp4", video(2.0, (1920, 800)));
        fx.add_output("tall.mp4", video(2.0, (720, 1280)));

        let plan = fx
            .plan(&job(
                vec![video_segment("wide.mp4", None), video_segment("tall.mp4", None)],
                vec![],
            ))
            .unwrap();

        assert_eq!(plan.canvas, (1920, 1280));
        let filter = plan
            .ffmpeg_args
            .iter()
            .position(|a| a == "-filter_complex")
            .map(|i| plan.ffmpeg_args[i + 1].clone())
            .unwrap();
        assert!(filter.contains("scale=1920:1280:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("fps=24"));
        assert!(filter.contains("concat=n=2:v=1:a=0[vout]"));
    }

    #[test]
    fn test_nested_video_subfolder_is_searched() {
        let mut fx = fixture();
        std::fs::write(fx.cfg.output_dir.join("video").join("deep.mp4"), b"v").unwrap();
        fx.probe
            .by_name
            .insert("deep.mp4".to_string(), video(3.0, (1280, 720)));

        let plan = fx
            .plan(&job(vec![video_segment("deep.mp4", None)], vec![]))
            .unwrap();
        assert!((plan.primary_duration_secs - 3.0).abs() < f64::EPSILON);
    }
}
