//! Medley Compositor
//!
//! Turns an ordered timeline of generated clips (videos and stills on the
//! primary track, music on the audio track) into a single normalized MP4.
//! Planning is separated from encoding: [`Planner`] computes the full
//! ffmpeg argv and the resulting durations from probed metadata, and
//! [`MediaCompositor`] runs it.

pub mod encode;
pub mod plan;
pub mod probe;

pub use encode::*;
pub use plan::*;
pub use probe::*;
