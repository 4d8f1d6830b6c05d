//! Frame processor boundary
//!
//! The scripting runtime is an external collaborator; the pipeline depends
//! only on the narrow capability set modelled by [`FrameProcessor`]. Two
//! interpreter instances exist per filter: the *main* instance drives
//! playback, while a separate *checking* instance is probed during media
//! type negotiation so the running script is never disturbed. They share
//! the script text but no state.

pub mod frame;

use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::media::media_type::MediaType;
use frame::PlanarFrame;

/// Outcome of loading the script against a source media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadStatus {
    /// The script is loaded and its output node is queryable. A script
    /// compile/runtime error still reports `Loaded`: the error text is
    /// retained and a substitute clip keeps playback alive showing it.
    Loaded,
    /// The script explicitly asked for the filter to disconnect from this
    /// media type.
    Disconnect,
}

/// Playback-facing state of the script, as reported through the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ScriptState {
    Stopped = 0,
    Running = 1,
    Paused = 2,
    Error = 3,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("media type cannot back a source clip: {0}")]
    SourceFormat(#[from] crate::format::FormatError),

    #[error("script error: {0}")]
    Script(String),
}

/// Video attributes of the loaded script's output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptVideoInfo {
    /// Script-domain pixel type id; not necessarily one the format table
    /// knows (negotiation surfaces that as a typed error).
    pub pixel_type: i32,
    pub width: i32,
    pub height: i32,
    pub fps_num: i64,
    pub fps_den: i64,
}

impl ScriptVideoInfo {
    /// Average output frame duration in 100 ns units.
    pub fn avg_frame_duration(&self) -> i64 {
        crate::util::mul_div(crate::constants::UNITS, self.fps_den, self.fps_num)
    }
}

/// Supplies source frames to the script by index. Implemented by the frame
/// handler; the script calls back into it, possibly reentrantly from inside
/// an asynchronous frame request.
pub trait SourceFrameSupplier: Send + Sync {
    /// Block until source frame `frame_nb` (or a later one, if the exact
    /// index was dropped) is available, or return the drain frame while a
    /// flush is in progress.
    fn source_frame(&self, frame_nb: i32) -> Arc<PlanarFrame>;
}

/// Completion callback for an asynchronous output frame request.
pub type FrameReadyCallback =
    Box<dyn FnOnce(i32, Result<Arc<PlanarFrame>, String>) + Send + 'static>;

/// The narrow interface the pipeline needs from a script runtime instance.
pub trait FrameProcessor: Send + Sync {
    /// Load (or re-load) the script bound to a source clip whose video info
    /// matches `media_type`. A script that signals "disconnect" yields
    /// [`ReloadStatus::Disconnect`] unless `ignore_disconnect` is set.
    fn reload(
        &self,
        media_type: &MediaType,
        ignore_disconnect: bool,
    ) -> Result<ReloadStatus, ProcessorError>;

    /// Attributes of the script's output node. Only meaningful after a
    /// successful [`FrameProcessor::reload`].
    fn script_video_info(&self) -> ScriptVideoInfo;

    /// Average duration of one *source* frame in 100 ns units, from the
    /// media type of the last reload.
    fn source_avg_frame_duration(&self) -> i64;

    /// Average duration of one *script output* frame in 100 ns units.
    fn script_avg_frame_duration(&self) -> i64;

    /// Source frame rate scaled by
    /// [`FRAME_RATE_SCALE_FACTOR`](crate::constants::FRAME_RATE_SCALE_FACTOR).
    fn source_avg_frame_rate(&self) -> i32;

    /// Request the script's `output_frame_nb`-th output frame. The callback
    /// fires exactly once, from an arbitrary processor thread; while
    /// fulfilling the request the script may synchronously call
    /// [`SourceFrameSupplier::source_frame`].
    fn get_frame_async(&self, output_frame_nb: i32, callback: FrameReadyCallback);

    /// A zero-initialised frame in the source clip's geometry, handed to
    /// the script while flushing so pending requests can unwind.
    fn source_drain_frame(&self) -> Arc<PlanarFrame>;

    /// Release the script's output node. In-flight frame requests drain
    /// instead of blocking once the frame handler is flushing.
    fn stop_script(&self);

    /// Retained error text of the last reload, when the script failed to
    /// compile or run.
    fn error_text(&self) -> Option<String>;

    /// Give the processor its way back into the pipeline for source frame
    /// requests. Scoped to the processor instance, not process-global.
    fn link_source_supplier(&self, supplier: Weak<dyn SourceFrameSupplier>);
}
