//! # framescript
//!
//! A streaming video filter that sits between a decoder and a renderer,
//! intercepts decoded samples, hands them to an external scripted frame
//! processor (which may change pixel format, resolution, frame rate, or
//! insert/drop frames), and emits the processed samples downstream while
//! preserving timing and sideband metadata.
//!
//! # Architecture
//!
//! ```text
//! upstream sample
//!   └─> ScriptFilter::receive
//!         └─> FrameHandler::add_input_sample
//!               ├─> sample converter (unpack to planar, SIMD chroma split)
//!               ├─> source frame map  <─── script pulls frames by index
//!               └─> pre-schedule output frames (async script requests)
//!                     └─> delivery worker: time, pack, side-data, deliver
//!                           └─> downstream
//! ```
//!
//! Media-type negotiation probes a second, independent script instance with
//! every upstream candidate type to learn the output each would produce,
//! then lets the downstream pick from the full set; an initially
//! incompatible wiring is repaired through input-pin reconnection.
//!
//! All reference times are integers in 100 ns units
//! ([`constants::UNITS`] per second).

#![warn(clippy::all)]

/// Remote status/control message dispatch.
pub mod api;

/// Pipeline-wide constants.
pub mod constants;

/// Settings and logging bootstrap.
pub mod environment;

/// The filter shell and shared connection state.
pub mod filter;

/// Pixel format catalogue, media-type decoding and sample conversion.
pub mod format;

/// The frame pipeline: source queue, script pump and delivery worker.
pub mod frame_handler;

/// Media types, samples, the padded allocator and side data.
pub mod media;

/// Media type negotiation and output type synthesis.
pub mod negotiation;

/// The frame processor boundary and the script-side frame model.
pub mod processor;

/// Arithmetic helpers.
pub mod util;

pub use environment::{Environment, Settings};
pub use filter::{FilterError, FilterState, OutputPin, ScriptFilter};
pub use format::{get_video_format, PixelFormat, VideoFormat, PIXEL_FORMATS};
pub use frame_handler::{FrameHandler, SampleOutcome};
pub use media::{MediaSample, MediaType, SampleAllocator, SideDataStore};
pub use negotiation::{ConnectDecision, NegotiationEngine, NegotiationError};
pub use processor::{
    FrameProcessor, ProcessorError, ReloadStatus, ScriptState, ScriptVideoInfo,
    SourceFrameSupplier,
};
