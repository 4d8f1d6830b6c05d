//! Pipeline-wide constants
//!
//! Reference times throughout the crate are integers in 100 ns units,
//! matching the decoder/renderer graph the filter is embedded in.

/// Reference-time units per second (1 unit = 100 ns).
pub const UNITS: i64 = 10_000_000;

/// Frame rates reported through the status API are scaled by this factor
/// (e.g. 23.976 fps is reported as 23976).
pub const FRAME_RATE_SCALE_FACTOR: i64 = 1000;

/// Pixel aspect ratios reported through the status API are scaled by this
/// factor (e.g. 1:1 is reported as 1000).
pub const PAR_SCALE_FACTOR: i64 = 1000;

/// Some decoders never fill in the average frame duration of the stream.
/// Default to 25 fps in that case.
pub const DEFAULT_AVG_TIME_PER_FRAME: i64 = 400_000;

/// If an output frame's stop time lands within this many units below the
/// next source frame's start time, the stop time is rounded up to that
/// start time. 10 units = 1 µs of tolerated drift per frame; accumulated
/// rounding error from rational frame durations stays well below it.
pub const MAX_OUTPUT_FRAME_DURATION_PADDING: i64 = 10;

/// Minimum number of source frames kept in the queue so that an output
/// frame's stop time can be derived from the following source frame.
pub const NUM_SRC_FRAMES_PER_PROCESSING: usize = 2;

/// A stream can last indefinitely, but the script processor wants a frame
/// count up front. 10810800 is highly composite and lasts 50 hours at
/// 60 fps without risking overflow in script-side arithmetic.
pub const NUM_FRAMES_FOR_INFINITE_STREAM: i32 = 10_810_800;

/// Planar frame rows are padded out to this many bytes so that the widest
/// vector load/store in the converter stays inside the allocation.
pub const INPUT_MEDIA_SAMPLE_STRIDE_ALIGNMENT: usize = 32;
