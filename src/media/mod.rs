//! Media-side primitives: negotiable media types, samples, the padded
//! sample allocator and the sideband metadata store.

pub mod allocator;
pub mod media_type;
pub mod sample;
pub mod side_data;

pub use allocator::{AllocatorError, AllocatorProperties, SampleAllocator};
pub use media_type::{
    BitmapInfoHeader, Compression, FourCc, MediaType, RectL, VideoInfo, VideoInfoHeader,
    VideoInfoHeader2,
};
pub use sample::MediaSample;
pub use side_data::{SideDataError, SideDataKind, SideDataStore};
