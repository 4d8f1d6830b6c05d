//! Script-side frame model
//!
//! The frame processor works on planar frames in its own pixel-type domain.
//! Several media subtypes collapse onto one script format (NV12, YV12, I420
//! and IYUV are all `YUV420P8` once unpacked), while the packed formats pass
//! through as single-plane "compat" layouts.

use crate::constants::INPUT_MEDIA_SAMPLE_STRIDE_ALIGNMENT;
use crate::util::align_up;

/// Script pixel-type ids. Planar YUV formats are unpacked into separate
/// planes; `COMPAT_*` ids keep the original packed byte layout.
pub mod pixel_type {
    pub const YUV420P8: i32 = 1001;
    pub const YUV420P16: i32 = 1002;
    pub const YUV422P16: i32 = 1003;
    pub const YUV444P8: i32 = 1004;
    pub const COMPAT_YUY2: i32 = 9001;
    pub const COMPAT_BGR24: i32 = 9002;
    pub const COMPAT_BGR32: i32 = 9003;
}

/// Descriptor of a script pixel type: plane count, component size and
/// chroma subsampling divisors.
#[derive(Debug, PartialEq, Eq)]
pub struct ScriptFormat {
    pub id: i32,
    pub name: &'static str,
    /// Size of one component sample in bytes (1 for 8-bit, 2 for 16-bit);
    /// for compat formats, the size of one packed pixel.
    pub bytes_per_sample: usize,
    pub num_planes: usize,
    /// Horizontal chroma divisor (1 = full resolution).
    pub sub_sampling_w: usize,
    /// Vertical chroma divisor.
    pub sub_sampling_h: usize,
}

pub static YUV420P8: ScriptFormat = ScriptFormat { id: pixel_type::YUV420P8, name: "YUV420P8", bytes_per_sample: 1, num_planes: 3, sub_sampling_w: 2, sub_sampling_h: 2 };
pub static YUV420P16: ScriptFormat = ScriptFormat { id: pixel_type::YUV420P16, name: "YUV420P16", bytes_per_sample: 2, num_planes: 3, sub_sampling_w: 2, sub_sampling_h: 2 };
pub static YUV422P16: ScriptFormat = ScriptFormat { id: pixel_type::YUV422P16, name: "YUV422P16", bytes_per_sample: 2, num_planes: 3, sub_sampling_w: 2, sub_sampling_h: 1 };
pub static YUV444P8: ScriptFormat = ScriptFormat { id: pixel_type::YUV444P8, name: "YUV444P8", bytes_per_sample: 1, num_planes: 3, sub_sampling_w: 1, sub_sampling_h: 1 };
pub static COMPAT_YUY2: ScriptFormat = ScriptFormat { id: pixel_type::COMPAT_YUY2, name: "CompatYUY2", bytes_per_sample: 2, num_planes: 1, sub_sampling_w: 1, sub_sampling_h: 1 };
pub static COMPAT_BGR24: ScriptFormat = ScriptFormat { id: pixel_type::COMPAT_BGR24, name: "CompatBGR24", bytes_per_sample: 3, num_planes: 1, sub_sampling_w: 1, sub_sampling_h: 1 };
pub static COMPAT_BGR32: ScriptFormat = ScriptFormat { id: pixel_type::COMPAT_BGR32, name: "CompatBGR32", bytes_per_sample: 4, num_planes: 1, sub_sampling_w: 1, sub_sampling_h: 1 };

static SCRIPT_FORMATS: [&ScriptFormat; 7] = [
    &YUV420P8,
    &YUV420P16,
    &YUV422P16,
    &YUV444P8,
    &COMPAT_YUY2,
    &COMPAT_BGR24,
    &COMPAT_BGR32,
];

impl ScriptFormat {
    /// Look up a format descriptor by its pixel-type id.
    pub fn from_id(id: i32) -> Option<&'static ScriptFormat> {
        SCRIPT_FORMATS.iter().find(|format| format.id == id).copied()
    }

    /// Packed formats keep the graph's byte layout and carry no separate
    /// chroma planes.
    pub fn is_packed(&self) -> bool {
        self.num_planes == 1
    }
}

/// Properties attached to frames as they travel through the script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameProps {
    /// 0 = progressive.
    pub field_based: i64,
    /// Absolute presentation time in seconds.
    pub abs_time: Option<f64>,
    /// Sample (pixel) aspect ratio.
    pub sar_num: i64,
    pub sar_den: i64,
    /// Per-frame duration override as a rational in seconds; scripts that
    /// retime frames set this.
    pub duration_num: Option<i64>,
    pub duration_den: Option<i64>,
}

#[derive(Debug, Clone)]
struct Plane {
    data: Vec<u8>,
    stride: usize,
}

/// A planar video frame owned by the processor domain.
///
/// Plane strides are rounded up to [`INPUT_MEDIA_SAMPLE_STRIDE_ALIGNMENT`]
/// so vector loads and stores through a whole row stay inside the plane
/// allocation.
#[derive(Debug, Clone)]
pub struct PlanarFrame {
    format: &'static ScriptFormat,
    width: i32,
    height: i32,
    planes: Vec<Plane>,
    props: FrameProps,
}

impl PlanarFrame {
    /// Allocate a zero-initialised frame.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is not positive or not divisible by
    /// the format's subsampling divisors.
    pub fn alloc(format: &'static ScriptFormat, width: i32, height: i32) -> Self {
        assert!(width > 0 && height > 0);
        assert!(width as usize % format.sub_sampling_w == 0);
        assert!(height as usize % format.sub_sampling_h == 0);

        let planes = (0..format.num_planes)
            .map(|plane| {
                let row_bytes = Self::row_bytes_for(format, width, plane);
                let stride = align_up(row_bytes, INPUT_MEDIA_SAMPLE_STRIDE_ALIGNMENT);
                let height = Self::plane_height_for(format, height, plane);
                Plane { data: vec![0u8; stride * height], stride }
            })
            .collect();

        Self { format, width, height, planes, props: FrameProps::default() }
    }

    fn row_bytes_for(format: &ScriptFormat, width: i32, plane: usize) -> usize {
        if plane == 0 {
            width as usize * format.bytes_per_sample
        } else {
            width as usize / format.sub_sampling_w * format.bytes_per_sample
        }
    }

    fn plane_height_for(format: &ScriptFormat, height: i32, plane: usize) -> usize {
        if plane == 0 {
            height as usize
        } else {
            height as usize / format.sub_sampling_h
        }
    }

    pub fn format(&self) -> &'static ScriptFormat {
        self.format
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn stride(&self, plane: usize) -> usize {
        self.planes[plane].stride
    }

    /// Meaningful bytes per row of `plane`, excluding stride padding.
    pub fn row_bytes(&self, plane: usize) -> usize {
        Self::row_bytes_for(self.format, self.width, plane)
    }

    pub fn plane_height(&self, plane: usize) -> usize {
        Self::plane_height_for(self.format, self.height, plane)
    }

    pub fn plane(&self, plane: usize) -> &[u8] {
        &self.planes[plane].data
    }

    pub fn plane_mut(&mut self, plane: usize) -> &mut [u8] {
        &mut self.planes[plane].data
    }

    /// Mutable access to the U and V planes at once, for (de-)interleaving.
    ///
    /// # Panics
    ///
    /// Panics on packed single-plane formats.
    pub fn uv_planes_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        assert!(self.planes.len() >= 3);
        let (u, v) = self.planes.split_at_mut(2);
        (&mut u[1].data, &mut v[0].data)
    }

    pub fn props(&self) -> &FrameProps {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut FrameProps {
        &mut self.props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_lookup_total_on_known_ids() {
        for id in [
            pixel_type::YUV420P8,
            pixel_type::YUV420P16,
            pixel_type::YUV422P16,
            pixel_type::YUV444P8,
            pixel_type::COMPAT_YUY2,
            pixel_type::COMPAT_BGR24,
            pixel_type::COMPAT_BGR32,
        ] {
            assert!(ScriptFormat::from_id(id).is_some());
        }
        assert!(ScriptFormat::from_id(12345).is_none());
    }

    #[test]
    fn test_yuv420_plane_geometry() {
        let format = ScriptFormat::from_id(pixel_type::YUV420P8).unwrap();
        let frame = PlanarFrame::alloc(format, 1920, 1080);
        assert_eq!(frame.num_planes(), 3);
        assert_eq!(frame.row_bytes(0), 1920);
        assert_eq!(frame.row_bytes(1), 960);
        assert_eq!(frame.plane_height(0), 1080);
        assert_eq!(frame.plane_height(2), 540);
    }

    #[test]
    fn test_stride_alignment() {
        let format = ScriptFormat::from_id(pixel_type::YUV420P8).unwrap();
        // chroma rows of 959 bytes round up to the vector alignment
        let frame = PlanarFrame::alloc(format, 1918, 1080);
        assert_eq!(frame.row_bytes(1), 959);
        assert_eq!(frame.stride(1) % INPUT_MEDIA_SAMPLE_STRIDE_ALIGNMENT, 0);
        assert!(frame.stride(1) >= 960);
    }

    #[test]
    fn test_packed_formats_single_plane() {
        let format = ScriptFormat::from_id(pixel_type::COMPAT_BGR32).unwrap();
        let frame = PlanarFrame::alloc(format, 640, 480);
        assert_eq!(frame.num_planes(), 1);
        assert_eq!(frame.row_bytes(0), 640 * 4);
    }

    #[test]
    fn test_16_bit_chroma_rows() {
        let format = ScriptFormat::from_id(pixel_type::YUV422P16).unwrap();
        let frame = PlanarFrame::alloc(format, 1280, 720);
        assert_eq!(frame.row_bytes(0), 2560);
        assert_eq!(frame.row_bytes(1), 1280);
        assert_eq!(frame.plane_height(1), 720);
    }
}
