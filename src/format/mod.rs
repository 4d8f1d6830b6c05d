//! Pixel format catalogue and media-type decoding
//!
//! The static [`PIXEL_FORMATS`] table is the single source of truth for
//! which graph subtypes the filter handles and how each maps onto the
//! script processor's pixel-type domain. It is indexed three ways: by media
//! subtype, by script pixel type (several subtypes share one script layout)
//! and by symbolic name (settings and the status API key on names).

pub mod convert;
pub mod simd;

use thiserror::Error;
use uuid::Uuid;

use crate::constants::{DEFAULT_AVG_TIME_PER_FRAME, UNITS};
use crate::media::media_type::{
    BitmapInfoHeader, DxvaExtendedFormat, MediaType, VideoInfo, AMCONTROL_COLORINFO_PRESENT,
    AMCONTROL_USED, DXVA_MATRIX_BT601, DXVA_MATRIX_BT709, DXVA_MATRIX_SMPTE240M,
    DXVA_NOMINAL_RANGE_NORMAL, DXVA_NOMINAL_RANGE_WIDE, DXVA_PRIMARIES_BT470_2_SYS_BG,
    DXVA_PRIMARIES_BT470_2_SYS_M, DXVA_PRIMARIES_BT709, DXVA_PRIMARIES_EBU3213,
    DXVA_PRIMARIES_SMPTE170M, DXVA_PRIMARIES_SMPTE240M, DXVA_PRIMARIES_SMPTE_C,
    DXVA_TRANSFER_10, DXVA_TRANSFER_22, DXVA_TRANSFER_22_240M, DXVA_TRANSFER_22_709,
    DXVA_TRANSFER_28, MEDIASUBTYPE_I420, MEDIASUBTYPE_IYUV, MEDIASUBTYPE_NV12,
    MEDIASUBTYPE_P010, MEDIASUBTYPE_P016, MEDIASUBTYPE_P210, MEDIASUBTYPE_P216,
    MEDIASUBTYPE_RGB24, MEDIASUBTYPE_RGB32, MEDIASUBTYPE_YUY2, MEDIASUBTYPE_YV12,
    MEDIASUBTYPE_YV24,
};
use crate::processor::frame as script;
use crate::processor::frame::ScriptFormat;
use crate::util::reduce_ratio;

/// One row of the format catalogue.
#[derive(Debug)]
pub struct PixelFormat {
    /// Symbolic name; also the settings and status-API key for the format.
    pub name: &'static str,
    pub media_subtype: Uuid,
    /// The planar layout the script processor sees for this subtype.
    pub script_format: &'static ScriptFormat,
    /// `biBitCount` of the packed representation.
    pub bit_count: u8,
    /// Ratio between main plane and subsampled plane widths; 0 for packed
    /// formats without separate chroma.
    pub subsample_width_ratio: usize,
    pub subsample_height_ratio: usize,
    /// Whether the packed buffer stores U and V as one interleaved plane.
    pub are_uv_planes_interleaved: bool,
}

/// Supported formats. Within each group sharing a script format, the most
/// preferred subtype comes first; negotiation offers them in table order.
pub static PIXEL_FORMATS: [PixelFormat; 12] = [
    // 4:2:0
    PixelFormat { name: "NV12", media_subtype: MEDIASUBTYPE_NV12, script_format: &script::YUV420P8, bit_count: 12, subsample_width_ratio: 2, subsample_height_ratio: 2, are_uv_planes_interleaved: true },
    PixelFormat { name: "YV12", media_subtype: MEDIASUBTYPE_YV12, script_format: &script::YUV420P8, bit_count: 12, subsample_width_ratio: 2, subsample_height_ratio: 2, are_uv_planes_interleaved: false },
    PixelFormat { name: "I420", media_subtype: MEDIASUBTYPE_I420, script_format: &script::YUV420P8, bit_count: 12, subsample_width_ratio: 2, subsample_height_ratio: 2, are_uv_planes_interleaved: false },
    PixelFormat { name: "IYUV", media_subtype: MEDIASUBTYPE_IYUV, script_format: &script::YUV420P8, bit_count: 12, subsample_width_ratio: 2, subsample_height_ratio: 2, are_uv_planes_interleaved: false },

    // P010 has the least significant 6 bits of every word zeroed; passing it
    // through as P016 loses no precision, so both share YUV420P16.
    PixelFormat { name: "P016", media_subtype: MEDIASUBTYPE_P016, script_format: &script::YUV420P16, bit_count: 24, subsample_width_ratio: 2, subsample_height_ratio: 2, are_uv_planes_interleaved: true },
    PixelFormat { name: "P010", media_subtype: MEDIASUBTYPE_P010, script_format: &script::YUV420P16, bit_count: 24, subsample_width_ratio: 2, subsample_height_ratio: 2, are_uv_planes_interleaved: true },

    // 4:2:2
    PixelFormat { name: "YUY2", media_subtype: MEDIASUBTYPE_YUY2, script_format: &script::COMPAT_YUY2, bit_count: 16, subsample_width_ratio: 0, subsample_height_ratio: 0, are_uv_planes_interleaved: false },
    PixelFormat { name: "P216", media_subtype: MEDIASUBTYPE_P216, script_format: &script::YUV422P16, bit_count: 32, subsample_width_ratio: 2, subsample_height_ratio: 1, are_uv_planes_interleaved: true },
    PixelFormat { name: "P210", media_subtype: MEDIASUBTYPE_P210, script_format: &script::YUV422P16, bit_count: 32, subsample_width_ratio: 2, subsample_height_ratio: 1, are_uv_planes_interleaved: true },

    // 4:4:4
    PixelFormat { name: "YV24", media_subtype: MEDIASUBTYPE_YV24, script_format: &script::YUV444P8, bit_count: 24, subsample_width_ratio: 1, subsample_height_ratio: 1, are_uv_planes_interleaved: false },

    // RGB
    PixelFormat { name: "RGB24", media_subtype: MEDIASUBTYPE_RGB24, script_format: &script::COMPAT_BGR24, bit_count: 24, subsample_width_ratio: 0, subsample_height_ratio: 0, are_uv_planes_interleaved: false },
    PixelFormat { name: "RGB32", media_subtype: MEDIASUBTYPE_RGB32, script_format: &script::COMPAT_BGR32, bit_count: 32, subsample_width_ratio: 0, subsample_height_ratio: 0, are_uv_planes_interleaved: false },
];

/// Look up a catalogue entry by its media subtype GUID.
pub fn lookup_media_subtype(subtype: &Uuid) -> Option<&'static PixelFormat> {
    PIXEL_FORMATS.iter().find(|format| format.media_subtype == *subtype)
}

/// All catalogue entries whose script layout matches `script_pixel_type`,
/// in preference order.
pub fn lookup_script_pixel_type(
    script_pixel_type: i32,
) -> impl Iterator<Item = &'static PixelFormat> {
    PIXEL_FORMATS
        .iter()
        .filter(move |format| format.script_format.id == script_pixel_type)
}

/// Look up a catalogue entry by its symbolic name.
pub fn lookup_name(name: &str) -> Option<&'static PixelFormat> {
    PIXEL_FORMATS.iter().find(|format| format.name == name)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("media subtype {0} is not in the pixel format table")]
    UnsupportedSubtype(Uuid),

    #[error("media type is not a video type")]
    NotVideo,
}

/// Colorimetry carried by the DXVA extended-format bits, translated into
/// the script processor's enumeration space. Defaults are "unspecified".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorSpaceInfo {
    /// 0 = full range, 1 = limited range; `None` when the upstream said
    /// nothing.
    pub color_range: Option<i32>,
    pub primaries: i32,
    pub matrix: i32,
    pub transfer: i32,
}

/// "Unspecified" in the script processor's colour enumerations.
pub const COLOR_UNSPECIFIED: i32 = 2;

impl Default for ColorSpaceInfo {
    fn default() -> Self {
        Self {
            color_range: None,
            primaries: COLOR_UNSPECIFIED,
            matrix: COLOR_UNSPECIFIED,
            transfer: COLOR_UNSPECIFIED,
        }
    }
}

impl ColorSpaceInfo {
    /// Merge the DXVA bits into this descriptor. Unknown values leave the
    /// current field untouched.
    pub fn update(&mut self, ext: DxvaExtendedFormat) {
        match ext.nominal_range {
            DXVA_NOMINAL_RANGE_NORMAL => self.color_range = Some(0),
            DXVA_NOMINAL_RANGE_WIDE => self.color_range = Some(1),
            _ => {}
        }

        match ext.primaries {
            DXVA_PRIMARIES_BT709 => self.primaries = 1,
            DXVA_PRIMARIES_BT470_2_SYS_M => self.primaries = 4,
            DXVA_PRIMARIES_BT470_2_SYS_BG => self.primaries = 5,
            DXVA_PRIMARIES_SMPTE170M | DXVA_PRIMARIES_SMPTE_C => self.primaries = 6,
            DXVA_PRIMARIES_SMPTE240M => self.primaries = 7,
            DXVA_PRIMARIES_EBU3213 => self.primaries = 22,
            _ => {}
        }

        match ext.transfer_matrix {
            DXVA_MATRIX_BT709 => self.matrix = 1,
            DXVA_MATRIX_BT601 => self.matrix = 5,
            DXVA_MATRIX_SMPTE240M => self.matrix = 7,
            _ => {}
        }

        match ext.transfer_function {
            DXVA_TRANSFER_10 => self.transfer = 8,
            DXVA_TRANSFER_22 => self.transfer = 4,
            DXVA_TRANSFER_22_709 => self.transfer = 1,
            DXVA_TRANSFER_22_240M => self.transfer = 7,
            DXVA_TRANSFER_28 => self.transfer = 5,
            _ => {}
        }
    }
}

/// Everything the pipeline derives from a negotiated media type.
#[derive(Debug, Clone)]
pub struct VideoFormat {
    pub pixel_format: &'static PixelFormat,
    /// Visible width in pixels.
    pub width: i32,
    /// Visible height in pixels, always positive.
    pub height: i32,
    /// Frames per second as `fps_num / fps_den`, reduced.
    pub fps_num: i64,
    pub fps_den: i64,
    /// Pixel (sample) aspect ratio, reduced.
    pub pixel_aspect_ratio_num: i64,
    pub pixel_aspect_ratio_den: i64,
    pub color_space: ColorSpaceInfo,
    /// 1 when HDR mastering metadata has been seen on this connection.
    pub hdr_type: i32,
    /// HDR luminance in cd/m², from MaxCLL when available.
    pub hdr_luminance: i32,
    /// Copy of the bitmap header of the negotiated type.
    pub bmi: BitmapInfoHeader,
}

impl VideoFormat {
    /// Average duration of one frame in 100 ns units.
    pub fn frame_duration(&self) -> i64 {
        crate::util::mul_div(UNITS, self.fps_den, self.fps_num)
    }

    /// The codec identifier reported through the status API: the leading
    /// dword of the subtype GUID, which is the FOURCC for mapped subtypes.
    pub fn codec_fourcc(&self) -> u32 {
        self.pixel_format.media_subtype.as_fields().0
    }
}

/// Derive a [`VideoFormat`] from a media type.
///
/// Decodes both video header variants, defaults a missing frame duration to
/// 25 fps, reduces the pixel aspect ratio to lowest terms and picks up
/// colorimetry when the control flags carry it.
pub fn get_video_format(media_type: &MediaType) -> Result<VideoFormat, FormatError> {
    if !media_type.is_video() {
        return Err(FormatError::NotVideo);
    }

    let pixel_format = lookup_media_subtype(&media_type.subtype)
        .ok_or(FormatError::UnsupportedSubtype(media_type.subtype))?;

    let avg_time_per_frame = media_type.avg_time_per_frame();
    let (fps_num, fps_den) = reduce_ratio(
        UNITS,
        if avg_time_per_frame > 0 { avg_time_per_frame } else { DEFAULT_AVG_TIME_PER_FRAME },
    );

    let bmi = *media_type.bitmap_info();
    let width = bmi.width;
    let height = bmi.height.abs();

    let mut format = VideoFormat {
        pixel_format,
        width,
        height,
        fps_num,
        fps_den,
        pixel_aspect_ratio_num: 1,
        pixel_aspect_ratio_den: 1,
        color_space: ColorSpaceInfo::default(),
        hdr_type: 0,
        hdr_luminance: 0,
        bmi,
    };

    if let VideoInfo::Header2(header) = &media_type.format {
        if header.pict_aspect_ratio_y > 0 {
            // pixel aspect = display aspect / storage aspect
            let (num, den) = reduce_ratio(
                header.pict_aspect_ratio_x as i64 * height as i64,
                header.pict_aspect_ratio_y as i64 * width as i64,
            );
            format.pixel_aspect_ratio_num = num;
            format.pixel_aspect_ratio_den = den;
        }

        if header.control_flags & AMCONTROL_USED != 0
            && header.control_flags & AMCONTROL_COLORINFO_PRESENT != 0
        {
            format
                .color_space
                .update(DxvaExtendedFormat::from_control_flags(header.control_flags));
        }
    }

    Ok(format)
}
