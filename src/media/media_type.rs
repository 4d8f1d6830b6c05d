//! Media type descriptors
//!
//! Models the graph-side description of a video connection: a subtype GUID
//! plus a `VIDEOINFOHEADER` / `VIDEOINFOHEADER2` format block carrying the
//! bitmap geometry, frame duration, picture aspect ratio and colour flags.
//! These descriptors are what negotiation trades with the upstream and
//! downstream peers; everything pixel-related derives from them.

use uuid::Uuid;

/// Four-character codec/format code, stored little-endian like the graph does.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub u32);

impl FourCc {
    /// Build from the literal four characters, e.g. `FourCc::new(b"NV12")`.
    pub const fn new(chars: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*chars))
    }

    /// The GUID a FOURCC-mapped subtype expands to:
    /// `{fourcc}-0000-0010-8000-00AA00389B71`.
    pub const fn to_subtype(self) -> Uuid {
        Uuid::from_fields(
            self.0,
            0x0000,
            0x0010,
            &[0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71],
        )
    }

    /// Reverse of [`FourCc::to_subtype`]; `None` for GUIDs outside the
    /// FOURCC namespace (such as the RGB subtypes).
    pub fn from_subtype(subtype: &Uuid) -> Option<Self> {
        let (d1, d2, d3, d4) = subtype.as_fields();
        if d2 == 0x0000 && d3 == 0x0010 && d4 == &[0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71] {
            Some(Self(d1))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0.to_le_bytes();
        if b.iter().all(|c| c.is_ascii_graphic()) {
            write!(f, "FourCc({}{}{}{})", b[0] as char, b[1] as char, b[2] as char, b[3] as char)
        } else {
            write!(f, "FourCc({:#010x})", self.0)
        }
    }
}

/// Major type for video streams.
pub const MEDIATYPE_VIDEO: Uuid = FourCc::new(b"vids").to_subtype();

pub const MEDIASUBTYPE_NV12: Uuid = FourCc::new(b"NV12").to_subtype();
pub const MEDIASUBTYPE_YV12: Uuid = FourCc::new(b"YV12").to_subtype();
pub const MEDIASUBTYPE_I420: Uuid = FourCc::new(b"I420").to_subtype();
pub const MEDIASUBTYPE_IYUV: Uuid = FourCc::new(b"IYUV").to_subtype();
pub const MEDIASUBTYPE_P010: Uuid = FourCc::new(b"P010").to_subtype();
pub const MEDIASUBTYPE_P016: Uuid = FourCc::new(b"P016").to_subtype();
pub const MEDIASUBTYPE_YUY2: Uuid = FourCc::new(b"YUY2").to_subtype();
pub const MEDIASUBTYPE_P210: Uuid = FourCc::new(b"P210").to_subtype();
pub const MEDIASUBTYPE_P216: Uuid = FourCc::new(b"P216").to_subtype();
pub const MEDIASUBTYPE_YV24: Uuid = FourCc::new(b"YV24").to_subtype();

// The uncompressed RGB subtypes predate the FOURCC namespace and have
// dedicated GUIDs.
pub const MEDIASUBTYPE_RGB24: Uuid = Uuid::from_fields(
    0xe436eb7d,
    0x524f,
    0x11ce,
    &[0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70],
);
pub const MEDIASUBTYPE_RGB32: Uuid = Uuid::from_fields(
    0xe436eb7e,
    0x524f,
    0x11ce,
    &[0x9f, 0x53, 0x00, 0x20, 0xaf, 0x0b, 0xa7, 0x70],
);

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RectL {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl RectL {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }
}

/// `biCompression` values the filter deals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed RGB DIB. Positive `height` is bottom-up, negative is
    /// top-down.
    Rgb,
    /// Packed/planar YUV identified by its FOURCC.
    FourCc(FourCc),
}

/// Bitmap geometry block shared by both video info header variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    /// Surface stride in pixels. May exceed the visible width.
    pub width: i32,
    /// Visible height; sign carries DIB orientation for RGB.
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: Compression,
    pub size_image: u32,
}

impl BitmapInfoHeader {
    /// Total bytes of the described bitmap: rows padded to 32-bit
    /// boundaries times the absolute height, the DIB convention.
    pub fn bitmap_size(&self) -> u32 {
        let row_bytes = ((self.width as i64 * self.bit_count as i64 + 31) / 32 * 4) as u32;
        row_bytes * self.height.unsigned_abs()
    }
}

/// `VIDEOINFOHEADER`: geometry plus average frame duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfoHeader {
    pub source: RectL,
    pub target: RectL,
    pub bit_rate: u32,
    /// Average duration of one frame in 100 ns units; 0 when the upstream
    /// did not fill it in.
    pub avg_time_per_frame: i64,
    pub bmi: BitmapInfoHeader,
}

/// `VIDEOINFOHEADER2`: adds picture aspect ratio and the DXVA colour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfoHeader2 {
    pub source: RectL,
    pub target: RectL,
    pub bit_rate: u32,
    pub avg_time_per_frame: i64,
    /// X of the display (picture) aspect ratio, e.g. 16.
    pub pict_aspect_ratio_x: u32,
    /// Y of the display (picture) aspect ratio, e.g. 9.
    pub pict_aspect_ratio_y: u32,
    /// `AMCONTROL_*` bits; doubles as a `DXVA_ExtendedFormat` when
    /// [`AMCONTROL_COLORINFO_PRESENT`] is set.
    pub control_flags: u32,
    pub bmi: BitmapInfoHeader,
}

pub const AMCONTROL_USED: u32 = 0x0000_0001;
pub const AMCONTROL_COLORINFO_PRESENT: u32 = 0x0000_0080;

/// The format block of a media type, one of the two video header layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoInfo {
    Header(VideoInfoHeader),
    Header2(VideoInfoHeader2),
}

/// A negotiable media type: subtype GUID plus format block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub major_type: Uuid,
    pub subtype: Uuid,
    pub sample_size: u32,
    pub format: VideoInfo,
}

impl MediaType {
    /// Construct a `VIDEOINFOHEADER`-shaped video type with sane defaults.
    pub fn video(subtype: Uuid, header: VideoInfoHeader) -> Self {
        let sample_size = header.bmi.size_image;
        Self {
            major_type: MEDIATYPE_VIDEO,
            subtype,
            sample_size,
            format: VideoInfo::Header(header),
        }
    }

    /// Construct a `VIDEOINFOHEADER2`-shaped video type.
    pub fn video2(subtype: Uuid, header: VideoInfoHeader2) -> Self {
        let sample_size = header.bmi.size_image;
        Self {
            major_type: MEDIATYPE_VIDEO,
            subtype,
            sample_size,
            format: VideoInfo::Header2(header),
        }
    }

    pub fn is_video(&self) -> bool {
        self.major_type == MEDIATYPE_VIDEO
    }

    pub fn bitmap_info(&self) -> &BitmapInfoHeader {
        match &self.format {
            VideoInfo::Header(h) => &h.bmi,
            VideoInfo::Header2(h) => &h.bmi,
        }
    }

    pub fn bitmap_info_mut(&mut self) -> &mut BitmapInfoHeader {
        match &mut self.format {
            VideoInfo::Header(h) => &mut h.bmi,
            VideoInfo::Header2(h) => &mut h.bmi,
        }
    }

    pub fn avg_time_per_frame(&self) -> i64 {
        match &self.format {
            VideoInfo::Header(h) => h.avg_time_per_frame,
            VideoInfo::Header2(h) => h.avg_time_per_frame,
        }
    }

    pub fn set_avg_time_per_frame(&mut self, value: i64) {
        match &mut self.format {
            VideoInfo::Header(h) => h.avg_time_per_frame = value,
            VideoInfo::Header2(h) => h.avg_time_per_frame = value,
        }
    }

    pub fn set_source_target(&mut self, rect: RectL) {
        match &mut self.format {
            VideoInfo::Header(h) => {
                h.source = rect;
                h.target = rect;
            }
            VideoInfo::Header2(h) => {
                h.source = rect;
                h.target = rect;
            }
        }
    }
}

/// Decoded `DXVA_ExtendedFormat` bit fields, overlaid on
/// [`VideoInfoHeader2::control_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxvaExtendedFormat {
    pub nominal_range: u32,
    pub transfer_matrix: u32,
    pub lighting: u32,
    pub primaries: u32,
    pub transfer_function: u32,
}

pub const DXVA_NOMINAL_RANGE_NORMAL: u32 = 1;
pub const DXVA_NOMINAL_RANGE_WIDE: u32 = 2;

pub const DXVA_PRIMARIES_BT709: u32 = 2;
pub const DXVA_PRIMARIES_BT470_2_SYS_M: u32 = 3;
pub const DXVA_PRIMARIES_BT470_2_SYS_BG: u32 = 4;
pub const DXVA_PRIMARIES_SMPTE170M: u32 = 5;
pub const DXVA_PRIMARIES_SMPTE240M: u32 = 6;
pub const DXVA_PRIMARIES_EBU3213: u32 = 7;
pub const DXVA_PRIMARIES_SMPTE_C: u32 = 8;

pub const DXVA_MATRIX_BT709: u32 = 1;
pub const DXVA_MATRIX_BT601: u32 = 2;
pub const DXVA_MATRIX_SMPTE240M: u32 = 3;

pub const DXVA_TRANSFER_10: u32 = 1;
pub const DXVA_TRANSFER_22: u32 = 4;
pub const DXVA_TRANSFER_22_709: u32 = 5;
pub const DXVA_TRANSFER_22_240M: u32 = 6;
pub const DXVA_TRANSFER_28: u32 = 8;

impl DxvaExtendedFormat {
    /// Split the packed dword into its bit fields.
    pub fn from_control_flags(flags: u32) -> Self {
        Self {
            nominal_range: (flags >> 12) & 0x7,
            transfer_matrix: (flags >> 15) & 0x7,
            lighting: (flags >> 18) & 0xf,
            primaries: (flags >> 22) & 0x1f,
            transfer_function: (flags >> 27) & 0x1f,
        }
    }
}
