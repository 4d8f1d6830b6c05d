//! Sideband metadata attached to media samples
//!
//! HDR mastering metadata, content light levels, HDR10+ dynamic metadata and
//! stereoscopic plane offsets travel alongside the pixel data as opaque,
//! GUID-keyed byte blobs. The filter never synthesises these; it reads them
//! from inbound samples and replays them byte-identically on the outbound
//! sample produced from the same source frame.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;
use uuid::{uuid, Uuid};

/// Mastering display colour volume, as produced by the upstream splitter.
pub const SIDE_DATA_HDR: Uuid = uuid!("53820dbc-a7b8-49c4-b17b-e511591a790c");
/// Content light level (MaxCLL / MaxFALL).
pub const SIDE_DATA_HDR_CONTENT_LIGHT_LEVEL: Uuid = uuid!("ed6ae576-7cbe-41a6-9dc3-07c35dc13ef9");
/// SMPTE 2094-40 (HDR10+) dynamic metadata, passed through uninterpreted.
pub const SIDE_DATA_HDR10_PLUS: Uuid = uuid!("183ed511-8910-4262-88f6-4946bc799c84");
/// Stereoscopic 3D plane offsets, passed through uninterpreted.
pub const SIDE_DATA_3D_OFFSET: Uuid = uuid!("f169b76c-75a3-49e6-a23a-14983ebf4370");

/// The side-data kinds the store recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideDataKind {
    Hdr,
    HdrContentLightLevel,
    Hdr10Plus,
    Offset3d,
}

impl SideDataKind {
    pub const ALL: [SideDataKind; 4] = [
        SideDataKind::Hdr,
        SideDataKind::HdrContentLightLevel,
        SideDataKind::Hdr10Plus,
        SideDataKind::Offset3d,
    ];

    pub fn guid(self) -> Uuid {
        match self {
            SideDataKind::Hdr => SIDE_DATA_HDR,
            SideDataKind::HdrContentLightLevel => SIDE_DATA_HDR_CONTENT_LIGHT_LEVEL,
            SideDataKind::Hdr10Plus => SIDE_DATA_HDR10_PLUS,
            SideDataKind::Offset3d => SIDE_DATA_3D_OFFSET,
        }
    }

    pub fn from_guid(guid: &Uuid) -> Option<Self> {
        SideDataKind::ALL.into_iter().find(|kind| kind.guid() == *guid)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SideDataError {
    #[error("unrecognized side data GUID: {0}")]
    UnrecognizedGuid(Uuid),

    #[error("no side data stored for {0:?}")]
    Empty(SideDataKind),
}

/// Mastering display metadata blob layout. Primaries are in G-B-R order.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct HdrMetadata {
    pub display_primaries_x: [f64; 3],
    pub display_primaries_y: [f64; 3],
    pub white_point_x: f64,
    pub white_point_y: f64,
    pub max_display_mastering_luminance: f64,
    pub min_display_mastering_luminance: f64,
}

/// Content light level blob layout, values in cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct HdrContentLightLevel {
    pub max_cll: u32,
    pub max_fall: u32,
}

/// 3D plane offset blob layout. Only the first `offset_count` entries are
/// meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Offset3d {
    pub offset_count: i32,
    pub offset: [i32; 32],
}

/// One owned byte buffer per recognized kind; write is copy-on-store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideDataStore {
    hdr: Vec<u8>,
    hdr_content_light_level: Vec<u8>,
    hdr10_plus: Vec<u8>,
    offset_3d: Vec<u8>,
}

impl SideDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, kind: SideDataKind) -> &Vec<u8> {
        match kind {
            SideDataKind::Hdr => &self.hdr,
            SideDataKind::HdrContentLightLevel => &self.hdr_content_light_level,
            SideDataKind::Hdr10Plus => &self.hdr10_plus,
            SideDataKind::Offset3d => &self.offset_3d,
        }
    }

    fn buffer_mut(&mut self, kind: SideDataKind) -> &mut Vec<u8> {
        match kind {
            SideDataKind::Hdr => &mut self.hdr,
            SideDataKind::HdrContentLightLevel => &mut self.hdr_content_light_level,
            SideDataKind::Hdr10Plus => &mut self.hdr10_plus,
            SideDataKind::Offset3d => &mut self.offset_3d,
        }
    }

    /// Copy `data` into the slot for `guid`. At most one buffer per kind;
    /// storing again replaces the previous bytes.
    pub fn store(&mut self, guid: &Uuid, data: &[u8]) -> Result<(), SideDataError> {
        let kind = SideDataKind::from_guid(guid).ok_or(SideDataError::UnrecognizedGuid(*guid))?;
        let buffer = self.buffer_mut(kind);
        buffer.clear();
        buffer.extend_from_slice(data);
        Ok(())
    }

    /// Borrow the stored bytes for `guid`; valid until the store is dropped
    /// or overwritten.
    pub fn retrieve(&self, guid: &Uuid) -> Result<&[u8], SideDataError> {
        let kind = SideDataKind::from_guid(guid).ok_or(SideDataError::UnrecognizedGuid(*guid))?;
        let buffer = self.buffer(kind);
        if buffer.is_empty() {
            return Err(SideDataError::Empty(kind));
        }
        Ok(buffer)
    }

    /// Copy every recognized kind present in `other` into this store.
    pub fn read_from(&mut self, other: &SideDataStore) {
        for kind in SideDataKind::ALL {
            let src = other.buffer(kind);
            if !src.is_empty() {
                let dst = self.buffer_mut(kind);
                dst.clear();
                dst.extend_from_slice(src);
            }
        }
    }

    /// Copy every non-empty kind of this store into `other`.
    pub fn write_to(&self, other: &mut SideDataStore) {
        other.read_from(self);
    }

    /// The mastering display blob, when present and well-formed. Read
    /// unaligned: the store holds raw bytes with no layout guarantee.
    pub fn hdr(&self) -> Option<HdrMetadata> {
        (self.hdr.len() == std::mem::size_of::<HdrMetadata>())
            .then(|| bytemuck::pod_read_unaligned(&self.hdr))
    }

    /// The content light level blob, when present and well-formed.
    pub fn hdr_content_light_level(&self) -> Option<HdrContentLightLevel> {
        (self.hdr_content_light_level.len() == std::mem::size_of::<HdrContentLightLevel>())
            .then(|| bytemuck::pod_read_unaligned(&self.hdr_content_light_level))
    }

    /// The 3D offset blob, when present and well-formed.
    pub fn offset_3d(&self) -> Option<Offset3d> {
        (self.offset_3d.len() == std::mem::size_of::<Offset3d>())
            .then(|| bytemuck::pod_read_unaligned(&self.offset_3d))
    }

    pub fn is_empty(&self) -> bool {
        SideDataKind::ALL.into_iter().all(|kind| self.buffer(kind).is_empty())
    }
}
