//! Bit-exact sample conversion
//!
//! Packs and unpacks bytes between the graph's media-sample buffers and the
//! script processor's planar frames. For every supported format,
//! `copy_to_output` after `copy_from_input` reproduces the visible
//! rectangle byte-exactly as long as format, dimensions and orientation are
//! unchanged; only the padding bytes are unspecified.

use super::simd;
use super::VideoFormat;
use crate::media::media_type::{Compression, MEDIASUBTYPE_YV12, MEDIASUBTYPE_YV24};
use crate::processor::frame::PlanarFrame;

/// Unpack a media-sample buffer into a freshly allocated planar frame.
///
/// `src_buffer` must cover the bitmap described by `video_format` and, for
/// the interleaved-chroma formats, carry [`simd::input_buffer_padding`]
/// trailing bytes.
pub fn create_frame(video_format: &VideoFormat, src_buffer: &[u8]) -> PlanarFrame {
    let mut frame = PlanarFrame::alloc(
        video_format.pixel_format.script_format,
        video_format.width,
        video_format.height,
    );
    copy_from_input(video_format, src_buffer, &mut frame);
    frame
}

/// Unpack `src_buffer` into `frame`, deinterleaving chroma and correcting
/// DIB orientation where needed.
///
/// # Panics
///
/// Panics when the buffer or frame geometry does not match `video_format`.
pub fn copy_from_input(video_format: &VideoFormat, src_buffer: &[u8], frame: &mut PlanarFrame) {
    let pixel_format = video_format.pixel_format;
    let script_format = pixel_format.script_format;
    debug_assert!(std::ptr::eq(frame.format(), script_format));

    let row_size = frame.row_bytes(0);
    let height = frame.plane_height(0);
    assert_eq!(height as i32, video_format.bmi.height.abs());

    // biWidth is the surface stride in pixels and may exceed the visible
    // width.
    let src_main_stride = video_format.bmi.width as usize * script_format.bytes_per_sample;
    assert!(row_size <= src_main_stride);
    let src_main_size = src_main_stride * height;

    // Positive-height RGB DIBs are bottom-up; the processor always works
    // top-down, so a negative height means rows copy straight through and a
    // positive one means the main plane is read flipped.
    let flip = video_format.bmi.compression == Compression::Rgb && video_format.bmi.height < 0;

    let main_stride = frame.stride(0);
    copy_plane(
        src_buffer,
        src_main_stride,
        frame.plane_mut(0),
        main_stride,
        row_size,
        height,
        flip,
        false,
    );

    if script_format.is_packed() {
        return;
    }

    let uv_height = height / pixel_format.subsample_height_ratio;
    let dst_stride = frame.stride(1);

    if pixel_format.are_uv_planes_interleaved {
        let src_uv_stride = src_main_stride * 2 / pixel_format.subsample_width_ratio;
        let src_uv_row_size = row_size * 2 / pixel_format.subsample_width_ratio;
        let (dst_u, dst_v) = frame.uv_planes_mut();
        simd::deinterleave_uv(
            &src_buffer[src_main_size..],
            src_uv_stride,
            dst_u,
            dst_v,
            dst_stride,
            src_uv_row_size,
            uv_height,
            script_format.bytes_per_sample,
        );
    } else {
        let src_uv_stride = src_main_stride / pixel_format.subsample_width_ratio;
        let src_uv_row_size = row_size / pixel_format.subsample_width_ratio;
        let plane_1_offset = src_main_size;
        let plane_2_offset = plane_1_offset
            + src_main_size
                / (pixel_format.subsample_width_ratio * pixel_format.subsample_height_ratio);

        // YVxx stores the V plane first
        let (src_u_offset, src_v_offset) = if pixel_format.media_subtype == MEDIASUBTYPE_YV12
            || pixel_format.media_subtype == MEDIASUBTYPE_YV24
        {
            (plane_2_offset, plane_1_offset)
        } else {
            (plane_1_offset, plane_2_offset)
        };

        let (dst_u, dst_v) = frame.uv_planes_mut();
        copy_plane(&src_buffer[src_u_offset..], src_uv_stride, dst_u, dst_stride, src_uv_row_size, uv_height, false, false);
        copy_plane(&src_buffer[src_v_offset..], src_uv_stride, dst_v, dst_stride, src_uv_row_size, uv_height, false, false);
    }
}

/// Pack `frame` into `dst_buffer`, interleaving chroma and restoring DIB
/// orientation. Mirror of [`copy_from_input`].
///
/// `dst_buffer` must cover the bitmap described by `video_format` and, for
/// the interleaved-chroma formats, carry [`simd::output_buffer_padding`]
/// trailing bytes.
///
/// # Panics
///
/// Panics when the buffer or frame geometry does not match `video_format`.
pub fn copy_to_output(video_format: &VideoFormat, frame: &PlanarFrame, dst_buffer: &mut [u8]) {
    let pixel_format = video_format.pixel_format;
    let script_format = pixel_format.script_format;
    debug_assert!(std::ptr::eq(frame.format(), script_format));

    let row_size = frame.row_bytes(0);
    let height = frame.plane_height(0);
    assert!(height as i32 >= video_format.bmi.height.abs());

    let dst_main_stride = video_format.bmi.width as usize * script_format.bytes_per_sample;
    assert!(row_size <= dst_main_stride);
    let dst_main_size = dst_main_stride * height;

    let flip = video_format.bmi.compression == Compression::Rgb && video_format.bmi.height < 0;

    copy_plane(
        frame.plane(0),
        frame.stride(0),
        dst_buffer,
        dst_main_stride,
        row_size,
        height,
        false,
        flip,
    );

    if script_format.is_packed() {
        return;
    }

    let uv_height = height / pixel_format.subsample_height_ratio;
    let src_stride = frame.stride(1);

    if pixel_format.are_uv_planes_interleaved {
        let dst_uv_stride = dst_main_stride * 2 / pixel_format.subsample_width_ratio;
        let dst_uv_row_size = row_size * 2 / pixel_format.subsample_width_ratio;
        simd::interleave_uv(
            frame.plane(1),
            frame.plane(2),
            src_stride,
            &mut dst_buffer[dst_main_size..],
            dst_uv_stride,
            dst_uv_row_size,
            uv_height,
            script_format.bytes_per_sample,
        );
    } else {
        let dst_uv_stride = dst_main_stride / pixel_format.subsample_width_ratio;
        let dst_uv_row_size = row_size / pixel_format.subsample_width_ratio;
        let plane_1_offset = dst_main_size;
        let plane_2_offset = plane_1_offset
            + dst_main_size
                / (pixel_format.subsample_width_ratio * pixel_format.subsample_height_ratio);

        let (dst_u_offset, dst_v_offset) = if pixel_format.media_subtype == MEDIASUBTYPE_YV12
            || pixel_format.media_subtype == MEDIASUBTYPE_YV24
        {
            (plane_2_offset, plane_1_offset)
        } else {
            (plane_1_offset, plane_2_offset)
        };

        // U first so the earlier offset is always split off first
        if dst_u_offset < dst_v_offset {
            let (head, tail) = dst_buffer.split_at_mut(dst_v_offset);
            copy_plane(frame.plane(1), src_stride, &mut head[dst_u_offset..], dst_uv_stride, dst_uv_row_size, uv_height, false, false);
            copy_plane(frame.plane(2), src_stride, tail, dst_uv_stride, dst_uv_row_size, uv_height, false, false);
        } else {
            let (head, tail) = dst_buffer.split_at_mut(dst_u_offset);
            copy_plane(frame.plane(2), src_stride, &mut head[dst_v_offset..], dst_uv_stride, dst_uv_row_size, uv_height, false, false);
            copy_plane(frame.plane(1), src_stride, tail, dst_uv_stride, dst_uv_row_size, uv_height, false, false);
        }
    }
}

/// Row-by-row plane copy. `flip_src`/`flip_dst` walk the respective side
/// bottom-up, implementing the DIB orientation correction.
#[allow(clippy::too_many_arguments)]
fn copy_plane(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    flip_src: bool,
    flip_dst: bool,
) {
    for row in 0..height {
        let src_row = if flip_src { height - 1 - row } else { row };
        let dst_row = if flip_dst { height - 1 - row } else { row };
        let src_offset = src_row * src_stride;
        let dst_offset = dst_row * dst_stride;
        dst[dst_offset..dst_offset + row_size]
            .copy_from_slice(&src[src_offset..src_offset + row_size]);
    }
}
