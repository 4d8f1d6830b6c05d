//! Vectorized UV plane (de-)interleaving
//!
//! NV12-family formats store chroma as interleaved U/V pairs while the
//! script processor wants separate planes, so every frame crossing the
//! boundary pays one deinterleave or interleave pass. Three paths are
//! selected at runtime by CPU feature: AVX2 (256-bit shuffle + cross-lane
//! permute), SSSE3 (128-bit shuffle) and a scalar fallback.
//!
//! The vector paths deliberately run whole vectors over the tail of each
//! row instead of finishing with a byte loop. This requires the media
//! sample buffers to carry trailing padding ([`input_buffer_padding`] /
//! [`output_buffer_padding`]) and planar strides to be rounded up to
//! [`crate::constants::INPUT_MEDIA_SAMPLE_STRIDE_ALIGNMENT`]; the junk
//! bytes written into the padding are never read back.

use std::sync::OnceLock;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{
    __m128i, __m256i, _mm256_castsi256_si128, _mm256_extracti128_si256, _mm256_loadu_si256,
    _mm256_permute4x64_epi64, _mm256_setr_epi8, _mm256_shuffle_epi8, _mm256_storeu_si256,
    _mm256_unpackhi_epi16, _mm256_unpackhi_epi8, _mm256_unpacklo_epi16, _mm256_unpacklo_epi8,
    _mm_loadu_si128, _mm_setr_epi8, _mm_shuffle_epi8, _mm_srli_si128, _mm_storel_epi64,
    _mm_storeu_si128, _mm_unpackhi_epi16, _mm_unpackhi_epi8, _mm_unpacklo_epi16,
    _mm_unpacklo_epi8,
};

/// Gathers every 64-bit pair from the two 128-bit lanes: 0, 2, 1, 3.
#[cfg(target_arch = "x86_64")]
const PERMUTE_INDEX_UV: i32 = 0b11011000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectorKind {
    Avx2,
    Ssse3,
    Scalar,
}

fn vector_kind() -> VectorKind {
    static KIND: OnceLock<VectorKind> = OnceLock::new();
    *KIND.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                VectorKind::Avx2
            } else if is_x86_feature_detected!("ssse3") {
                VectorKind::Ssse3
            } else {
                VectorKind::Scalar
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            VectorKind::Scalar
        }
    })
}

/// Width in bytes of the widest vector the converter will use on this CPU;
/// 0 when only the scalar path is available.
pub fn vector_size() -> usize {
    match vector_kind() {
        VectorKind::Avx2 => 32,
        VectorKind::Ssse3 => 16,
        VectorKind::Scalar => 0,
    }
}

/// Trailing padding required on inbound sample buffers.
///
/// A deinterleave pass reads whole vectors; with UV row sizes always even,
/// the worst overread past the final row is `vectorSize - 2` bytes.
pub fn input_buffer_padding() -> usize {
    match vector_size() {
        0 => 0,
        vector => vector - 2,
    }
}

/// Trailing padding required on outbound sample buffers.
///
/// An interleave pass writes two whole vectors per iteration, so the worst
/// overwrite past the final row is `2 * vectorSize - 2` bytes. Downstream
/// allocators are asked for this even when running scalar, since a filter
/// later in the chain may still hand the buffer to a vector path.
pub fn output_buffer_padding() -> usize {
    let vector = match vector_size() {
        0 => 16,
        vector => vector,
    };
    vector * 2 - 2
}

/// Split interleaved UV rows (`U0 V0 U1 V1 ...`) into separate U and V
/// planes. `component_size` is 1 for 8-bit and 2 for 16-bit samples;
/// `row_size` is the interleaved row width in bytes.
///
/// # Panics
///
/// Panics when a buffer is too small for the access pattern of the
/// selected path, padding included.
pub fn deinterleave_uv(
    src: &[u8],
    src_stride: usize,
    dst_u: &mut [u8],
    dst_v: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    assert!(component_size == 1 || component_size == 2);
    if height == 0 || row_size == 0 {
        return;
    }

    match vector_kind() {
        #[cfg(target_arch = "x86_64")]
        VectorKind::Avx2 => unsafe {
            deinterleave_uv_avx2(src, src_stride, dst_u, dst_v, dst_stride, row_size, height, component_size)
        },
        #[cfg(target_arch = "x86_64")]
        VectorKind::Ssse3 => unsafe {
            deinterleave_uv_ssse3(src, src_stride, dst_u, dst_v, dst_stride, row_size, height, component_size)
        },
        _ => deinterleave_uv_scalar(src, src_stride, dst_u, dst_v, dst_stride, row_size, height, component_size),
    }
}

/// Merge separate U and V planes back into interleaved UV rows. Mirror of
/// [`deinterleave_uv`]; `row_size` is the interleaved row width in bytes.
pub fn interleave_uv(
    src_u: &[u8],
    src_v: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    assert!(component_size == 1 || component_size == 2);
    if height == 0 || row_size == 0 {
        return;
    }

    match vector_kind() {
        #[cfg(target_arch = "x86_64")]
        VectorKind::Avx2 => unsafe {
            interleave_uv_avx2(src_u, src_v, src_stride, dst, dst_stride, row_size, height, component_size)
        },
        #[cfg(target_arch = "x86_64")]
        VectorKind::Ssse3 => unsafe {
            interleave_uv_ssse3(src_u, src_v, src_stride, dst, dst_stride, row_size, height, component_size)
        },
        _ => interleave_uv_scalar(src_u, src_v, src_stride, dst, dst_stride, row_size, height, component_size),
    }
}

fn deinterleave_uv_scalar(
    src: &[u8],
    src_stride: usize,
    dst_u: &mut [u8],
    dst_v: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    let pair = component_size * 2;
    for y in 0..height {
        let src_row = &src[y * src_stride..][..row_size];
        let dst_u_row = &mut dst_u[y * dst_stride..][..row_size / 2];
        let dst_v_row = &mut dst_v[y * dst_stride..][..row_size / 2];

        let mut out = 0;
        for chunk in src_row.chunks_exact(pair) {
            dst_u_row[out..out + component_size].copy_from_slice(&chunk[..component_size]);
            dst_v_row[out..out + component_size].copy_from_slice(&chunk[component_size..]);
            out += component_size;
        }
    }
}

fn interleave_uv_scalar(
    src_u: &[u8],
    src_v: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    let pair = component_size * 2;
    for y in 0..height {
        let src_u_row = &src_u[y * src_stride..][..row_size / 2];
        let src_v_row = &src_v[y * src_stride..][..row_size / 2];
        let dst_row = &mut dst[y * dst_stride..][..row_size];

        let mut idx = 0;
        for chunk in dst_row.chunks_exact_mut(pair) {
            chunk[..component_size].copy_from_slice(&src_u_row[idx..idx + component_size]);
            chunk[component_size..].copy_from_slice(&src_v_row[idx..idx + component_size]);
            idx += component_size;
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn deinterleave_uv_ssse3(
    src: &[u8],
    src_stride: usize,
    dst_u: &mut [u8],
    dst_v: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    // Place the U bytes of the vector in its low half and the V bytes in
    // its high half, then store the halves to their planes.
    let shuffle = if component_size == 1 {
        _mm_setr_epi8(0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15)
    } else {
        _mm_setr_epi8(0, 1, 4, 5, 8, 9, 12, 13, 2, 3, 6, 7, 10, 11, 14, 15)
    };

    let vectors_per_row = row_size.div_ceil(16);
    assert!(src.len() >= (height - 1) * src_stride + vectors_per_row * 16);
    assert!(dst_u.len() >= (height - 1) * dst_stride + vectors_per_row * 8);
    assert!(dst_v.len() >= (height - 1) * dst_stride + vectors_per_row * 8);

    for y in 0..height {
        let mut src_ptr = unsafe { src.as_ptr().add(y * src_stride) };
        let mut u_ptr = unsafe { dst_u.as_mut_ptr().add(y * dst_stride) };
        let mut v_ptr = unsafe { dst_v.as_mut_ptr().add(y * dst_stride) };

        for _ in 0..vectors_per_row {
            unsafe {
                let vec = _mm_loadu_si128(src_ptr as *const __m128i);
                let split = _mm_shuffle_epi8(vec, shuffle);
                _mm_storel_epi64(u_ptr as *mut __m128i, split);
                _mm_storel_epi64(v_ptr as *mut __m128i, _mm_srli_si128(split, 8));
                src_ptr = src_ptr.add(16);
                u_ptr = u_ptr.add(8);
                v_ptr = v_ptr.add(8);
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn deinterleave_uv_avx2(
    src: &[u8],
    src_stride: usize,
    dst_u: &mut [u8],
    dst_v: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    // The 256-bit shuffle cannot cross the 128-bit lane boundary, so first
    // split U/V within each lane like the SSSE3 path, then permute the
    // 64-bit quarters 0,2,1,3 -> 0,1,2,3 to gather U into the low half.
    let shuffle = if component_size == 1 {
        _mm256_setr_epi8(
            0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15,
            0, 2, 4, 6, 8, 10, 12, 14, 1, 3, 5, 7, 9, 11, 13, 15,
        )
    } else {
        _mm256_setr_epi8(
            0, 1, 4, 5, 8, 9, 12, 13, 2, 3, 6, 7, 10, 11, 14, 15,
            0, 1, 4, 5, 8, 9, 12, 13, 2, 3, 6, 7, 10, 11, 14, 15,
        )
    };

    let vectors_per_row = row_size.div_ceil(32);
    assert!(src.len() >= (height - 1) * src_stride + vectors_per_row * 32);
    assert!(dst_u.len() >= (height - 1) * dst_stride + vectors_per_row * 16);
    assert!(dst_v.len() >= (height - 1) * dst_stride + vectors_per_row * 16);

    for y in 0..height {
        let mut src_ptr = unsafe { src.as_ptr().add(y * src_stride) };
        let mut u_ptr = unsafe { dst_u.as_mut_ptr().add(y * dst_stride) };
        let mut v_ptr = unsafe { dst_v.as_mut_ptr().add(y * dst_stride) };

        for _ in 0..vectors_per_row {
            unsafe {
                let vec = _mm256_loadu_si256(src_ptr as *const __m256i);
                let lane_split = _mm256_shuffle_epi8(vec, shuffle);
                let split = _mm256_permute4x64_epi64(lane_split, PERMUTE_INDEX_UV);
                _mm_storeu_si128(u_ptr as *mut __m128i, _mm256_castsi256_si128(split));
                _mm_storeu_si128(v_ptr as *mut __m128i, _mm256_extracti128_si256(split, 1));
                src_ptr = src_ptr.add(32);
                u_ptr = u_ptr.add(16);
                v_ptr = v_ptr.add(16);
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn interleave_uv_ssse3(
    src_u: &[u8],
    src_v: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    let iterations_per_row = row_size.div_ceil(32);
    assert!(src_u.len() >= (height - 1) * src_stride + iterations_per_row * 16);
    assert!(src_v.len() >= (height - 1) * src_stride + iterations_per_row * 16);
    assert!(dst.len() >= (height - 1) * dst_stride + iterations_per_row * 32);

    for y in 0..height {
        let mut u_ptr = unsafe { src_u.as_ptr().add(y * src_stride) };
        let mut v_ptr = unsafe { src_v.as_ptr().add(y * src_stride) };
        let mut dst_ptr = unsafe { dst.as_mut_ptr().add(y * dst_stride) };

        for _ in 0..iterations_per_row {
            unsafe {
                let u = _mm_loadu_si128(u_ptr as *const __m128i);
                let v = _mm_loadu_si128(v_ptr as *const __m128i);
                let (lo, hi) = if component_size == 1 {
                    (_mm_unpacklo_epi8(u, v), _mm_unpackhi_epi8(u, v))
                } else {
                    (_mm_unpacklo_epi16(u, v), _mm_unpackhi_epi16(u, v))
                };
                _mm_storeu_si128(dst_ptr as *mut __m128i, lo);
                _mm_storeu_si128(dst_ptr.add(16) as *mut __m128i, hi);
                u_ptr = u_ptr.add(16);
                v_ptr = v_ptr.add(16);
                dst_ptr = dst_ptr.add(32);
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn interleave_uv_avx2(
    src_u: &[u8],
    src_v: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_size: usize,
    height: usize,
    component_size: usize,
) {
    let iterations_per_row = row_size.div_ceil(64);
    assert!(src_u.len() >= (height - 1) * src_stride + iterations_per_row * 32);
    assert!(src_v.len() >= (height - 1) * src_stride + iterations_per_row * 32);
    assert!(dst.len() >= (height - 1) * dst_stride + iterations_per_row * 64);

    for y in 0..height {
        let mut u_ptr = unsafe { src_u.as_ptr().add(y * src_stride) };
        let mut v_ptr = unsafe { src_v.as_ptr().add(y * src_stride) };
        let mut dst_ptr = unsafe { dst.as_mut_ptr().add(y * dst_stride) };

        for _ in 0..iterations_per_row {
            unsafe {
                // Pre-permute both sources so the per-lane unpack produces
                // pairs in stream order.
                let u = _mm256_permute4x64_epi64(
                    _mm256_loadu_si256(u_ptr as *const __m256i),
                    PERMUTE_INDEX_UV,
                );
                let v = _mm256_permute4x64_epi64(
                    _mm256_loadu_si256(v_ptr as *const __m256i),
                    PERMUTE_INDEX_UV,
                );
                let (lo, hi) = if component_size == 1 {
                    (_mm256_unpacklo_epi8(u, v), _mm256_unpackhi_epi8(u, v))
                } else {
                    (_mm256_unpacklo_epi16(u, v), _mm256_unpackhi_epi16(u, v))
                };
                _mm256_storeu_si256(dst_ptr as *mut __m256i, lo);
                _mm256_storeu_si256(dst_ptr.add(32) as *mut __m256i, hi);
                u_ptr = u_ptr.add(32);
                v_ptr = v_ptr.add(32);
                dst_ptr = dst_ptr.add(64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleaved_pattern(row_size: usize, height: usize, stride: usize, component_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; (height - 1) * stride + row_size + 62];
        for y in 0..height {
            for x in 0..row_size {
                let sample = x / component_size;
                let byte = x % component_size;
                // U samples count up, V samples count down
                data[y * stride + x] = if sample % 2 == 0 {
                    (sample / 2 + y + byte) as u8
                } else {
                    255usize.wrapping_sub(sample / 2).wrapping_sub(y).wrapping_sub(byte) as u8
                };
            }
        }
        data
    }

    fn round_trip(row_size: usize, height: usize, component_size: usize) {
        let src_stride = row_size + 32;
        let dst_stride = crate::util::align_up(row_size / 2, 32);
        let src = interleaved_pattern(row_size, height, src_stride, component_size);

        let plane_len = (height - 1) * dst_stride + dst_stride;
        let mut u = vec![0u8; plane_len];
        let mut v = vec![0u8; plane_len];
        deinterleave_uv(&src, src_stride, &mut u, &mut v, dst_stride, row_size, height, component_size);

        let mut rebuilt = vec![0u8; (height - 1) * src_stride + row_size + 62];
        interleave_uv(&u, &v, dst_stride, &mut rebuilt, src_stride, row_size, height, component_size);

        for y in 0..height {
            let original = &src[y * src_stride..][..row_size];
            let output = &rebuilt[y * src_stride..][..row_size];
            assert_eq!(original, output, "row {y} mismatch");
        }
    }

    #[test]
    fn test_round_trip_8_bit() {
        round_trip(64, 4, 1);
        round_trip(30, 3, 1); // row not a multiple of any vector size
        round_trip(960, 540, 1);
    }

    #[test]
    fn test_round_trip_16_bit() {
        round_trip(128, 4, 2);
        round_trip(60, 3, 2);
        round_trip(1920, 270, 2);
    }

    #[test]
    fn test_deinterleave_matches_scalar() {
        let row_size = 100;
        let height = 5;
        let src_stride = 160;
        let dst_stride = 96;
        let src = interleaved_pattern(row_size, height, src_stride, 1);

        let plane_len = height * dst_stride + 32;
        let mut u_simd = vec![0u8; plane_len];
        let mut v_simd = vec![0u8; plane_len];
        deinterleave_uv(&src, src_stride, &mut u_simd, &mut v_simd, dst_stride, row_size, height, 1);

        let mut u_ref = vec![0u8; plane_len];
        let mut v_ref = vec![0u8; plane_len];
        deinterleave_uv_scalar(&src, src_stride, &mut u_ref, &mut v_ref, dst_stride, row_size, height, 1);

        for y in 0..height {
            assert_eq!(
                &u_simd[y * dst_stride..][..row_size / 2],
                &u_ref[y * dst_stride..][..row_size / 2]
            );
            assert_eq!(
                &v_simd[y * dst_stride..][..row_size / 2],
                &v_ref[y * dst_stride..][..row_size / 2]
            );
        }
    }

    #[test]
    fn test_paddings_follow_vector_size() {
        match vector_size() {
            0 => {
                assert_eq!(input_buffer_padding(), 0);
                assert_eq!(output_buffer_padding(), 30);
            }
            vector => {
                assert_eq!(input_buffer_padding(), vector - 2);
                assert_eq!(output_buffer_padding(), vector * 2 - 2);
            }
        }
    }
}
