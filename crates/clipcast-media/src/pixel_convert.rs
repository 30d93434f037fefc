// crates/clipcast-media/src/pixel_convert.rs
//
// Turning a decoded `ffmpeg::util::frame::video::Video` into a
// `clipcast_core::RawPicture`: a stride-free, plane-packed buffer in one of
// the handful of pixel formats `clipcast-core::pixel` knows about.
//
// Fast path: decoded planes already pack tight (stride == plane width) —
// one `memcpy` per plane, no allocation beyond the destination buffer.
// Slow path: stride padding or an unsupported native format — copy row by
// row (parallelized across rows for large frames), or route through the
// scaler pool when the pixel format itself needs to change.
//
// Grounded in the donor's `helpers/yuv.rs` (`extract_yuv`'s per-plane,
// stride-aware row copy) generalized from a hardcoded YUV420P layout to
// `PixelFormatDesc`, and in `transitions/helpers.rs`'s plane-offset helpers
// for the byte accounting.

use clipcast_core::pixel::{PixelFormatDesc, BGRA, UYVY422, YUV420P, YUV422P, YUV444P};
use clipcast_core::types::RawPicture;
use clipcast_core::format::FieldMode;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as AvFrame;

use crate::scaler_pool::{self, ScalerKey};

/// Rows above which plane extraction is parallelized with rayon. Below this
/// the thread-pool dispatch overhead outweighs the copy itself.
const PARALLEL_ROW_THRESHOLD: usize = 128;

/// Map an FFmpeg pixel format to one of our known plane layouts, if we have
/// a direct descriptor for it. `None` means the caller must convert through
/// the scaler pool first (see `normalize_to_known_format`).
pub fn desc_for(fmt: Pixel) -> Option<PixelFormatDesc> {
    match fmt {
        Pixel::YUV420P => Some(YUV420P),
        Pixel::YUV422P => Some(YUV422P),
        Pixel::YUV444P => Some(YUV444P),
        Pixel::UYVY422 => Some(UYVY422),
        Pixel::BGRA => Some(BGRA),
        _ => None,
    }
}

/// Extract a packed (stride-free) buffer from `frame` for a pixel format we
/// have a `PixelFormatDesc` for. Picks the fast per-plane memcpy when
/// possible, otherwise falls back to a parallel row copy.
pub fn extract_packed(frame: &AvFrame, desc: &PixelFormatDesc, w: u32, h: u32) -> Vec<u8> {
    let mut out = vec![0u8; desc.packed_len(w, h)];

    for plane in 0..desc.planes {
        let (hs, vs) = desc.subsampling[plane];
        let plane_w = (w / hs).max(1) as usize;
        let plane_h = (h / vs).max(1) as usize;
        let row_bytes = plane_w * desc.bytes_per_sample;
        let stride = frame.stride(plane);
        let src = frame.data(plane);
        let dst_offset = desc.plane_offset(plane, w, h);

        if stride == row_bytes {
            // Fast path: source has no row padding — one contiguous memcpy
            // covers the whole plane.
            out[dst_offset..dst_offset + row_bytes * plane_h]
                .copy_from_slice(&src[..row_bytes * plane_h]);
            continue;
        }

        if plane_h >= PARALLEL_ROW_THRESHOLD {
            let dst_plane = &mut out[dst_offset..dst_offset + row_bytes * plane_h];
            rayon::scope(|s| {
                for (row, dst_row) in dst_plane.chunks_mut(row_bytes).enumerate() {
                    let src_row = &src[row * stride..row * stride + row_bytes];
                    s.spawn(move |_| dst_row.copy_from_slice(src_row));
                }
            });
        } else {
            for row in 0..plane_h {
                let d = dst_offset + row * row_bytes;
                out[d..d + row_bytes].copy_from_slice(&src[row * stride..row * stride + row_bytes]);
            }
        }
    }

    out
}

/// Build a `RawPicture` from a decoded frame, converting through the
/// scaler pool to BGRA when the native format has no direct
/// `PixelFormatDesc` (mirrors the donor source's fallback-to-BGRA path for
/// unrecognised pixel formats).
pub fn to_raw_picture(frame: &AvFrame, field_mode: FieldMode, pts: i64) -> Result<RawPicture, ffmpeg::Error> {
    let (w, h) = (frame.width(), frame.height());

    if let Some(desc) = desc_for(frame.format()) {
        return Ok(RawPicture {
            width: w,
            height: h,
            pixel_format: desc,
            data: extract_packed(frame, &desc, w, h),
            field_mode,
            pts,
        });
    }

    let mut scaler = scaler_pool::acquire(ScalerKey {
        src_w: w,
        src_h: h,
        src_fmt: frame.format(),
        dst_w: w,
        dst_h: h,
        dst_fmt: Pixel::BGRA,
    })?;

    let mut converted = AvFrame::empty();
    scaler.get().run(frame, &mut converted)?;

    Ok(RawPicture {
        width: w,
        height: h,
        pixel_format: BGRA,
        data: extract_packed(&converted, &BGRA, w, h),
        field_mode,
        pts,
    })
}

/// Convert an already-packed `RawPicture` to the channel's target pixel
/// format/size, if it doesn't already match. This is the slow path
/// `FrameMuxer` routes through for frames that need resizing or a pixel
/// format change before reaching the mixer.
pub fn convert_to_target(
    picture: &RawPicture,
    target_fmt: Pixel,
    target_w: u32,
    target_h: u32,
) -> Result<RawPicture, ffmpeg::Error> {
    let src_fmt = ffmpeg_pixel_for(&picture.pixel_format);

    if picture.width == target_w && picture.height == target_h && desc_for(target_fmt) == Some(picture.pixel_format) {
        return Ok(picture.clone());
    }

    let mut src_frame = AvFrame::new(src_fmt, picture.width, picture.height);
    write_packed(&picture.data, &mut src_frame, &picture.pixel_format, picture.width, picture.height);

    let mut scaler = scaler_pool::acquire(ScalerKey {
        src_w: picture.width,
        src_h: picture.height,
        src_fmt,
        dst_w: target_w,
        dst_h: target_h,
        dst_fmt: target_fmt,
    })?;

    let mut converted = AvFrame::empty();
    scaler.get().run(&src_frame, &mut converted)?;

    let desc = desc_for(target_fmt).unwrap_or(BGRA);
    Ok(RawPicture {
        width: target_w,
        height: target_h,
        pixel_format: desc,
        data: extract_packed(&converted, &desc, target_w, target_h),
        field_mode: picture.field_mode,
        pts: picture.pts,
    })
}

fn ffmpeg_pixel_for(desc: &PixelFormatDesc) -> Pixel {
    match desc.name {
        "yuv420p" => Pixel::YUV420P,
        "yuv422p" => Pixel::YUV422P,
        "yuv444p" => Pixel::YUV444P,
        "uyvy422" => Pixel::UYVY422,
        _ => Pixel::BGRA,
    }
}

fn write_packed(packed: &[u8], frame: &mut AvFrame, desc: &PixelFormatDesc, w: u32, h: u32) {
    for plane in 0..desc.planes {
        let (hs, vs) = desc.subsampling[plane];
        let plane_w = (w / hs).max(1) as usize;
        let plane_h = (h / vs).max(1) as usize;
        let row_bytes = plane_w * desc.bytes_per_sample;
        let stride = frame.stride(plane);
        let src_offset = desc.plane_offset(plane, w, h);
        let dst = frame.data_mut(plane);
        for row in 0..plane_h {
            let s = src_offset + row * row_bytes;
            dst[row * stride..row * stride + row_bytes].copy_from_slice(&packed[s..s + row_bytes]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desc_for_maps_known_formats() {
        assert_eq!(desc_for(Pixel::YUV420P), Some(YUV420P));
        assert_eq!(desc_for(Pixel::BGRA), Some(BGRA));
        assert_eq!(desc_for(Pixel::NV12), None);
    }
}
