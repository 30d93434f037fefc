// crates/clipcast-core/src/pixel.rs
//
// Plane layout for the pixel formats the muxer's fast/slow conversion path
// needs to reason about without touching FFmpeg. `ffmpeg-the-third`'s own
// `Pixel` enum is the source of truth for what a decoder/encoder actually
// emits; this table only describes the *shape* of a handful of planar/packed
// formats the conversion path cares about.

/// Per-plane layout of a pixel format: how many planes, and the chroma
/// subsampling (horizontal, vertical) of each relative to the luma plane.
/// Packed formats (BGRA, UYVY422) report a single plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatDesc {
    pub name: &'static str,
    pub planes: usize,
    /// (h_sub, v_sub) per plane — 1 means full resolution, 2 means halved.
    pub subsampling: [(u32, u32); 3],
    pub bytes_per_sample: usize,
}

pub const YUV420P: PixelFormatDesc = PixelFormatDesc {
    name: "yuv420p",
    planes: 3,
    subsampling: [(1, 1), (2, 2), (2, 2)],
    bytes_per_sample: 1,
};

pub const YUV422P: PixelFormatDesc = PixelFormatDesc {
    name: "yuv422p",
    planes: 3,
    subsampling: [(1, 1), (2, 1), (2, 1)],
    bytes_per_sample: 1,
};

pub const YUV444P: PixelFormatDesc = PixelFormatDesc {
    name: "yuv444p",
    planes: 3,
    subsampling: [(1, 1), (1, 1), (1, 1)],
    bytes_per_sample: 1,
};

pub const UYVY422: PixelFormatDesc = PixelFormatDesc {
    name: "uyvy422",
    planes: 1,
    subsampling: [(1, 1), (1, 1), (1, 1)],
    bytes_per_sample: 2,
};

pub const BGRA: PixelFormatDesc = PixelFormatDesc {
    name: "bgra",
    planes: 1,
    subsampling: [(1, 1), (1, 1), (1, 1)],
    bytes_per_sample: 4,
};

impl PixelFormatDesc {
    /// Byte length of plane `idx` for a frame of `w × h` luma pixels.
    #[inline]
    pub fn plane_len(&self, idx: usize, w: u32, h: u32) -> usize {
        let (hs, vs) = self.subsampling[idx];
        let pw = (w / hs).max(1);
        let ph = (h / vs).max(1);
        (pw * ph) as usize * self.bytes_per_sample
    }

    /// Total packed (stride-free) byte length of a frame of `w × h` luma
    /// pixels across all planes.
    #[inline]
    pub fn packed_len(&self, w: u32, h: u32) -> usize {
        (0..self.planes).map(|i| self.plane_len(i, w, h)).sum()
    }

    /// Byte offset of plane `idx` within a packed buffer laid out
    /// plane-by-plane with no padding between planes.
    #[inline]
    pub fn plane_offset(&self, idx: usize, w: u32, h: u32) -> usize {
        (0..idx).map(|i| self.plane_len(i, w, h)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420p_1080p_lengths() {
        let (w, h) = (1920, 1080);
        assert_eq!(YUV420P.plane_len(0, w, h), 1920 * 1080);
        assert_eq!(YUV420P.plane_len(1, w, h), 960 * 540);
        assert_eq!(YUV420P.plane_len(2, w, h), 960 * 540);
        assert_eq!(YUV420P.packed_len(w, h), 1920 * 1080 + 2 * 960 * 540);
    }

    #[test]
    fn yuv420p_offsets() {
        let (w, h) = (1920, 1080);
        assert_eq!(YUV420P.plane_offset(0, w, h), 0);
        assert_eq!(YUV420P.plane_offset(1, w, h), 1920 * 1080);
        assert_eq!(YUV420P.plane_offset(2, w, h), 1920 * 1080 + 960 * 540);
    }

    #[test]
    fn bgra_is_single_packed_plane() {
        assert_eq!(BGRA.planes, 1);
        assert_eq!(BGRA.packed_len(640, 480), 640 * 480 * 4);
    }

    #[test]
    fn yuv444p_no_subsampling() {
        assert_eq!(YUV444P.plane_len(1, 100, 100), YUV444P.plane_len(0, 100, 100));
    }
}
