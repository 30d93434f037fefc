// crates/clipcast-media/src/scaler_pool.rs
//
// Process-wide pool of `SwsContext`s, keyed by the conversion they perform.
// `sws_getContext` is expensive enough (tens of microseconds, plus an
// allocation) that creating one per frame is a measurable tax on a
// real-time pipeline; every producer instance shares this pool instead of
// keeping its own.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScalerKey {
    pub src_w: u32,
    pub src_h: u32,
    pub src_fmt: Pixel,
    pub dst_w: u32,
    pub dst_h: u32,
    pub dst_fmt: Pixel,
}

type Pool = Mutex<HashMap<ScalerKey, Vec<SwsContext>>>;

static POOL: OnceLock<Pool> = OnceLock::new();

fn pool() -> &'static Pool {
    POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Borrow a scaler for `key`, creating one if the pool has none idle.
/// Returned as a guard — drop it (or call `release`) to return it to the
/// pool for reuse by the next frame that needs the same conversion.
pub struct PooledScaler {
    key: ScalerKey,
    ctx: Option<SwsContext>,
}

impl PooledScaler {
    pub fn get(&mut self) -> &mut SwsContext {
        self.ctx.as_mut().expect("PooledScaler used after release")
    }
}

impl Drop for PooledScaler {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            pool().lock().unwrap().entry(self.key).or_default().push(ctx);
        }
    }
}

pub fn acquire(key: ScalerKey) -> Result<PooledScaler, ffmpeg::Error> {
    if let Some(ctx) = pool().lock().unwrap().get_mut(&key).and_then(Vec::pop) {
        return Ok(PooledScaler { key, ctx: Some(ctx) });
    }
    let ctx = SwsContext::get(
        key.src_fmt, key.src_w, key.src_h,
        key.dst_fmt, key.dst_w, key.dst_h,
        Flags::BILINEAR,
    )?;
    Ok(PooledScaler { key, ctx: Some(ctx) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_different_formats_are_distinct() {
        let a = ScalerKey { src_w: 1920, src_h: 1080, src_fmt: Pixel::YUV420P, dst_w: 1920, dst_h: 1080, dst_fmt: Pixel::BGRA };
        let b = ScalerKey { src_w: 1920, src_h: 1080, src_fmt: Pixel::YUV422P, dst_w: 1920, dst_h: 1080, dst_fmt: Pixel::BGRA };
        assert_ne!(a, b);
    }
}
