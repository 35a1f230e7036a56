//! Block renderer: drives the scheduler and orbits, limits, interleaves.
//!
//! One call produces one block of interleaved 16-bit stereo PCM. An empty
//! heap and empty active list are legal and render silence. The final
//! limiter is a tanh soft clip, so whatever the mix did upstream, the
//! output samples always fit i16.

use crate::orbit::{OrbitBank, StereoBlock};
use crate::ringlink::AudioLink;
use crate::scheduler::Scheduler;
use crate::voice::RenderCtx;

pub struct Renderer {
    master: StereoBlock,
}

impl Renderer {
    pub fn new(block_frames: usize) -> Self {
        Renderer {
            master: StereoBlock::new(block_frames),
        }
    }

    /// Render the block starting at `ctx.block_start` into `out`, which must
    /// hold `2 * block_frames` interleaved samples.
    pub fn render_block(
        &mut self,
        ctx: &mut RenderCtx,
        scheduler: &mut Scheduler,
        orbits: &mut OrbitBank,
        link: &mut AudioLink,
        out: &mut [i16],
    ) {
        debug_assert_eq!(out.len(), 2 * ctx.block_frames);

        self.master.clear();
        orbits.clear_all();
        scheduler.process(ctx, orbits, link);
        orbits.process_all(&mut self.master);

        for i in 0..ctx.block_frames {
            out[2 * i] = limit(self.master.left[i]);
            out[2 * i + 1] = limit(self.master.right[i]);
        }
    }

    /// Peak of the last rendered block, pre-limiter. Used by tests and the
    /// offline render statistics.
    pub fn master_peak(&self) -> f64 {
        self.master
            .left
            .iter()
            .chain(self.master.right.iter())
            .fold(0.0f64, |m, s| m.max(s.abs()))
    }
}

#[inline]
fn limit(x: f64) -> i16 {
    let y = x.tanh() * 32767.0;
    y.clamp(-32768.0, 32767.0) as i16
}
