//! Orbits: the fixed pool of stereo effect buses.
//!
//! Voices write a dry mix and a delay send into their orbit's block buffers;
//! at the end of the block each orbit runs its delay line over the send, its
//! reverb over the mix, and sums the result into the master. All orbit state
//! is owned by the audio thread; parameter changes land via commands and are
//! applied at block boundaries only.

/// f64 counterpart of `crate::filters::flush_denormal`, for the orbit delay
/// and reverb lines which run their state in f64.
#[inline]
fn flush_denormal(x: f64) -> f64 {
    if x.abs() < 1.0e-20 {
        0.0
    } else {
        x
    }
}

pub const ORBIT_COUNT: usize = 16;

/// Minimum delay in seconds. Short enough to reach flanger territory.
const MIN_DELAY_SECONDS: f64 = 0.0001;

/// Maximum delay line length in seconds.
const MAX_DELAY_SECONDS: f64 = 4.0;

/// Feedback paths are hard-clipped here so feedback > 1 stays bounded.
const FEEDBACK_CLIP: f64 = 2.0;

/// One stereo block of f64 samples.
#[derive(Debug, Clone)]
pub struct StereoBlock {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
}

impl StereoBlock {
    pub fn new(frames: usize) -> Self {
        StereoBlock {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }
}

// ── Delay line ──────────────────────────────────────────────────────────

struct DelayChannel {
    buf: Vec<f64>,
    write: usize,
}

impl DelayChannel {
    fn new(capacity: usize) -> Self {
        DelayChannel {
            buf: vec![0.0; capacity],
            write: 0,
        }
    }

    /// Read `input` per frame, add the delayed signal into `mix`, and write
    /// the feedback path back to the line. `delay` is in fractional samples.
    fn run(&mut self, input: &[f64], mix: &mut [f64], delay: f64, feedback: f64) {
        let cap = self.buf.len();
        let int_delay = delay.floor() as usize;
        let frac = delay - int_delay as f64;
        let mut remaining = input.len();
        let mut offset = 0;
        // split the loop where the write index wraps so the inner loop
        // runs branch-light
        while remaining > 0 {
            let seg = remaining.min(cap - self.write);
            for i in 0..seg {
                let w = self.write + i;
                // fractional read between the two samples around the tap
                let mut r1 = w + cap - int_delay;
                if r1 >= cap {
                    r1 -= cap;
                }
                let mut r0 = r1 + cap - 1;
                if r0 >= cap {
                    r0 -= cap;
                }
                let delayed = self.buf[r1] * (1.0 - frac) + self.buf[r0] * frac;
                mix[offset + i] += delayed;
                let fed = input[offset + i] + delayed * feedback;
                self.buf[w] = flush_denormal(fed.clamp(-FEEDBACK_CLIP, FEEDBACK_CLIP));
            }
            self.write += seg;
            if self.write == cap {
                self.write = 0;
            }
            offset += seg;
            remaining -= seg;
        }
    }
}

/// Stereo feedback delay with a fractional read tap.
pub struct DelayLine {
    left: DelayChannel,
    right: DelayChannel,
    delay_samples: f64,
    feedback: f64,
    sample_rate: f64,
}

impl DelayLine {
    pub fn new(sample_rate: f64) -> Self {
        let capacity = (MAX_DELAY_SECONDS * sample_rate) as usize;
        DelayLine {
            left: DelayChannel::new(capacity),
            right: DelayChannel::new(capacity),
            delay_samples: 0.25 * sample_rate,
            feedback: 0.4,
            sample_rate,
        }
    }

    pub fn set_time(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let min = MIN_DELAY_SECONDS * self.sample_rate;
        let max = (self.left.buf.len() - 2) as f64;
        self.delay_samples = (seconds * self.sample_rate).clamp(min, max);
    }

    pub fn set_feedback(&mut self, feedback: f64) {
        if feedback.is_finite() {
            self.feedback = feedback;
        }
    }

    pub fn process(&mut self, send: &StereoBlock, mix: &mut StereoBlock) {
        self.left
            .run(&send.left, &mut mix.left, self.delay_samples, self.feedback);
        self.right
            .run(&send.right, &mut mix.right, self.delay_samples, self.feedback);
    }
}

// ── Freeverb ────────────────────────────────────────────────────────────

/// Freeverb comb tunings at 44.1 kHz; the right channel reads the same
/// tunings shifted by +23 samples for decorrelation.
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const REFERENCE_RATE: f64 = 44_100.0;
const FIXED_GAIN: f64 = 0.015;
const DEFAULT_DAMP: f64 = 0.2;

struct Comb {
    buf: Vec<f64>,
    idx: usize,
    feedback: f64,
    damp: f64,
    store: f64,
}

impl Comb {
    fn new(len: usize) -> Self {
        Comb {
            buf: vec![0.0; len.max(1)],
            idx: 0,
            feedback: 0.84,
            damp: DEFAULT_DAMP,
            store: 0.0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f64) -> f64 {
        let out = self.buf[self.idx];
        self.store = flush_denormal(out * (1.0 - self.damp) + self.store * self.damp);
        self.buf[self.idx] = flush_denormal(input + self.store * self.feedback);
        self.idx += 1;
        if self.idx == self.buf.len() {
            self.idx = 0;
        }
        out
    }
}

struct AllPass {
    buf: Vec<f64>,
    idx: usize,
}

impl AllPass {
    fn new(len: usize) -> Self {
        AllPass {
            buf: vec![0.0; len.max(1)],
            idx: 0,
        }
    }

    #[inline]
    fn tick(&mut self, input: f64) -> f64 {
        let buffered = self.buf[self.idx];
        let out = buffered - input;
        self.buf[self.idx] = flush_denormal(input + buffered * 0.5);
        self.idx += 1;
        if self.idx == self.buf.len() {
            self.idx = 0;
        }
        out
    }
}

/// Schroeder/Freeverb: 8 parallel combs into 4 series all-passes per channel.
pub struct Reverb {
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<AllPass>; 2],
    /// Wet level, 0 disables processing entirely.
    room: f64,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = |n: usize, extra: usize| {
            (((n + extra) as f64) * sample_rate / REFERENCE_RATE) as usize
        };
        let combs = [
            COMB_TUNINGS.iter().map(|&n| Comb::new(scale(n, 0))).collect(),
            COMB_TUNINGS
                .iter()
                .map(|&n| Comb::new(scale(n, STEREO_SPREAD)))
                .collect(),
        ];
        let allpasses = [
            ALLPASS_TUNINGS
                .iter()
                .map(|&n| AllPass::new(scale(n, 0)))
                .collect(),
            ALLPASS_TUNINGS
                .iter()
                .map(|&n| AllPass::new(scale(n, STEREO_SPREAD)))
                .collect(),
        ];
        Reverb {
            combs,
            allpasses,
            room: 0.0,
        }
    }

    /// `room` is the wet level; `size` sets the comb feedback.
    pub fn set_params(&mut self, room: Option<f64>, size: Option<f64>) {
        if let Some(room) = room {
            if room.is_finite() {
                self.room = room.clamp(0.0, 1.0);
            }
        }
        if let Some(size) = size {
            if size.is_finite() {
                let feedback = size.clamp(0.0, 1.0) * 0.28 + 0.7;
                for channel in &mut self.combs {
                    for comb in channel.iter_mut() {
                        comb.feedback = feedback;
                    }
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.room > 0.0
    }

    /// Add the wet signal onto `mix` in place.
    pub fn process(&mut self, mix: &mut StereoBlock) {
        if !self.is_active() {
            return;
        }
        let frames = mix.frames();
        for i in 0..frames {
            let input = (mix.left[i] + mix.right[i]) * FIXED_GAIN;
            for (ch, out) in [&mut mix.left, &mut mix.right].into_iter().enumerate() {
                let mut wet = 0.0;
                for comb in self.combs[ch].iter_mut() {
                    wet += comb.tick(input);
                }
                for ap in self.allpasses[ch].iter_mut() {
                    wet = ap.tick(wet);
                }
                out[i] += wet * self.room;
            }
        }
    }
}

// ── Orbit cells ─────────────────────────────────────────────────────────

/// One effect bus: dry mix and delay-send buffers plus the bus effects.
pub struct Orbit {
    pub mix: StereoBlock,
    pub send: StereoBlock,
    delay: DelayLine,
    reverb: Reverb,
    /// Skips the delay entirely until a voice has ever sent to it.
    send_touched: bool,
}

impl Orbit {
    fn new(sample_rate: f64, block_frames: usize) -> Self {
        Orbit {
            mix: StereoBlock::new(block_frames),
            send: StereoBlock::new(block_frames),
            delay: DelayLine::new(sample_rate),
            reverb: Reverb::new(sample_rate),
            send_touched: false,
        }
    }

    pub fn clear(&mut self) {
        self.mix.clear();
        self.send.clear();
    }

    pub fn mark_send(&mut self) {
        self.send_touched = true;
    }

    pub fn set_delay_params(&mut self, time: Option<f64>, feedback: Option<f64>) {
        if let Some(t) = time {
            self.delay.set_time(t);
        }
        if let Some(f) = feedback {
            self.delay.set_feedback(f);
        }
    }

    pub fn set_reverb_params(&mut self, room: Option<f64>, size: Option<f64>) {
        self.reverb.set_params(room, size);
    }

    /// Run the bus chain and sum this orbit into the master mix.
    pub fn process(&mut self, master: &mut StereoBlock) {
        if self.send_touched {
            self.delay.process(&self.send, &mut self.mix);
        }
        self.reverb.process(&mut self.mix);
        for i in 0..master.frames() {
            master.left[i] += self.mix.left[i];
            master.right[i] += self.mix.right[i];
        }
    }
}

/// The fixed pool of 16 orbits.
pub struct OrbitBank {
    cells: Vec<Orbit>,
}

impl OrbitBank {
    pub fn new(sample_rate: f64, block_frames: usize) -> Self {
        OrbitBank {
            cells: (0..ORBIT_COUNT)
                .map(|_| Orbit::new(sample_rate, block_frames))
                .collect(),
        }
    }

    pub fn cell(&mut self, index: usize) -> &mut Orbit {
        &mut self.cells[index.min(ORBIT_COUNT - 1)]
    }

    pub fn clear_all(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    pub fn process_all(&mut self, master: &mut StereoBlock) {
        for cell in &mut self.cells {
            cell.process(master);
        }
    }
}
