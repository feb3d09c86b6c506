//! Sample format, channel and sample rate conversion.
//!
//! A [`DataConverter`] turns raw PCM in any [`SampleFormat`] into the
//! engine's interleaved f32 mix format. Rate conversion uses linear
//! interpolation with its state carried across calls, so a source can be fed
//! in arbitrarily sized chunks. Equal rates bypass the interpolator entirely
//! and the conversion is exact.
//!
//! The interpolator position is kept as an integer phase counted in
//! `1 / rate_out` steps of an input frame, so the input a given output needs
//! is known exactly and in constant time.

use crate::error::{AudioError, AudioResult};
use crate::format::{OutputFormat, SampleFormat, MAX_CHANNELS};

/// Input frames loaded before the first output, which then lands exactly on
/// input frame 0.
const PRIMED_LOADS: u64 = 2;

/// Converts PCM frames from one format/channel count/rate into interleaved f32.
#[derive(Clone, Debug)]
pub struct DataConverter {
    format_in: SampleFormat,
    channels_in: usize,
    channels_out: usize,
    rate_in: u32,
    rate_out: u32,

    /// Position past `prev`, in units of `1 / rate_out` input frames. Each
    /// output advances it by `rate_in`; each loaded frame takes `rate_out`.
    phase: u64,
    /// `curr` repeats the final input frame; set while draining the tail.
    holding_last: bool,
    prev: [f32; MAX_CHANNELS],
    curr: [f32; MAX_CHANNELS],
}

impl DataConverter {
    /// Create a converter.
    ///
    /// Fails if either channel count is zero or above [`MAX_CHANNELS`], or a
    /// rate is zero.
    pub fn new(
        format_in: SampleFormat,
        channels_in: usize,
        rate_in: u32,
        channels_out: usize,
        rate_out: u32,
    ) -> AudioResult<Self> {
        for ch in [channels_in, channels_out] {
            if ch == 0 || ch > MAX_CHANNELS {
                return Err(AudioError::InvalidBuffer(format!(
                    "channel count {} outside 1..={}",
                    ch, MAX_CHANNELS
                )));
            }
        }
        if rate_in == 0 || rate_out == 0 {
            return Err(AudioError::InvalidBuffer("sample rate must be non-zero".into()));
        }

        Ok(Self {
            format_in,
            channels_in,
            channels_out,
            rate_in,
            rate_out,
            phase: PRIMED_LOADS * rate_out as u64,
            holding_last: false,
            prev: [0.0; MAX_CHANNELS],
            curr: [0.0; MAX_CHANNELS],
        })
    }

    /// Converter targeting an engine output format.
    pub fn to_output(
        format_in: SampleFormat,
        channels_in: usize,
        rate_in: u32,
        output: &OutputFormat,
    ) -> AudioResult<Self> {
        Self::new(
            format_in,
            channels_in,
            rate_in,
            output.channels as usize,
            output.sample_rate,
        )
    }

    #[inline]
    pub fn format_in(&self) -> SampleFormat {
        self.format_in
    }

    #[inline]
    pub fn channels_in(&self) -> usize {
        self.channels_in
    }

    #[inline]
    pub fn channels_out(&self) -> usize {
        self.channels_out
    }

    #[inline]
    pub fn rate_in(&self) -> u32 {
        self.rate_in
    }

    #[inline]
    pub fn rate_out(&self) -> u32 {
        self.rate_out
    }

    /// Bytes per input frame.
    #[inline]
    pub fn bytes_per_input_frame(&self) -> usize {
        self.format_in.bytes_per_frame(self.channels_in)
    }

    #[inline]
    fn is_passthrough(&self) -> bool {
        self.rate_in == self.rate_out
    }

    /// Rebind the input and output rates, keeping interpolator state so the
    /// change is click-free. Leaving passthrough starts the interpolator
    /// fresh at the next input frame.
    pub fn set_rate(&mut self, rate_in: u32, rate_out: u32) {
        if rate_in == 0 || rate_out == 0 {
            return;
        }
        let was_passthrough = self.is_passthrough();
        let old_rate_out = self.rate_out;
        self.rate_in = rate_in;
        self.rate_out = rate_out;

        if was_passthrough {
            if !self.is_passthrough() {
                self.reset();
            }
            return;
        }
        self.phase = (self.phase as u128 * rate_out as u128 / old_rate_out as u128) as u64;
    }

    /// Forget interpolator history, e.g. when playback restarts.
    pub fn reset(&mut self) {
        self.phase = PRIMED_LOADS * self.rate_out as u64;
        self.holding_last = false;
        self.prev = [0.0; MAX_CHANNELS];
        self.curr = [0.0; MAX_CHANNELS];
    }

    /// How many input frames are needed to produce `output_frames` frames.
    pub fn required_input_frames(&self, output_frames: usize) -> usize {
        if self.is_passthrough() {
            return output_frames;
        }
        if output_frames == 0 {
            return 0;
        }
        let span = (output_frames as u64 - 1).saturating_mul(self.rate_in as u64);
        (self.phase.saturating_add(span) / self.rate_out as u64).min(usize::MAX as u64) as usize
    }

    /// Convert up to `input_frames` frames of `input` into at most
    /// `output_frames` frames of `output`.
    ///
    /// Returns `(input_frames_consumed, output_frames_produced)`. Input is
    /// consumed in full unless `output_frames` are produced first.
    pub fn process(
        &mut self,
        input: &[u8],
        input_frames: usize,
        output: &mut [f32],
        output_frames: usize,
    ) -> (usize, usize) {
        let in_stride = self.bytes_per_input_frame();
        let input_frames = input_frames.min(input.len() / in_stride);
        let output_frames = output_frames.min(output.len() / self.channels_out);

        if self.is_passthrough() {
            let frames = input_frames.min(output_frames);
            let mut frame = [0.0f32; MAX_CHANNELS];
            for i in 0..frames {
                self.map_frame(&input[i * in_stride..(i + 1) * in_stride], &mut frame);
                let out = &mut output[i * self.channels_out..(i + 1) * self.channels_out];
                out.copy_from_slice(&frame[..self.channels_out]);
            }
            return (frames, frames);
        }

        let step = self.rate_out as u64;
        let mut consumed = 0;
        let mut produced = 0;

        while produced < output_frames {
            let loads = (self.phase / step) as usize;
            if loads > 0 {
                let take = loads.min(input_frames - consumed);
                self.load(&input[consumed * in_stride..], take);
                consumed += take;
                self.phase -= take as u64 * step;
                if take < loads {
                    return (consumed, produced);
                }
            }

            self.emit(&mut output[produced * self.channels_out..]);
            produced += 1;
            self.phase += self.rate_in as u64;
        }

        (consumed, produced)
    }

    /// Emit the outputs that fall between the final input frame and where the
    /// next one would be, holding that frame. Call once the input has ended.
    pub fn drain(&mut self, output: &mut [f32], output_frames: usize) -> usize {
        let output_frames = output_frames.min(output.len() / self.channels_out);
        let mut produced = 0;
        while produced < output_frames && self.has_tail() {
            if self.phase >= self.rate_out as u64 {
                self.prev = self.curr;
                self.phase -= self.rate_out as u64;
                self.holding_last = true;
            }
            self.emit(&mut output[produced * self.channels_out..]);
            produced += 1;
            self.phase += self.rate_in as u64;
        }
        produced
    }

    /// Whether [`drain`](Self::drain) has frames left to emit.
    pub fn has_tail(&self) -> bool {
        if self.is_passthrough() {
            return false;
        }
        match self.phase / self.rate_out as u64 {
            0 => true,
            1 => !self.holding_last,
            _ => false,
        }
    }

    /// Load `count` frames from the front of `input`. Only the last two are
    /// decoded; frames skipped over at high ratios are never read.
    fn load(&mut self, input: &[u8], count: usize) {
        let stride = self.bytes_per_input_frame();
        for i in count.saturating_sub(2)..count {
            self.prev = self.curr;
            let mut next = [0.0f32; MAX_CHANNELS];
            self.map_frame(&input[i * stride..(i + 1) * stride], &mut next);
            self.curr = next;
        }
    }

    /// Write the frame interpolated at the current phase to the front of `out`.
    #[inline]
    fn emit(&self, out: &mut [f32]) {
        let t = (self.phase as f64 / self.rate_out as f64) as f32;
        for (ch, sample) in out[..self.channels_out].iter_mut().enumerate() {
            let prev = self.prev[ch];
            *sample = prev + t * (self.curr[ch] - prev);
        }
    }


    /// Decode one input frame and map its channels onto the output layout.
    #[inline]
    fn map_frame(&self, frame: &[u8], out: &mut [f32; MAX_CHANNELS]) {
        let bps = self.format_in.bytes_per_sample();
        let mut decoded = [0.0f32; MAX_CHANNELS];
        for (ch, sample) in decoded.iter_mut().take(self.channels_in).enumerate() {
            *sample = self.format_in.read_f32(&frame[ch * bps..]);
        }

        if self.channels_in == self.channels_out {
            out[..self.channels_out].copy_from_slice(&decoded[..self.channels_out]);
        } else if self.channels_in == 1 {
            // Mono fans out to every output channel
            out[..self.channels_out].fill(decoded[0]);
        } else if self.channels_out == 1 {
            let sum: f32 = decoded[..self.channels_in].iter().sum();
            out[0] = sum / self.channels_in as f32;
        } else {
            for (ch, sample) in out.iter_mut().take(self.channels_out).enumerate() {
                *sample = decoded[ch.min(self.channels_in - 1)];
            }
        }
    }
}

/// Number of output frames `frames_in` frames become after rate conversion.
pub fn converted_frame_count(frames_in: usize, rate_in: u32, rate_out: u32) -> usize {
    if rate_in == rate_out || rate_in == 0 {
        return frames_in;
    }
    ((frames_in as u64 * rate_out as u64 + rate_in as u64 - 1) / rate_in as u64) as usize
}

/// Convert a whole PCM block to interleaved f32 in `output`'s channel layout
/// and rate, in one pass. Produces exactly [`converted_frame_count`] frames.
///
/// Used at load time so static sounds need no conversion while mixing.
pub fn convert_frames(
    format_in: SampleFormat,
    channels_in: usize,
    rate_in: u32,
    data: &[u8],
    output: &OutputFormat,
) -> AudioResult<Vec<f32>> {
    let mut converter = DataConverter::to_output(format_in, channels_in, rate_in, output)?;
    let frames_in = data.len() / converter.bytes_per_input_frame();
    let frames_out = converted_frame_count(frames_in, rate_in, output.sample_rate);

    let mut converted = vec![0.0f32; output.samples_for(frames_out)];
    let (_, mut produced) = converter.process(data, frames_in, &mut converted, frames_out);
    produced += converter.drain(
        &mut converted[output.samples_for(produced)..],
        frames_out - produced,
    );
    converted.truncate(output.samples_for(produced));
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        bytemuck::cast_slice(samples).to_vec()
    }

    #[test]
    fn passthrough_is_exact() {
        let data = [0.1f32, -0.2, 0.3, -0.4];
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 48_000, 1, 48_000).unwrap();
        let mut out = [0.0f32; 4];
        let (consumed, produced) = conv.process(&f32_bytes(&data), 4, &mut out, 4);
        assert_eq!((consumed, produced), (4, 4));
        assert_eq!(out, data);
        assert!(!conv.has_tail());
    }

    #[test]
    fn mono_fans_out_to_stereo() {
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 44_100, 2, 44_100).unwrap();
        let mut out = [0.0f32; 4];
        conv.process(&f32_bytes(&[0.5, -0.5]), 2, &mut out, 2);
        assert_eq!(out, [0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn stereo_downmix_averages() {
        let mut conv = DataConverter::new(SampleFormat::F32, 2, 44_100, 1, 44_100).unwrap();
        let mut out = [0.0f32; 1];
        conv.process(&f32_bytes(&[0.5, 0.25]), 1, &mut out, 1);
        assert_eq!(out, [0.375]);
    }

    #[test]
    fn integer_input_is_normalized() {
        let data: Vec<u8> = [16384i16, -16384].iter().flat_map(|s| s.to_ne_bytes()).collect();
        let mut conv = DataConverter::new(SampleFormat::S16, 1, 22_050, 1, 22_050).unwrap();
        let mut out = [0.0f32; 2];
        conv.process(&data, 2, &mut out, 2);
        assert_eq!(out, [0.5, -0.5]);
    }

    #[test]
    fn upsampling_interpolates_between_frames() {
        // 24k -> 48k: every other output lands halfway between inputs
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 24_000, 1, 48_000).unwrap();
        let data = f32_bytes(&[0.0, 1.0, 0.0]);
        let mut out = [9.0f32; 4];
        let (consumed, produced) = conv.process(&data, 3, &mut out, 4);
        assert_eq!(consumed, 3);
        assert_eq!(produced, 4);
        assert_eq!(out, [0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn drain_holds_the_final_frame() {
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 24_000, 1, 48_000).unwrap();
        let data: Vec<f32> = (1..=10).map(|i| i as f32).collect();
        let mut out = [0.0f32; 20];

        let (consumed, produced) = conv.process(&f32_bytes(&data), 10, &mut out, 20);
        assert_eq!((consumed, produced), (10, 18));
        assert_eq!(out[17], 9.5);
        assert!(conv.has_tail());

        assert_eq!(conv.drain(&mut out[18..], 2), 2);
        assert_eq!(&out[18..], &[10.0, 10.0]);
        assert!(!conv.has_tail());
        assert_eq!(conv.drain(&mut out[..], 20), 0);
    }

    #[test]
    fn drain_resumes_across_calls() {
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 12_000, 1, 48_000).unwrap();
        let mut out = [0.0f32; 8];
        let (_, produced) = conv.process(&f32_bytes(&[0.0, 1.0]), 2, &mut out, 8);
        assert_eq!(produced, 4);

        assert_eq!(conv.drain(&mut out[4..], 1), 1);
        assert_eq!(conv.drain(&mut out[5..], 8), 3);
        assert_eq!(&out[..], &[0.0, 0.25, 0.5, 0.75, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn required_frames_match_consumption() {
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 44_100, 1, 48_000).unwrap();
        let data = f32_bytes(&vec![0.25; 1024]);
        let mut out = vec![0.0f32; 1024];

        for chunk in [100usize, 37, 512, 1] {
            let needed = conv.required_input_frames(chunk);
            let (consumed, produced) = conv.process(&data, needed, &mut out, chunk);
            assert_eq!(consumed, needed);
            assert_eq!(produced, chunk);
        }
    }

    #[test]
    fn high_ratios_skip_input_in_constant_time() {
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 48_000, 1, 3_000).unwrap();
        assert_eq!(conv.required_input_frames(0), 0);
        assert_eq!(conv.required_input_frames(1), 2);
        assert_eq!(conv.required_input_frames(512), 2 + 511 * 16);
        assert!(conv.required_input_frames(usize::MAX) > 0);

        let data: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let mut out = [0.0f32; 4];
        let (consumed, produced) = conv.process(&f32_bytes(&data), 64, &mut out, 4);
        assert_eq!((consumed, produced), (50, 4));
        assert_eq!(out, [0.0, 16.0, 32.0, 48.0]);
    }

    #[test]
    fn downsampling_halves_the_frame_count() {
        let data = f32_bytes(&[0.5; 100]);
        let out = convert_frames(SampleFormat::F32, 1, 48_000, &data, &OutputFormat::stereo_f32(24_000)).unwrap();
        assert_eq!(out.len(), 2 * 50);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn converted_length_matches_prediction() {
        for (frames, rate_in, rate_out) in [(240, 24_000, 48_000), (1000, 44_100, 48_000), (777, 48_000, 22_050)] {
            let data = f32_bytes(&vec![0.5; frames]);
            let out = convert_frames(
                SampleFormat::F32,
                1,
                rate_in,
                &data,
                &OutputFormat::new(SampleFormat::F32, 1, rate_out),
            )
            .unwrap();
            assert_eq!(out.len(), converted_frame_count(frames, rate_in, rate_out));
            assert_eq!(out.last(), Some(&0.5));
        }
    }

    #[test]
    fn leaving_passthrough_reprimes_the_interpolator() {
        let mut conv = DataConverter::new(SampleFormat::F32, 1, 24_000, 1, 48_000).unwrap();
        let mut out = [0.0f32; 4];
        conv.process(&f32_bytes(&[3.0, 7.0, 1.0]), 3, &mut out, 3);

        conv.set_rate(48_000, 48_000);
        conv.process(&f32_bytes(&[2.0, 2.0]), 2, &mut out, 2);

        conv.set_rate(24_000, 48_000);
        let (consumed, produced) = conv.process(&f32_bytes(&[5.0, 6.0]), 2, &mut out, 2);
        assert_eq!((consumed, produced), (2, 2));
        assert_eq!(&out[..2], &[5.0, 5.5]);
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(DataConverter::new(SampleFormat::F32, 0, 48_000, 2, 48_000).is_err());
        assert!(DataConverter::new(SampleFormat::F32, 2, 48_000, MAX_CHANNELS + 1, 48_000).is_err());
        assert!(DataConverter::new(SampleFormat::F32, 2, 0, 2, 48_000).is_err());
    }
}
