use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{FeatureMatrix, Result};

/// Complex short-time spectrum, stored frame-major (`frame * bins + bin`).
#[derive(Debug, Clone)]
pub struct Spectrogram {
    bins: usize,
    frames: usize,
    data: Vec<Complex32>,
}

impl Spectrogram {
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn frame(&self, index: usize) -> &[Complex32] {
        &self.data[index * self.bins..(index + 1) * self.bins]
    }

    /// `|X|^power` as a (bins x frames) matrix.
    pub fn magnitude(&self, power: i32) -> FeatureMatrix {
        let mut out = FeatureMatrix::zeros(self.bins, self.frames);
        for frame in 0..self.frames {
            for (bin, value) in self.frame(frame).iter().enumerate() {
                let magnitude = value.norm();
                out.set(bin, frame, if power == 1 { magnitude } else { magnitude.powi(power) });
            }
        }
        out
    }

    /// Multiplies every cell with the matching (bins x frames) mask entry.
    pub fn masked(&self, mask: &FeatureMatrix) -> Spectrogram {
        let mut data = self.data.clone();
        for frame in 0..self.frames {
            for bin in 0..self.bins {
                data[frame * self.bins + bin] *= mask.get(bin, frame);
            }
        }
        Spectrogram {
            bins: self.bins,
            frames: self.frames,
            data,
        }
    }
}

/// Centred STFT with a periodic Hann window, plus its overlap-add inverse.
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for a signal of `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    pub fn forward(&self, samples: &[f32]) -> Result<Spectrogram> {
        let bins = self.bins();
        let frames = self.frame_count(samples.len());
        let pad = (self.n_fft / 2) as isize;

        let mut input = self.forward.make_input_vec();
        let mut spectrum = self.forward.make_output_vec();
        let mut scratch = self.forward.make_scratch_vec();
        let mut data = Vec::with_capacity(frames * bins);

        for frame in 0..frames {
            let start = (frame * self.hop_length) as isize - pad;
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = reflected(samples, start + i as isize) * self.window[i];
            }
            self.forward
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)?;
            data.extend_from_slice(&spectrum);
        }

        Ok(Spectrogram { bins, frames, data })
    }

    /// Windowed overlap-add inverse, trimmed to `length` samples.
    pub fn inverse(&self, spectrogram: &Spectrogram, length: usize) -> Result<Vec<f32>> {
        let pad = self.n_fft / 2;
        let total = self.n_fft + self.hop_length * spectrogram.frames().saturating_sub(1);
        let mut output = vec![0.0_f32; total];
        let mut norm = vec![0.0_f32; total];

        let mut buffer = self.inverse.make_input_vec();
        let mut frame_out = self.inverse.make_output_vec();
        let mut scratch = self.inverse.make_scratch_vec();
        let scale = 1.0 / self.n_fft as f32;
        let last = buffer.len() - 1;

        for frame in 0..spectrogram.frames() {
            buffer.copy_from_slice(spectrogram.frame(frame));
            buffer[0].im = 0.0;
            buffer[last].im = 0.0;
            self.inverse
                .process_with_scratch(&mut buffer, &mut frame_out, &mut scratch)?;

            let offset = frame * self.hop_length;
            for (i, value) in frame_out.iter().enumerate() {
                let w = self.window[i];
                output[offset + i] += value * scale * w;
                norm[offset + i] += w * w;
            }
        }

        for (sample, weight) in output.iter_mut().zip(&norm) {
            if *weight > 1e-8 {
                *sample /= weight;
            }
        }

        Ok(output.into_iter().skip(pad).chain(std::iter::repeat(0.0)).take(length).collect())
    }
}

impl fmt::Debug for Stft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }

    (0..len)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / len as f32).cos())
        .collect()
}

/// Reads `samples[index]`, mirroring out-of-range indices back into the
/// signal (reflect padding without repeating the edge sample).
fn reflected(samples: &[f32], index: isize) -> f32 {
    let len = samples.len() as isize;
    if len == 0 {
        return 0.0;
    }
    if len == 1 {
        return samples[0];
    }

    let period = 2 * (len - 1);
    let mut i = index.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    samples[i as usize]
}
