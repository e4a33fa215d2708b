//! MFCC-style spectral feature extraction.
//!
//! Uses rustfft for the short-time spectrum. Plans and filter banks depend
//! only on the sample rate, so the extractor caches the most recent plan.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::schema::FeatureConfig;

/// Coefficient vector of one analysis frame.
pub type FeatureFrame = Vec<f32>;

/// Turns a PCM signal into an ordered sequence of fixed-length coefficient vectors.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, signal: &[f32], sample_rate: f64) -> Vec<FeatureFrame>;
}

/// Floor applied to filter bank energies before the logarithm.
const LOG_FLOOR: f64 = 1e-10;

/// Precomputed analysis plan for one sample rate.
pub struct MfccPlan {
    sample_rate: f64,
    window_length: usize,
    hop_length: usize,
    num_coeffs: usize,
    window: Vec<f32>,
    /// `(first_bin, weights)` per mel filter.
    filters: Vec<(usize, Vec<f32>)>,
    /// Row-major `num_coeffs x num_filters` DCT-II matrix.
    dct: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl MfccPlan {
    /// Build a plan. Window and hop lengths are rounded to whole samples.
    pub fn new(config: &FeatureConfig, sample_rate: f64) -> Self {
        let window_length = ((config.window_duration * sample_rate).round() as usize).max(2);
        let hop_length = ((config.hop_duration * sample_rate).round() as usize).max(1);
        let num_bins = window_length / 2 + 1;

        let window = (0..window_length)
            .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / window_length as f64).cos()) as f32)
            .collect();

        let filters = mel_filter_bank(config.num_filters, num_bins, window_length, sample_rate);
        let dct = dct_matrix(config.num_coeffs, config.num_filters);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_length);

        Self {
            sample_rate,
            window_length,
            hop_length,
            num_coeffs: config.num_coeffs,
            window,
            filters,
            dct,
            fft,
        }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Number of frames produced for a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        len.div_ceil(self.hop_length)
    }

    /// Compute one frame per hop. The last frames are zero padded.
    pub fn process(&self, signal: &[f32]) -> Vec<FeatureFrame> {
        let mut frames = Vec::with_capacity(self.num_frames(signal.len()));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.window_length];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];
        let mut energies = vec![0.0f64; self.filters.len()];

        for start in (0..signal.len()).step_by(self.hop_length) {
            let count = self.window_length.min(signal.len() - start);
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = if i < count { signal[start + i] } else { 0.0 };
                *slot = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            for (energy, (first_bin, weights)) in energies.iter_mut().zip(&self.filters) {
                let sum: f64 = weights
                    .iter()
                    .zip(&buffer[*first_bin..])
                    .map(|(w, bin)| f64::from(*w) * f64::from(bin.norm()))
                    .sum();
                *energy = sum.max(LOG_FLOOR).ln();
            }

            let coeffs = self
                .dct
                .chunks_exact(energies.len())
                .take(self.num_coeffs)
                .map(|row| {
                    row.iter()
                        .zip(&energies)
                        .map(|(d, e)| f64::from(*d) * e)
                        .sum::<f64>() as f32
                })
                .collect();
            frames.push(coeffs);
        }

        frames
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters evenly spaced on the mel scale between 0 Hz and Nyquist.
fn mel_filter_bank(
    num_filters: usize,
    num_bins: usize,
    fft_size: usize,
    sample_rate: f64,
) -> Vec<(usize, Vec<f32>)> {
    let max_mel = hz_to_mel(sample_rate / 2.0);
    let edges: Vec<f64> = (0..num_filters + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (num_filters + 1) as f64))
        .collect();
    let bin_hz = sample_rate / fft_size as f64;

    edges
        .windows(3)
        .map(|edge| {
            let (lower, center, upper) = (edge[0], edge[1], edge[2]);
            let first = ((lower / bin_hz).ceil() as usize).min(num_bins - 1);
            let last = ((upper / bin_hz).floor() as usize).min(num_bins - 1);
            let weights = (first..=last.max(first))
                .map(|bin| {
                    let freq = bin as f64 * bin_hz;
                    let w = if freq <= center {
                        (freq - lower) / (center - lower).max(f64::EPSILON)
                    } else {
                        (upper - freq) / (upper - center).max(f64::EPSILON)
                    };
                    w.max(0.0) as f32
                })
                .collect();
            (first, weights)
        })
        .collect()
}

/// Orthonormal DCT-II basis, `rows x cols`.
fn dct_matrix(rows: usize, cols: usize) -> Vec<f32> {
    let n = cols as f64;
    let mut matrix = Vec::with_capacity(rows * cols);
    for k in 0..rows {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for i in 0..cols {
            matrix.push((scale * (PI * k as f64 * (i as f64 + 0.5) / n).cos()) as f32);
        }
    }
    matrix
}

/// Mel-frequency cepstral coefficient extractor with a cached plan.
pub struct MfccExtractor {
    config: FeatureConfig,
    plan: Mutex<Option<Arc<MfccPlan>>>,
}

impl MfccExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            plan: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Plan for `sample_rate`, rebuilt only when the rate changes.
    pub fn plan(&self, sample_rate: f64) -> Arc<MfccPlan> {
        let mut cached = self.plan.lock().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some(plan) if plan.sample_rate == sample_rate => Arc::clone(plan),
            _ => {
                let plan = Arc::new(MfccPlan::new(&self.config, sample_rate));
                *cached = Some(Arc::clone(&plan));
                plan
            }
        }
    }
}

impl Default for MfccExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureExtractor for MfccExtractor {
    fn extract(&self, signal: &[f32], sample_rate: f64) -> Vec<FeatureFrame> {
        self.plan(sample_rate).process(signal)
    }
}
