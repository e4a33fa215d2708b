//! Music and signal helpers used to prepare a reference sound.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Note assumed when no pitch can be detected (A4).
pub const DEFAULT_NOTE: u8 = 69;

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Equal-tempered frequency of a MIDI note, A4 = 440 Hz.
pub fn note_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((f64::from(note) - 69.0) / 12.0)
}

/// Fractional MIDI note number for a frequency.
pub fn frequency_to_note(freq: f64) -> f64 {
    69.0 + 12.0 * (freq / 440.0).log2()
}

/// Name of a MIDI note in scientific pitch notation ("A4", "C#-1").
pub fn midi_note_name(note: i32) -> String {
    let octave = note.div_euclid(12) - 1;
    let name = NOTE_NAMES[note.rem_euclid(12) as usize];
    format!("{}{}", name, octave)
}

/// Linear-interpolation resampler.
///
/// The output holds `ceil(len * dst_rate / src_rate)` samples.
pub fn resample(signal: &[f32], src_rate: f64, dst_rate: f64) -> Vec<f32> {
    if signal.is_empty() || src_rate <= 0.0 || dst_rate <= 0.0 {
        return Vec::new();
    }
    let ratio = dst_rate / src_rate;
    let out_len = (signal.len() as f64 * ratio).ceil() as usize;
    let last = signal.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;
            let a = signal[idx];
            let b = signal[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Lowest and highest fundamental considered by [`detect_pitch`], in Hz.
const PITCH_RANGE: (f64, f64) = (30.0, 4000.0);

/// Minimum normalized autocorrelation for a lag to count as periodic.
const PERIODICITY_THRESHOLD: f32 = 0.3;

/// Estimate the dominant pitch of a sound as a MIDI note.
///
/// Uses the autocorrelation of the whole signal. Returns [`DEFAULT_NOTE`]
/// when the signal is silent or aperiodic, and never more than 127.
pub fn detect_pitch(signal: &[f32], sample_rate: f64) -> u8 {
    match fundamental_frequency(signal, sample_rate) {
        Some(freq) => {
            let midi = frequency_to_note(freq);
            if midi <= 0.0 {
                DEFAULT_NOTE
            } else {
                midi.round().min(127.0) as u8
            }
        }
        None => DEFAULT_NOTE,
    }
}

/// Fundamental frequency from the first dominant autocorrelation peak.
pub fn fundamental_frequency(signal: &[f32], sample_rate: f64) -> Option<f64> {
    if signal.len() < 4 || sample_rate <= 0.0 {
        return None;
    }
    let acf = autocorrelation(signal);
    let energy = acf[0];
    if energy <= f32::EPSILON {
        return None;
    }

    let min_lag = ((sample_rate / PITCH_RANGE.1).floor() as usize).max(1);
    let max_lag = ((sample_rate / PITCH_RANGE.0).ceil() as usize).min(acf.len() - 2);
    if min_lag >= max_lag {
        return None;
    }

    // Skip the main lobe around lag 0.
    let start = (min_lag..max_lag).find(|&lag| acf[lag] <= 0.0)?;

    let (best_lag, best) = (start..=max_lag)
        .map(|lag| (lag, acf[lag]))
        .fold((0, f32::MIN), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
    if best_lag == 0 || best / energy < PERIODICITY_THRESHOLD {
        return None;
    }

    // Parabolic interpolation around the peak.
    let (a, b, c) = (acf[best_lag - 1], acf[best_lag], acf[best_lag + 1]);
    let denom = a - 2.0 * b + c;
    let offset = if denom.abs() > f32::EPSILON {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    Some(sample_rate / (best_lag as f64 + f64::from(offset)))
}

/// Linear (non-circular) autocorrelation via zero-padded FFT.
fn autocorrelation(signal: &[f32]) -> Vec<f32> {
    let n = signal.len();
    let size = (2 * n).next_power_of_two();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(size);
    let ifft = planner.plan_fft_inverse(size);

    let mut data: Vec<Complex<f32>> = signal
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();
    fft.process(&mut data);
    for bin in data.iter_mut() {
        *bin = Complex::new(bin.norm_sqr(), 0.0);
    }
    ifft.process(&mut data);

    let scale = 1.0 / size as f32;
    data.iter().take(n).map(|c| c.re * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as f32)
            .collect()
    }

    #[test]
    fn test_note_frequency() {
        assert!((note_frequency(69) - 440.0).abs() < 1e-9);
        assert!((note_frequency(81) - 880.0).abs() < 1e-9);
        assert!((frequency_to_note(261.6256) - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_midi_note_name() {
        assert_eq!(midi_note_name(69), "A4");
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(61), "C#4");
        assert_eq!(midi_note_name(0), "C-1");
        assert_eq!(midi_note_name(127), "G9");
    }

    #[test]
    fn test_resample_length() {
        let signal = vec![0.0f32; 441];
        assert_eq!(resample(&signal, 44100.0, 53267.0).len(), 533);
        assert!(resample(&[], 44100.0, 53267.0).is_empty());
    }

    #[test]
    fn test_resample_identity() {
        let signal: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample(&signal, 1000.0, 1000.0);
        assert_eq!(out, signal);
    }

    #[test]
    fn test_resample_interpolates() {
        let out = resample(&[0.0, 1.0], 1.0, 2.0);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detect_pitch_a4() {
        let signal = sine(440.0, 44100.0, 8192);
        assert_eq!(detect_pitch(&signal, 44100.0), 69);
    }

    #[test]
    fn test_detect_pitch_middle_c() {
        let signal = sine(261.6256, 53267.0, 16384);
        assert_eq!(detect_pitch(&signal, 53267.0), 60);
    }

    #[test]
    fn test_detect_pitch_silence() {
        assert_eq!(detect_pitch(&vec![0.0; 4096], 44100.0), DEFAULT_NOTE);
        assert_eq!(detect_pitch(&[], 44100.0), DEFAULT_NOTE);
    }
}
