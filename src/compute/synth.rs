//! Four-operator FM voice modelled on the OPN register set.
//!
//! The synthesizer is driven by an [`Instrument`] patch. It renders one held
//! note (no key-off) so that the output can be compared against a reference
//! recording. The operator model follows the chip's structure (eight
//! algorithms, operator 1 feedback, attack/decay/sustain envelopes, total
//! level attenuation, LFO sensitivities) but is a floating point
//! approximation rather than a cycle-exact emulation.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::schema::{Instrument, NUM_OPERATORS, Operator};

use super::music::note_frequency;

/// Chip family; each runs at its own native clock and output rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipFamily {
    /// YM2612 (Mega Drive / Genesis).
    #[default]
    Opn2,
    /// YM2608 (PC-88/98).
    Opna,
}

impl ChipFamily {
    pub const ALL: [ChipFamily; 2] = [ChipFamily::Opn2, ChipFamily::Opna];

    /// Native master clock in Hz.
    pub fn native_clock(self) -> u32 {
        match self {
            ChipFamily::Opn2 => 7_670_454,
            ChipFamily::Opna => 7_987_200,
        }
    }

    /// Output sample rate: the clock divided by 144.
    pub fn sample_rate(self) -> f64 {
        f64::from(self.native_clock()) / 144.0
    }

    /// Select the family whose output rate matches `sample_rate`.
    ///
    /// Rates are compared after truncation to whole hertz.
    pub fn from_sample_rate(sample_rate: f64) -> Result<Self, SynthError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(SynthError::UnsupportedSampleRate(sample_rate));
        }
        let hz = sample_rate as u32;
        Self::ALL
            .into_iter()
            .find(|family| family.sample_rate() as u32 == hz)
            .ok_or(SynthError::UnsupportedSampleRate(sample_rate))
    }
}

/// Synthesis errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthError {
    #[error("Cannot find a chip model to match sample rate {0} Hz")]
    UnsupportedSampleRate(f64),
}

/// Produces PCM audio from an instrument patch.
pub trait Synthesizer: Send + Sync {
    /// Check that a sample rate can be rendered, returning the chip family.
    fn check_sample_rate(&self, sample_rate: f64) -> Result<ChipFamily, SynthError> {
        ChipFamily::from_sample_rate(sample_rate)
    }

    /// Render `num_frames` mono samples in `[-1, 1]` of `note` held down.
    fn synthesize(
        &self,
        instrument: &Instrument,
        num_frames: usize,
        sample_rate: f64,
        note: u8,
    ) -> Result<Vec<f32>, SynthError>;
}

/// Modulation input scale: a full-scale modulator shifts the phase by this many radians.
const MODULATION_DEPTH: f64 = 4.0 * PI;

/// Attenuation at which an operator is considered silent, in dB.
const MAX_ATTENUATION_DB: f64 = 96.0;

/// Detune offsets in cents, indexed by the DT register value.
const DETUNE_CENTS: [f64; 8] = [0.0, 1.5, 3.0, 4.5, 0.0, -1.5, -3.0, -4.5];

/// LFO frequencies in Hz, indexed by the LFO frequency register.
const LFO_FREQUENCIES: [f64; 8] = [3.98, 5.56, 6.02, 6.37, 6.88, 9.63, 48.1, 72.2];

/// Amplitude modulation depth in dB for each AMS value.
const AM_DEPTH_DB: [f64; 4] = [0.0, 1.4, 5.9, 11.8];

/// Vibrato depth in cents for each FMS value.
const FM_DEPTH_CENTS: [f64; 8] = [0.0, 3.4, 6.7, 10.0, 14.0, 20.0, 40.0, 80.0];

/// Which operators modulate which, and which reach the output.
struct Algorithm {
    /// `modulators[i]` lists operators feeding operator `i`.
    modulators: [&'static [usize]; NUM_OPERATORS],
    carriers: &'static [usize],
}

const ALGORITHMS: [Algorithm; 8] = [
    // 1 -> 2 -> 3 -> 4
    Algorithm { modulators: [&[], &[0], &[1], &[2]], carriers: &[3] },
    // (1 + 2) -> 3 -> 4
    Algorithm { modulators: [&[], &[], &[0, 1], &[2]], carriers: &[3] },
    // (1 + (2 -> 3)) -> 4
    Algorithm { modulators: [&[], &[], &[1], &[0, 2]], carriers: &[3] },
    // ((1 -> 2) + 3) -> 4
    Algorithm { modulators: [&[], &[0], &[], &[1, 2]], carriers: &[3] },
    // (1 -> 2) + (3 -> 4)
    Algorithm { modulators: [&[], &[0], &[], &[2]], carriers: &[1, 3] },
    // 1 -> 2, 1 -> 3, 1 -> 4
    Algorithm { modulators: [&[], &[0], &[0], &[0]], carriers: &[1, 2, 3] },
    // (1 -> 2) + 3 + 4
    Algorithm { modulators: [&[], &[0], &[], &[]], carriers: &[1, 2, 3] },
    // 1 + 2 + 3 + 4
    Algorithm { modulators: [&[], &[], &[], &[]], carriers: &[0, 1, 2, 3] },
];

/// Envelope phase of one operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopePhase {
    Attack,
    Decay,
    Sustain,
}

/// Per-operator rendering state.
#[derive(Debug, Clone, Copy)]
struct OperatorVoice {
    phase_step: f64,
    phase: f64,
    attenuation_db: f64,
    envelope: EnvelopePhase,
    attack_coeff: f64,
    decay1_db: f64,
    decay2_db: f64,
    sustain_db: f64,
    total_level_db: f64,
    am_enabled: bool,
    invert: bool,
}

impl OperatorVoice {
    fn new(op: &Operator, base_freq: f64, key_code: u32, sample_rate: f64) -> Self {
        let multiple = if op.multiple == 0 { 0.5 } else { f64::from(op.multiple) };
        let detune = DETUNE_CENTS[usize::from(op.detune & 7)];
        let freq = base_freq * multiple * 2f64.powf(detune / 1200.0);

        let scale = key_code >> (3 - u32::from(op.rate_scale.min(3)));
        let attack_db = rate_db_per_second(op.attack, scale) / sample_rate;
        // Attack is exponential towards 0 dB, other phases are linear in dB.
        let attack_coeff = if op.attack == 0 {
            0.0
        } else if op.attack >= 31 {
            1.0
        } else {
            (attack_db / MAX_ATTENUATION_DB * 8.0).min(1.0)
        };

        let sustain_db = if op.sustain_level >= 15 {
            93.0
        } else {
            f64::from(op.sustain_level) * 3.0
        };

        Self {
            phase_step: freq / sample_rate,
            phase: 0.0,
            attenuation_db: MAX_ATTENUATION_DB,
            envelope: EnvelopePhase::Attack,
            attack_coeff,
            decay1_db: rate_db_per_second(op.decay1, scale) / sample_rate,
            decay2_db: rate_db_per_second(op.decay2, scale) / sample_rate,
            sustain_db,
            total_level_db: f64::from(op.total_level.min(127)) * 0.75,
            am_enabled: op.am_enable != 0,
            invert: op.ssg_eg & 0b1100 == 0b1100,
        }
    }

    fn advance_envelope(&mut self) {
        match self.envelope {
            EnvelopePhase::Attack => {
                self.attenuation_db -= self.attenuation_db * self.attack_coeff;
                if self.attenuation_db < 0.01 {
                    self.attenuation_db = 0.0;
                    self.envelope = EnvelopePhase::Decay;
                }
            }
            EnvelopePhase::Decay => {
                self.attenuation_db += self.decay1_db;
                if self.attenuation_db >= self.sustain_db {
                    self.attenuation_db = self.sustain_db;
                    self.envelope = EnvelopePhase::Sustain;
                }
            }
            EnvelopePhase::Sustain => {
                self.attenuation_db =
                    (self.attenuation_db + self.decay2_db).min(MAX_ATTENUATION_DB);
            }
        }
    }

    fn output(&mut self, modulation: f64, vibrato: f64, tremolo_db: f64) -> f64 {
        let attenuation = self.attenuation_db
            + self.total_level_db
            + if self.am_enabled { tremolo_db } else { 0.0 };
        let out = if attenuation >= MAX_ATTENUATION_DB {
            0.0
        } else {
            let gain = 10f64.powf(-attenuation / 20.0);
            (2.0 * PI * self.phase + modulation).sin() * gain
        };
        self.phase = (self.phase + self.phase_step * vibrato).fract();
        if self.invert { -out } else { out }
    }
}

/// Envelope speed for a 5-bit rate register, in dB per second.
fn rate_db_per_second(rate: u8, key_scale: u32) -> f64 {
    if rate == 0 {
        return 0.0;
    }
    let effective = (2 * u32::from(rate.min(31)) + key_scale).min(63);
    // Rate 63 covers the full range in about 0.5 ms; each 4 steps halve the speed.
    let full_range_seconds = 0.0005 * 2f64.powf(f64::from(63 - effective) / 4.0);
    MAX_ATTENUATION_DB / full_range_seconds
}

/// Block/key code used for rate scaling (0-31).
fn key_code(note: i32) -> u32 {
    let note = note.clamp(0, 127) as u32;
    let octave = (note / 12).min(7);
    let upper = u32::from(note % 12 >= 6) + u32::from(note % 12 >= 9);
    (octave << 2) | upper.min(3)
}

/// Deterministic software FM voice.
#[derive(Debug, Clone, Copy, Default)]
pub struct FmSynth;

impl FmSynth {
    pub fn new() -> Self {
        Self
    }
}

impl Synthesizer for FmSynth {
    fn synthesize(
        &self,
        instrument: &Instrument,
        num_frames: usize,
        sample_rate: f64,
        note: u8,
    ) -> Result<Vec<f32>, SynthError> {
        self.check_sample_rate(sample_rate)?;

        let played = instrument.played_note(note);
        let base_freq = note_frequency(played.clamp(0, 127) as u8);
        let kc = key_code(played);

        let mut voices: [OperatorVoice; NUM_OPERATORS] = std::array::from_fn(|i| {
            OperatorVoice::new(&instrument.operators[i], base_freq, kc, sample_rate)
        });
        let algorithm = &ALGORITHMS[usize::from(instrument.algorithm & 7)];

        let lfo_on = instrument.lfo_enable != 0;
        let lfo_step = LFO_FREQUENCIES[usize::from(instrument.lfo_frequency & 7)] / sample_rate;
        let am_depth = AM_DEPTH_DB[usize::from(instrument.am_sensitivity & 3)];
        let fm_depth = FM_DEPTH_CENTS[usize::from(instrument.fm_sensitivity & 7)];
        let feedback_scale = if instrument.feedback == 0 {
            0.0
        } else {
            PI * 2f64.powi(i32::from(instrument.feedback.min(7)) - 7)
        };

        let mut lfo_phase = 0.0f64;
        let mut feedback_history = [0.0f64; 2];
        let mut outputs = [0.0f64; NUM_OPERATORS];
        let mut signal = Vec::with_capacity(num_frames);

        for _ in 0..num_frames {
            let (vibrato, tremolo_db) = if lfo_on {
                let lfo = (2.0 * PI * lfo_phase).sin();
                lfo_phase = (lfo_phase + lfo_step).fract();
                (
                    2f64.powf(lfo * fm_depth / 1200.0),
                    (1.0 - lfo) * 0.5 * am_depth,
                )
            } else {
                (1.0, 0.0)
            };

            for (i, voice) in voices.iter_mut().enumerate() {
                voice.advance_envelope();
                let modulation = if i == 0 {
                    (feedback_history[0] + feedback_history[1]) * 0.5 * feedback_scale
                } else {
                    let input: f64 = algorithm.modulators[i].iter().map(|&m| outputs[m]).sum();
                    input * MODULATION_DEPTH
                };
                outputs[i] = voice.output(modulation, vibrato, tremolo_db);
            }
            feedback_history = [feedback_history[1], outputs[0]];

            let mix: f64 = algorithm.carriers.iter().map(|&c| outputs[c]).sum();
            signal.push(mix.clamp(-1.0, 1.0) as f32);
        }

        Ok(signal)
    }
}
