//! Instrument patch for a four-operator OPN-family FM voice.
//!
//! Field ranges follow the chip register widths. Values outside these ranges
//! are never produced by the gene accessors, which clamp on write.

use serde::{Deserialize, Serialize};

/// Number of operators in one voice.
pub const NUM_OPERATORS: usize = 4;

/// Register-level parameters of a single operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operator {
    /// Detune (DT1), 0-7. Bit 2 selects the negative direction.
    pub detune: u8,
    /// Frequency multiple (MUL), 0-15. Zero means one half.
    pub multiple: u8,
    /// Total level (TL), 0-127, in 0.75 dB attenuation steps.
    pub total_level: u8,
    /// Rate scaling (RS), 0-3.
    pub rate_scale: u8,
    /// Attack rate (AR), 0-31.
    pub attack: u8,
    /// Amplitude modulation enable (AM), 0-1.
    pub am_enable: u8,
    /// First decay rate (D1R), 0-31.
    pub decay1: u8,
    /// Second decay rate (D2R), 0-31.
    pub decay2: u8,
    /// Sustain level (SL), 0-15, in 3 dB steps.
    pub sustain_level: u8,
    /// Release rate (RR), 0-15.
    pub release: u8,
    /// SSG-EG mode, 0-15. Bit 3 enables, bit 2 inverts the output.
    pub ssg_eg: u8,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            detune: 0,
            multiple: 1,
            total_level: 127,
            rate_scale: 0,
            attack: 31,
            am_enable: 0,
            decay1: 0,
            decay2: 0,
            sustain_level: 0,
            release: 15,
            ssg_eg: 0,
        }
    }
}

/// A complete instrument patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Operators in slot order (operator 1 carries feedback).
    pub operators: [Operator; NUM_OPERATORS],
    /// Operator 1 self-feedback, 0-7.
    pub feedback: u8,
    /// Connection algorithm, 0-7.
    pub algorithm: u8,
    /// Global LFO enable, 0-1.
    pub lfo_enable: u8,
    /// Global LFO frequency index, 0-7.
    pub lfo_frequency: u8,
    /// Amplitude modulation sensitivity (AMS), 0-3.
    pub am_sensitivity: u8,
    /// Frequency modulation sensitivity (FMS), 0-7.
    pub fm_sensitivity: u8,
    /// Semitone offset applied to the played note.
    pub note_offset: i16,
    /// Fixed key for percussion patches (0 = use the played note).
    pub percussion_key: u8,
}

impl Default for Instrument {
    /// A silent patch: every operator fully attenuated.
    fn default() -> Self {
        Self {
            operators: [Operator::default(); NUM_OPERATORS],
            feedback: 0,
            algorithm: 0,
            lfo_enable: 0,
            lfo_frequency: 0,
            am_sensitivity: 0,
            fm_sensitivity: 0,
            note_offset: 0,
            percussion_key: 0,
        }
    }
}

impl Instrument {
    /// A plain two-operator electric piano style patch, useful as a known target.
    pub fn electric_piano() -> Self {
        let mut ins = Self {
            algorithm: 4,
            feedback: 3,
            ..Self::default()
        };
        let modulator = Operator {
            multiple: 1,
            total_level: 30,
            attack: 31,
            decay1: 8,
            decay2: 2,
            sustain_level: 6,
            release: 6,
            ..Operator::default()
        };
        let carrier = Operator {
            multiple: 1,
            total_level: 0,
            attack: 31,
            decay1: 5,
            decay2: 1,
            sustain_level: 4,
            release: 6,
            ..Operator::default()
        };
        ins.operators[0] = modulator;
        ins.operators[1] = carrier;
        ins.operators[2] = modulator;
        ins.operators[3] = carrier;
        ins
    }

    /// MIDI note actually played for a requested note.
    pub fn played_note(&self, note: u8) -> i32 {
        if self.percussion_key != 0 {
            i32::from(self.percussion_key)
        } else {
            i32::from(note) + i32::from(self.note_offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_silent() {
        let ins = Instrument::default();
        assert!(ins.operators.iter().all(|op| op.total_level == 127));
    }

    #[test]
    fn test_played_note() {
        let mut ins = Instrument::default();
        assert_eq!(ins.played_note(60), 60);
        ins.note_offset = -12;
        assert_eq!(ins.played_note(60), 48);
        ins.percussion_key = 35;
        assert_eq!(ins.played_note(60), 35);
    }

    #[test]
    fn test_serialization() {
        let ins = Instrument::electric_piano();
        let json = serde_json::to_string(&ins).unwrap();
        let parsed: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ins);
    }
}
