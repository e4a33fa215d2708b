//! Gene schema: the ordered list of tunable instrument parameters.
//!
//! Each descriptor carries its value range, its role in the search and an
//! accessor target used to read or write the parameter on an [`Instrument`].

use super::instrument::{Instrument, NUM_OPERATORS, Operator};

/// How a gene takes part in the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneRole {
    /// Never randomized, recombined or mutated.
    Excluded,
    /// Recombined bit by bit, each bit taken from either parent.
    Bitwise,
    /// Recombined by interpolating between the parents' values.
    Linear,
}

impl GeneRole {
    /// Whether the gene takes part in the search at all.
    #[inline]
    pub fn is_searched(self) -> bool {
        self != GeneRole::Excluded
    }
}

/// Per-operator parameter selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorParam {
    Detune,
    Multiple,
    TotalLevel,
    RateScale,
    Attack,
    AmEnable,
    Decay1,
    Decay2,
    SustainLevel,
    Release,
    SsgEg,
}

/// Voice-wide parameter selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalParam {
    Feedback,
    Algorithm,
    LfoEnable,
    LfoFrequency,
    AmSensitivity,
    FmSensitivity,
    NoteOffset,
    PercussionKey,
}

/// Which field of the instrument a gene addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneTarget {
    Global(GlobalParam),
    Operator(usize, OperatorParam),
}

/// One tunable parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneDescriptor {
    pub name: String,
    pub min: i32,
    pub max: i32,
    pub role: GeneRole,
    pub target: GeneTarget,
}

impl GeneDescriptor {
    pub fn new(
        name: impl Into<String>,
        min: i32,
        max: i32,
        role: GeneRole,
        target: GeneTarget,
    ) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            role,
            target,
        }
    }

    /// Read the parameter from an instrument.
    pub fn get(&self, ins: &Instrument) -> i32 {
        match self.target {
            GeneTarget::Global(param) => match param {
                GlobalParam::Feedback => i32::from(ins.feedback),
                GlobalParam::Algorithm => i32::from(ins.algorithm),
                GlobalParam::LfoEnable => i32::from(ins.lfo_enable),
                GlobalParam::LfoFrequency => i32::from(ins.lfo_frequency),
                GlobalParam::AmSensitivity => i32::from(ins.am_sensitivity),
                GlobalParam::FmSensitivity => i32::from(ins.fm_sensitivity),
                GlobalParam::NoteOffset => i32::from(ins.note_offset),
                GlobalParam::PercussionKey => i32::from(ins.percussion_key),
            },
            GeneTarget::Operator(op, param) => {
                let op = &ins.operators[op];
                i32::from(*operator_field(op, param))
            }
        }
    }

    /// Write the parameter, clamping the value into `[min, max]`.
    pub fn set(&self, ins: &mut Instrument, value: i32) {
        let value = value.clamp(self.min, self.max);
        match self.target {
            GeneTarget::Global(param) => match param {
                GlobalParam::Feedback => ins.feedback = to_u8(value),
                GlobalParam::Algorithm => ins.algorithm = to_u8(value),
                GlobalParam::LfoEnable => ins.lfo_enable = to_u8(value),
                GlobalParam::LfoFrequency => ins.lfo_frequency = to_u8(value),
                GlobalParam::AmSensitivity => ins.am_sensitivity = to_u8(value),
                GlobalParam::FmSensitivity => ins.fm_sensitivity = to_u8(value),
                GlobalParam::NoteOffset => {
                    ins.note_offset = value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
                }
                GlobalParam::PercussionKey => ins.percussion_key = to_u8(value),
            },
            GeneTarget::Operator(op, param) => {
                let op = &mut ins.operators[op];
                *operator_field_mut(op, param) = to_u8(value);
            }
        }
    }
}

fn to_u8(value: i32) -> u8 {
    value.clamp(0, i32::from(u8::MAX)) as u8
}

fn operator_field(op: &Operator, param: OperatorParam) -> &u8 {
    match param {
        OperatorParam::Detune => &op.detune,
        OperatorParam::Multiple => &op.multiple,
        OperatorParam::TotalLevel => &op.total_level,
        OperatorParam::RateScale => &op.rate_scale,
        OperatorParam::Attack => &op.attack,
        OperatorParam::AmEnable => &op.am_enable,
        OperatorParam::Decay1 => &op.decay1,
        OperatorParam::Decay2 => &op.decay2,
        OperatorParam::SustainLevel => &op.sustain_level,
        OperatorParam::Release => &op.release,
        OperatorParam::SsgEg => &op.ssg_eg,
    }
}

fn operator_field_mut(op: &mut Operator, param: OperatorParam) -> &mut u8 {
    match param {
        OperatorParam::Detune => &mut op.detune,
        OperatorParam::Multiple => &mut op.multiple,
        OperatorParam::TotalLevel => &mut op.total_level,
        OperatorParam::RateScale => &mut op.rate_scale,
        OperatorParam::Attack => &mut op.attack,
        OperatorParam::AmEnable => &mut op.am_enable,
        OperatorParam::Decay1 => &mut op.decay1,
        OperatorParam::Decay2 => &mut op.decay2,
        OperatorParam::SustainLevel => &mut op.sustain_level,
        OperatorParam::Release => &mut op.release,
        OperatorParam::SsgEg => &mut op.ssg_eg,
    }
}

/// Ordered, validated list of gene descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneSchema {
    genes: Vec<GeneDescriptor>,
}

impl GeneSchema {
    /// Build a schema, rejecting malformed ranges and operator targets.
    pub fn new(genes: Vec<GeneDescriptor>) -> Result<Self, SchemaError> {
        if genes.is_empty() {
            return Err(SchemaError::Empty);
        }
        for gene in &genes {
            if gene.min > gene.max {
                return Err(SchemaError::InvalidRange {
                    name: gene.name.clone(),
                    min: gene.min,
                    max: gene.max,
                });
            }
            if gene.role == GeneRole::Bitwise && gene.min < 0 {
                return Err(SchemaError::NegativeBitwiseRange(gene.name.clone()));
            }
            if let GeneTarget::Operator(index, _) = gene.target
                && index >= NUM_OPERATORS
            {
                return Err(SchemaError::InvalidOperator {
                    name: gene.name.clone(),
                    index,
                    max: NUM_OPERATORS,
                });
            }
        }
        Ok(Self { genes })
    }

    /// Schema covering every parameter of an OPN2 instrument.
    ///
    /// Detune, SSG-EG, AM enable and the algorithm are bit fields or
    /// categorical values and recombine bitwise. The LFO settings, note
    /// offset and percussion key are chip or playback settings and are left
    /// out of the search.
    pub fn opn2() -> Self {
        use GeneRole::{Bitwise, Excluded, Linear};
        use GlobalParam as G;
        use OperatorParam as O;

        let globals: [(&str, i32, i32, GeneRole, GlobalParam); 8] = [
            ("feedback", 0, 7, Linear, G::Feedback),
            ("algorithm", 0, 7, Bitwise, G::Algorithm),
            ("lfo_enable", 0, 1, Excluded, G::LfoEnable),
            ("lfo_frequency", 0, 7, Excluded, G::LfoFrequency),
            ("am_sensitivity", 0, 3, Linear, G::AmSensitivity),
            ("fm_sensitivity", 0, 7, Linear, G::FmSensitivity),
            ("note_offset", -127, 127, Excluded, G::NoteOffset),
            ("percussion_key", 0, 127, Excluded, G::PercussionKey),
        ];
        let mut genes: Vec<GeneDescriptor> = globals
            .into_iter()
            .map(|(name, min, max, role, param)| {
                GeneDescriptor::new(name, min, max, role, GeneTarget::Global(param))
            })
            .collect();

        let per_operator: [(&str, i32, GeneRole, OperatorParam); 11] = [
            ("detune", 7, Bitwise, O::Detune),
            ("multiple", 15, Linear, O::Multiple),
            ("total_level", 127, Linear, O::TotalLevel),
            ("rate_scale", 3, Linear, O::RateScale),
            ("attack", 31, Linear, O::Attack),
            ("am_enable", 1, Bitwise, O::AmEnable),
            ("decay1", 31, Linear, O::Decay1),
            ("decay2", 31, Linear, O::Decay2),
            ("sustain_level", 15, Linear, O::SustainLevel),
            ("release", 15, Linear, O::Release),
            ("ssg_eg", 15, Bitwise, O::SsgEg),
        ];
        for op in 0..NUM_OPERATORS {
            for (name, max, role, param) in per_operator {
                genes.push(GeneDescriptor::new(
                    format!("op{}.{}", op + 1, name),
                    0,
                    max,
                    role,
                    GeneTarget::Operator(op, param),
                ));
            }
        }

        Self { genes }
    }

    /// All descriptors in order.
    pub fn genes(&self) -> &[GeneDescriptor] {
        &self.genes
    }

    /// Descriptors that take part in the search.
    pub fn searched(&self) -> impl Iterator<Item = &GeneDescriptor> {
        self.genes.iter().filter(|g| g.role.is_searched())
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    /// Look up a descriptor by name.
    pub fn find(&self, name: &str) -> Option<&GeneDescriptor> {
        self.genes.iter().find(|g| g.name == name)
    }
}

impl Default for GeneSchema {
    fn default() -> Self {
        Self::opn2()
    }
}

/// Schema validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Gene schema must contain at least one gene")]
    Empty,
    #[error("Gene {name} has min ({min}) > max ({max})")]
    InvalidRange { name: String, min: i32, max: i32 },
    #[error("Bitwise gene {0} must have a non-negative range")]
    NegativeBitwiseRange(String),
    #[error("Gene {name} targets operator {index}, instrument has {max}")]
    InvalidOperator { name: String, index: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opn2_schema_is_valid() {
        let schema = GeneSchema::opn2();
        assert_eq!(schema.len(), 8 + 11 * NUM_OPERATORS);
        assert!(GeneSchema::new(schema.genes().to_vec()).is_ok());
    }

    #[test]
    fn test_get_set_roundtrip() {
        let schema = GeneSchema::opn2();
        let mut ins = Instrument::default();
        for gene in schema.genes() {
            for value in [gene.min, gene.max, (gene.min + gene.max) / 2] {
                gene.set(&mut ins, value);
                assert_eq!(gene.get(&ins), value, "gene {}", gene.name);
            }
        }
    }

    #[test]
    fn test_set_clamps() {
        let schema = GeneSchema::opn2();
        let tl = schema.find("op2.total_level").unwrap();
        let mut ins = Instrument::default();
        tl.set(&mut ins, 500);
        assert_eq!(ins.operators[1].total_level, 127);
        tl.set(&mut ins, -3);
        assert_eq!(ins.operators[1].total_level, 0);
    }

    #[test]
    fn test_operator_genes_are_independent() {
        let schema = GeneSchema::opn2();
        let mut ins = Instrument::default();
        schema.find("op3.attack").unwrap().set(&mut ins, 7);
        assert_eq!(ins.operators[2].attack, 7);
        assert_eq!(ins.operators[0].attack, Operator::default().attack);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let genes = vec![GeneDescriptor::new(
            "broken",
            5,
            2,
            GeneRole::Linear,
            GeneTarget::Global(GlobalParam::Feedback),
        )];
        assert!(matches!(
            GeneSchema::new(genes),
            Err(SchemaError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_operator_out_of_range_rejected() {
        let genes = vec![GeneDescriptor::new(
            "op9.total_level",
            0,
            127,
            GeneRole::Linear,
            GeneTarget::Operator(8, OperatorParam::TotalLevel),
        )];
        assert_eq!(
            GeneSchema::new(genes),
            Err(SchemaError::InvalidOperator {
                name: "op9.total_level".to_string(),
                index: 8,
                max: NUM_OPERATORS,
            })
        );
    }

    #[test]
    fn test_negative_bitwise_rejected() {
        let genes = vec![GeneDescriptor::new(
            "offset",
            -4,
            4,
            GeneRole::Bitwise,
            GeneTarget::Global(GlobalParam::NoteOffset),
        )];
        assert_eq!(
            GeneSchema::new(genes),
            Err(SchemaError::NegativeBitwiseRange("offset".into()))
        );
        assert_eq!(GeneSchema::new(Vec::new()), Err(SchemaError::Empty));
    }

    #[test]
    fn test_excluded_genes_not_searched() {
        let schema = GeneSchema::opn2();
        assert!(schema.searched().all(|g| g.role != GeneRole::Excluded));
        assert!(schema.searched().all(|g| g.name != "note_offset"));
    }
}
