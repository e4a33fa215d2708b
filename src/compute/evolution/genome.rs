//! Genome manipulation utilities for evolutionary search.
//!
//! Provides random generation, recombination, and mutation of instruments
//! through the gene schema.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{GeneDescriptor, GeneRole, GeneSchema, Instrument};

/// One candidate solution: an instrument patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Individual {
    pub instrument: Instrument,
}

impl Individual {
    pub fn new(instrument: Instrument) -> Self {
        Self { instrument }
    }

    /// Current value of one gene.
    pub fn gene(&self, descriptor: &GeneDescriptor) -> i32 {
        descriptor.get(&self.instrument)
    }
}

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create from an optional seed, falling back to entropy.
    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::random, Self::new)
    }

    /// Uniform draw in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// Uniform value within the gene's inclusive range.
    pub fn gene_value(&mut self, gene: &GeneDescriptor) -> i32 {
        self.rng.gen_range(gene.min..=gene.max)
    }

    /// Individual with every searched gene drawn uniformly; excluded genes
    /// keep their default.
    pub fn random_individual(&mut self, schema: &GeneSchema) -> Individual {
        let mut instrument = Instrument::default();
        for gene in schema.searched() {
            let value = self.gene_value(gene);
            gene.set(&mut instrument, value);
        }
        Individual::new(instrument)
    }

    /// Child of two parents.
    ///
    /// Starts as a copy of `parent1`, so excluded genes come from it. Bitwise
    /// genes take each bit up to the gene's maximum from either parent with
    /// equal probability; linear genes blend with a fresh weight per gene.
    pub fn recombine(
        &mut self,
        parent1: &Individual,
        parent2: &Individual,
        schema: &GeneSchema,
    ) -> Individual {
        let mut child = *parent1;
        for gene in schema.genes() {
            let a = gene.get(&parent1.instrument);
            let b = gene.get(&parent2.instrument);
            let value = match gene.role {
                GeneRole::Excluded => continue,
                GeneRole::Bitwise => self.mix_bits(a, b, gene.max),
                GeneRole::Linear => {
                    let p = self.unit();
                    blend(a, b, p)
                }
            };
            gene.set(&mut child.instrument, value);
        }
        child
    }

    fn mix_bits(&mut self, a: i32, b: i32, max: i32) -> i32 {
        let mut value = 0;
        let mut bit = 1i32;
        while bit > 0 && bit <= max {
            let source = if self.unit() < 0.5 { a } else { b };
            value |= source & bit;
            bit = bit.wrapping_shl(1);
        }
        value
    }

    /// Redraw each searched gene with probability `rate`.
    ///
    /// Returns whether any gene was redrawn.
    pub fn mutate(&mut self, individual: &mut Individual, rate: f64, schema: &GeneSchema) -> bool {
        let mut mutated = false;
        for gene in schema.searched() {
            if self.unit() < rate {
                let value = self.gene_value(gene);
                gene.set(&mut individual.instrument, value);
                mutated = true;
            }
        }
        mutated
    }

    /// Generate next u64 for seeding child RNGs.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }
}

/// Weighted blend `p*a + (1-p)*b`, rounded to the nearest integer.
fn blend(a: i32, b: i32, p: f64) -> i32 {
    (p * f64::from(a) + (1.0 - p) * f64::from(b)).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_random_individual_in_range() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(42);
        for _ in 0..20 {
            let ind = rng.random_individual(&schema);
            for gene in schema.genes() {
                let v = ind.gene(gene);
                assert!(v >= gene.min && v <= gene.max, "{} = {}", gene.name, v);
            }
        }
    }

    #[test]
    fn test_random_individual_keeps_excluded_defaults() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(3);
        let ind = rng.random_individual(&schema);
        assert_eq!(ind.instrument.lfo_enable, 0);
        assert_eq!(ind.instrument.note_offset, 0);
        assert_eq!(ind.instrument.percussion_key, 0);
    }

    #[test]
    fn test_same_seed_same_stream() {
        let schema = GeneSchema::opn2();
        let a = GenomeRng::new(9).random_individual(&schema);
        let b = GenomeRng::new(9).random_individual(&schema);
        assert_eq!(a, b);
    }

    #[test]
    fn test_recombine_inherits_excluded_from_first_parent() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(1);
        let mut p1 = rng.random_individual(&schema);
        let mut p2 = rng.random_individual(&schema);
        p1.instrument.note_offset = 12;
        p2.instrument.note_offset = -5;
        p1.instrument.lfo_frequency = 3;
        let child = rng.recombine(&p1, &p2, &schema);
        assert_eq!(child.instrument.note_offset, 12);
        assert_eq!(child.instrument.lfo_frequency, 3);
    }

    #[test]
    fn test_recombine_identical_parents() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(5);
        let p = rng.random_individual(&schema);
        assert_eq!(rng.recombine(&p, &p, &schema), p);
    }

    #[test]
    fn test_linear_blend_stays_between_parents() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(11);
        let p1 = rng.random_individual(&schema);
        let p2 = rng.random_individual(&schema);
        let child = rng.recombine(&p1, &p2, &schema);
        for gene in schema.genes().iter().filter(|g| g.role == GeneRole::Linear) {
            let (a, b) = (p1.gene(gene), p2.gene(gene));
            let v = child.gene(gene);
            assert!(v >= a.min(b) && v <= a.max(b), "{}", gene.name);
        }
    }

    #[test]
    fn test_mutation_rate_bounds() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(42);
        let original = rng.random_individual(&schema);

        let mut ind = original;
        assert!(!rng.mutate(&mut ind, 0.0, &schema));
        assert_eq!(ind, original);

        assert!(rng.mutate(&mut ind, 1.0, &schema));
        for gene in schema.genes() {
            let v = ind.gene(gene);
            assert!(v >= gene.min && v <= gene.max);
        }
    }

    #[test]
    fn test_mutation_frequency() {
        let schema = GeneSchema::opn2();
        let searched = schema.searched().count();
        let mut rng = GenomeRng::new(2024);
        let trials = 2000;
        let mut changed = 0usize;
        for _ in 0..trials {
            let mut ind = rng.random_individual(&schema);
            let before = ind;
            rng.mutate(&mut ind, 0.01, &schema);
            changed += schema
                .searched()
                .filter(|g| g.get(&before.instrument) != g.get(&ind.instrument))
                .count();
        }
        // Redraws can land on the same value, so the observed rate is a bit
        // below the nominal rate.
        let rate = changed as f64 / (trials * searched) as f64;
        assert!(rate > 0.005 && rate < 0.015, "rate = {}", rate);
    }

    proptest! {
        #[test]
        fn prop_bitwise_child_bits_come_from_parents(seed in any::<u64>()) {
            let schema = GeneSchema::opn2();
            let mut rng = GenomeRng::new(seed);
            let p1 = rng.random_individual(&schema);
            let p2 = rng.random_individual(&schema);
            let child = rng.recombine(&p1, &p2, &schema);
            for gene in schema.genes().iter().filter(|g| g.role == GeneRole::Bitwise) {
                let (a, b, c) = (p1.gene(gene), p2.gene(gene), child.gene(gene));
                let mut bit = 1;
                while bit <= gene.max {
                    prop_assert!(c & bit == a & bit || c & bit == b & bit);
                    bit <<= 1;
                }
            }
        }
    }
}
