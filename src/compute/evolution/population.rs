//! Fixed-capacity population of individuals with per-slot evaluation state.

use std::collections::BTreeSet;

use crate::schema::GeneSchema;

use super::genome::{GenomeRng, Individual};

/// Occupancy and evaluation state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Absent,
    Unevaluated,
    Evaluated,
}

#[derive(Debug, Clone)]
struct Slot {
    status: SlotStatus,
    individual: Individual,
    score: f64,
}

impl Slot {
    fn empty() -> Self {
        Self {
            status: SlotStatus::Absent,
            individual: Individual::default(),
            score: 0.0,
        }
    }
}

/// Returned by [`Population::add_member`] when every slot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Population is full")]
pub struct NoCapacity;

/// Fixed number of slots, each empty or holding an individual.
///
/// Free slots are handed out lowest index first.
#[derive(Debug, Clone)]
pub struct Population {
    slots: Vec<Slot>,
    free: BTreeSet<usize>,
    size: usize,
}

impl Population {
    /// Population with every slot empty.
    pub fn create_empty(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::empty(); capacity],
            free: (0..capacity).collect(),
            size: 0,
        }
    }

    /// Full population of random individuals, all unevaluated.
    pub fn create_random(size: usize, schema: &GeneSchema, rng: &mut GenomeRng) -> Self {
        let mut population = Self::create_empty(size);
        for index in 0..size {
            population.replace_member(index, rng.random_individual(schema));
        }
        population
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.slots.len()
    }

    fn slot(&self, index: usize) -> &Slot {
        assert!(
            index < self.slots.len(),
            "population index {} out of range (capacity {})",
            index,
            self.slots.len()
        );
        &self.slots[index]
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot {
        assert!(
            index < self.slots.len(),
            "population index {} out of range (capacity {})",
            index,
            self.slots.len()
        );
        &mut self.slots[index]
    }

    /// Place an individual in the lowest free slot.
    pub fn add_member(&mut self, individual: Individual) -> Result<usize, NoCapacity> {
        let index = self.free.pop_first().ok_or(NoCapacity)?;
        let slot = &mut self.slots[index];
        slot.status = SlotStatus::Unevaluated;
        slot.individual = individual;
        slot.score = 0.0;
        self.size += 1;
        Ok(index)
    }

    /// Put an individual at `index`, occupying the slot if it was empty.
    /// The slot becomes unevaluated.
    pub fn replace_member(&mut self, index: usize, individual: Individual) {
        let slot = self.slot_mut(index);
        let was_absent = slot.status == SlotStatus::Absent;
        slot.status = SlotStatus::Unevaluated;
        slot.individual = individual;
        slot.score = 0.0;
        if was_absent {
            self.free.remove(&index);
            self.size += 1;
        }
    }

    /// Empty a slot. Returns `false` if it was already empty.
    pub fn remove_member(&mut self, index: usize) -> bool {
        let slot = self.slot_mut(index);
        if slot.status == SlotStatus::Absent {
            return false;
        }
        *slot = Slot::empty();
        self.free.insert(index);
        self.size -= 1;
        true
    }

    pub fn member(&self, index: usize) -> Option<&Individual> {
        let slot = self.slot(index);
        (slot.status != SlotStatus::Absent).then_some(&slot.individual)
    }

    pub fn status(&self, index: usize) -> SlotStatus {
        self.slot(index).status
    }

    /// Mark every occupied slot unevaluated.
    pub fn clear_evaluation(&mut self) {
        for slot in &mut self.slots {
            if slot.status == SlotStatus::Evaluated {
                slot.status = SlotStatus::Unevaluated;
                slot.score = 0.0;
            }
        }
    }

    /// Record a score. Returns `false` (and changes nothing) for an empty slot.
    pub fn set_evaluation(&mut self, index: usize, score: f64) -> bool {
        let slot = self.slot_mut(index);
        if slot.status == SlotStatus::Absent {
            return false;
        }
        slot.status = SlotStatus::Evaluated;
        slot.score = score;
        true
    }

    /// Score of a slot, or 0.0 unless it is evaluated.
    pub fn evaluation(&self, index: usize) -> f64 {
        let slot = self.slot(index);
        if slot.status == SlotStatus::Evaluated {
            slot.score
        } else {
            0.0
        }
    }

    /// Scores of every slot in index order, 0.0 for slots without one.
    pub fn evaluations(&self) -> Vec<f64> {
        (0..self.capacity()).map(|i| self.evaluation(i)).collect()
    }

    /// Indices of occupied slots in ascending order.
    pub fn occupied_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.status != SlotStatus::Absent)
            .map(|(i, _)| i)
    }

    /// Indices of occupied slots still waiting for a score.
    pub fn unevaluated_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.status == SlotStatus::Unevaluated)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn individual(tl: u8) -> Individual {
        let mut ind = Individual::default();
        ind.instrument.operators[0].total_level = tl;
        ind
    }

    #[test]
    fn test_create_empty() {
        let pop = Population::create_empty(4);
        assert_eq!(pop.capacity(), 4);
        assert_eq!(pop.size(), 0);
        assert!(pop.is_empty());
        assert!((0..4).all(|i| pop.status(i) == SlotStatus::Absent));
    }

    #[test]
    fn test_create_random_is_full_and_unevaluated() {
        let schema = GeneSchema::opn2();
        let mut rng = GenomeRng::new(1);
        let pop = Population::create_random(10, &schema, &mut rng);
        assert!(pop.is_full());
        assert_eq!(pop.unevaluated_indices().count(), 10);
    }

    #[test]
    fn test_add_member_fills_lowest_free_slot() {
        let mut pop = Population::create_empty(3);
        assert_eq!(pop.add_member(individual(1)), Ok(0));
        assert_eq!(pop.add_member(individual(2)), Ok(1));
        assert_eq!(pop.add_member(individual(3)), Ok(2));
        assert_eq!(pop.add_member(individual(4)), Err(NoCapacity));
        assert_eq!(pop.size(), 3);

        assert!(pop.remove_member(1));
        assert!(pop.remove_member(0));
        assert_eq!(pop.add_member(individual(5)), Ok(0));
        assert_eq!(pop.add_member(individual(6)), Ok(1));
    }

    #[test]
    fn test_remove_absent_member() {
        let mut pop = Population::create_empty(2);
        assert!(!pop.remove_member(0));
        assert_eq!(pop.size(), 0);
    }

    #[test]
    fn test_evaluation_sentinel() {
        let mut pop = Population::create_empty(2);
        assert_eq!(pop.evaluation(0), 0.0);
        assert!(!pop.set_evaluation(0, 0.5));
        assert_eq!(pop.status(0), SlotStatus::Absent);

        pop.add_member(individual(0)).unwrap();
        assert_eq!(pop.evaluation(0), 0.0);
        assert!(pop.set_evaluation(0, 0.5));
        assert_eq!(pop.status(0), SlotStatus::Evaluated);
        assert_eq!(pop.evaluation(0), 0.5);

        pop.clear_evaluation();
        assert_eq!(pop.status(0), SlotStatus::Unevaluated);
        assert_eq!(pop.evaluation(0), 0.0);
    }

    #[test]
    fn test_replace_member() {
        let mut pop = Population::create_empty(3);
        pop.replace_member(2, individual(9));
        assert_eq!(pop.size(), 1);
        assert_eq!(pop.member(2), Some(&individual(9)));
        assert_eq!(pop.add_member(individual(1)), Ok(0));

        pop.set_evaluation(2, 0.3);
        pop.replace_member(2, individual(8));
        assert_eq!(pop.size(), 2);
        assert_eq!(pop.status(2), SlotStatus::Unevaluated);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        let pop = Population::create_empty(2);
        pop.status(2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Remove(usize),
        Replace(usize),
        Evaluate(usize),
        Clear,
    }

    fn op_strategy(capacity: usize) -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Add),
            (0..capacity).prop_map(Op::Remove),
            (0..capacity).prop_map(Op::Replace),
            (0..capacity).prop_map(Op::Evaluate),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_size_matches_occupied_slots(ops in prop::collection::vec(op_strategy(8), 0..64)) {
            let mut pop = Population::create_empty(8);
            for op in ops {
                match op {
                    Op::Add => {
                        let full = pop.is_full();
                        prop_assert_eq!(pop.add_member(individual(0)).is_err(), full);
                    }
                    Op::Remove(i) => { pop.remove_member(i); }
                    Op::Replace(i) => pop.replace_member(i, individual(1)),
                    Op::Evaluate(i) => { pop.set_evaluation(i, 0.25); }
                    Op::Clear => pop.clear_evaluation(),
                }
                prop_assert_eq!(pop.size(), pop.occupied_indices().count());
                prop_assert!(pop.size() <= pop.capacity());
                for i in 0..pop.capacity() {
                    if pop.status(i) != SlotStatus::Evaluated {
                        prop_assert_eq!(pop.evaluation(i), 0.0);
                    }
                }
            }
        }
    }
}
