//! Generation operators: evaluation, relative fitness, selection,
//! recombination and mutation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::schema::GeneSchema;

use super::engine::EngineState;
use super::fitness::{EvaluationError, FitnessEvaluator};
use super::genome::{GenomeRng, Individual};
use super::population::Population;

/// Called with the generation number and its fittest individual.
pub type GenerationCallback = Arc<dyn Fn(u64, &Individual) + Send + Sync>;

/// Called with the generation number and the relative fitness of every slot.
pub type FitnessCallback = Arc<dyn Fn(u64, &[f64]) + Send + Sync>;

/// Observers invoked from the worker thread.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_generation: Option<GenerationCallback>,
    pub on_fitness: Option<FitnessCallback>,
}

/// Errors that end a run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvolutionError {
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("Fittest slot {0} holds no individual")]
    MissingFittest(usize),
}

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Selection, recombination and mutation ran.
    Completed,
    /// No individual survived selection; the population was replaced.
    Reseeded,
    /// Quit was requested; the population and generation are unchanged.
    Cancelled,
}

/// Fixed inputs of a generation.
pub struct GenerationContext<'a> {
    pub schema: &'a GeneSchema,
    pub mutation_rate: f64,
    pub quit: &'a AtomicBool,
}

/// Score every unevaluated slot in parallel.
///
/// Returns `Ok(false)` without recording any score if `quit` is raised
/// before all work completes.
pub fn evaluate_population(
    population: &mut Population,
    evaluator: &FitnessEvaluator,
    quit: &AtomicBool,
) -> Result<bool, EvaluationError> {
    let pending: Vec<(usize, Individual)> = population
        .unevaluated_indices()
        .filter_map(|i| population.member(i).map(|ind| (i, *ind)))
        .collect();

    let results: Vec<Option<Result<(usize, f64), EvaluationError>>> = pending
        .par_iter()
        .map(|(index, individual)| {
            if quit.load(Ordering::Relaxed) {
                return None;
            }
            Some(evaluator.evaluate(&individual.instrument).map(|score| (*index, score)))
        })
        .collect();

    if quit.load(Ordering::Relaxed) || results.iter().any(Option::is_none) {
        return Ok(false);
    }
    let scores = results.into_iter().flatten().collect::<Result<Vec<_>, _>>()?;
    for (index, score) in scores {
        population.set_evaluation(index, score);
    }
    Ok(true)
}

/// Each slot's score divided by the mean over all slots.
///
/// Empty and unevaluated slots count as 0. A zero or non-finite mean gives
/// all zeros.
pub fn relative_fitness(population: &Population) -> Vec<f64> {
    let scores = population.evaluations();
    if scores.is_empty() {
        return scores;
    }
    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    if avg == 0.0 || !avg.is_finite() {
        return vec![0.0; scores.len()];
    }
    scores.into_iter().map(|s| s / avg).collect()
}

/// Index of the largest value, first one on ties.
pub fn fittest_index(relative: &[f64]) -> Option<usize> {
    relative
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &f)| match best {
            Some((_, b)) if f <= b => best,
            _ => Some((i, f)),
        })
        .map(|(i, _)| i)
}

/// Fitness-proportional survival into a fresh population.
///
/// Slots with relative fitness at least 1 keep their place and score.
/// Slots above 1 then get `floor(f) - 1` extra copies plus one more with
/// probability `f - floor(f)`, placed in the lowest free slots while room
/// remains.
pub fn select(population: &Population, relative: &[f64], rng: &mut GenomeRng) -> Population {
    let mut next = Population::create_empty(population.capacity());

    for (index, &f) in relative.iter().enumerate() {
        if f >= 1.0
            && let Some(individual) = population.member(index)
        {
            next.replace_member(index, *individual);
            next.set_evaluation(index, population.evaluation(index));
        }
    }

    for (index, &f) in relative.iter().enumerate() {
        if f <= 1.0 {
            continue;
        }
        let Some(individual) = population.member(index) else {
            continue;
        };
        let score = population.evaluation(index);
        let mut remaining = f - 1.0;
        while remaining > 0.0 && !next.is_full() {
            if rng.unit() < remaining
                && let Ok(slot) = next.add_member(*individual)
            {
                next.set_evaluation(slot, score);
            }
            remaining -= 1.0;
        }
    }

    next
}

/// Fill every empty slot with a child of two survivors.
///
/// Parents are drawn uniformly with replacement from the slots occupied
/// before filling begins.
pub fn recombine_population(population: &mut Population, schema: &GeneSchema, rng: &mut GenomeRng) {
    let parents: Vec<Individual> = population
        .occupied_indices()
        .filter_map(|i| population.member(i).copied())
        .collect();
    if parents.is_empty() {
        return;
    }

    let empty: Vec<usize> = (0..population.capacity())
        .filter(|&i| population.member(i).is_none())
        .collect();
    for index in empty {
        let parent1 = parents[rng.index(parents.len())];
        let parent2 = parents[rng.index(parents.len())];
        let child = rng.recombine(&parent1, &parent2, schema);
        population.replace_member(index, child);
    }
}

/// Mutate every occupied slot. Returns the number of slots changed, which
/// are left unevaluated.
pub fn mutate_population(
    population: &mut Population,
    schema: &GeneSchema,
    rate: f64,
    rng: &mut GenomeRng,
) -> usize {
    let occupied: Vec<usize> = population.occupied_indices().collect();
    let mut mutated = 0;
    for index in occupied {
        let Some(mut individual) = population.member(index).copied() else {
            continue;
        };
        if rng.mutate(&mut individual, rate, schema) {
            population.replace_member(index, individual);
            mutated += 1;
        }
    }
    mutated
}

/// Run one generation on `state`, which the caller keeps locked.
///
/// Quit is checked during evaluation and again after every later step.
/// Once it is seen the generation stops without replacing the population,
/// advancing the generation count or notifying `on_generation`.
pub fn step_generation(
    state: &mut EngineState,
    ctx: &GenerationContext<'_>,
    rng: &mut GenomeRng,
    callbacks: &Callbacks,
) -> Result<GenerationOutcome, EvolutionError> {
    let cancelled = || ctx.quit.load(Ordering::Relaxed);

    if !evaluate_population(&mut state.population, &state.evaluator, ctx.quit)? {
        return Ok(GenerationOutcome::Cancelled);
    }

    let relative = relative_fitness(&state.population);
    let fittest = fittest_index(&relative);
    let fittest_member = fittest.and_then(|i| state.population.member(i).copied());
    let best_score = fittest.map_or(0.0, |i| state.population.evaluation(i));
    if let Some(on_fitness) = &callbacks.on_fitness {
        on_fitness(state.generation, &relative);
    }
    if cancelled() {
        return Ok(GenerationOutcome::Cancelled);
    }

    let mut next = select(&state.population, &relative, rng);
    if cancelled() {
        return Ok(GenerationOutcome::Cancelled);
    }
    if next.is_empty() {
        log::warn!(
            "Generation {}: no survivors, reseeding {} individuals",
            state.generation,
            state.population.capacity()
        );
        state.population = Population::create_random(state.population.capacity(), ctx.schema, rng);
        state.generation += 1;
        return Ok(GenerationOutcome::Reseeded);
    }
    let survivors = next.size();

    recombine_population(&mut next, ctx.schema, rng);
    if cancelled() {
        return Ok(GenerationOutcome::Cancelled);
    }
    let mutated = mutate_population(&mut next, ctx.schema, ctx.mutation_rate, rng);
    if cancelled() {
        return Ok(GenerationOutcome::Cancelled);
    }

    let index = fittest.unwrap_or(0);
    let fittest_member = fittest_member.ok_or(EvolutionError::MissingFittest(index))?;
    state.population = next;

    log::debug!(
        "Generation {}: best score {:.4}, {} survivors, {} mutated",
        state.generation,
        best_score,
        survivors,
        mutated
    );

    if let Some(on_generation) = &callbacks.on_generation {
        on_generation(state.generation, &fittest_member);
    }

    state.generation += 1;
    Ok(GenerationOutcome::Completed)
}
