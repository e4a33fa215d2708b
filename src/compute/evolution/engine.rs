//! Background evolution engine.
//!
//! The engine owns one worker thread that runs generations back to back.
//! All mutable search state lives in [`EngineState`] behind a single mutex,
//! which the worker holds for the duration of a generation. Controllers
//! pause the worker before touching the state (see [`EvolutionEngine::configure`]),
//! so a change never lands in the middle of a generation.
//!
//! Callbacks run on the worker thread while the state lock is held. They
//! must not call back into the engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::compute::{
    FeatureExtractor, FmSynth, MfccExtractor, Synthesizer, detect_pitch, midi_note_name, resample,
};
use crate::schema::{
    ConfigError, EngineConfig, GeneDescriptor, GeneSchema, Instrument, ReferenceSource, SchemaError,
};

use super::fitness::{EvaluationError, FitnessEvaluator};
use super::genome::{GenomeRng, Individual};
use super::population::Population;
use super::search::{
    Callbacks, EvolutionError, GenerationContext, GenerationOutcome, step_generation,
};
use super::signal::ControlSignal;

/// Mutable search state shared between the controller and the worker.
pub struct EngineState {
    pub population: Population,
    pub evaluator: FitnessEvaluator,
    /// Completed generations since the last (re)initialization.
    pub generation: u64,
}

/// Engine construction and control errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid gene schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("Failed to render reference: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("Failed to spawn evolution worker: {0}")]
    Spawn(#[source] std::io::Error),
}

struct Shared {
    state: Mutex<EngineState>,
    signal: ControlSignal,
    schema: GeneSchema,
    mutation_rate: f64,
    fault: Mutex<Option<EvolutionError>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_fault(&self) -> MutexGuard<'_, Option<EvolutionError>> {
        self.fault.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker loop: one generation per iteration until quit or a fault.
    fn run(&self, rng: &mut GenomeRng, callbacks: &Callbacks) {
        log::info!("Evolution worker started");
        while self.signal.wait_while_paused() {
            let mut state = self.lock_state();
            // Stopped or paused while this thread waited for the lock.
            if self.signal.quit_requested() {
                break;
            }
            if self.signal.is_paused() {
                continue;
            }
            let ctx = GenerationContext {
                schema: &self.schema,
                mutation_rate: self.mutation_rate,
                quit: self.signal.quit_flag(),
            };
            match step_generation(&mut state, &ctx, rng, callbacks) {
                Ok(GenerationOutcome::Cancelled) => break,
                Ok(_) => {}
                Err(err) => {
                    log::error!("Evolution stopped at generation {}: {}", state.generation, err);
                    *self.lock_fault() = Some(err);
                    break;
                }
            }
        }
        log::info!("Evolution worker finished");
    }
}

/// Evolutionary search for an instrument matching a reference sound.
pub struct EvolutionEngine {
    shared: Arc<Shared>,
    callbacks: Callbacks,
    rng: GenomeRng,
    population_size: usize,
    worker: Option<JoinHandle<()>>,
}

impl EvolutionEngine {
    /// Engine with the software FM synthesizer and MFCC features.
    pub fn new(config: EngineConfig, schema: GeneSchema) -> Result<Self, EngineError> {
        let extractor = Arc::new(MfccExtractor::new(config.features.clone()));
        Self::with_components(config, schema, Arc::new(FmSynth::new()), extractor)
    }

    /// Engine over an unvalidated gene list.
    pub fn with_genes(
        config: EngineConfig,
        genes: Vec<GeneDescriptor>,
    ) -> Result<Self, EngineError> {
        Self::new(config, GeneSchema::new(genes)?)
    }

    pub fn with_components(
        config: EngineConfig,
        schema: GeneSchema,
        synthesizer: Arc<dyn Synthesizer>,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        synthesizer
            .check_sample_rate(config.evaluation.sample_rate())
            .map_err(ConfigError::from)?;

        let mut rng = GenomeRng::from_seed(config.random_seed);
        let population = Population::create_random(config.population_size, &schema, &mut rng);
        let evaluator = FitnessEvaluator::new(synthesizer, extractor, &config.evaluation);

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    population,
                    evaluator,
                    generation: 0,
                }),
                signal: ControlSignal::new(),
                schema,
                mutation_rate: config.mutation_rate,
                fault: Mutex::new(None),
            }),
            callbacks: Callbacks::default(),
            rng,
            population_size: config.population_size,
            worker: None,
        })
    }

    /// Observe each generation's fittest individual. Takes effect on the next `start`.
    pub fn set_generation_callback<F>(&mut self, callback: F)
    where
        F: Fn(u64, &Individual) + Send + Sync + 'static,
    {
        self.callbacks.on_generation = Some(Arc::new(callback));
    }

    /// Observe each generation's relative fitness. Takes effect on the next `start`.
    pub fn set_fitness_callback<F>(&mut self, callback: F)
    where
        F: Fn(u64, &[f64]) + Send + Sync + 'static,
    {
        self.callbacks.on_fitness = Some(Arc::new(callback));
    }

    pub fn schema(&self) -> &GeneSchema {
        &self.shared.schema
    }

    /// Launch the worker with the pause flag cleared. Does nothing if it is
    /// already running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.is_running() {
            return Ok(());
        }
        self.join_worker();
        self.shared.signal.reset();

        let shared = Arc::clone(&self.shared);
        let callbacks = self.callbacks.clone();
        let mut rng = GenomeRng::new(self.rng.next_seed());
        let handle = thread::Builder::new()
            .name("fm-evolve-worker".into())
            .spawn(move || shared.run(&mut rng, &callbacks))
            .map_err(EngineError::Spawn)?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Ask the worker to quit and wait for it.
    pub fn stop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.shared.signal.request_quit();
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take()
            && handle.join().is_err()
        {
            log::error!("Evolution worker panicked");
        }
    }

    /// Whether the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Set the pause flag, returning the previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.shared.signal.set_paused(paused)
    }

    /// Flip the pause flag, returning the new value.
    pub fn toggle_paused(&self) -> bool {
        let paused = !self.is_paused();
        self.set_paused(paused);
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.shared.signal.is_paused()
    }

    /// Lock the search state. Blocks while a generation is in progress.
    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.shared.lock_state()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Replace the population with fresh random individuals and restart
    /// the generation count.
    pub fn reinitialize(&mut self) {
        let was_paused = self.set_paused(true);
        {
            let mut state = self.shared.lock_state();
            state.population =
                Population::create_random(self.population_size, &self.shared.schema, &mut self.rng);
            state.generation = 0;
        }
        self.set_paused(was_paused);
        log::info!("Population reinitialized with {} individuals", self.population_size);
    }

    /// Run `change` on the state with the worker parked between generations.
    fn with_worker_paused<R>(&self, change: impl FnOnce(&mut EngineState) -> R) -> R {
        let was_paused = self.set_paused(true);
        let result = change(&mut self.shared.lock_state());
        self.set_paused(was_paused);
        result
    }

    /// Apply a change to the evaluation context between generations.
    ///
    /// On success every score is cleared.
    pub fn configure<R, E>(
        &self,
        change: impl FnOnce(&mut EngineState) -> Result<R, E>,
    ) -> Result<R, E> {
        self.with_worker_paused(|state| {
            let result = change(state);
            if result.is_ok() {
                state.population.clear_evaluation();
            }
            result
        })
    }

    /// Replace the reference sound and clear every score.
    pub fn set_reference_signal(&self, signal: Vec<f32>) {
        self.with_worker_paused(|state| {
            state.evaluator.set_reference_signal(signal);
            state.population.clear_evaluation();
        });
    }

    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<(), EngineError> {
        self.configure(|state| -> Result<(), EngineError> {
            Ok(state.evaluator.set_sample_rate(sample_rate)?)
        })
    }

    pub fn set_target_note(&self, note: u8) -> Result<(), EngineError> {
        self.configure(|state| -> Result<(), EngineError> {
            Ok(state.evaluator.set_target_note(note)?)
        })
    }

    /// Load a reference sound and its note.
    ///
    /// Sample references are resampled to the evaluator's rate; their note
    /// is detected when not given.
    pub fn load_reference(&self, source: &ReferenceSource) -> Result<(), EngineError> {
        source.validate()?;
        self.configure(|state| -> Result<(), EngineError> {
            let evaluator = &mut state.evaluator;
            match source {
                ReferenceSource::Instrument { instrument, duration } => {
                    let frames = (duration * evaluator.sample_rate()).round() as usize;
                    let signal = evaluator.synthesize(instrument, frames.max(1))?;
                    evaluator.set_reference_signal(signal);
                }
                ReferenceSource::Samples {
                    samples,
                    sample_rate,
                    target_note,
                } => {
                    let rate = evaluator.sample_rate();
                    let signal = resample(samples, *sample_rate, rate);
                    let note = match target_note {
                        Some(note) => *note,
                        None => {
                            let note = detect_pitch(&signal, rate);
                            log::info!(
                                "Detected reference pitch {}",
                                midi_note_name(i32::from(note))
                            );
                            note
                        }
                    };
                    evaluator.set_target_note(note)?;
                    evaluator.set_reference_signal(signal);
                }
            }
            log::info!(
                "Reference loaded: {} samples at {:.0} Hz, note {}",
                evaluator.reference_signal().len(),
                evaluator.sample_rate(),
                evaluator.target_note()
            );
            Ok(())
        })
    }

    /// Render an instrument against the current reference context.
    pub fn render_instrument(&self, instrument: &Instrument) -> Result<Vec<f32>, EvaluationError> {
        self.lock().evaluator.render(instrument)
    }

    /// The error that ended the last run, if any.
    pub fn take_fault(&self) -> Option<EvolutionError> {
        self.shared.lock_fault().take()
    }
}

impl Drop for EvolutionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::SynthError;
    use crate::compute::evolution::fitness::tests::{LevelSynth, MeanExtractor};
    use crate::compute::evolution::population::SlotStatus;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn config(size: usize) -> EngineConfig {
        EngineConfig {
            population_size: size,
            random_seed: Some(42),
            ..Default::default()
        }
    }

    fn stub_engine(size: usize) -> EvolutionEngine {
        let engine = EvolutionEngine::with_components(
            config(size),
            GeneSchema::opn2(),
            Arc::new(LevelSynth),
            Arc::new(MeanExtractor),
        )
        .unwrap();
        engine.set_reference_signal(vec![0.5; 40]);
        engine
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < TIMEOUT, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    struct FailingSynth;

    impl Synthesizer for FailingSynth {
        fn synthesize(
            &self,
            _: &Instrument,
            _: usize,
            sample_rate: f64,
            _: u8,
        ) -> Result<Vec<f32>, SynthError> {
            Err(SynthError::UnsupportedSampleRate(sample_rate))
        }
    }

    #[test]
    fn test_new_engine_is_idle() {
        let engine = stub_engine(8);
        assert!(!engine.is_running());
        assert!(!engine.is_paused());
        let state = engine.lock();
        assert_eq!(state.generation, 0);
        assert!(state.population.is_full());
        assert_eq!(state.population.capacity(), 8);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = EvolutionEngine::new(config(0), GeneSchema::opn2());
        assert!(matches!(result, Err(EngineError::Config(ConfigError::InvalidPopulationSize))));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let result = EvolutionEngine::with_genes(config(4), Vec::new());
        assert!(matches!(result, Err(EngineError::Schema(SchemaError::Empty))));
    }

    #[test]
    fn test_schema_with_missing_operator_rejected() {
        use crate::schema::{GeneRole, GeneTarget, OperatorParam};

        let genes = vec![GeneDescriptor::new(
            "op9.total_level",
            0,
            127,
            GeneRole::Linear,
            GeneTarget::Operator(8, OperatorParam::TotalLevel),
        )];
        let result = EvolutionEngine::with_genes(config(4), genes);
        assert!(matches!(
            result,
            Err(EngineError::Schema(SchemaError::InvalidOperator { index: 8, .. }))
        ));
    }

    #[test]
    fn test_run_reports_generations_in_order() {
        let mut engine = stub_engine(8);
        let (tx, rx) = mpsc::channel();
        engine.set_generation_callback(move |generation, _| {
            let _ = tx.send(generation);
        });
        engine.start().unwrap();
        assert!(engine.is_running());
        // A second start is a no-op.
        engine.start().unwrap();

        for expected in 0..5 {
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), expected);
        }
        engine.stop();
        assert!(!engine.is_running());
        assert!(engine.generation() >= 5);
        assert!(engine.take_fault().is_none());
    }

    #[test]
    fn test_fitness_callback_sees_every_slot() {
        let mut engine = stub_engine(6);
        let (tx, rx) = mpsc::channel();
        engine.set_fitness_callback(move |_, relative| {
            let _ = tx.send(relative.to_vec());
        });
        engine.start().unwrap();
        let relative = rx.recv_timeout(TIMEOUT).unwrap();
        engine.stop();
        assert_eq!(relative.len(), 6);
        assert!(relative.iter().all(|f| f.is_finite() && *f >= 0.0));
    }

    #[test]
    fn test_pause_holds_generation() {
        let mut engine = stub_engine(8);
        engine.start().unwrap();
        wait_until(|| engine.generation() >= 1);

        assert!(!engine.set_paused(true));
        let held = engine.generation();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.generation(), held);

        assert!(!engine.toggle_paused());
        wait_until(|| engine.generation() > held);

        engine.set_paused(true);
        // Stopping a paused engine wakes and joins the worker.
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let mut engine = stub_engine(4);
        engine.start().unwrap();
        wait_until(|| engine.generation() >= 1);
        engine.stop();
        let before = engine.generation();
        engine.start().unwrap();
        wait_until(|| engine.generation() > before);
        engine.stop();
    }

    #[test]
    fn test_reinitialize_resets_generation_and_keeps_pause_state() {
        let mut engine = stub_engine(8);
        engine.start().unwrap();
        wait_until(|| engine.generation() >= 3);

        engine.set_paused(true);
        engine.reinitialize();
        assert!(engine.is_paused());
        {
            let state = engine.lock();
            assert_eq!(state.generation, 0);
            assert!(state.population.is_full());
            assert_eq!(state.population.unevaluated_indices().count(), 8);
        }
        engine.stop();
    }

    #[test]
    fn test_configure_clears_scores() {
        let engine = stub_engine(4);
        {
            let mut state = engine.lock();
            state.population.set_evaluation(0, 0.7);
        }
        engine.set_target_note(60).unwrap();
        let state = engine.lock();
        assert_eq!(state.evaluator.target_note(), 60);
        assert_eq!(state.population.status(0), SlotStatus::Unevaluated);
    }

    #[test]
    fn test_reference_change_clears_scores() {
        let engine = stub_engine(4);
        engine.set_paused(true);
        engine.lock().population.set_evaluation(1, 0.4);
        engine.set_reference_signal(vec![0.25; 30]);
        let state = engine.lock();
        assert_eq!(state.evaluator.reference_signal().len(), 30);
        assert_eq!(state.population.status(1), SlotStatus::Unevaluated);
        assert!(engine.is_paused());
    }

    #[test]
    fn test_rejected_sample_rate_changes_nothing() {
        let engine = stub_engine(4);
        engine.lock().population.set_evaluation(0, 0.7);
        let result = engine.set_sample_rate(44100.0);
        assert!(matches!(result, Err(EngineError::Config(ConfigError::SampleRate(_)))));
        let state = engine.lock();
        assert_eq!(state.population.evaluation(0), 0.7);
        assert!(!engine.is_paused());
    }

    #[test]
    fn test_fault_ends_run() {
        let mut engine = EvolutionEngine::with_components(
            config(4),
            GeneSchema::opn2(),
            Arc::new(FailingSynth),
            Arc::new(MeanExtractor),
        )
        .unwrap();
        engine.start().unwrap();
        wait_until(|| !engine.is_running());
        assert!(matches!(
            engine.take_fault(),
            Some(EvolutionError::Evaluation(EvaluationError::Synth(_)))
        ));
        assert!(engine.take_fault().is_none());
        assert_eq!(engine.generation(), 0);
    }

    #[test]
    fn test_load_sample_reference() {
        let engine = stub_engine(4);
        let rate = 44100.0;
        let samples: Vec<f32> = (0..8192)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / rate).sin() as f32)
            .collect();
        engine
            .load_reference(&ReferenceSource::Samples {
                samples,
                sample_rate: rate,
                target_note: None,
            })
            .unwrap();
        let state = engine.lock();
        assert_eq!(state.evaluator.target_note(), 69);
        let expected = (8192.0 * state.evaluator.sample_rate() / rate).ceil() as usize;
        assert_eq!(state.evaluator.reference_signal().len(), expected);
    }

    #[test]
    fn test_load_instrument_reference() {
        let engine = stub_engine(4);
        engine
            .load_reference(&ReferenceSource::Instrument {
                instrument: Instrument::electric_piano(),
                duration: 0.01,
            })
            .unwrap();
        let state = engine.lock();
        let expected = (0.01 * state.evaluator.sample_rate()).round() as usize;
        assert_eq!(state.evaluator.reference_signal().len(), expected);
        drop(state);

        let rendered = engine.render_instrument(&Instrument::electric_piano()).unwrap();
        assert_eq!(rendered.len(), expected);
    }
}
