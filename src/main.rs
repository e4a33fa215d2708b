//! fm-evolve CLI - Search for an FM instrument matching a reference sound.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use fm_evolve::{
    compute::{evolution::EvolutionEngine, evolution::Individual, midi_note_name},
    schema::{GeneSchema, Instrument, RunConfig},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("--example") => print_example_config(),
        Some("run") if args.len() == 3 => run(Path::new(&args[2])),
        Some("eval") if args.len() == 4 => eval(Path::new(&args[2]), Path::new(&args[3])),
        _ => {
            eprintln!("Usage: {} run <config.json>", args[0]);
            eprintln!("       {} eval <config.json> <instrument.json>", args[0]);
            eprintln!("       {} --example", args[0]);
            eprintln!();
            eprintln!("Evolve an FM instrument towards a reference sound.");
            eprintln!();
            eprintln!("Commands:");
            eprintln!("  run    Run the search for the configured number of generations");
            eprintln!("  eval   Score one instrument against the configured reference");
            eprintln!();
            eprintln!("Example configuration is generated with --example flag.");
            std::process::exit(1);
        }
    }
}

fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> T {
    let text = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading {} file: {}", what, e);
        std::process::exit(1);
    });
    serde_json::from_str(&text).unwrap_or_else(|e| {
        eprintln!("Error parsing {}: {}", what, e);
        std::process::exit(1);
    })
}

fn load_config(path: &Path) -> RunConfig {
    let config: RunConfig = load_json(path, "config");
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }
    config
}

fn build_engine(config: &RunConfig) -> EvolutionEngine {
    let engine = EvolutionEngine::new(config.engine.clone(), GeneSchema::opn2())
        .unwrap_or_else(|e| {
            eprintln!("Error creating engine: {}", e);
            std::process::exit(1);
        });
    if let Err(e) = engine.load_reference(&config.reference) {
        eprintln!("Error loading reference: {}", e);
        std::process::exit(1);
    }
    engine
}

fn run(config_path: &Path) {
    let config = load_config(config_path);
    let mut engine = build_engine(&config);
    let generations = config.generations;

    {
        let state = engine.lock();
        println!("FM Instrument Evolution");
        println!("=======================");
        println!("Population: {}", config.engine.population_size);
        println!("Mutation rate: {}", config.engine.mutation_rate);
        println!(
            "Reference: {} samples at {:.0} Hz, note {}",
            state.evaluator.reference_signal().len(),
            state.evaluator.sample_rate(),
            midi_note_name(i32::from(state.evaluator.target_note()))
        );
        println!("Generations: {}", generations);
        println!();
    }

    let fittest: Arc<Mutex<Option<Individual>>> = Arc::new(Mutex::new(None));
    let best_relative = Arc::new(Mutex::new(0.0f64));
    let (tx, rx) = mpsc::channel();
    {
        let fittest = Arc::clone(&fittest);
        engine.set_generation_callback(move |generation, individual| {
            if let Ok(mut slot) = fittest.lock() {
                *slot = Some(*individual);
            }
            let _ = tx.send(generation);
        });
    }
    {
        let best_relative = Arc::clone(&best_relative);
        engine.set_fitness_callback(move |_, relative| {
            if let Ok(mut best) = best_relative.lock() {
                *best = relative.iter().copied().fold(0.0, f64::max);
            }
        });
    }

    println!("Running evolution...");
    let start = Instant::now();
    if let Err(e) = engine.start() {
        eprintln!("Error starting engine: {}", e);
        std::process::exit(1);
    }

    let report_every = (generations / 10).max(1);
    let mut completed = 0u64;
    while completed < generations {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(generation) => {
                completed = generation + 1;
                if completed % report_every == 0 {
                    let best = best_relative.lock().map(|b| *b).unwrap_or(0.0);
                    let elapsed = start.elapsed().as_secs_f32();
                    println!(
                        "  Generation {}/{}: best/mean={:.3}, {:.2} gen/s",
                        completed,
                        generations,
                        best,
                        completed as f32 / elapsed
                    );
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) if engine.is_running() => {}
            Err(_) => break,
        }
    }
    engine.stop();

    if let Some(fault) = engine.take_fault() {
        eprintln!("Evolution failed: {}", fault);
        std::process::exit(1);
    }

    let Some(best) = fittest.lock().ok().and_then(|f| *f) else {
        eprintln!("No generation completed");
        std::process::exit(1);
    };

    let score = engine.lock().evaluator.evaluate(&best.instrument);
    println!();
    match score {
        Ok(score) => println!("Best score: {:.6}", score),
        Err(e) => eprintln!("Error scoring best instrument: {}", e),
    }
    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
    println!();
    println!("Best instrument:");
    match serde_json::to_string_pretty(&best.instrument) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing instrument: {}", e);
            std::process::exit(1);
        }
    }
}

fn eval(config_path: &Path, instrument_path: &Path) {
    let config = load_config(config_path);
    let instrument: Instrument = load_json(instrument_path, "instrument");
    let engine = build_engine(&config);

    let state = engine.lock();
    match state.evaluator.error(&instrument) {
        Ok(error) => {
            println!("Error: {:.6}", error);
            println!("Score: {:.6}", fm_evolve::compute::evolution::score_from_error(error));
        }
        Err(e) => {
            eprintln!("Error evaluating instrument: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_example_config() {
    let config = RunConfig::default();
    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example: {}", e),
    }
}
