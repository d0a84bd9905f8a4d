//! Voxel Life CLI - Run simulations from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use voxel_life::{
    compute::{Simulation, SimulationBackend},
    pattern::{self, PatternMetadata},
    schema::SimulationConfig,
};

struct Args {
    config: PathBuf,
    steps: u64,
    save: Option<PathBuf>,
    load: Option<PathBuf>,
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} <config.json> [steps] [--save out.3dlife] [--load in.3dlife]",
        program
    );
    eprintln!();
    eprintln!("Run a 3D life simulation from JSON configuration.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.json  Path to simulation configuration file");
    eprintln!("  steps        Number of generations (default: 100)");
    eprintln!("  --load FILE  Start from a saved pattern instead of the seed");
    eprintln!("  --save FILE  Write the final grid as a pattern");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn parse_args(args: &[String]) -> Option<Args> {
    let mut config = None;
    let mut steps = None;
    let mut save = None;
    let mut load = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--save" => save = Some(PathBuf::from(iter.next()?)),
            "--load" => load = Some(PathBuf::from(iter.next()?)),
            _ if config.is_none() => config = Some(PathBuf::from(arg)),
            _ if steps.is_none() => steps = Some(arg.parse().ok()?),
            _ => return None,
        }
    }

    Some(Args {
        config: config?,
        steps: steps.unwrap_or(100),
        save,
        load,
    })
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.get(1).map(String::as_str) == Some("--example") {
        print_example_config();
        return;
    }

    let Some(args) = parse_args(&args) else {
        print_usage(&args[0]);
        std::process::exit(1);
    };

    // Load configuration
    let config_str = fs::read_to_string(&args.config).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: SimulationConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    let mut sim = Simulation::from_config(&config).unwrap_or_else(|e| {
        eprintln!("Error creating simulation: {}", e);
        std::process::exit(1);
    });

    if let Some(path) = &args.load {
        let bytes = fs::read(path).unwrap_or_else(|e| {
            eprintln!("Error reading pattern file: {}", e);
            std::process::exit(1);
        });
        if let Err(e) = sim.backend_mut().load_pattern(&bytes) {
            eprintln!("Error loading pattern: {}", e);
            std::process::exit(1);
        }
    }

    let Some(grid) = sim.grid() else {
        eprintln!("Simulation has no grid");
        std::process::exit(1);
    };

    println!("Voxel Life Simulation");
    println!("=====================");
    println!("Grid: {}", grid.dimensions());
    println!("Rule: {}", grid.rule());
    println!("Boundary: {}", grid.boundary().name());
    println!("Backend: {:?}", sim.backend().kind());
    println!("Steps: {}", args.steps);
    println!();
    println!("Initial state:");
    println!("  Generation: {}", grid.generation());
    println!("  Population: {}", grid.population());
    println!();

    // Run simulation
    println!("Running simulation...");
    let start = Instant::now();
    let progress_every = (args.steps / 10).max(1);

    for i in 0..args.steps {
        let report = sim.step().unwrap_or_else(|e| {
            eprintln!("Step {} failed: {}", i + 1, e);
            std::process::exit(1);
        });

        // Print progress every 10%
        if (i + 1) % progress_every == 0 {
            let elapsed = start.elapsed().as_secs_f32();
            let steps_per_sec = (i + 1) as f32 / elapsed;
            println!(
                "  Step {}/{}: alive={}, {:.1} steps/s",
                i + 1,
                args.steps,
                report.alive,
                steps_per_sec
            );
        }
    }

    let elapsed = start.elapsed();
    let metrics = sim.backend().metrics();

    println!();
    println!("Final state:");
    if let Some(grid) = sim.grid() {
        println!("  Generation: {}", grid.generation());
        println!("  Population: {}", grid.population());
    }
    println!(
        "  Throughput: {:.0} cells/s (avg step {:.3} ms)",
        metrics.cells_per_second,
        metrics.average_step_nanos as f64 / 1e6
    );
    println!(
        "  Memory efficiency: {:.1}%",
        metrics.memory_efficiency * 100.0
    );
    println!(
        "Time: {:.2}s ({:.1} steps/s)",
        elapsed.as_secs_f32(),
        args.steps as f32 / elapsed.as_secs_f32()
    );

    if let Some(path) = &args.save {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let result = sim
            .grid()
            .ok_or(voxel_life::EngineError::NotInitialized)
            .and_then(|grid| {
                Ok(pattern::save_to_file(
                    path,
                    grid,
                    &PatternMetadata::named(name),
                    pattern::Compression::Auto,
                )?)
            });
        match result {
            Ok(()) => println!("Saved pattern to {}", path.display()),
            Err(e) => {
                eprintln!("Error saving pattern: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn print_example_config() {
    let config = SimulationConfig::default();

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
}
