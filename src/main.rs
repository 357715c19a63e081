use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use worm_pimc::{
    lattice_positions, FreePotential, HarmonicPotential, SimulationConfig, WormSimulation,
};

#[derive(Parser, Debug)]
#[command(version, about = "Worm-algorithm PIMC for continuous-space bosons", long_about = None)]
struct Args {
    /// YAML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the RNG seed from the config file.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Override the number of production sweeps.
    #[arg(short, long)]
    production: Option<usize>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mut config = match args.config {
        Some(path) => match SimulationConfig::from_yaml_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {}", err);
                return ExitCode::FAILURE;
            }
        },
        None => SimulationConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(production) = args.production {
        config.production_sweeps = production;
    }

    println!("=== Worm-algorithm PIMC ===");
    println!("Particles:        {}", config.num_particles);
    println!("Time slices (M):  {}", config.num_time_slices);
    println!("τ:                {:.4}", config.tau);
    println!("β = Mτ:           {:.4}", config.tau * config.num_time_slices as f64);
    println!("Box side:         {:.4}", config.box_side);
    println!("Worm constant C:  {:.4}", config.worm_constant);
    println!("Mbar:             {}", config.mbar);
    println!("Ensemble:         {}", if config.canonical { "canonical" } else { "grand canonical" });
    println!("Seed:             {}", config.seed);
    println!();

    let cell = config.cell();
    let positions = lattice_positions(config.num_particles, &cell);
    let path = worm_pimc::Path::new(cell, config.num_time_slices, &positions);

    // the binary supports free particles and a harmonic trap; other
    // potentials plug in through the library seam
    if config.omega > 0.0 {
        let sim = WormSimulation::new(
            path,
            HarmonicPotential { omega: config.omega },
            config.constants(),
            config.canonical,
            config.seed,
        );
        run(sim, &config)
    } else {
        let sim = WormSimulation::new(
            path,
            FreePotential,
            config.constants(),
            config.canonical,
            config.seed,
        );
        run(sim, &config)
    }
}

fn run<V: worm_pimc::Potential>(mut sim: WormSimulation<V>, config: &SimulationConfig) -> ExitCode {
    println!("Equilibrating ({} sweeps)...", config.equilibration_sweeps);
    sim.equilibrate(config.equilibration_sweeps);
    sim.totals.reset();

    println!("Production ({} sweeps)...", config.production_sweeps);
    let report_every = (config.production_sweeps / 10).max(1);
    for sweep in 0..config.production_sweeps {
        sim.sweep();
        if sweep % report_every == 0 {
            println!(
                "  Sweep {:6}: N = {:3}, sector = {}, acceptance = {:.2}%",
                sweep,
                sim.path.get_true_num_particles(),
                if sim.path.is_diagonal() { "diagonal" } else { "off-diagonal" },
                100.0 * sim.totals.acceptance_ratio()
            );
        }
    }

    println!();
    println!("=== Results ===");
    println!("Off-diagonal fraction: {:.4}", sim.off_diagonal_fraction());
    println!("Final particle count:  {}", sim.path.get_true_num_particles());
    println!();
    println!("{}", sim.acceptance_report());
    ExitCode::SUCCESS
}
