use std::path::PathBuf;

use clap::{Parser, Subcommand};

use teletrk::config::GenerationConfig;
use teletrk::field::{write_field_text, FieldMap, GridSpec, SlabMagnet};
use teletrk::geometry::{AcceptanceGrid, TelescopeDetector};
use teletrk::residuals::{run_truth_fit, TruthFitConfig};
use teletrk::sim::run_simulation;
use teletrk::sweep::{run_sweep, SweepConfig};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Telescope-detector simulation and truth-seeded Kalman track fitting"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sample the slab-dipole field onto the hall grid as a text file
    WriteBfield {
        /// Output text file
        #[arg(long, default_value = "bfield.txt")]
        field_file: PathBuf,

        /// Dipole strength inside the magnet slabs [T]
        #[arg(long, default_value_t = 0.5)]
        by_tesla: f64,
    },

    /// Convert a text field map into the binary format
    ConvertBfield {
        /// Input text field map
        #[arg(long)]
        field_file: PathBuf,

        /// Output binary field map
        #[arg(long, default_value = "bfield.bin")]
        bfield_file: PathBuf,
    },

    /// Simulate particle-gun events through the telescope
    Simulate {
        /// Number of events
        #[arg(long)]
        gen_events: Option<usize>,

        /// Particles per event
        #[arg(long)]
        gen_nparticles: Option<usize>,

        /// Momentum magnitude [GeV]
        #[arg(long)]
        gen_mom_gev: Option<f64>,

        /// Polar angle range [deg]
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        gen_theta: Option<Vec<f64>>,

        /// Azimuthal angle range [deg]
        #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
        gen_phi_degree: Option<Vec<f64>>,

        /// Measurement smearing sigma [mm]
        #[arg(long)]
        smear_mm: Option<f64>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Binary field map; the built-in slab dipole is used when absent
        #[arg(long)]
        bfield_file: Option<PathBuf>,

        /// Detector geometry JSON instead of the built-in telescope
        #[arg(long)]
        use_detector_file: Option<PathBuf>,

        /// Output directory for the event files
        #[arg(long, default_value = "output-sim")]
        output_directory: PathBuf,
    },

    /// Fit simulated events with truth seeding and extract residuals
    TruthFit {
        /// Directory holding the per-event CSV files
        #[arg(long)]
        input_directory: PathBuf,

        /// Number of events to fit
        #[arg(long, default_value_t = 10)]
        input_events: usize,

        /// Events to skip at the start of the sample
        #[arg(long, default_value_t = 0)]
        input_skip: usize,

        /// RK4 integration step [mm]
        #[arg(long, default_value_t = 1.0)]
        step_mm: f64,

        /// Seed-smearing RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Binary field map; the built-in slab dipole is used when absent
        #[arg(long)]
        bfield_file: Option<PathBuf>,

        /// Detector geometry JSON instead of the built-in telescope
        #[arg(long)]
        use_detector_file: Option<PathBuf>,

        /// Per-plane material overrides (JSON)
        #[arg(long)]
        material_file: Option<PathBuf>,

        /// Per-plane acceptance windows (JSON)
        #[arg(long)]
        grid_file: Option<PathBuf>,

        /// Output directory for residual.csv and state.csv
        #[arg(long, default_value = "output-fit")]
        output_directory: PathBuf,
    },

    /// Run the full simulate-then-fit pipeline over a momentum scan
    Sweep {
        /// Momentum points [GeV]
        #[arg(long, num_args = 1.., default_values_t = vec![0.5, 1.0, 2.0, 4.0])]
        momenta_gev: Vec<f64>,

        /// Number of events per point
        #[arg(long)]
        gen_events: Option<usize>,

        /// Particles per event
        #[arg(long)]
        gen_nparticles: Option<usize>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Dipole strength inside the magnet slabs [T]
        #[arg(long, default_value_t = 0.5)]
        by_tesla: f64,

        /// Base directory for the timestamped run directory
        #[arg(long, default_value = "output-sweep")]
        output_directory: PathBuf,
    },
}

fn load_field(bfield_file: Option<&PathBuf>) -> anyhow::Result<FieldMap> {
    match bfield_file {
        Some(path) => Ok(FieldMap::read_binary(path)?),
        None => Ok(FieldMap::from_region(
            &GridSpec::default(),
            &SlabMagnet::default(),
            0.5,
        )?),
    }
}

fn load_detector(detector_file: Option<&PathBuf>) -> anyhow::Result<TelescopeDetector> {
    match detector_file {
        Some(path) => Ok(TelescopeDetector::from_json_file(path)?),
        None => Ok(TelescopeDetector::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::WriteBfield {
            field_file,
            by_tesla,
        } => {
            let spec = GridSpec::default();
            write_field_text(&field_file, &spec, &SlabMagnet::default(), by_tesla)?;
            println!(
                "Wrote {} field samples to {}",
                spec.len(),
                field_file.display()
            );
        }

        Command::ConvertBfield {
            field_file,
            bfield_file,
        } => {
            let map = FieldMap::from_text(&field_file)?;
            map.write_binary(&bfield_file)?;
            let [nx, ny, nz] = map.counts();
            println!(
                "Converted {}x{}x{} grid to {}",
                nx,
                ny,
                nz,
                bfield_file.display()
            );
        }

        Command::Simulate {
            gen_events,
            gen_nparticles,
            gen_mom_gev,
            gen_theta,
            gen_phi_degree,
            smear_mm,
            seed,
            bfield_file,
            use_detector_file,
            output_directory,
        } => {
            let mut cfg = GenerationConfig::default();
            if let Some(v) = gen_events {
                cfg.events = v;
            }
            if let Some(v) = gen_nparticles {
                cfg.nparticles = v;
            }
            if let Some(v) = gen_mom_gev {
                cfg.mom_gev = v;
            }
            if let Some(range) = gen_theta {
                cfg.theta_deg_min = range[0];
                cfg.theta_deg_max = range[1];
            }
            if let Some(range) = gen_phi_degree {
                cfg.phi_deg_min = range[0];
                cfg.phi_deg_max = range[1];
            }
            if let Some(v) = smear_mm {
                cfg.smear_mm = v;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }

            let detector = load_detector(use_detector_file.as_ref())?;
            let field = load_field(bfield_file.as_ref())?;
            let out = run_simulation(&cfg, &detector, &field, &output_directory)?;

            println!(
                "Simulated {} events, {} measurements",
                out.events, out.measurements
            );
            println!("Output directory: {}", out.output_dir.display());
        }

        Command::TruthFit {
            input_directory,
            input_events,
            input_skip,
            step_mm,
            seed,
            bfield_file,
            use_detector_file,
            material_file,
            grid_file,
            output_directory,
        } => {
            let mut detector = load_detector(use_detector_file.as_ref())?;
            if let Some(path) = material_file {
                detector.apply_material_file(&path)?;
            }
            let acceptance = match grid_file {
                Some(path) => Some(AcceptanceGrid::from_json_file(&path)?),
                None => None,
            };
            let field = load_field(bfield_file.as_ref())?;

            let cfg = TruthFitConfig {
                input_dir: input_directory,
                events: input_events,
                skip: input_skip,
                step_mm,
                seed,
            };
            let summary = run_truth_fit(
                &cfg,
                &detector,
                &field,
                acceptance.as_ref(),
                &output_directory,
            )?;

            println!(
                "Fitted {} tracks over {} events",
                summary.fitted_tracks, summary.events
            );
            println!("Residuals: {}", summary.residual_path.display());
            println!("States: {}", summary.state_path.display());
        }

        Command::Sweep {
            momenta_gev,
            gen_events,
            gen_nparticles,
            seed,
            by_tesla,
            output_directory,
        } => {
            let mut cfg = SweepConfig {
                momenta_gev,
                by_tesla,
                ..Default::default()
            };
            if let Some(v) = gen_events {
                cfg.generation.events = v;
            }
            if let Some(v) = gen_nparticles {
                cfg.generation.nparticles = v;
            }
            if let Some(v) = seed {
                cfg.generation.seed = v;
            }

            let detector = TelescopeDetector::default();
            let summary = run_sweep(&cfg, &detector, &output_directory)?;

            println!("Run directory: {}", summary.run_dir.display());
            for point in &summary.points {
                println!(
                    "{} GeV: {} measurements, {} fitted tracks",
                    point.momentum_gev, point.measurements, point.fitted_tracks
                );
            }
        }
    }

    Ok(())
}
