use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::info;

use rustht::analysis::overlap::OverlapOpts;
use rustht::data::cache::BunchCache;
use rustht::data::config::HtAnalysis;
use rustht::data::file::HtFile;
use rustht::data::plane::{Plane, Signal};
use rustht::data::synthetic::SyntheticAcquisition;
use rustht::error::HtError;

/// Run the head-tail analysis chain on one acquisition file.
#[derive(Parser)]
#[command(name = "rustht", version, about)]
struct Args {
    /// System configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// System to select, defaults to the first configured one
    #[arg(long)]
    system: Option<String>,

    /// User to select
    #[arg(long)]
    user: Option<String>,

    /// Acquisition file to analyse, matched by (partial) name
    #[arg(long)]
    file: Option<String>,

    /// Analyse a synthetic acquisition instead of a file
    #[arg(long)]
    demo: bool,

    /// Result cache database to store the located bunches in
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Bunch detection threshold
    #[arg(long, default_value_t = 5.0)]
    threshold: f64,

    /// Parts per bunch for the amplitude estimate
    #[arg(long, default_value_t = 5)]
    parts: usize,

    /// Seed for the random fit-point selection
    #[arg(long)]
    seed: Option<u64>,

    /// Instability classification threshold
    #[arg(long, default_value_t = 2.35)]
    mode_threshold: f64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), HtError> {
    let (mut htf, name) = if args.demo {
        open_demo()?
    } else {
        open_from_config(args)?
    };

    htf.locate_bunches(Plane::Horizontal, Signal::Sigma, args.threshold, args.parts)?;
    info!("bunches: {:?}", htf.bunches);

    let overlap = OverlapOpts {
        seed: args.seed,
        ..OverlapOpts::default()
    };
    htf.optimise_overlap(Plane::Horizontal, Signal::Sigma, &overlap)?;

    htf.calculate_bunch_stability()?;
    htf.calculate_mode(args.mode_threshold)?;

    print_summary(&htf, &name);

    if let Some(cache_path) = &args.cache {
        let cache = BunchCache::open(cache_path, true)?;
        cache.delete(&name)?;
        cache.insert(&name, &htf.bunches)?;
        info!("stored {} bunches in {}", htf.bunches.len(), cache_path.display());
    }

    htf.close();
    Ok(())
}

fn open_from_config(args: &Args) -> Result<(HtFile, String), HtError> {
    let config_path = args.config.as_ref().ok_or_else(|| {
        HtError::Format("either --config or --demo is required".to_string())
    })?;
    let mut ht = HtAnalysis::from_config(config_path)?;

    if let Some(system) = &args.system {
        ht.set_system(system)?;
    }
    if let Some(user) = &args.user {
        ht.set_user(user)?;
    }

    let fragment = args.file.as_deref().ok_or_else(|| {
        HtError::FileNotFound("no --file given".to_string())
    })?;
    let path = ht.file(fragment)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    info!("analysing {}", path.display());
    Ok((ht.open_file(&path)?, name))
}

fn open_demo() -> Result<(HtFile, String), HtError> {
    // a handful of filled slots, one of them coherently oscillating, with
    // a slightly wrong nominal period for the optimiser to fix
    let gen = SyntheticAcquisition {
        samples_per_turn: 1000,
        turns: 12,
        extra_samples: 48,
        pulse_width: 64,
        noise: 0.05,
        ..SyntheticAcquisition::default()
    };
    let raw = gen.build_file(&[(0, 100.0), (4, 90.0)], &[(0, 40.0)]);
    let mut htf = HtFile::new(raw);
    htf.set_harmonic(gen.harmonic)?;
    htf.set_frev(997.0 * gen.sampling_period)?;
    Ok((htf, "demo".to_string()))
}

fn print_summary(htf: &HtFile, name: &str) {
    println!("file:     {}", name);
    println!("device:   {}", htf.device);
    println!("bunches:  {:?}", htf.bunches);
    println!("frev:     {:.6e} s", htf.frev());
    println!("turns:    {} populated", htf.populated_turns().len());

    for plane in Plane::ALL {
        let stability = htf.bunch_stability.get(plane);
        if stability.is_empty() {
            continue;
        }
        println!("{} plane:", plane);
        for (bunch, record) in stability {
            let mode = htf.instability_mode.get(plane).get(bunch);
            match mode {
                Some(m) => println!(
                    "  bunch {:>5}: ratio {:>10.3} mode {:.1}",
                    bunch,
                    record.ratio(),
                    m
                ),
                None => println!("  bunch {:>5}: ratio {:>10.3} stable", bunch, record.ratio()),
            }
        }
    }
}
