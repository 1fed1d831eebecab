use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use quake_displacement::analysis::displacement::{format_title, get_displacement};
use quake_displacement::analysis::kmeans::KmeansParams;
use quake_displacement::config::Config;
use quake_displacement::ingest::reader::read_table;
use quake_displacement::logging::{self, LogLevel, Source};
use quake_displacement::model::{InputFormat, QuakeError, Result};
use quake_displacement::render::kml::{KmlBuilder, KmlOptions};
use quake_displacement::render::plot::{plot_estimate, plot_station_map};
use quake_displacement::stations::{self, STUDY_REGION, STUDY_REGION_STATIONS};

#[derive(Parser, Debug)]
#[command(name = "quake", about = "Find and animate GPS displacements from an earthquake")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate displacements in 3 dimensions and plot each input file
    Displacement {
        /// One or more input files to process
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Number of clusters to find. Usually 2, a cluster before and after the quake
        #[arg(short = 'c', long = "clusters", alias = "c", default_value_t = 2)]
        clusters: usize,

        /// Input format: LC or reformatted
        #[arg(long, default_value = "LC", value_parser = parse_format)]
        format: InputFormat,

        /// Fix the clustering seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        /// Directory for plots (defaults to the current directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Skip plotting, only print displacements
        #[arg(long)]
        no_plot: bool,
    },

    /// Build an animated KML tour of station displacement vectors
    Kml {
        /// Input files; defaults to *.LC in the current directory
        files: Vec<PathBuf>,

        #[arg(long, default_value = "LC", value_parser = parse_format)]
        format: InputFormat,

        #[arg(short, long, default_value = "test.kml")]
        output: PathBuf,

        /// Write a KMZ archive instead of plain KML
        #[arg(long)]
        kmz: bool,

        /// sequential or concurrent (overrides config)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Fetch and list GPS stations
    Stations {
        /// Ignore any cached directory
        #[arg(long)]
        refresh: bool,
    },

    /// Plot a map of station positions
    Map {
        #[arg(short, long, default_value = "stations.svg")]
        output: PathBuf,

        /// Station codes; defaults to the study region stations
        codes: Vec<String>,
    },
}

fn parse_format(s: &str) -> std::result::Result<InputFormat, String> {
    s.parse().map_err(|e: QuakeError| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.logging.min_level().unwrap_or(LogLevel::Info)
    };
    logging::init_logger(level, config.logging.file.as_deref(), config.logging.timestamps);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logging::error(Source::System, None, &e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Displacement {
            files,
            clusters,
            format,
            seed,
            out_dir,
            no_plot,
        } => {
            let params = KmeansParams {
                k: clusters,
                seed,
                ..KmeansParams::default()
            };
            let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("."));
            run_displacement(&files, format, &params, (!no_plot).then_some(out_dir.as_path()), config)
        }
        Command::Kml {
            files,
            format,
            output,
            kmz,
            mode,
        } => {
            let mut config = config.clone();
            if let Some(mode) = mode {
                config.kml.mode = mode;
            }
            run_kml(files, format, &output, kmz, &config)
        }
        Command::Stations { refresh } => {
            let directory = stations::load_or_fetch(&config.delta, refresh)?;
            for station in directory.iter() {
                println!(
                    "{:<6} {:<4} {:>10.5} {:>11.5}  {:<24} {}",
                    station.code, station.network, station.latitude, station.longitude, station.opened, station.name
                );
            }
            Ok(())
        }
        Command::Map { output, codes } => {
            let directory = stations::load_or_fetch(&config.delta, false)?;
            let codes: Vec<String> = if codes.is_empty() {
                STUDY_REGION_STATIONS.iter().map(|c| c.to_string()).collect()
            } else {
                codes.iter().map(|c| c.to_uppercase()).collect()
            };
            let codes: Vec<&str> = codes.iter().map(String::as_str).collect();
            let size = (config.plot.width, config.plot.height);
            plot_station_map(&output, &directory, &codes, STUDY_REGION, size)?;
            Ok(())
        }
    }
}

fn run_displacement(
    files: &[PathBuf],
    format: InputFormat,
    params: &KmeansParams,
    plot_dir: Option<&Path>,
    config: &Config,
) -> Result<()> {
    let mut failed = 0;

    for file in files {
        let label = file.display().to_string();
        let result = (|| -> Result<()> {
            let table = read_table(file, format, config.input.sample_interval_secs)?;
            let estimate = get_displacement(&table, params)?;
            let title = format_title(&label, &table.component_names, &estimate.displacements);
            logging::info(Source::Cluster, None, &title);

            for (i, d) in estimate.displacements.iter().enumerate() {
                println!(
                    "{}\tevent {}\t{:.4}\t{:.4}\t{:.4}",
                    label,
                    i + 1,
                    d.north,
                    d.east,
                    d.up
                );
            }

            if let Some(dir) = plot_dir {
                let stem = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("displacement");
                let path = dir.join(format!("{}.svg", stem));
                plot_estimate(&path, &estimate, &title, (config.plot.width, config.plot.height))?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            logging::log_station_failure(Source::Cluster, &label, "displacement", &e);
            failed += 1;
        }
    }

    logging::log_batch_summary(Source::Cluster, files.len(), files.len() - failed, failed);
    if failed == files.len() {
        return Err(QuakeError::Batch(format!("none of {} input files could be processed", files.len())));
    }
    Ok(())
}

fn run_kml(files: Vec<PathBuf>, format: InputFormat, output: &Path, kmz: bool, config: &Config) -> Result<()> {
    let files = if files.is_empty() {
        glob_inputs(&config.input.default_glob)?
    } else {
        files
    };
    if files.is_empty() {
        return Err(QuakeError::Config(format!(
            "no input files match {}",
            config.input.default_glob
        )));
    }

    let directory = stations::load_or_fetch(&config.delta, false)?;
    let mut builder = KmlBuilder::new(KmlOptions::from_config(config)?);
    let mut failed = 0;

    for file in &files {
        let label = file.display().to_string();
        let result = (|| -> Result<()> {
            let code = stations::station_code_from_path(file, config.input.station_segment)?;
            let station = directory.require(&code)?;
            let table = read_table(file, format, config.input.sample_interval_secs)?;
            if table.is_empty() {
                return Err(QuakeError::EmptyTable(label.clone()));
            }
            logging::info(Source::Kml, Some(&code), &format!("{} ({} rows)", label, table.len()));
            builder.add_station(station, &table);
            Ok(())
        })();

        if let Err(e) = result {
            logging::log_station_failure(Source::Kml, &label, "kml", &e);
            failed += 1;
        }
    }

    logging::log_batch_summary(Source::Kml, files.len(), files.len() - failed, failed);
    if builder.station_count() == 0 {
        return Err(QuakeError::Batch(format!("none of {} input files gave a station to animate", files.len())));
    }

    if kmz {
        builder.save_kmz(&output.with_extension("kmz"))
    } else {
        builder.save(output)
    }
}

fn glob_inputs(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|e| QuakeError::Config(e.to_string()))?;
    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => files.push(path),
            Err(e) => logging::warn(Source::Reader, None, &format!("Skipping {}", e)),
        }
    }
    files.sort();
    Ok(files)
}
