use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Sender};

use libats_survey::config::Config;
use libats_survey::process::{concat_recordings, import};
use libats_survey::survey::Survey;
use libats_survey::worker_status::WorkerStatus;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could not create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn load_config(path: &Path) -> Option<Config> {
    log::info!("Loading config from {}...", path.to_string_lossy());
    let config = match Config::read_config_file(path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return None;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("ATS Path: {}", config.ats_path.to_string_lossy());
    log::info!("Survey Path: {}", config.survey_path.to_string_lossy());
    if let Some(station) = &config.station {
        log::info!("Station override: {station}");
    }
    log::info!("Workers: {}", config.n_threads);
    if !config.is_n_threads_valid() {
        log::error!("Number of workers must be at least 1!");
        return None;
    }
    Some(config)
}

/// Run a pipeline stage on its own thread, pumping worker progress into
/// per-worker bars until the stage finishes.
fn run_with_progress<T, F>(pb_manager: &MultiProgress, n_workers: usize, task: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(Sender<WorkerStatus>) -> T + Send + 'static,
{
    let (tx, rx) = channel();
    let bars: Vec<ProgressBar> = (0..n_workers)
        .map(|_| pb_manager.add(ProgressBar::new(100)))
        .collect();

    let handle = std::thread::spawn(move || task(tx));

    // the sender side hangs up when the stage is done
    while let Ok(status) = rx.recv() {
        if let Some(bar) = bars.get(status.worker_id) {
            bar.set_position((status.progress * 100.0) as u64);
        }
    }
    for bar in &bars {
        bar.finish();
    }

    match handle.join() {
        Ok(result) => Some(result),
        Err(_) => {
            log::error!("Failed to join worker task!");
            None
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("ats_survey_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("import").about("Import ats recordings into a survey tree"))
        .subcommand(Command::new("cat").about("Concatenate split recordings with gap filling"))
        .subcommand(Command::new("ls").about("List the survey tree"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the config file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                config_path.to_string_lossy()
            );
            make_template_config(&config_path);
        }
        Some(("import", _)) => {
            let Some(config) = load_config(&config_path) else {
                std::process::exit(1);
            };
            let n_workers = config.n_threads as usize;
            let result = run_with_progress(&pb_manager, n_workers, move |tx| import(&config, &tx));
            match result {
                Some(Ok(survey)) => {
                    log::info!("Successfully imported survey!");
                    println!("{}", survey.ls());
                }
                Some(Err(e)) => {
                    log::error!("Import failed with error: {e}");
                    std::process::exit(1);
                }
                None => std::process::exit(1),
            }
        }
        Some(("cat", _)) => {
            let Some(config) = load_config(&config_path) else {
                std::process::exit(1);
            };
            let n_workers = config.n_threads as usize;
            let result = run_with_progress(&pb_manager, n_workers, move |tx| {
                concat_recordings(&config, &tx)
            });
            match result {
                Some(Ok(outcomes)) => {
                    log::info!(
                        "Successfully concatenated {} channel groups!",
                        outcomes.len()
                    );
                    for outcome in outcomes {
                        log::info!(
                            "{}: {} samples ({} filled)",
                            outcome.output.to_string_lossy(),
                            outcome.samples,
                            outcome.filled
                        );
                    }
                }
                Some(Err(e)) => {
                    log::error!("Concatenation failed with error: {e}");
                    std::process::exit(1);
                }
                None => std::process::exit(1),
            }
        }
        Some(("ls", _)) => {
            let Some(config) = load_config(&config_path) else {
                std::process::exit(1);
            };
            match Survey::open(&config.survey_path) {
                Ok(survey) => println!("{}", survey.ls()),
                Err(e) => {
                    log::error!("{e}");
                    std::process::exit(1);
                }
            }
        }
        _ => (),
    }

    log::info!("Done.");
}
