use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::Duration;

use libpulsestream::config::{BackendKind, Config};
use libpulsestream::constants::DEFAULT_SOCKET;
use libpulsestream::process::process;
use libpulsestream::replay::ReplayServer;
use libpulsestream::stream_status::{StreamPhase, StreamStatus};
use libpulsestream::train_stack::TrainStack;

fn make_template_config(path: &Path) -> Result<(), String> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).map_err(|e| e.to_string())?;
    let mut file = File::create(path).map_err(|e| e.to_string())?;
    file.write_all(yaml_str.as_bytes())
        .map_err(|e| e.to_string())
}

fn status_message(status: &StreamStatus) -> String {
    let mut message = format!(
        "{} events from {} trains",
        status.events_processed, status.units_received
    );
    if let Some(rate) = status.hit_rate {
        message.push_str(&format!(" | hit rate {rate:.1}%"));
    }
    if let Some(id) = status.last_event_id {
        message.push_str(&format!(" | last event {id}"));
        if let Some(when) = id.datetime() {
            message.push_str(&format!(" at {}:{:02}:{:02} UTC", when.hour(), when.minute(), when.second()));
        }
    }
    message
}

fn run(config_path: &Path, pb_manager: &MultiProgress) {
    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    match config.backend {
        BackendKind::Online => log::info!(
            "Online source: {} (read ahead {} pulses)",
            config.socket,
            config.read_ahead
        ),
        BackendKind::Offline => log::info!(
            "Offline source: {}",
            config
                .data_path
                .as_deref()
                .map(|p| p.to_string_lossy())
                .unwrap_or_default()
        ),
    }
    match &config.key_schema_path {
        Some(path) => log::info!("Key schema: {}", path.to_string_lossy()),
        None => log::info!("Key schema: bundled default"),
    }
    if let Some(n) = config.n_events {
        log::info!("Event limit: {n}");
    }

    // Setup the spinner
    let pb = pb_manager.add(ProgressBar::new_spinner());
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message("Connecting...");

    let (tx, rx) = channel();
    // Spawn the task!
    let handle = std::thread::spawn(move || process(config, tx));

    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(status) => {
                if status.phase != StreamPhase::Connecting {
                    pb.set_message(status_message(&status));
                }
            }
            Err(RecvTimeoutError::Timeout) => pb.tick(),
            Err(RecvTimeoutError::Disconnected) => (),
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(summary) => log::info!(
                        "Stream complete: processed {} events from {} trains",
                        summary.events_processed,
                        summary.units_received
                    ),
                    Err(e) => log::error!("Processing failed with error: {e}"),
                },
                Err(_) => log::error!("Failed to join processing task!"),
            }
            break;
        }
    }

    pb.finish();
}

fn replay(dir: &Path, socket: &str) {
    let stack = match TrainStack::new(dir) {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    let server = match ReplayServer::bind(socket, stack) {
        Ok(s) => s,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    match server.local_addr() {
        Ok(address) => log::info!("Waiting for a client on {address}..."),
        Err(e) => log::warn!("Could not read the bound address: {e}"),
    }
    match server.serve() {
        Ok(sent) => log::info!("Replay finished after {sent} trains."),
        Err(e) => log::error!("Replay failed with error: {e}"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("pulsestream_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("run").about("Process the stream described by the configuration"))
        .subcommand(
            Command::new("replay")
                .about("Serve a directory of recorded trains as a live source")
                .arg(
                    Arg::new("dir")
                        .short('d')
                        .long("dir")
                        .required(true)
                        .help("Directory of recorded train files"),
                )
                .arg(
                    Arg::new("socket")
                        .short('s')
                        .long("socket")
                        .default_value(DEFAULT_SOCKET)
                        .help("Address to listen on"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
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

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    let config_path = matches.get_one::<String>("path").map(PathBuf::from);

    match (matches.subcommand(), config_path) {
        (Some(("replay", args)), _) => {
            let dir = args.get_one::<String>("dir").map(PathBuf::from);
            let socket = args.get_one::<String>("socket");
            if let (Some(dir), Some(socket)) = (dir, socket) {
                replay(&dir, socket);
            }
        }
        (Some(("new", _)), Some(path)) => {
            log::info!("Making a template config at {}...", path.to_string_lossy());
            match make_template_config(&path) {
                Ok(()) => log::info!("Done."),
                Err(e) => log::error!("Could not write template config: {e}"),
            }
        }
        (Some(("run", _)), Some(path)) => {
            run(&path, &pb_manager);
            log::info!("Done.");
        }
        (_, None) => log::error!("A configuration path is required (--path)"),
        _ => log::error!("Unknown command; see --help"),
    }
}
