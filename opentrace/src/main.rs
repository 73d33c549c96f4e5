use clap::Parser;
use opentrace::config::AppConfig;
use opentrace::config_manager::ConfigManager;
use opentrace::{core_logic, logger};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Command line options for opentrace
#[derive(Debug, Parser)]
#[command(author, version, about = "Reports which processes call openat", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML). If not provided, search order applies.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only these probes, ignoring the config's probe map. Repeatable.
    #[arg(short, long = "probe")]
    probes: Vec<String>,

    /// Print the path that was selected for configuration and exit
    #[arg(long)]
    print_config_path: bool,
}

fn candidate_config_paths() -> Vec<PathBuf> {
    let mut cands = vec![
        PathBuf::from("./opentrace.yaml"),
        PathBuf::from("/etc/opentrace/config.yaml"),
    ];
    if let Ok(home) = env::var("XDG_CONFIG_HOME") {
        cands.push(PathBuf::from(home).join("opentrace/config.yaml"));
    }
    if let Some(home_dir) = dirs_next::home_dir() {
        cands.push(home_dir.join(".config/opentrace/config.yaml"));
    }
    cands
}

// None means no file was found and built-in defaults apply.
fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(explicit) = &cli.config {
        return Some(explicit.clone());
    }
    if let Ok(env_path) = env::var("OPENTRACE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    candidate_config_paths().into_iter().find(|cand| cand.exists())
}

fn main() {
    let cli = Cli::parse();
    let config_path = resolve_config_path(&cli);

    if cli.print_config_path {
        match &config_path {
            Some(path) => println!("{}", path.display()),
            None => println!("<built-in defaults>"),
        }
        return;
    }

    let config_path = match config_path.map(|p| std::fs::canonicalize(&p).map_err(|e| (p, e))) {
        None => None,
        Some(Ok(path)) => Some(path),
        Some(Err((path, e))) => {
            eprintln!("Error: cannot access config {:?}: {}", path, e);
            std::process::exit(1);
        }
    };

    let mut config = match &config_path {
        Some(path) => match AppConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };
    if !cli.probes.is_empty() {
        config.only_probes(cli.probes.iter().cloned());
    }

    let _log_guard = match logger::init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    match &config_path {
        Some(path) => tracing::info!("Config resolution: using {:?}", path),
        None => tracing::info!("Config resolution: no file found, using built-in defaults"),
    }

    let config_manager = ConfigManager::new(Arc::new(RwLock::new(config)), config_path)
        .with_probe_override(cli.probes);
    if let Err(e) = core_logic::async_runtime(config_manager) {
        tracing::error!("Core logic error: {:#}", e);
        std::process::exit(1);
    }
}
