// CouchDB bootstrap
// Main library entry point

pub mod couch;
pub mod error;
pub mod models;
pub mod prompt;
pub mod security;
pub mod utils;

pub use couch::installer::{Installer, ProgressEmitter, ProgressPayload};
pub use error::{BootstrapError, BootstrapResult};
pub use models::config::BootstrapConfig;
pub use models::state::{InstallReport, ServerEndpoint};

use anyhow::Context;
use couch::transport::ReqwestTransport;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use prompt::TerminalPrompter;
use security::credential_store::FileCredentialStore;
use security::secret_protector::SecretProtector;
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "\
Usage: couch-bootstrap [OPTIONS]

Options:
  --config=<path>       TOML configuration file
  --url=<base>          CouchDB base URL (e.g. http://127.0.0.1:5984)
  --app-name=<name>     Application name written to the config document
  --non-interactive     Never prompt; fail or fall back instead
  --timeout-ms=<n>      How long to wait for CouchDB to come up
  --quiet               No progress spinner or summary
  --verbose             Mirror log lines to stdout
  --help                Show this help

Environment: COUCH_BOOTSTRAP_<KEY> overrides any configuration key.";

/// Routes `log` records to a JSON file and a text file in the log folder, and with
/// `with_stdout` also mirrors Info and above to stdout as text.
fn init_logging(with_stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    use utils::logging::{render_record, LogFormat};

    let log_dir = utils::path_resolver::resolve_log_folder()?;
    std::fs::create_dir_all(&log_dir)?;
    let stamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    let sink = |format: LogFormat| {
        fern::Dispatch::new().format(move |out, message, record| {
            let line = render_record(format, record.level(), record.target(), &message.to_string());
            out.finish(format_args!("{}", line))
        })
    };

    let mut root = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("hyper", log::LevelFilter::Info)
        .level_for("hyper_util", log::LevelFilter::Info)
        .level_for("reqwest", log::LevelFilter::Info)
        .chain(sink(LogFormat::Json).chain(fern::log_file(
            log_dir.join(format!("bootstrap-{}.log", stamp)),
        )?))
        .chain(sink(LogFormat::Text).chain(fern::log_file(
            log_dir.join(format!("bootstrap-{}.txt", stamp)),
        )?));
    if with_stdout {
        root = root.chain(
            sink(LogFormat::Text)
                .level(log::LevelFilter::Info)
                .chain(std::io::stdout()),
        );
    }
    root.apply()?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    config: Option<PathBuf>,
    url: Option<String>,
    app_name: Option<String>,
    non_interactive: bool,
    timeout_ms: Option<u64>,
    quiet: bool,
    verbose: bool,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    for arg in args {
        let (flag, value) = match arg.split_once('=') {
            Some((f, v)) => (f, Some(v)),
            None => (arg.as_str(), None),
        };
        let required = || -> anyhow::Result<String> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("{} requires a value ({}=...)", flag, flag))
        };

        match flag {
            "--config" => cli.config = Some(PathBuf::from(required()?)),
            "--url" => cli.url = Some(required()?),
            "--app-name" => cli.app_name = Some(required()?),
            "--timeout-ms" => {
                let raw = required()?;
                let ms = raw
                    .parse::<u64>()
                    .with_context(|| format!("--timeout-ms expects milliseconds, got '{}'", raw))?;
                cli.timeout_ms = Some(ms);
            }
            "--non-interactive" | "--quiet" | "--verbose" | "--help" | "-h" if value.is_some() => {
                anyhow::bail!("{} does not take a value", flag)
            }
            "--non-interactive" => cli.non_interactive = true,
            "--quiet" => cli.quiet = true,
            "--verbose" => cli.verbose = true,
            "--help" | "-h" => cli.help = true,
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }
    Ok(cli)
}

/// Defaults, then file, then environment, then command-line flags.
fn load_config(cli: &CliArgs) -> anyhow::Result<BootstrapConfig> {
    let mut cfg = BootstrapConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.url {
        cfg.couch_url = url.clone();
    }
    if let Some(name) = &cli.app_name {
        cfg.app_name = name.clone();
    }
    if let Some(ms) = cli.timeout_ms {
        cfg.probe_timeout_ms = ms;
    }
    if cli.non_interactive {
        cfg.interactive = false;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.cyan} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}

async fn run_install(
    cfg: &BootstrapConfig,
    endpoint: &ServerEndpoint,
    spinner: Option<ProgressBar>,
) -> anyhow::Result<InstallReport> {
    let transport = Arc::new(
        ReqwestTransport::new(cfg.request_timeout()).context("Failed to build HTTP client")?,
    );

    let credentials_path = cfg.credentials_path();
    let key_path = utils::path_resolver::default_key_path(&credentials_path);
    info!(
        "[PHASE: initialization] [STEP: credential_store] Credentials file: {:?}",
        credentials_path
    );
    let secrets = Arc::new(SecretProtector::new(key_path));
    let store = Arc::new(FileCredentialStore::new(credentials_path, secrets));

    let mut installer = Installer::new(transport, store, Arc::new(TerminalPrompter::new()));
    if let Some(pb) = spinner.clone() {
        // no steady tick: it would draw over the terminal prompts
        installer = installer.with_progress(Arc::new(move |p: ProgressPayload| {
            pb.set_message(p.message);
            pb.tick();
        }));
    }

    let result = installer.install(endpoint, cfg).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    Ok(result?)
}

/// Command-line entry point. Returns the process exit code:
/// 0 on success, 1 when the bootstrap fails, 2 on usage or configuration errors.
pub fn run_cli(args: Vec<String>) -> i32 {
    let cli = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("couch-bootstrap: {:#}\n\n{}", e, USAGE);
            return 2;
        }
    };
    if cli.help {
        println!("{}", USAGE);
        return 0;
    }

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!(
        "[PHASE: initialization] CouchDB bootstrap starting at {}",
        chrono::Utc::now()
    );
    if let Ok(folder) = utils::path_resolver::resolve_deployment_folder() {
        info!(
            "[PHASE: initialization] [STEP: deployment_folder] Deployment folder: {:?}",
            folder
        );
    }

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("[PHASE: initialization] [STEP: config] {:#}", e);
            eprintln!("Configuration error: {:#}", e);
            return 2;
        }
    };
    info!("[PHASE: initialization] [STEP: config] {:?}", cfg);

    let endpoint = match ServerEndpoint::parse(&cfg.couch_url) {
        Ok(ep) => ep,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return 2;
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(
                "[PHASE: initialization] Failed to create async runtime: {}",
                e
            );
            eprintln!("Failed to create async runtime: {}", e);
            return 1;
        }
    };

    let spinner = (!cli.quiet && !cli.verbose).then(create_spinner);
    match rt.block_on(run_install(&cfg, &endpoint, spinner)) {
        Ok(report) => {
            if !cli.quiet {
                let dbs = report
                    .databases
                    .iter()
                    .map(|d| format!("{} ({:?})", d.name, d.outcome))
                    .collect::<Vec<_>>()
                    .join(", ");
                println!(
                    "CouchDB at {} is ready: admin mode {:?}, databases {}, app config {:?} [{}]",
                    endpoint, report.admin_state, dbs, report.app_config, report.correlation_id
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Bootstrap failed: {:#}", e);
            1
        }
    }
}
