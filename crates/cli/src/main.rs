use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;

use lib::archive::{Archive, NO_ARCHIVES_NOTICE};
use lib::chat::{ChatEvent, Orchestrator};
use lib::config::Config;
use lib::llm::{ChatBackend, ModelDirectory, ModelListing, OllamaClient};
use lib::session::SessionStore;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Pulse — chat with local Ollama models and browse archived conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: PULSE_CONFIG_PATH or ~/.pulse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the browser chat server (chat page at /, archive browser at /archive).
    Serve {
        /// Config file path (default: PULSE_CONFIG_PATH or ~/.pulse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8501)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Chat with the configured model in the terminal. `/archive` saves the conversation, `/exit` quits.
    Chat {
        /// Config file path (default: PULSE_CONFIG_PATH or ~/.pulse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List models installed on the Ollama server and show which one is selected.
    Models {
        /// Config file path (default: PULSE_CONFIG_PATH or ~/.pulse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List archived conversations, or print one of them.
    Archives {
        /// Config file path (default: PULSE_CONFIG_PATH or ~/.pulse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Archive file name to print (as shown in the listing)
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Some(Commands::Serve { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("pulse {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Serve { config, port }) => run_serve(config, port).await,
        Some(Commands::Chat { config }) => run_chat(config).await,
        Some(Commands::Models { config }) => run_models(config).await,
        Some(Commands::Archives { config, file }) => run_archives(config, file),
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, _) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!("starting server on {}:{}", config.server.bind, config.server.port);
    lib::web::run_server(config).await
}

fn backend(config: &Config) -> Arc<dyn ChatBackend> {
    Arc::new(OllamaClient::new(Some(
        lib::config::resolve_ollama_base_url(config),
    )))
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let directory = ModelDirectory::new(backend(&config), lib::config::resolve_model(&config));
    let listing = directory.refresh().await;
    let report = directory.report(&listing);
    if let ModelListing::Unreachable(e) = &listing {
        anyhow::bail!("could not reach the inference server: {}", e);
    }
    for m in &report.models {
        let marker = if m.name == report.selected { "*" } else { " " };
        println!("{} {}", marker, m.name);
    }
    println!("selected: {}", report.selected);
    if let Some(w) = report.warning {
        eprintln!("warning: {}", w);
    }
    if let Some(h) = report.install_hint {
        eprintln!("{}", h);
    }
    Ok(())
}

fn run_archives(config_path: Option<PathBuf>, file: Option<String>) -> anyhow::Result<()> {
    let (config, _) = lib::config::load_config(config_path)?;
    let archive = Archive::new(config.archive.directory);
    match file {
        None => {
            let files = archive.list()?;
            if files.is_empty() {
                println!("{}", NO_ARCHIVES_NOTICE);
            }
            for f in files {
                println!("{}", f);
            }
        }
        Some(name) => {
            for turn in archive.load(&name)? {
                println!("[{}] {}:", turn.time_string(), turn.role);
                println!("{}\n", turn.content.trim_end());
            }
        }
    }
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = lib::config::load_config(config_path)?;
    let backend = backend(&config);
    let model = lib::config::resolve_model(&config);
    let directory = ModelDirectory::new(backend.clone(), model.clone());
    if directory.refresh().await == ModelListing::Empty {
        let report = directory.report(&ModelListing::Empty);
        anyhow::bail!(
            "{} {}",
            report.warning.unwrap_or_default(),
            report.install_hint.unwrap_or_default()
        );
    }

    let orchestrator = Orchestrator::new(backend, model);
    let archive = Archive::new(config.archive.directory.clone());
    let store = SessionStore::new();
    let session_id = store.create().await;
    println!("chatting with {} (/archive to save, /exit to quit)", orchestrator.model());

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim_end_matches(['\r', '\n']);
        let command = input.trim();
        if command.eq_ignore_ascii_case("/exit") || command.eq_ignore_ascii_case("/quit") {
            break;
        }
        if command.eq_ignore_ascii_case("/archive") {
            let turns = store
                .get(&session_id)
                .await
                .map(|s| s.turns().to_vec())
                .unwrap_or_default();
            match archive.export(&turns) {
                Ok(path) => println!("archived to {}", path.display()),
                Err(e) => eprintln!("archive error: {}", e),
            }
            continue;
        }

        let Some(mut reply) = orchestrator.submit(&store, &session_id, input).await? else {
            continue;
        };
        write!(stdout, "< ")?;
        while let Some(event) = reply.next().await {
            match event {
                ChatEvent::Chunk(text) => {
                    write!(stdout, "{}", text)?;
                    stdout.flush()?;
                }
                ChatEvent::Done(_) => println!(),
                ChatEvent::Error(e) => {
                    println!();
                    eprintln!("chat error: {}", e);
                }
            }
        }
    }

    store.remove(&session_id).await;
    Ok(())
}
