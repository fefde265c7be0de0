use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use offline_db::{CacheLedger, Database};
use offline_engine::{MockEngine, MockTranscriber};
use offline_translator::catalog::{self, OFFLINE_MODELS};
use offline_translator::config::{
    db_config_to_offline_config, offline_config_to_db, speech_cache_dir, OfflineConfig,
    DEFAULT_DB_PATH, DEFAULT_MODELS_DIR,
};
use offline_translator::logging::{setup_logging, setup_worker_logging};
use offline_translator::{CustomModel, OfflineError, OfflineTranslator, ProgressReport};
use offline_types::{languages, validate_model_id};
use offline_worker::{
    serve_engine_stdio, serve_transcription_stdio, spawn_thread_transcriber, spawn_thread_worker,
    ProcessManager, TranscriptionBridge, WorkerBridge, WorkerLink,
};

/// Offline translation with a local model that loads on demand and unloads when idle.
#[derive(Parser)]
#[command(name = "offline_translator", version, about, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_DB_PATH)]
    db_path: String,

    /// Directory holding downloaded model artifacts
    #[arg(long, global = true, value_name = "DIR", default_value = DEFAULT_MODELS_DIR)]
    models_dir: PathBuf,

    /// Run the engine and transcriber in child processes instead of threads
    #[arg(long, global = true)]
    process: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog, custom and speech models with their cache status
    List,

    /// Translate text with the local model
    Translate {
        text: String,

        /// Source language code, or "auto"
        #[arg(long, default_value = languages::AUTO_DETECT)]
        from: String,

        /// Target language code
        #[arg(long)]
        to: String,

        /// Model id (defaults to the configured default model)
        #[arg(long)]
        model: Option<String>,

        /// Route hard language pairs through an intermediate language
        #[arg(long)]
        two_step: bool,
    },

    /// Delete one model's cached artifacts
    Delete { model_id: String },

    /// Delete every cached model
    Clear,

    /// Manage user-registered models
    Custom {
        #[command(subcommand)]
        action: CustomAction,
    },

    /// Inspect or clear downloaded speech models
    Asr {
        #[command(subcommand)]
        action: AsrAction,
    },

    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Transcribe raw mono 16 kHz f32 little-endian samples
    Transcribe {
        file: PathBuf,

        /// Language code, or "auto"
        #[arg(long, default_value = languages::AUTO_DETECT)]
        language: String,

        /// Speech model id (defaults to the configured one)
        #[arg(long)]
        model: Option<String>,
    },

    /// Worker process entry point
    #[command(hide = true)]
    Worker {
        #[arg(long, value_enum)]
        kind: WorkerKind,
    },
}

#[derive(Subcommand)]
enum CustomAction {
    Add {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        model_url: String,
        #[arg(long)]
        model_lib_url: String,
    },
    Remove {
        id: String,
    },
    List,
}

#[derive(Subcommand)]
enum AsrAction {
    /// Show whether speech models are downloaded
    Status { model_id: Option<String> },
    /// Delete every downloaded speech model
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkerKind {
    Engine,
    Transcription,
}

impl WorkerKind {
    fn as_arg(self) -> &'static str {
        match self {
            WorkerKind::Engine => "engine",
            WorkerKind::Transcription => "transcription",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Workers talk JSON on stdout and must not run inside a tokio runtime.
    if let Commands::Worker { kind } = cli.command {
        if let Err(e) = setup_worker_logging(level) {
            eprintln!("Failed to set up logging: {e}");
        }
        match kind {
            WorkerKind::Engine => {
                serve_engine_stdio(MockEngine::new().with_models_dir(&cli.models_dir))
            }
            WorkerKind::Transcription => serve_transcription_stdio(
                MockTranscriber::new().with_cache_dir(speech_cache_dir(&cli.models_dir)),
            ),
        }
        return Ok(());
    }

    if let Err(e) = setup_logging(level) {
        eprintln!("Failed to set up logging: {e}");
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let db = Arc::new(open_database(&cli.db_path)?);
    let mut config = db_config_to_offline_config(&db.load_config(), cli.models_dir.clone());

    match &cli.command {
        Commands::List => list_models(&cli, db, &config).await,
        Commands::Translate {
            text,
            from,
            to,
            model,
            two_step,
        } => {
            let model_id = model
                .clone()
                .or_else(|| config.default_model.clone())
                .ok_or_else(|| anyhow!("No model given and no default_model configured"))?;
            if !languages::is_supported(from) || !languages::is_supported(to) {
                bail!("Unsupported language pair {from} -> {to}");
            }
            let translator = build_translator(&cli, db, &config, false)?;
            translate(
                translator,
                &model_id,
                text,
                from,
                to,
                *two_step || config.two_step_enabled,
                &config,
            )
            .await
        }
        Commands::Delete { model_id } => {
            let translator = build_translator(&cli, db, &config, false)?;
            match translator.delete_model(model_id).await {
                Ok(()) => println!("Deleted {model_id}"),
                Err(e @ OfflineError::DeleteFailure { .. }) => {
                    println!("Removed {model_id} from the cache list; purge reported: {e}")
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }
        Commands::Clear => {
            let translator = build_translator(&cli, db, &config, false)?;
            let failures = translator.clear_all_models().await;
            if failures.is_empty() {
                println!("All cached models deleted");
            } else {
                println!("Cleared with {} failure(s):", failures.len());
                for failure in failures {
                    println!("  {failure}");
                }
            }
            Ok(())
        }
        Commands::Custom { action } => custom_models(&db, action),
        Commands::Asr { action } => {
            let translator = build_translator(&cli, db, &config, true)?;
            match action {
                AsrAction::Status { model_id: Some(model_id) } => {
                    let cached = translator.asr_cache_status(model_id).await?;
                    println!("{model_id}\t{}", if cached { "cached" } else { "not cached" });
                }
                AsrAction::Status { model_id: None } => {
                    for (model_id, cached) in translator.asr_cache_statuses().await? {
                        println!("{model_id}\t{}", if cached { "cached" } else { "not cached" });
                    }
                }
                AsrAction::Clear => {
                    translator.clear_asr_cache().await?;
                    println!("Speech model cache cleared");
                }
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&offline_config_to_db(&config))?;
                println!("{json}");
                Ok(())
            }
            ConfigAction::Set { key, value } => {
                config.set(key, value).map_err(anyhow::Error::msg)?;
                db.save_config(&offline_config_to_db(&config))
                    .map_err(anyhow::Error::msg)?;
                println!("{key} updated");
                Ok(())
            }
        },
        Commands::Transcribe {
            file,
            language,
            model,
        } => {
            let model_id = model
                .clone()
                .or_else(|| config.asr_model.clone())
                .or_else(|| catalog::asr_models().into_iter().next().map(|m| m.id))
                .ok_or_else(|| anyhow!("No speech model available"))?;
            let audio = read_samples(file)?;
            let translator = build_translator(&cli, db, &config, true)?;
            translator
                .load_asr_model(&model_id, Some(progress_printer()))
                .await?;
            let text = translator.transcribe(audio, language).await?;
            println!("{text}");
            Ok(())
        }
        Commands::Worker { .. } => Ok(()),
    }
}

fn open_database(db_path: &str) -> Result<Database> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    Database::new(db_path).map_err(anyhow::Error::msg)
}

fn worker_link<P>(cli: &Cli, kind: WorkerKind) -> Result<WorkerLink<P>>
where
    P: serde::de::DeserializeOwned + Send + 'static,
{
    let models_dir = cli.models_dir.to_string_lossy().to_string();
    let mut args = vec!["--models-dir", models_dir.as_str()];
    if cli.verbose {
        args.push("--verbose");
    }
    args.extend(["worker", "--kind", kind.as_arg()]);
    ProcessManager::spawn(&args).map_err(anyhow::Error::msg)
}

fn build_translator(
    cli: &Cli,
    db: Arc<Database>,
    config: &OfflineConfig,
    with_transcription: bool,
) -> Result<OfflineTranslator> {
    let custom = db.list_custom_models().map_err(anyhow::Error::msg)?;
    let ledger = Arc::new(CacheLedger::load(db).map_err(anyhow::Error::msg)?);

    let engine_link = if cli.process {
        worker_link(cli, WorkerKind::Engine)?
    } else {
        spawn_thread_worker(MockEngine::new().with_models_dir(&config.models_dir))
    };
    let mut translator =
        OfflineTranslator::new(Arc::new(WorkerBridge::new(engine_link)), ledger, config);

    if with_transcription {
        let asr_link = if cli.process {
            worker_link(cli, WorkerKind::Transcription)?
        } else {
            spawn_thread_transcriber(
                MockTranscriber::new().with_cache_dir(speech_cache_dir(&config.models_dir)),
            )
        };
        translator = translator.with_transcription(TranscriptionBridge::new(asr_link));
    }

    translator.set_custom_models(custom);
    translator.register_idle_unload_callback(Arc::new(|model_id: &str| {
        log::info!("[CLI] {model_id} unloaded after inactivity");
    }));
    Ok(translator)
}

/// Prints load progress to stderr until the sender side is dropped.
fn progress_printer() -> mpsc::UnboundedSender<ProgressReport> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressReport>();
    tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            eprintln!("[{:>3.0}%] {}", report.progress * 100.0, report.text);
        }
    });
    tx
}

async fn translate(
    translator: OfflineTranslator,
    model_id: &str,
    text: &str,
    from: &str,
    to: &str,
    two_step: bool,
    config: &OfflineConfig,
) -> Result<()> {
    let translator = Arc::new(translator);
    translator
        .load_model(model_id, Some(progress_printer()))
        .await?;

    let cancel = CancellationToken::new();
    {
        let translator = translator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                translator.cancel_active();
            }
        });
    }

    let result = translator
        .translate_stream(
            text,
            from,
            to,
            two_step,
            config.sampling,
            &mut |chunk| {
                print!("{chunk}");
                let _ = io::stdout().flush();
            },
            &cancel,
        )
        .await;
    println!();

    match result {
        Ok(output) if output.cancelled => {
            eprintln!("(cancelled)");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(OfflineError::EmptyIntermediateResult) => {
            bail!("The intermediate translation came back empty; try again without two-step mode")
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_models(cli: &Cli, db: Arc<Database>, config: &OfflineConfig) -> Result<()> {
    let ledger = CacheLedger::load(db.clone()).map_err(anyhow::Error::msg)?;
    let mark = |id: &str| if ledger.has(id) { "cached" } else { "" };

    println!("Models:");
    for entry in OFFLINE_MODELS {
        println!("  {:<48} {:<34} {}", entry.id, entry.name, mark(entry.id));
    }

    let custom = db.list_custom_models().map_err(anyhow::Error::msg)?;
    if !custom.is_empty() {
        println!("Custom models:");
        for model in &custom {
            println!("  {:<48} {:<34} {}", model.id, model.name, mark(model.id.as_str()));
        }
    }

    let translator = build_translator(cli, db, config, true)?;
    let statuses = translator.asr_cache_statuses().await?;
    println!("Speech models:");
    for model in catalog::asr_models() {
        let cached = statuses
            .iter()
            .any(|(id, cached)| *cached && *id == model.id);
        println!(
            "  {:<48} {:<34} {:<8} {}",
            model.id,
            model.name,
            model.size,
            if cached { "cached" } else { "" }
        );
    }

    log::debug!("[CLI] Listed models (db={})", cli.db_path);
    Ok(())
}

fn custom_models(db: &Database, action: &CustomAction) -> Result<()> {
    match action {
        CustomAction::Add {
            id,
            name,
            model_url,
            model_lib_url,
        } => {
            if let Err(e) = validate_model_id(id) {
                bail!("Invalid custom model id: {e}");
            }
            if catalog::find_model(id).is_some() {
                bail!("{id} is already a catalog model");
            }
            let model = CustomModel {
                id: id.clone(),
                name: name.clone().unwrap_or_else(|| id.clone()),
                model_url: model_url.clone(),
                model_lib_url: model_lib_url.clone(),
            };
            db.save_custom_model(&model).map_err(anyhow::Error::msg)?;
            println!("Added {id}");
        }
        CustomAction::Remove { id } => {
            if db.remove_custom_model(id).map_err(anyhow::Error::msg)? {
                println!("Removed {id}");
            } else {
                println!("No custom model named {id}");
            }
        }
        CustomAction::List => {
            for model in db.list_custom_models().map_err(anyhow::Error::msg)? {
                println!("{}\t{}\t{}\t{}", model.id, model.name, model.model_url, model.model_lib_url);
            }
        }
    }
    Ok(())
}

fn read_samples(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if bytes.len() % 4 != 0 {
        bail!("{} is not a whole number of f32 samples", path.display());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
