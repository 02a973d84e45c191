mod telegram;
mod workers;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use graffiti_contracts::backends::Operation;
use graffiti_contracts::chat::{InboundEvent, CHAT_HELP_COMMANDS};
use graffiti_contracts::session::{GarmentType, SessionStore};
use graffiti_engine::config::{non_empty_env, parse_positive};
use graffiti_engine::translate::translate_prompt;
use graffiti_engine::{
    ConfigError, Conversation, DispatchOutcome, DispatchPayload, EngineSettings, NormalizedImage,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::telegram::{parse_update, TelegramClient};
use crate::workers::UserWorkers;

const DEFAULT_WORKER_IDLE: Duration = Duration::from_secs(300);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(
    name = "graffiti-rs",
    version,
    about = "Virtual try-on and image generation over chat"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the Telegram bot with long polling.
    Bot(BotArgs),
    /// Delete the webhook and drop pending updates.
    Reset,
    /// List configured backends.
    Backends,
    /// Run one try-on outside the chat.
    TryOn(TryOnArgs),
    /// Generate one image outside the chat.
    Generate(GenerateArgs),
}

#[derive(Debug, Parser)]
struct BotArgs {
    #[arg(long, default_value_t = 30)]
    poll_timeout: u64,
    /// Keep updates that arrived while the bot was down.
    #[arg(long)]
    keep_pending: bool,
}

#[derive(Debug, Parser)]
struct TryOnArgs {
    #[arg(long)]
    person: PathBuf,
    #[arg(long)]
    garment: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "upper")]
    garment_type: String,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value_t = 1024)]
    width: u32,
    #[arg(long, default_value_t = 1024)]
    height: u32,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("graffiti-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn")),
        )
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Bot(args) => run_bot(args),
        Command::Reset => run_reset(),
        Command::Backends => run_backends(),
        Command::TryOn(args) => run_try_on(args),
        Command::Generate(args) => run_generate(args),
    }
}

fn telegram_token() -> Result<String, ConfigError> {
    non_empty_env("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))
}

fn worker_idle() -> Result<Duration, ConfigError> {
    match non_empty_env("GRAFFITI_WORKER_IDLE_SECS") {
        Some(raw) => Ok(Duration::from_secs(parse_positive(
            "GRAFFITI_WORKER_IDLE_SECS",
            &raw,
        )?)),
        None => Ok(DEFAULT_WORKER_IDLE),
    }
}

fn run_bot(args: BotArgs) -> Result<i32> {
    let token = telegram_token()?;
    let settings = EngineSettings::from_env()?;
    settings.require_gemini_key()?;
    let idle = worker_idle()?;
    let dispatcher = settings.dispatcher()?;
    let client = Arc::new(TelegramClient::new(token));
    client
        .delete_webhook(!args.keep_pending)
        .context("failed clearing webhook")?;

    let conversation = Arc::new(Conversation::new(
        SessionStore::new(),
        dispatcher,
        settings.translator(),
        client.clone(),
    ));
    let handler_conversation = Arc::clone(&conversation);
    let workers = UserWorkers::new(
        Arc::new(move |event: InboundEvent| handler_conversation.handle(event)),
        idle,
    );
    info!(
        poll_timeout = args.poll_timeout,
        commands = %CHAT_HELP_COMMANDS.join(" "),
        "bot started"
    );

    let mut offset: Option<i64> = None;
    loop {
        let updates = match client.get_updates(offset, args.poll_timeout) {
            Ok(updates) => updates,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "polling failed; retrying");
                thread::sleep(POLL_RETRY_DELAY);
                continue;
            }
        };
        if updates.is_empty() {
            continue;
        }
        for update in updates {
            let Some(parsed) = parse_update(&update) else {
                continue;
            };
            offset = Some(parsed.update_id + 1);
            if let Some(callback_id) = parsed.callback_id.as_deref() {
                if let Err(err) = client.answer_callback(callback_id) {
                    warn!(error = %format!("{err:#}"), "callback acknowledgement failed");
                }
            }
            if let Some(event) = parsed.event {
                if let Err(err) = workers.dispatch(event) {
                    workers.shutdown();
                    return Err(err);
                }
            }
        }
        debug!(
            active_workers = workers.active(),
            active_sessions = conversation.sessions().active_count(),
            "update batch queued"
        );
    }
}

fn run_reset() -> Result<i32> {
    let client = TelegramClient::new(telegram_token()?);
    client.delete_webhook(true)?;
    println!("Webhook removed and pending updates dropped.");
    Ok(0)
}

fn run_backends() -> Result<i32> {
    let settings = EngineSettings::from_env()?;
    let catalog = settings.catalog()?;
    for backend in catalog.list() {
        println!(
            "{:<18} {:<15} {:<11} fallback={:<18} {}",
            backend.key,
            backend.operation.as_str(),
            format!("{:?}", backend.convention).to_lowercase(),
            backend.fallback.as_deref().unwrap_or("-"),
            backend.name
        );
    }
    Ok(0)
}

fn run_try_on(args: TryOnArgs) -> Result<i32> {
    let Some(garment_type) = GarmentType::from_token(&args.garment_type) else {
        bail!(
            "unknown garment type '{}' (expected upper, lower or dress)",
            args.garment_type
        );
    };
    let person = image::open(&args.person)
        .with_context(|| format!("failed reading {}", args.person.display()))?;
    let garment = image::open(&args.garment)
        .with_context(|| format!("failed reading {}", args.garment.display()))?;
    let settings = EngineSettings::from_env()?;
    let dispatcher = settings.dispatcher()?;
    let outcome = dispatcher.run(
        args.model.as_deref(),
        &DispatchPayload::TryOn {
            person,
            garment,
            garment_type,
        },
    );
    finish_one_shot(Operation::TryOn, &outcome, args.out)
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let settings = EngineSettings::from_env()?;
    let translator = settings.translator();
    let prompt = translate_prompt(translator.as_ref(), &args.prompt);
    if prompt != args.prompt {
        info!(prompt = %prompt, "prompt translated");
    }
    let dispatcher = settings.dispatcher()?;
    let outcome = dispatcher.run(
        None,
        &DispatchPayload::Generate {
            prompt,
            width: args.width,
            height: args.height,
        },
    );
    finish_one_shot(Operation::GenerateImage, &outcome, args.out)
}

fn finish_one_shot(
    operation: Operation,
    outcome: &DispatchOutcome,
    out: Option<PathBuf>,
) -> Result<i32> {
    let Some(image) = outcome.image.as_ref().filter(|_| outcome.succeeded()) else {
        match &outcome.diagnostic {
            Some(code) => eprintln!("{} (code {code})", outcome.message),
            None => eprintln!("{}", outcome.message),
        }
        return Ok(2);
    };
    let out = out.unwrap_or_else(|| default_output_path(operation));
    write_output(&out, image)?;
    println!("{} -> {}", outcome.message, out.display());
    Ok(0)
}

fn default_output_path(operation: Operation) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("graffiti-{}-{stamp}.png", operation.as_str()))
}

fn write_output(path: &Path, image: &NormalizedImage) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    match image {
        NormalizedImage::Bytes(bytes) => fs::write(path, bytes),
        NormalizedImage::Passthrough(value) => {
            let rendered = serde_json::to_string_pretty(value)?;
            warn!("backend returned a non-image value; writing it as JSON");
            fs::write(path.with_extension("json"), rendered)
        }
    }
    .with_context(|| format!("failed writing {}", path.display()))
}
