mod bot;
mod config;
mod format;
mod jobs;
mod qbt;
mod storage;
mod telegram_log;

use std::sync::Arc;
use tokio::sync::Mutex;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use bot::{BotError, Command, TelegramClient};
use config::Config;
use qbt::Qbt;
use storage::{Permissions, SeenHashes};

/// Everything the handlers and the job share, built once in `main`.
pub struct BotState {
    pub config: Config,
    pub qbt: Qbt,
    pub permissions: Mutex<Permissions>,
    pub completed: Mutex<SeenHashes>,
    pub telegram: TelegramClient,
}

impl BotState {
    async fn new(config: Config, bot: &Bot) -> Result<Self, BotError> {
        let permissions = Permissions::open(config.permissions_path())?;
        info!("Loaded permissions from {:?}", config.permissions_path());

        let completed = SeenHashes::open(config.completed_path())?;
        info!("Loaded {} completed hashes", completed.len());

        let qbt = Qbt::connect(&config.qbittorrent, config.request_timeout).await?;

        Ok(Self {
            config,
            qbt,
            permissions: Mutex::new(permissions),
            completed: Mutex::new(completed),
            telegram: TelegramClient::new(bot.clone()),
        })
    }
}

fn init_logging(config: &Config, bot: &Bot) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("qbtbot.log"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    Ok(guard)
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "qbtbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    let _guard = match init_logging(&config, &bot) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging in {:?}: {e}", config.log_dir());
            std::process::exit(1);
        }
    };

    info!("🚀 Starting qbtbot...");
    info!("Loaded config from {config_path}");
    info!("Admins: {:?}", config.admins);
    if config.dry_run {
        info!("DRY RUN mode enabled");
    }

    let state = match BotState::new(config, &bot).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {e}");
            std::process::exit(1);
        }
    };

    if state.qbt.is_online() {
        match jobs::seed_completed(&state).await {
            Ok(added) => {
                info!("Absorbed {added} already completed torrents");
                jobs::spawn_completed_job(state.clone());
            }
            Err(e) => warn!("Cannot register the completed torrents job: {e}"),
        }
    } else {
        warn!("Cannot register the completed torrents job: qbittorrent is not online");
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to set bot commands: {e}");
    }
    if let Err(e) = bot.delete_webhook().drop_pending_updates(true).await {
        warn!("Failed to drop pending updates: {e}");
    }

    Dispatcher::builder(bot, bot::schema())
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
