mod app;
mod board;
mod clock;
mod config;
mod logging;
mod models;
mod notify;
mod recovery;
mod report;
mod server;
mod storage;
mod timer;
mod tui;
mod uploads;
mod utils;

use anyhow::Result;
use app::App;
use chrono::Utc;
use clap::{Parser, Subcommand};
use clock::SystemClock;
use config::Config;
use fd_lock::RwLock;
use models::{BlockStatus, MAX_BLOCK_SECS, MAX_HOURS};
use notify::{Banner, DesktopNotifier, Focus, NotificationType, Permission, SystemDelivery};
use report::Reporter;
use std::fs::OpenOptions;
use std::path::PathBuf;
use storage::Storage;
use tracing::{error, info};
use uploads::{UploadStore, UPLOADS_PREFIX};

#[derive(Parser)]
#[command(name = "tiblo")]
#[command(about = "Work through your day in fixed-length time blocks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the block board and run the active timer
    Start,
    /// Print a summary of today's blocks
    Report,
    /// Regenerate the waiting blocks and clear all progress
    Reset {
        /// Hours to schedule
        #[arg(long)]
        hours: Option<u32>,
        /// Block length (e.g. 10m, 25m)
        #[arg(long)]
        block: Option<String>,
    },
    /// Spend or edit earned break time
    Break {
        #[command(subcommand)]
        action: BreakAction,
    },
    /// Set the description of the running or a completed block
    Describe { id: String, text: String },
    /// Attach an image to a completed block
    Attach { id: String, file: PathBuf },
    /// Remove the image from a completed block
    Detach { id: String },
    /// Show or change notification settings
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },
    /// Serve the upload API
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum BreakAction {
    /// Take a break of the given minutes
    Use { minutes: u32 },
    /// Overwrite the break balance
    Set { minutes: u32 },
}

#[derive(Subcommand)]
enum NotifyAction {
    Show,
    Enable,
    Disable,
    Type {
        #[arg(value_enum)]
        kind: NotificationType,
    },
    /// Probe the desktop for notification access
    RequestPermission,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = Storage::get_base_dir()?;
    logging::init(&base_dir)?;
    let config = config::load_config(&base_dir)?;
    let storage = Storage::new()?;
    let uploads = UploadStore::new(base_dir.join(UPLOADS_PREFIX));

    match cli.command {
        Commands::Report => {
            let reporter = Reporter::new(storage);
            reporter.report()?;
        }
        Commands::Serve { port } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(uploads, port.unwrap_or(config.server_port)))?;
        }
        command => {
            let lock_path = base_dir.join("tiblo.lock");
            let lock_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(lock_path)?;

            let mut lock = RwLock::new(lock_file);
            let _guard = lock.try_write().map_err(|_| {
                anyhow::anyhow!("Another instance of tiblo is already running. Please close it before changing your blocks.")
            })?;

            match command {
                Commands::Notify { action } => run_notify(action, &storage)?,
                command => run_board(command, &config, storage, uploads)?,
            }
        }
    }

    Ok(())
}

fn run_board(command: Commands, config: &Config, storage: Storage, uploads: UploadStore) -> Result<()> {
    let banner = Banner::default();
    let focus = Focus::default();
    let notifier = DesktopNotifier::new(storage.clone(), banner.clone(), focus.clone());

    let recovered = recovery::bootstrap(
        &storage,
        config.board_settings(),
        config.persist_interval(),
        Box::new(notifier),
        Some(uploads.clone()),
        Utc::now(),
    )?;
    info!("Startup reconciliation: {:?}", recovered.outcome);

    let mut app = App::new(
        recovered,
        storage.clone(),
        SystemClock,
        config.persist_interval(),
        focus,
    );
    // A countdown that ran out while nothing was watching completes now.
    if let Some(id) = app.tick()? {
        println!("{} completed while tiblo was closed.", id);
    }

    match command {
        Commands::Start => {
            tui::run_tui(&mut app, &uploads, &banner, config.tick())?;

            // Final save
            app.shutdown()?;

            println!("\nSession ended.");
            let reporter = Reporter::new(storage);
            reporter.report()?;
            return Ok(());
        }
        Commands::Reset { hours, block } => {
            if hours.is_none() && block.is_none() {
                app.reset()?;
            } else {
                let hours = hours.unwrap_or(config.hours);
                let block_secs = match block {
                    Some(b) => humantime::parse_duration(&b)?.as_secs(),
                    None => config.block_length_secs,
                };
                if block_secs == 0 || block_secs > MAX_BLOCK_SECS {
                    anyhow::bail!("Block length must be between 1s and {}s", MAX_BLOCK_SECS);
                }
                if hours > MAX_HOURS {
                    anyhow::bail!("At most {} hours can be scheduled", MAX_HOURS);
                }
                app.reset_with(hours, block_secs)?;
            }
            println!(
                "Reset to {} waiting blocks.",
                app.board().waiting().len()
            );
        }
        Commands::Break { action } => match action {
            BreakAction::Use { minutes } => {
                if app.board_mut().consume_break_time(minutes)? {
                    println!(
                        "Enjoy your break! {} minutes left.",
                        app.board().break_time_minutes()
                    );
                } else {
                    println!(
                        "Only {} minutes of break time available.",
                        app.board().break_time_minutes()
                    );
                }
            }
            BreakAction::Set { minutes } => {
                app.board_mut().set_break_time(minutes as i64)?;
                println!("Break time set to {} minutes.", minutes);
            }
        },
        Commands::Describe { id, text } => {
            if !app.describe(&id, &text)? {
                println!("{} is neither running nor completed.", id);
            }
        }
        Commands::Attach { id, file } => {
            if app.board().status_of(&id) != Some(BlockStatus::Completed) {
                println!("{} is not a completed block.", id);
            } else {
                match uploads.save_from_path(&file) {
                    Ok(path) => {
                        let patch = board::CompletedPatch {
                            image_path: Some(path.clone()),
                            ..board::CompletedPatch::default()
                        };
                        app.board_mut().update_completed_block(&id, patch)?;
                        println!("Attached {} to {}.", path, id);
                    }
                    Err(e) => {
                        error!("Failed to attach {} to {}: {}", file.display(), id, e);
                        eprintln!("Upload failed: {}", e);
                    }
                }
            }
        }
        Commands::Detach { id } => {
            if !app.board_mut().remove_completed_image(&id)? {
                println!("{} has no attached image.", id);
            }
        }
        Commands::Report | Commands::Serve { .. } | Commands::Notify { .. } => {}
    }

    app.shutdown()
}

fn run_notify(action: NotifyAction, storage: &Storage) -> Result<()> {
    let mut config = storage.load_notification_config()?;

    match action {
        NotifyAction::Show => {
            println!("Enabled:    {}", config.enabled);
            println!("Type:       {:?}", config.notification_type);
            println!("Permission: {:?}", config.system_permission);
            return Ok(());
        }
        NotifyAction::Enable => config.enabled = true,
        NotifyAction::Disable => config.enabled = false,
        NotifyAction::Type { kind } => config.notification_type = kind,
        NotifyAction::RequestPermission => {
            config.system_permission = Permission::Default;
            storage.save_notification_config(&config)?;
            let permission = notify::request_permission(storage, &SystemDelivery)?;
            println!("Permission: {:?}", permission);
            return Ok(());
        }
    }

    storage.save_notification_config(&config)?;
    println!("Notification settings saved.");
    Ok(())
}
