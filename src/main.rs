//! focusroom - terminal client for DevFocus focus rooms
//!
//! Shared rooms with a synchronized focus timer, chat and tasks.

mod api;
mod auth;
mod config;
mod countdown;
mod models;
mod push;
mod room;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::FocusClient;
use crate::auth::Credentials;
use crate::config::Config;
use crate::models::{NewPersonalTask, NewRoom};

#[derive(Parser)]
#[command(name = "focusroom")]
#[command(about = "Terminal client for DevFocus focus rooms", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,
    },

    /// Log out and clear stored credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show current user info (verify auth works)
    Whoami,

    /// List active rooms
    Rooms {
        /// Filter by room name
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Create a room and open it
    Create {
        #[arg(short, long)]
        name: String,

        /// Password others need to join
        #[arg(short, long)]
        password: String,

        #[arg(short, long)]
        description: Option<String>,

        /// What you are working on, shown to others
        #[arg(long)]
        focus: Option<String>,
    },

    /// Join a room and open it
    Join {
        /// Room ID (from `rooms` output)
        room: String,

        #[arg(short, long)]
        password: String,

        /// What you are working on, shown to others
        #[arg(long)]
        focus: Option<String>,
    },

    /// Open a room you already belong to
    Open {
        /// Room ID (from `rooms` output)
        room: String,

        /// What you are working on, shown to others
        #[arg(long)]
        focus: Option<String>,
    },

    /// List personal tasks
    Tasks,

    /// Add a personal task
    TaskAdd {
        title: String,

        /// Task category
        #[arg(short = 't', long = "type", default_value = "Study")]
        task_type: String,

        /// Estimated minutes
        #[arg(short, long, default_value = "25")]
        estimate: u32,
    },

    /// Mark a personal task completed
    TaskDone {
        /// Task ID (from `tasks` output)
        id: String,
    },
}

fn authenticated() -> Result<(Config, Credentials)> {
    let config = Config::load()?;
    let credentials = Credentials::resolve(&config)?;
    Ok((config, credentials))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Login { email, password } => {
            tracing::info!("Logging in as {}...", email);
            auth::login(&email, &password).await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            let (_, credentials) = authenticated()?;
            api::whoami(&FocusClient::new(&credentials)).await?;
        }
        Commands::Rooms { search } => {
            let (_, credentials) = authenticated()?;
            api::list_rooms(&FocusClient::new(&credentials), search.as_deref()).await?;
        }
        Commands::Create {
            name,
            password,
            description,
            focus,
        } => {
            let (config, credentials) = authenticated()?;
            let new_room = NewRoom {
                name,
                password,
                description,
            };
            room::create_room(&credentials, &config, new_room, focus).await?;
        }
        Commands::Join {
            room,
            password,
            focus,
        } => {
            let (config, credentials) = authenticated()?;
            room::join_room(&credentials, &config, &room, &password, focus).await?;
        }
        Commands::Open { room, focus } => {
            let (config, credentials) = authenticated()?;
            room::open_room(&credentials, &config, &room, focus).await?;
        }
        Commands::Tasks => {
            let (_, credentials) = authenticated()?;
            api::list_tasks(&FocusClient::new(&credentials)).await?;
        }
        Commands::TaskAdd {
            title,
            task_type,
            estimate,
        } => {
            let (_, credentials) = authenticated()?;
            let mut task = NewPersonalTask::new(title);
            task.task_type = task_type;
            task.estimated_time = estimate;
            api::add_task(&FocusClient::new(&credentials), &task).await?;
        }
        Commands::TaskDone { id } => {
            let (_, credentials) = authenticated()?;
            api::complete_task(&FocusClient::new(&credentials), &id).await?;
        }
    }

    Ok(())
}
