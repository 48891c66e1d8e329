//! pubsubctl: Command-line interface for the pubsub-sse broker.
//!
//! Drives the HTTP control plane (instances, topics, groups, subscriptions,
//! publishing) and tails the event stream of an instance from the terminal.

mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use client::PubSubClient;
use commands::topic::Owner;

/// Command-line interface for the pubsub-sse broker.
#[derive(Parser)]
#[command(name = "pubsubctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Broker endpoint (e.g., http://localhost:8080)
    #[arg(short, long, env = "PUBSUB_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or remove instances
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },
    /// Create or remove topics
    Topic {
        #[command(subcommand)]
        action: TopicAction,
    },
    /// Manage groups and their members
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Subscribe an instance to a topic
    Sub { instance: String, topic: String },
    /// Unsubscribe an instance from a topic
    Unsub { instance: String, topic: String },
    /// Publish a JSON payload to a topic
    Publish {
        /// Topic id
        topic: String,
        /// Payload; sent as a JSON string if it does not parse as JSON
        payload: Option<String>,
        /// Read payload from file
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Tail the event stream of an instance
    Listen {
        /// Instance id
        instance: String,
        /// Maximum number of frames to print (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        count: u64,
    },
}

#[derive(Subcommand)]
enum InstanceAction {
    /// Create an instance
    New {
        /// Put the instance on an existing connection
        #[arg(short, long)]
        connection: Option<String>,
    },
    /// Remove an instance
    Remove { instance: String },
}

#[derive(Subcommand)]
enum TopicAction {
    /// Create a public topic
    Public,
    /// Create a topic private to an instance
    Private { instance: String },
    /// Create a topic inside a group
    Group { group: String },
    /// Remove a topic (public unless an owner is given)
    Remove {
        topic: String,
        #[arg(long, conflicts_with = "group")]
        instance: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Create a group
    New,
    /// Remove a group
    Remove { group: String },
    /// Add an instance to a group
    Join { group: String, instance: String },
    /// Remove an instance from a group
    Leave { group: String, instance: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let client = PubSubClient::new(&cli.endpoint);
    let format = cli.output;

    match cli.command {
        Commands::Instance { action } => match action {
            InstanceAction::New { connection } => {
                commands::instance::new(&client, connection.as_deref(), format).await?
            }
            InstanceAction::Remove { instance } => {
                commands::instance::remove(&client, &instance, format).await?
            }
        },
        Commands::Topic { action } => match action {
            TopicAction::Public => commands::topic::new(&client, Owner::Public, format).await?,
            TopicAction::Private { instance } => {
                commands::topic::new(&client, Owner::Instance(&instance), format).await?
            }
            TopicAction::Group { group } => {
                commands::topic::new(&client, Owner::Group(&group), format).await?
            }
            TopicAction::Remove {
                topic,
                instance,
                group,
            } => {
                let owner = match (instance.as_deref(), group.as_deref()) {
                    (Some(id), _) => Owner::Instance(id),
                    (None, Some(id)) => Owner::Group(id),
                    (None, None) => Owner::Public,
                };
                commands::topic::remove(&client, &topic, owner, format).await?
            }
        },
        Commands::Group { action } => match action {
            GroupAction::New => commands::group::new(&client, format).await?,
            GroupAction::Remove { group } => {
                commands::group::remove(&client, &group, format).await?
            }
            GroupAction::Join { group, instance } => {
                commands::group::join(&client, &group, &instance, format).await?
            }
            GroupAction::Leave { group, instance } => {
                commands::group::leave(&client, &group, &instance, format).await?
            }
        },
        Commands::Sub { instance, topic } => {
            commands::subscribe::sub(&client, &instance, &topic, format).await?
        }
        Commands::Unsub { instance, topic } => {
            commands::subscribe::unsub(&client, &instance, &topic, format).await?
        }
        Commands::Publish {
            topic,
            payload,
            file,
        } => {
            commands::publish::run(&client, &topic, payload, file, format).await?;
        }
        Commands::Listen { instance, count } => {
            commands::listen::run(&client, &instance, count, format).await?;
        }
    }

    Ok(())
}
