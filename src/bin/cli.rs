use clap::{Parser, Subcommand};
use redwire::{Config, ConnectionManager, Error};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Talks to a RESP2 or RESP3 server.
#[derive(Parser, Debug)]
#[command(name = "redwire", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the detected protocol generation and what the server reports about itself.
    Info,
    /// Set fields of a hash. Takes field/value pairs.
    Hset {
        key: String,
        #[arg(required = true, num_args = 2.., value_names = ["FIELD", "VALUE"])]
        pairs: Vec<String>,
    },
    /// Get a field of a hash.
    Hget { key: String, field: String },
    /// Increment an integer field of a hash.
    Hincrby {
        key: String,
        field: String,
        #[arg(allow_negative_numbers = true)]
        increment: i64,
    },
    /// Delete fields of a hash.
    Hdel {
        key: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Count existing keys.
    Exists {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Expire a key at a Unix timestamp, in seconds.
    Expireat { key: String, timestamp: i64 },
    /// Delete keys.
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Publish a message to a channel.
    Publish { channel: String, message: String },
    /// Print messages published to a channel until interrupted.
    Subscribe { channel: String },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let cli = Cli::parse();

    let mut manager = ConnectionManager::new(cli.config)?;
    let generation = manager.initialize().await?;
    let mut db = manager.create_connection().await?;

    match cli.command {
        Commands::Info => {
            let info = db.hello(generation.version()).await?;
            println!("protocol: {}", generation);
            let mut fields: Vec<_> = info.fields.into_iter().collect();
            fields.sort();
            for (name, value) in fields {
                println!("{}: {}", name, value);
            }
        }
        Commands::Hset { key, pairs } => {
            if pairs.len() % 2 != 0 {
                return Err(Error::InvalidConfig(
                    "hset takes field/value pairs".to_string(),
                ));
            }
            let pairs: Vec<(&str, &str)> = pairs
                .chunks(2)
                .map(|pair| (pair[0].as_str(), pair[1].as_str()))
                .collect();
            println!("{}", db.hset(&key, &pairs).await?);
        }
        Commands::Hget { key, field } => match db.hget(&key, &field).await? {
            Some(value) => println!("{}", value),
            None => println!("(nil)"),
        },
        Commands::Hincrby {
            key,
            field,
            increment,
        } => println!("{}", db.hincrby(&key, &field, increment).await?),
        Commands::Hdel { key, fields } => println!("{}", db.hdel(&key, &fields).await?),
        Commands::Exists { keys } => println!("{}", db.exists(&keys).await?),
        Commands::Expireat { key, timestamp } => {
            println!("{}", db.expire_at(&key, timestamp).await?)
        }
        Commands::Del { keys } => println!("{}", db.del(&keys).await?),
        Commands::Publish { channel, message } => {
            println!("{}", db.publish(&channel, message).await?)
        }
        Commands::Subscribe { channel } => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            db.subscribe(&channel, tx, cancel.clone()).await?;

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    message = rx.recv() => match message {
                        Some(message) => println!("{}", String::from_utf8_lossy(&message.payload)),
                        None => break,
                    },
                }
            }

            cancel.cancel();
            db.unsubscribe().await?;
        }
    }

    db.close().await
}
