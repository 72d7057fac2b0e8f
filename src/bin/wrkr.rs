//! wrkr: operator CLI for the queue store.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use wrkr_store::config::StoreConfig;
use wrkr_store::db::Store;
use wrkr_store::model::criteria::Criteria;
use wrkr_store::model::{ItemId, NewQueueItem, QueueItem};
use wrkr_store::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "wrkr", about = "Subscriptions and work queues on Postgres")]
struct Cli {
    /// TOML config file. Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database, tables, and index if missing
    Init,
    /// Route an event to a queue
    Subscribe { event: String, queue: String },
    /// Stop routing an event to a queue
    Unsubscribe { event: String, queue: String },
    /// List the queues subscribed to an event
    Subscriptions { event: String },
    /// Publish an item to a queue
    Publish {
        /// Event/item type name
        name: String,
        /// Target queue
        queue: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Tracking id
        #[arg(long)]
        tid: Option<String>,
        /// Parent item id
        #[arg(long)]
        parent: Option<ItemId>,
        /// Defer eligibility by this many seconds
        #[arg(long)]
        delay_secs: Option<i64>,
    },
    /// Claim the next eligible item in a queue
    Next { queue: String },
    /// Find items
    Find {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Permanently remove items
    Remove {
        #[command(flatten)]
        filter: FilterArgs,
        /// Allow removing every item when no filter is given
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args)]
struct FilterArgs {
    /// Item id (repeatable)
    #[arg(long = "id")]
    ids: Vec<ItemId>,
    #[arg(long)]
    queue: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    tid: Option<String>,
    /// Only unclaimed items
    #[arg(long, conflicts_with = "claimed")]
    pending: bool,
    /// Only claimed items
    #[arg(long)]
    claimed: bool,
}

impl FilterArgs {
    fn into_criteria(self) -> Criteria {
        let mut criteria = if self.ids.is_empty() {
            Criteria::all()
        } else {
            Criteria::by_ids(self.ids)
        };
        if let Some(queue) = self.queue {
            criteria = criteria.queue(queue);
        }
        if let Some(name) = self.name {
            criteria = criteria.name(name);
        }
        if let Some(tid) = self.tid {
            criteria = criteria.tid(tid);
        }
        if self.pending {
            criteria = criteria.pending();
        }
        if self.claimed {
            criteria = criteria.claimed();
        }
        criteria
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => StoreConfig::from_toml_file(path)?,
        None => StoreConfig::from_env()?,
    };

    let _guard = init_telemetry(TelemetryConfig::from_store_config(&config, "wrkr"))?;

    let mut store = Store::new(config)?;
    store.connect().await?;

    let result = run(&store, cli.command).await;
    store.disconnect().await?;
    result
}

async fn run(store: &Store, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            // connect() has already bootstrapped the schema.
            store.health_check().await?;
            println!("Store ready: {}", store.config().db_name);
        }
        Command::Subscribe { event, queue } => {
            store.subscribe(&event, &queue).await?;
            println!("Subscribed {queue} to {event}");
        }
        Command::Unsubscribe { event, queue } => {
            store.unsubscribe(&event, &queue).await?;
            println!("Unsubscribed {queue} from {event}");
        }
        Command::Subscriptions { event } => {
            let queues = store.subscriptions(&event).await?;
            if queues.is_empty() {
                println!("No queues subscribed to {event}.");
            }
            for queue in queues {
                println!("{queue}");
            }
        }
        Command::Publish {
            name,
            queue,
            payload,
            tid,
            parent,
            delay_secs,
        } => {
            let payload: serde_json::Value = match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };

            let mut item = NewQueueItem::new(name, queue).payload(payload);
            if let Some(tid) = tid {
                item = item.tid(tid);
            }
            if let Some(parent) = parent {
                item = item.parent(parent);
            }
            if let Some(secs) = delay_secs {
                item = item.when(Utc::now() + chrono::Duration::seconds(secs));
            }

            for id in store.publish(item).await? {
                println!("Published: {id}");
            }
        }
        Command::Next { queue } => match store.fetch_next(&queue).await? {
            Some(item) => print_item(&item)?,
            None => println!("Nothing available in {queue}."),
        },
        Command::Find { filter } => {
            let items = store.find(&filter.into_criteria()).await?;
            if items.is_empty() {
                println!("No items found.");
                return Ok(());
            }
            print_table(&items);
        }
        Command::Remove { filter, all } => {
            let criteria = filter.into_criteria();
            if criteria.is_empty() && !all {
                anyhow::bail!("refusing to remove every item without --all");
            }
            let removed = store.remove(&criteria).await?;
            println!("Removed {removed} item(s)");
        }
    }
    Ok(())
}

fn print_table(items: &[QueueItem]) {
    println!(
        "{:<36}  {:<16}  {:<16}  {:<8}  CREATED",
        "ID", "NAME", "QUEUE", "STATE"
    );
    println!("{}", "-".repeat(100));

    for item in items {
        let state = if item.is_claimed() {
            "claimed"
        } else if item.when.is_some_and(|when| when > Utc::now()) {
            "deferred"
        } else {
            "pending"
        };
        println!(
            "{:<36}  {:<16}  {:<16}  {:<8}  {}",
            item.id,
            item.name,
            item.queue,
            state,
            item.created.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} item(s)", items.len());
}

fn print_item(item: &QueueItem) -> anyhow::Result<()> {
    println!("ID:       {}", item.id);
    println!("Name:     {}", item.name);
    println!("Queue:    {}", item.queue);
    println!("Tid:      {}", item.tid.as_deref().unwrap_or("-"));
    if let Some(parent) = item.parent {
        println!("Parent:   {parent}");
    }
    println!("Created:  {}", item.created);
    if let Some(done) = item.done {
        println!("Claimed:  {done}");
    }
    println!("Retries:  {}", item.retry_count);
    println!("Payload:  {}", serde_json::to_string_pretty(&item.payload)?);
    Ok(())
}
