use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use control_api::{Coordinator, CoordinatorConfig};
use fanout::LocalBroadcaster;
use shared::domain::{positions_are_contiguous, ProductId, SessionId};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/playback.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Adds or updates a product in the local catalog mirror.
    RegisterProduct {
        product_id: i64,
        name: String,
        #[arg(long)]
        images: Option<u32>,
    },
    CreateSession {
        title: String,
        product_ids: Vec<i64>,
    },
    ShowSession {
        session_id: i64,
    },
    /// Reports sessions whose positions are not exactly 1..=N.
    CheckPositions {
        session_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::RegisterProduct {
            product_id,
            name,
            images,
        } => {
            storage
                .register_product(ProductId(product_id), &name, images)
                .await?;
            println!("registered product_id={product_id}");
        }
        Command::CreateSession { title, product_ids } => {
            let coordinator = Coordinator::new(
                storage.clone(),
                Arc::new(storage),
                Arc::new(LocalBroadcaster::default()),
                CoordinatorConfig::default(),
            );
            let products: Vec<ProductId> = product_ids.into_iter().map(ProductId).collect();
            let (summary, items) = coordinator.create_session(&title, &products).await?;
            println!(
                "created session_id={} items={}",
                summary.session_id,
                items.len()
            );
        }
        Command::ShowSession { session_id } => {
            let session_id = SessionId(session_id);
            let Some(summary) = storage.load_session(session_id).await? else {
                bail!("session {session_id} not found");
            };
            let cursor = storage.load_cursor(session_id).await?;
            let items = storage.list_items(session_id).await?;

            println!("session {} \"{}\"", summary.session_id, summary.title);
            match &cursor {
                Some(cursor) => println!(
                    "cursor item={} image={} version={} overlay={}",
                    cursor
                        .current_item_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".into()),
                    cursor.current_image_index,
                    cursor.version,
                    cursor
                        .overlay_message
                        .as_ref()
                        .map(|m| m.text.as_str())
                        .unwrap_or("-"),
                ),
                None => println!("cursor not created"),
            }
            let current = cursor.and_then(|c| c.current_item_id);
            for item in items {
                let marker = if Some(item.id) == current { ">" } else { " " };
                println!(
                    "{marker} {:>3}  item={} product={}",
                    item.position, item.id, item.product_id
                );
            }
        }
        Command::CheckPositions { session_id } => {
            let sessions = match session_id {
                Some(id) => vec![SessionId(id)],
                None => storage
                    .list_sessions()
                    .await?
                    .into_iter()
                    .map(|s| s.session_id)
                    .collect(),
            };
            let mut broken = 0;
            for session_id in sessions {
                let items = storage.list_items(session_id).await?;
                let ok = positions_are_contiguous(&items);
                if !ok {
                    broken += 1;
                }
                println!(
                    "session {session_id}: {} items, {}",
                    items.len(),
                    if ok { "contiguous" } else { "GAPS" }
                );
            }
            if broken > 0 {
                bail!("{broken} session(s) have non-contiguous positions");
            }
        }
    }

    Ok(())
}
