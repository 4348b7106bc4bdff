use {
    anyhow::{Result, bail},
    clap::Subcommand,
    switchboard_config::SwitchboardConfig,
    switchboard_sessions::{SnapshotStore, SqliteSnapshotStore, snapshot::decode_snapshot},
};

#[derive(Subcommand)]
pub enum SnapshotAction {
    /// List every stored snapshot.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show the files inside one snapshot.
    Show {
        /// Session id.
        id: String,
    },
    /// Delete a snapshot so the session pairs from scratch next time.
    Clear {
        /// Session id.
        id: String,
    },
}

pub async fn handle_snapshots(action: SnapshotAction, config: &SwitchboardConfig) -> Result<()> {
    let store = SqliteSnapshotStore::connect(&config.store.database_url).await?;
    match action {
        SnapshotAction::List { json } => list(&store, json).await,
        SnapshotAction::Show { id } => show(&store, &id).await,
        SnapshotAction::Clear { id } => clear(&store, &id).await,
    }
}

async fn list(store: &SqliteSnapshotStore, json: bool) -> Result<()> {
    let rows = store.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No snapshots stored.");
        return Ok(());
    }
    println!("{:<32} {:<10} {:>10} {:>15}", "SESSION", "STATUS", "BYTES", "UPDATED (ms)");
    for row in rows {
        println!(
            "{:<32} {:<10} {:>10} {:>15}",
            row.id, row.status, row.size, row.updated_at
        );
    }
    Ok(())
}

async fn show(store: &SqliteSnapshotStore, id: &str) -> Result<()> {
    let Some(record) = store.find(id).await? else {
        bail!("no snapshot stored for session '{id}'");
    };
    println!("session: {}", record.id);
    println!("status:  {}", record.status);
    println!("bytes:   {}", record.blob.len());
    match decode_snapshot(&record.blob) {
        Ok(files) => {
            println!("files:");
            for (path, data) in files {
                println!("  {:<40} {:>8}", path.display(), data.len());
            }
        },
        Err(e) => println!("blob does not decode: {e:#}"),
    }
    Ok(())
}

async fn clear(store: &SqliteSnapshotStore, id: &str) -> Result<()> {
    if store.delete(id).await? {
        println!("Cleared snapshot for '{id}'.");
    } else {
        println!("No snapshot stored for '{id}'.");
    }
    Ok(())
}
