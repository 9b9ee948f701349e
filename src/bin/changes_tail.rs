//! Follow a database's continuous change feed.
//!
//! Connection settings come from `COUCHDB_*` environment variables. Each row
//! is written to stdout as one JSON line; logs go to stderr.

use clap::Parser;
use couchdb_client::{CouchError, Since};
use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "changes-tail", about = "Print a CouchDB change feed as JSON lines")]
struct Args {
    /// Sequence token to resume after, or "now"
    #[arg(long)]
    since: Option<String>,

    /// Embed full documents in the rows
    #[arg(long)]
    include_docs: bool,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 30_000)]
    heartbeat_ms: u64,

    /// Stop after this many rows
    #[arg(long)]
    max: Option<usize>,

    /// Override the database name from the environment
    #[arg(long)]
    db: Option<String>,
}

fn run(args: Args) -> Result<(), CouchError> {
    let mut config = couchdb_client::Config::from_env()?;
    if let Some(db) = args.db {
        config.db_name = db;
    }
    let client = couchdb_client::ClientBuilder::from_config(config).build()?;

    let mut query = client
        .changes()
        .include_docs(args.include_docs)
        .heartbeat(Duration::from_millis(args.heartbeat_ms));
    if let Some(since) = args.since {
        query = query.since(Since::from(since));
    }

    let mut feed = query.continuous_changes()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;

    while feed.has_next()? {
        let Some(row) = feed.next_row() else { continue };
        serde_json::to_writer(&mut out, &row)?;
        out.write_all(b"\n")?;
        out.flush()?;

        count += 1;
        if args.max.is_some_and(|max| count >= max) {
            feed.stop();
        }
    }

    if let Some(seq) = feed.last_seq() {
        tracing::info!(last_seq = %seq, rows = count, "feed ended");
    }
    drop(feed);
    client.shutdown();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(Args::parse()) {
        tracing::error!(error = %e, "changes-tail failed");
        std::process::exit(1);
    }
}
