#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pagelift::model::TargetRef;
use pagelift::store::{self, MappingStore};

#[derive(Parser)]
#[command(name = "store-admin", about = "pagelift mapping store helper")]
struct Cli {
    /// Optional explicit DB path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Total live entries across both indexes
    #[command(about, long_about = None)]
    Count,
    /// Resolve a source page by numeric id
    #[command(about, long_about = None)]
    LookupId {
        #[arg(value_name = "ID")]
        id: i64,
    },
    /// Resolve a source page by space key and title
    #[command(about, long_about = None)]
    LookupTitle {
        #[arg(value_name = "SPACE")]
        space: String,
        #[arg(value_name = "TITLE")]
        title: String,
    },
    /// Shortest stored target reference for a source space
    #[command(about, long_about = None)]
    Shortest {
        #[arg(value_name = "SPACE")]
        space: String,
    },
    /// Source space key that produced a target reference
    #[command(about, long_about = None)]
    Reverse {
        #[arg(value_name = "TARGET")]
        target: String,
    },
    /// Delete every entry of a source space
    #[command(about, long_about = None)]
    RemoveSpace {
        #[arg(value_name = "SPACE")]
        space: String,
    },
    /// Import mapping data left in the legacy page-based format
    #[command(about, long_about = None)]
    MigrateLegacy,
}

#[tokio::main]
async fn main() -> Result<()> {
    pagelift::init_logging();

    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or(default_db_path()?);
    let pool = store::open_pool(&db_path).await?;
    let store = MappingStore::new(pool);

    match cli.cmd {
        Cmd::Count => {
            println!("{}", store.count().await?);
        }
        Cmd::LookupId { id } => match store.lookup_by_id(id).await? {
            Some(target) => println!("{target}"),
            None => println!("(not found)"),
        },
        Cmd::LookupTitle { space, title } => match store.lookup_by_title(&space, &title).await? {
            Some(target) => println!("{target}"),
            None => println!("(not found)"),
        },
        Cmd::Shortest { space } => match store.shortest_reference_for_space(&space).await? {
            Some(target) => println!("{target}"),
            None => println!("(not found)"),
        },
        Cmd::Reverse { target } => {
            match store.reverse_space_key(&TargetRef::new(target)).await? {
                Some(space) => println!("{space}"),
                None => println!("(not found)"),
            }
        }
        Cmd::RemoveSpace { space } => {
            let removed = store.remove_space(&space).await?;
            println!("removed {removed} entries");
        }
        Cmd::MigrateLegacy => match store.activate().await? {
            Some(summary) => {
                println!(
                    "scanned {} records: imported {} ({} entries), redundant {}, failed {}, deleted {}",
                    summary.scanned_records,
                    summary.imported_records,
                    summary.imported_entries,
                    summary.redundant_records,
                    summary.failed_records,
                    summary.deleted_records,
                );
            }
            None => println!("already activated in this process"),
        },
    }

    Ok(())
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().unwrap_or(std::env::current_dir()?);
    Ok(base.join("pagelift").join("pagelift.sqlite3"))
}
