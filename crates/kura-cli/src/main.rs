//! kura: command-line tool for encrypted catalogs.
//!
//! Every command prints a JSON document on stdout. Logs go to stderr.

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kura_crypto::{install_default_worker, KdfCost, ProcessKdfWorker};
use serde_json::Value;
use tracing::{debug, warn};

/// Hidden subcommand a child `kura` runs to derive one key.
const KDF_WORKER_COMMAND: &str = "kdf-worker";

#[derive(Parser)]
#[command(name = "kura")]
#[command(author, version, about = "Inspect, search and seal encrypted kura catalogs")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where the catalog is and how to unlock it.
#[derive(Args)]
struct UnlockArgs {
    /// Encrypted catalog file
    #[arg(short, long, env = "KURA_CATALOG")]
    catalog: PathBuf,

    /// Catalog password
    #[arg(short, long, env = "KURA_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show envelope parameters without unlocking
    Info {
        /// Encrypted catalog file
        #[arg(short, long, env = "KURA_CATALOG")]
        catalog: PathBuf,
    },

    /// List records, optionally sorted by an entry
    List {
        #[command(flatten)]
        unlock: UnlockArgs,

        /// Entry to sort by
        #[arg(short, long)]
        sort: Option<String>,

        /// Reverse the order
        #[arg(short, long)]
        descending: bool,
    },

    /// Search records with one or more search commands
    Search {
        #[command(flatten)]
        unlock: UnlockArgs,

        /// Search commands, e.g. `$title:foo` or `!$rating`
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Match records satisfying any command instead of all
        #[arg(long)]
        any: bool,
    },

    /// Show the search operators each entry accepts
    Operators {
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Validate an entry configuration file
    CheckConfig {
        /// JSON entry configuration
        file: PathBuf,
    },

    /// Report records that fail validation
    Diagnose {
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Encrypt plain catalog data into a new catalog file
    Seal {
        /// Plain catalog data (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output catalog file
        #[arg(short, long)]
        output: PathBuf,

        /// Password for the new catalog
        #[arg(short, long, env = "KURA_PASSWORD", hide_env_values = true)]
        password: String,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },

    /// Import a dumped record into the catalog
    Import {
        #[command(flatten)]
        unlock: UnlockArgs,

        /// Id of the new record
        #[arg(long)]
        id: String,

        /// Dumped record (JSON)
        #[arg(short, long)]
        record: PathBuf,

        /// An image file accompanies the record
        #[arg(long)]
        has_image: bool,
    },

    /// Change the catalog password
    Passwd {
        #[command(flatten)]
        unlock: UnlockArgs,

        /// New password
        #[arg(long, env = "KURA_NEW_PASSWORD", hide_env_values = true)]
        new_password: String,
    },

    /// Decrypt a stored image
    Image {
        #[command(flatten)]
        unlock: UnlockArgs,

        /// Directory holding the encrypted image files
        #[arg(long, env = "KURA_IMAGES")]
        images: PathBuf,

        /// Image file name without extension
        stem: String,

        /// Read the thumbnail instead of the full image
        #[arg(long)]
        thumbnail: bool,

        /// Output file for the decrypted image
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Derive one key from a request on stdin (used by kura itself)
    #[command(name = KDF_WORKER_COMMAND, hide = true)]
    KdfWorker,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Hash passwords in child processes so cancellation can kill them.
fn install_kdf_worker() {
    match ProcessKdfWorker::current_exe([KDF_WORKER_COMMAND]) {
        Ok(worker) => {
            install_default_worker(Arc::new(worker));
            debug!("Key derivation runs in worker processes");
        }
        Err(e) => warn!(error = %e, "Cannot locate kura executable; deriving keys in process"),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    install_kdf_worker();

    let output = match cli.command {
        Commands::KdfWorker => return commands::cmd_kdf_worker().await,
        Commands::Info { catalog } => commands::cmd_info(&catalog).await?,
        Commands::List {
            unlock,
            sort,
            descending,
        } => {
            commands::cmd_list(&unlock.catalog, &unlock.password, sort.as_deref(), descending)
                .await?
        }
        Commands::Search { unlock, query, any } => {
            commands::cmd_search(&unlock.catalog, &unlock.password, &query, any).await?
        }
        Commands::Operators { unlock } => {
            commands::cmd_operators(&unlock.catalog, &unlock.password).await?
        }
        Commands::CheckConfig { file } => {
            let report = commands::cmd_check_config(&file).await?;
            print_json(&report)?;
            if report["valid"] != Value::Bool(true) {
                anyhow::bail!("{} is not a valid entry configuration", file.display());
            }
            return Ok(());
        }
        Commands::Diagnose { unlock } => {
            commands::cmd_diagnose(&unlock.catalog, &unlock.password).await?
        }
        Commands::Seal {
            input,
            output,
            password,
            force,
        } => commands::cmd_seal(&input, &output, &password, &KdfCost::from_env(), force).await?,
        Commands::Import {
            unlock,
            id,
            record,
            has_image,
        } => {
            commands::cmd_import(&unlock.catalog, &unlock.password, &id, &record, has_image)
                .await?
        }
        Commands::Passwd {
            unlock,
            new_password,
        } => {
            commands::cmd_passwd(
                &unlock.catalog,
                &unlock.password,
                &new_password,
                &KdfCost::from_env(),
            )
            .await?
        }
        Commands::Image {
            unlock,
            images,
            stem,
            thumbnail,
            output,
        } => {
            commands::cmd_image(
                &unlock.catalog,
                &unlock.password,
                &images,
                &stem,
                thumbnail,
                &output,
            )
            .await?
        }
    };

    print_json(&output)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
