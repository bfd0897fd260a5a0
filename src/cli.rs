// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

use crate::collection::SqliteCollection;
use crate::config::Config;
use crate::error::Fallible;
use crate::import::Importer;
use crate::import::parse_file;
use crate::remote::HttpCatalog;
use crate::server::start_server;
use crate::sync::Synchronizer;
use crate::types::report::AckStatus;
use crate::types::report::StatusCounts;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply without one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one synchronization cycle and print the report.
    Sync {
        /// Base URL of the vocabulary service.
        #[arg(long)]
        api_base_url: Option<String>,
        /// Path to the collection database.
        #[arg(long)]
        collection: Option<String>,
    },
    /// Run a synchronization cycle on every `POST /sync`.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8000")]
        bind: String,
    },
    /// Import cards from a newline-delimited JSON file.
    Import {
        file: PathBuf,
        /// Skip the front-to-back deck.
        #[arg(long)]
        no_forward: bool,
        /// Skip the back-to-front deck.
        #[arg(long)]
        no_reverse: bool,
    },
}

pub fn entrypoint() -> Fallible<()> {
    let cli: Cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    match cli.command {
        Command::Sync {
            api_base_url,
            collection,
        } => {
            if let Some(url) = api_base_url {
                config.api_base_url = url;
            }
            if let Some(path) = collection {
                config.collection_path = path;
            }
            sync(&config)
        }
        Command::Serve { bind } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(start_server(config, &bind))
        }
        Command::Import {
            file,
            no_forward,
            no_reverse,
        } => import(&config, &file, !no_forward, !no_reverse),
    }
}

fn sync(config: &Config) -> Fallible<()> {
    let remote = HttpCatalog::new(config)?;
    let mut local = SqliteCollection::open(&config.collection_path, config)?;
    let report = Synchronizer::new(&remote, &mut local).run_cycle()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let AckStatus::Failed { reason } = &report.acknowledgement {
        log::warn!("Changes were applied but not acknowledged ({reason}). They will be offered again.");
    }
    Ok(())
}

fn import(config: &Config, file: &Path, forward: bool, reverse: bool) -> Fallible<()> {
    if !forward && !reverse {
        println!("Both directions are disabled, nothing to import.");
        return Ok(());
    }
    let cards = parse_file(file)?;
    println!("Found {} cards.", cards.len());
    let mut local = SqliteCollection::open(&config.collection_path, config)?;
    let summary = Importer::new(&mut local, &config.import).import(&cards, forward, reverse)?;
    if forward {
        print_counts(&config.import.forward_deck, &summary.forward);
    }
    if reverse {
        print_counts(&config.import.reverse_deck, &summary.reverse);
    }
    Ok(())
}

fn print_counts(deck: &str, counts: &StatusCounts) {
    println!(
        "{deck}: {} created, {} updated, {} failed.",
        counts.created, counts.updated, counts.failed
    );
}
