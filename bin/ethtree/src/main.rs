mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::{ConfigOverrides, NodeConfig};
use ethtree_blockchain::{BlockTree, BlockTreeError, BlockchainProcessor, ChainError, LookupOptions};
use ethtree_metrics::{GatherError, gather_default_metrics};
use ethtree_state_transition::{
    BranchProcessor, ProcessingOptions, StateError, WorldState, executor::TransferExecutor,
    rewards::StaticRewardCalculator, validator::ProcessedBlockValidator,
};
use ethtree_storage::{ChainStore, StoreError, backend::RocksDBBackend};
use ethtree_types::{ShortRoot, block::BlockHeader, genesis::Genesis};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Tree(#[from] BlockTreeError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Metrics(#[from] GatherError),
    #[error("no canonical block at height {0}")]
    MissingHeader(u64),
}

#[derive(Debug, clap::Parser)]
#[command(version, about)]
struct CliOptions {
    /// Directory of the chain database
    #[arg(long, default_value = "ethtree-data")]
    datadir: PathBuf,
    /// JSON file with node settings
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: ConfigOverrides,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the genesis state and block from a genesis JSON file
    Init {
        #[arg(long)]
        genesis_json_file: PathBuf,
    },
    /// Print genesis, head, best suggested and sync pointers
    Info,
    /// Print the header at a height
    Header { number: u64 },
    /// Delete all levels from START to END (the best known level by default)
    DeleteSlice {
        #[arg(long)]
        start: u64,
        #[arg(long)]
        end: Option<u64>,
    },
    /// Open the database and print metrics in the Prometheus text format
    Metrics,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let options = CliOptions::parse();
    init_logging();

    if let Err(err) = run(options) {
        error!(%err, "Command failed");
        std::process::exit(1);
    }
}

fn run(options: CliOptions) -> Result<(), CliError> {
    let config = NodeConfig::resolve(options.config.as_deref(), &options.overrides)?;
    let chain = open_chain(&options.datadir, &config)?;
    let tree = chain.tree();

    match options.command {
        Command::Init { genesis_json_file } => {
            let genesis = read_genesis(&genesis_json_file)?;
            let block = chain.initialize_genesis(&genesis)?;
            println!("{}", block.hash());
        }
        Command::Info => {
            let info = serde_json::json!({
                "genesis": tree.genesis().map(|header| header.hash().to_string()),
                "head": tree.head().map(|block| describe(&block.header)),
                "best_suggested": tree.best_suggested_header().map(|header| describe(&header)),
                "best_known_number": tree.best_known_number(),
                "lowest_inserted_header": tree.lowest_inserted_header().map(|header| header.number),
                "lowest_inserted_body_number": tree.lowest_inserted_body_number(),
            });
            println!("{info:#}");
        }
        Command::Header { number } => {
            let header = tree
                .find_header_by_number(number, LookupOptions::NONE)?
                .ok_or(CliError::MissingHeader(number))?;
            let mut described = describe(&header);
            described["canonical"] = tree.is_main_chain(&header)?.into();
            described["parent_hash"] = header.parent_hash.to_string().into();
            described["state_root"] = header.state_root.to_string().into();
            println!("{described:#}");
        }
        Command::DeleteSlice { start, end } => {
            let deleted = tree.delete_chain_slice(start, end)?;
            info!(start, ?end, deleted, "Deleted chain slice");
            println!("{deleted}");
        }
        Command::Metrics => {
            print!("{}", gather_default_metrics()?);
        }
    }
    Ok(())
}

fn describe(header: &BlockHeader) -> serde_json::Value {
    serde_json::json!({
        "number": header.number,
        "hash": header.hash().to_string(),
        "total_difficulty": header.total_difficulty.map(|td| td.to_string()),
    })
}

fn read_genesis(path: &Path) -> Result<Genesis, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| CliError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Opens the database, the block tree and a processor positioned at the head state.
fn open_chain(datadir: &Path, config: &NodeConfig) -> Result<BlockchainProcessor, CliError> {
    let backend = RocksDBBackend::open(datadir).map_err(StoreError::from)?;
    let store = Arc::new(ChainStore::new(Arc::new(backend), config.store_cache_size));
    let tree = Arc::new(BlockTree::open(store.clone(), config.block_tree.clone())?);

    let state = match tree.head() {
        Some(head) => {
            info!(
                number = head.number(),
                state_root = %ShortRoot(&head.header.state_root.0),
                "Opening state at head"
            );
            WorldState::at_root(store.clone(), head.header.state_root)?
        }
        None => WorldState::new(store.clone()),
    };
    let processor = BranchProcessor::new(
        store,
        state,
        Arc::new(TransferExecutor),
        Arc::new(StaticRewardCalculator::new(config.block_reward)),
        Arc::new(ProcessedBlockValidator),
        config.processor.clone(),
    );
    Ok(BlockchainProcessor::new(
        tree,
        Arc::new(processor),
        ProcessingOptions::NONE.with_receipts(),
    ))
}
