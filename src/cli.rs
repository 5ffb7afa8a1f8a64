use clap::{Parser, Subcommand, ValueEnum};

use pokt_monitor::models::SortOrder;

#[derive(Parser, Debug)]
#[command(name = "pokt-monitor", version, about = "Pocket node and reward analytics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the current chain height
    Height,
    /// Show staking, balance and sync status of a node
    Node {
        address: String,
    },
    /// Show a single classified transaction
    Tx {
        hash: String,
    },
    /// List one page of an account's transactions
    AccountTxs {
        address: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        per_page: u32,
        #[arg(long, value_enum, default_value_t = Sort::Desc)]
        sort: Sort,
    },
    /// Resolve block heights to UTC block times
    BlockTimes {
        #[arg(required = true)]
        heights: Vec<u64>,
    },
    /// Dump node parameters at a height (0 = latest)
    Params {
        #[arg(long, default_value_t = 0)]
        height: u64,
    },
    /// Monthly reward summaries for an account, newest month first
    Rewards {
        address: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Sort {
    Asc,
    Desc,
}

impl From<Sort> for SortOrder {
    fn from(sort: Sort) -> Self {
        match sort {
            Sort::Asc => SortOrder::Asc,
            Sort::Desc => SortOrder::Desc,
        }
    }
}
