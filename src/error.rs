use thiserror::Error;

/// Failure talking to the remote Pocket node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {path} timed out")]
    Timeout { path: String },

    #[error("node returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} still had pages left after {pages} pages")]
    PageLimit { path: String, pages: u32 },
}

impl NodeError {
    pub(crate) fn from_reqwest(path: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NodeError::Timeout {
                path: path.to_string(),
            }
        } else {
            NodeError::Request {
                path: path.to_string(),
                source: err,
            }
        }
    }
}

#[derive(Error, Debug)]
#[error("failed to fetch transactions for {address}: {source}")]
pub struct SourceError {
    pub address: String,
    #[source]
    pub source: NodeError,
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("block {0} is unknown to the node")]
    UnknownHeight(u64),
}

#[derive(Error, Debug)]
#[error("failed to resolve block time at height {height}: {source}")]
pub struct ResolutionError {
    pub height: u64,
    #[source]
    pub source: LookupError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("transaction {hash}: missing required field {field}")]
    MissingField { hash: String, field: &'static str },

    #[error("transaction {hash}: malformed {field} {value:?}")]
    Malformed {
        hash: String,
        field: &'static str,
        value: String,
    },

    #[error("transaction {hash}: expire height {expire} is below session height {session}")]
    InvalidWindow {
        hash: String,
        session: u64,
        expire: u64,
    },

    #[error("transaction {hash}: payout overflows decimal range")]
    PayoutOverflow { hash: String },
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("block time store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored block time {value:?} at height {height} is not RFC 3339")]
    Corrupt { height: u64, value: String },
}

/// Request-fatal outcome of a monthly rewards computation.
#[derive(Error, Debug)]
pub enum RewardsError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("{failed} of {total} transactions could not be resolved (first: {first})")]
    Resolution {
        failed: usize,
        total: usize,
        first: ResolutionError,
    },

    #[error("{failed} of {total} transactions could not be classified (first: {first})")]
    Classification {
        failed: usize,
        total: usize,
        first: ClassificationError,
    },

    #[error("relay or payout totals for {year}-{month:02} overflow")]
    Overflow { year: i32, month: u32 },
}
