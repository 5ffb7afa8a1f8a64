use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::Chain;

const POCKET_MAINNET_CHAINS: &[(&str, &str)] = &[
    ("0001", "Pocket Network"),
    ("0003", "Avalanche"),
    ("0004", "Binance Smart Chain"),
    ("0005", "FUSE"),
    ("0006", "Solana"),
    ("0009", "Polygon"),
    ("000B", "Polygon Archival"),
    ("0010", "Binance Smart Chain Archival"),
    ("0021", "Ethereum"),
    ("0022", "Ethereum Archival"),
    ("0023", "Ethereum Ropsten"),
    ("0024", "Ethereum Kovan"),
    ("0025", "Ethereum Rinkeby"),
    ("0026", "Ethereum Goerli"),
    ("0027", "Gnosis"),
    ("0028", "Ethereum Archival Trace"),
    ("0040", "Harmony Shard 0"),
    ("0044", "IoTeX"),
    ("0047", "OKExChain"),
    ("0049", "Fantom"),
];

/// Read-only chain id → display name table, passed explicitly to whoever
/// needs chain names.
#[derive(Debug, Clone, Default)]
pub struct ChainTable {
    by_id: HashMap<String, Chain>,
}

impl ChainTable {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let by_id = entries
            .into_iter()
            .map(|(id, name)| {
                let id = id.into();
                let chain = Chain {
                    name: name.into(),
                    id: id.clone(),
                };
                (id, chain)
            })
            .collect();
        Self { by_id }
    }

    pub fn pocket_mainnet() -> Self {
        Self::new(POCKET_MAINNET_CHAINS.iter().copied())
    }

    /// Loads a JSON object of `{"<chain id>": "<name>"}` on top of the
    /// mainnet defaults.
    pub fn with_overrides_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading chain table {:?}", path))?;
        let overrides: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("chain table {:?} is not a JSON object of strings", path))?;

        let mut table = Self::pocket_mainnet();
        for (id, name) in overrides {
            table.by_id.insert(id.clone(), Chain { name, id });
        }
        Ok(table)
    }

    pub fn lookup(&self, chain_id: &str) -> Option<&Chain> {
        self.by_id.get(chain_id)
    }

    /// Unknown ids resolve to a chain named after the raw id.
    pub fn resolve(&self, chain_id: &str) -> Chain {
        self.lookup(chain_id).cloned().unwrap_or_else(|| Chain {
            name: chain_id.to_string(),
            id: chain_id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_has_display_name() {
        let table = ChainTable::pocket_mainnet();
        assert_eq!(table.resolve("0021").name, "Ethereum");
        assert_eq!(table.resolve("0021").id, "0021");
    }

    #[test]
    fn unknown_chain_falls_back_to_id() {
        let table = ChainTable::pocket_mainnet();
        assert!(table.lookup("0099").is_none());
        let chain = table.resolve("0099");
        assert_eq!(chain.name, "0099");
        assert_eq!(chain.id, "0099");
    }

    #[test]
    fn overrides_extend_defaults() {
        let path = std::env::temp_dir().join(format!(
            "pokt_monitor_chains_{}.json",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, r#"{"0099": "Testnet", "0021": "Eth"}"#).unwrap();

        let table = ChainTable::with_overrides_from(&path).unwrap();
        assert_eq!(table.resolve("0099").name, "Testnet");
        assert_eq!(table.resolve("0021").name, "Eth");
        assert_eq!(table.resolve("0001").name, "Pocket Network");

        let _ = std::fs::remove_file(path);
    }
}
