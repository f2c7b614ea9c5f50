use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use atomic_common::{abi::Abi, chain::Name};
use log::{debug, info};

use crate::{
    db::{ContractDbTransaction, DbError, DbStore, DbTx as _, DbValue},
    db_row,
};

/// Table persisting every ABI seen in the stream, so a restart decodes
/// history exactly like the first pass did.
pub const ABI_TABLE: &str = "contract_abis";

/// Tracks which ABI version is active for each contract at each height.
///
/// Written only from the receiver task; lookups return the ABI installed at
/// the largest height at or below the target.
#[derive(Default)]
pub struct AbiCache {
    contracts: HashMap<Name, BTreeMap<u32, Arc<Abi>>>,
}

impl AbiCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// ABI effective for `contract` at `block_num`.
    pub fn abi_for(&self, contract: &Name, block_num: u32) -> Option<Arc<Abi>> {
        self.contracts
            .get(contract)?
            .range(..=block_num)
            .next_back()
            .map(|(_, abi)| Arc::clone(abi))
    }

    pub fn install(&mut self, contract: Name, block_num: u32, abi: Arc<Abi>) {
        debug!("Installing ABI for {} at block {}", contract, block_num);
        self.contracts
            .entry(contract)
            .or_default()
            .insert(block_num, abi);
    }

    /// Install an ABI seen in the stream and persist it in the block's
    /// transaction so replay after a restart resolves identically.
    pub async fn install_persistent(
        &mut self,
        db: &mut ContractDbTransaction,
        contract: Name,
        block_num: u32,
        abi_bytes: &[u8],
    ) -> Result<(), DbError> {
        let abi = Abi::from_bin(abi_bytes)
            .map_err(|e| DbError::Serialization(format!("invalid ABI for {}: {}", contract, e)))?;

        let row = db_row! {
            "account" => contract.to_string(),
            "abi" => abi_bytes.to_vec(),
            "block_num" => block_num,
        };
        db.replace(ABI_TABLE, &row, &["account", "block_num"]).await?;

        self.install(contract, block_num, Arc::new(abi));
        Ok(())
    }

    /// Load every persisted ABI at startup.
    pub async fn load(&mut self, store: &dyn DbStore) -> Result<usize, DbError> {
        let mut tx = store.begin().await?;
        let rows = tx
            .select(ABI_TABLE, &Default::default(), &[], None)
            .await?;
        tx.rollback().await?;

        let mut loaded = 0;
        for row in rows {
            let Some(account) = row.get("account").and_then(DbValue::as_str) else {
                continue;
            };
            let Ok(contract) = account.parse::<Name>() else {
                continue;
            };
            let Some(block_num) = row.get("block_num").and_then(DbValue::as_i64) else {
                continue;
            };
            let Some(DbValue::Bytes(bytes)) = row.get("abi") else {
                continue;
            };

            match Abi::from_bin(bytes) {
                Ok(abi) => {
                    self.install(contract, block_num as u32, Arc::new(abi));
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!("Skipping stored ABI for {} at {}: {}", account, block_num, e);
                }
            }
        }

        if loaded > 0 {
            info!("Loaded {} persisted contract ABIs", loaded);
        }
        Ok(loaded)
    }

    /// Drop entries installed at or above a forked-out height. The
    /// persisted rows are removed by the rollback path; this keeps the
    /// in-memory view in step.
    pub fn rollback(&mut self, from_block: u32) {
        for versions in self.contracts.values_mut() {
            versions.retain(|&block_num, _| block_num < from_block);
        }
    }

    fn row_count(&self) -> usize {
        self.contracts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomic_common::abi::AbiDef;
    use std::str::FromStr;

    fn abi_with_version(version: &str) -> Arc<Abi> {
        Arc::new(Abi::new(AbiDef {
            version: version.to_string(),
            ..Default::default()
        }))
    }

    #[test]
    fn test_height_lookup() {
        let mut cache = AbiCache::new();
        let contract = Name::from_str("atomicassets").unwrap();
        cache.install(contract, 100, abi_with_version("v100"));
        cache.install(contract, 500, abi_with_version("v500"));

        // before any ABI
        assert!(cache.abi_for(&contract, 99).is_none());
        // a transfer at 499 replayed from rollback uses the previous ABI
        assert_eq!(cache.abi_for(&contract, 499).unwrap().def.version, "v100");
        // a transfer at the switch height decodes with the new ABI
        assert_eq!(cache.abi_for(&contract, 500).unwrap().def.version, "v500");
        assert_eq!(cache.abi_for(&contract, 9999).unwrap().def.version, "v500");
    }

    #[test]
    fn test_unknown_contract() {
        let cache = AbiCache::new();
        assert!(cache
            .abi_for(&Name::from_str("nobody").unwrap(), 100)
            .is_none());
    }
}
