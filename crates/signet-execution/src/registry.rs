//! Contract registry metadata.
//!
//! On-chain state holds only code and storage. Everything the dashboard
//! knows a contract by (name, owner, ABI, verification and enablement
//! flags) is node-local metadata kept in this registry record and
//! persisted alongside the chain.

use serde::{Deserialize, Serialize};
use signet_crypto::{Address, Hash};

use signet_core::types::{Height, TimestampMs};

/// Everything the node tracks about a deployed contract beyond its code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMeta {
    pub address: Address,
    pub name: String,
    /// The deploying account; enable, disable, and verify are owner-only
    pub owner: Address,
    /// Verbatim ABI JSON as supplied at deployment or verification
    pub abi: Option<String>,
    pub code_hash: Hash,
    pub deploy_tx: Hash,
    pub deployed_at: Height,
    pub created_at: TimestampMs,
    /// Source has been recompiled and matched against on-chain code
    pub verified: bool,
    /// Disabled contracts reject new calls at the API edge
    pub enabled: bool,
}

impl ContractMeta {
    pub fn new(
        address: Address,
        name: String,
        owner: Address,
        abi: Option<String>,
        code_hash: Hash,
        deploy_tx: Hash,
        deployed_at: Height,
        created_at: TimestampMs,
    ) -> Self {
        ContractMeta {
            address,
            name,
            owner,
            abi,
            code_hash,
            deploy_tx,
            deployed_at,
            created_at,
            verified: false,
            enabled: true,
        }
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.owner == *address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_contract_defaults() {
        let owner = Address::new([1; 20]);
        let meta = ContractMeta::new(
            Address::new([2; 20]),
            "counter".to_string(),
            owner,
            Some("[]".to_string()),
            Hash::zero(),
            Hash::zero(),
            3,
            1_000,
        );

        assert!(meta.enabled);
        assert!(!meta.verified);
        assert!(meta.is_owner(&owner));
        assert!(!meta.is_owner(&Address::new([9; 20])));
    }
}
