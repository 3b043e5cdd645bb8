//! Blocks and block headers.

use serde::{Deserialize, Serialize};
use signet_crypto::{merkle_root, Hash, Hashable};
use signet_crypto::{Address, KeyPair, PublicKey, Signature};

use crate::transaction::Transaction;
use crate::types::{Gas, Height, Round, TimestampMs};
use crate::{ChainError, ChainResult};

/// Block header, the part the producer signs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: Height,
    pub parent_hash: Hash,
    pub transactions_root: Hash,
    pub state_root: Hash,
    pub timestamp: TimestampMs,
    pub producer: Address,
    /// Rotation round within this height; 0 is the scheduled producer,
    /// higher rounds are timeout takeovers
    pub round: Round,
    pub gas_used: Gas,
}

impl BlockHeader {
    /// Digest of the header, the preimage the producer signs
    pub fn digest(&self) -> Hash {
        bincode::serialize(self).unwrap().hash()
    }

    /// Structural checks against the parent header
    pub fn validate_against_parent(&self, parent: &BlockHeader) -> ChainResult<()> {
        if self.height != parent.height + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "height {} does not follow parent height {}",
                self.height, parent.height
            )));
        }
        if self.parent_hash == Hash::zero() {
            return Err(ChainError::InvalidBlock("missing parent hash".into()));
        }
        if self.timestamp <= parent.timestamp {
            return Err(ChainError::InvalidBlock(format!(
                "timestamp {} is not after parent timestamp {}",
                self.timestamp, parent.timestamp
            )));
        }
        Ok(())
    }
}

/// A block: header, ordered transactions, and the producer's signature.
///
/// The block hash commits to both the header digest and the signature,
/// so two producers signing identical content still yield distinct
/// block identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// `None` only for the genesis block
    pub signature: Option<Signature>,
}

impl Block {
    /// Assembles an unsigned block; the transactions root and gas total
    /// are derived from the transaction list and receipts
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        height: Height,
        parent_hash: Hash,
        state_root: Hash,
        producer: Address,
        round: Round,
        timestamp: TimestampMs,
        transactions: Vec<Transaction>,
        gas_used: Gas,
    ) -> Self {
        let tx_hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
        let transactions_root = merkle_root(&tx_hashes);

        Block {
            header: BlockHeader {
                height,
                parent_hash,
                transactions_root,
                state_root,
                timestamp,
                producer,
                round,
                gas_used,
            },
            transactions,
            signature: None,
        }
    }

    /// The genesis block. Unsigned, zero parent, no transactions.
    pub fn genesis(timestamp: TimestampMs, state_root: Hash) -> Self {
        Block {
            header: BlockHeader {
                height: 0,
                parent_hash: Hash::zero(),
                transactions_root: Hash::zero(),
                state_root,
                timestamp,
                producer: Address::zero(),
                round: 0,
                gas_used: 0,
            },
            transactions: Vec::new(),
            signature: None,
        }
    }

    /// Block identity: hash over the header digest and the signature
    pub fn hash(&self) -> Hash {
        let digest = self.header.digest();
        let mut preimage = Vec::with_capacity(64 + 64);
        preimage.extend_from_slice(digest.as_bytes());
        if let Some(sig) = &self.signature {
            preimage.extend_from_slice(sig.as_bytes());
        }
        preimage.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.parent_hash.is_zero()
    }

    /// Signs the header digest as the block producer
    pub fn sign(&mut self, keypair: &KeyPair) -> ChainResult<()> {
        let digest = self.header.digest();
        let signature = keypair.sign(digest.as_bytes())?;
        self.signature = Some(signature);
        Ok(())
    }

    /// Verifies the producer signature against the given public key
    pub fn verify_signature(&self, public_key: &PublicKey) -> ChainResult<bool> {
        let signature = match &self.signature {
            Some(sig) => sig,
            None => return Ok(false),
        };
        let digest = self.header.digest();
        Ok(signature.verify(digest.as_bytes(), public_key)?)
    }

    /// Recomputes the transactions root and compares it to the header
    pub fn verify_transactions_root(&self) -> bool {
        let tx_hashes: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        merkle_root(&tx_hashes) == self.header.transactions_root
    }

    /// Structural validation against the parent: header linkage, the
    /// transactions root, and per-transaction well-formedness
    pub fn validate_structure(&self, parent: &BlockHeader) -> ChainResult<()> {
        self.header.validate_against_parent(parent)?;

        if self.signature.is_none() {
            return Err(ChainError::InvalidBlock("missing producer signature".into()));
        }
        if !self.verify_transactions_root() {
            return Err(ChainError::InvalidBlock(
                "transactions root does not match transaction list".into(),
            ));
        }
        for tx in &self.transactions {
            tx.validate_basic()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxKind;
    use crate::types::Amount;
    use signet_crypto::SignatureScheme;

    fn producer() -> KeyPair {
        KeyPair::generate(SignatureScheme::Ed25519).unwrap()
    }

    fn sample_tx(keypair: &KeyPair, nonce: u64) -> Transaction {
        let mut tx = Transaction::new(
            keypair.address(),
            keypair.public_key().clone(),
            nonce,
            TxKind::Transfer {
                to: producer().address(),
                amount: Amount::from_u64(5),
            },
            21_000,
            1,
        );
        tx.sign(keypair).unwrap();
        tx
    }

    fn child_of(genesis: &Block, keypair: &KeyPair, transactions: Vec<Transaction>) -> Block {
        let mut block = Block::new(
            1,
            genesis.hash(),
            Hash::zero(),
            keypair.address(),
            0,
            genesis.header.timestamp + 1_000,
            transactions,
            21_000,
        );
        block.sign(keypair).unwrap();
        block
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = Block::genesis(0, Hash::zero());
        assert!(genesis.is_genesis());
        assert_eq!(genesis.height(), 0);
        assert!(genesis.header.parent_hash.is_zero());
        assert!(genesis.signature.is_none());
    }

    #[test]
    fn test_block_hash_commits_to_signature() {
        let kp = producer();
        let genesis = Block::genesis(0, Hash::zero());

        let mut block = Block::new(
            1,
            genesis.hash(),
            Hash::zero(),
            kp.address(),
            0,
            1_000,
            vec![],
            0,
        );
        let unsigned_hash = block.hash();
        block.sign(&kp).unwrap();
        assert_ne!(block.hash(), unsigned_hash);
    }

    #[test]
    fn test_sign_and_verify_producer() {
        let kp = producer();
        let other = producer();
        let genesis = Block::genesis(0, Hash::zero());
        let block = child_of(&genesis, &kp, vec![]);

        assert!(block.verify_signature(kp.public_key()).unwrap());
        assert!(!block.verify_signature(other.public_key()).unwrap());
    }

    #[test]
    fn test_validate_structure() {
        let kp = producer();
        let sender = producer();
        let genesis = Block::genesis(0, Hash::zero());
        let block = child_of(&genesis, &kp, vec![sample_tx(&sender, 0)]);

        assert!(block.validate_structure(&genesis.header).is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_height() {
        let kp = producer();
        let genesis = Block::genesis(0, Hash::zero());
        let mut block = child_of(&genesis, &kp, vec![]);
        block.header.height = 5;
        block.sign(&kp).unwrap();

        assert!(block.validate_structure(&genesis.header).is_err());
    }

    #[test]
    fn test_validate_rejects_stale_timestamp() {
        let kp = producer();
        let genesis = Block::genesis(5_000, Hash::zero());
        let mut block = Block::new(
            1,
            genesis.hash(),
            Hash::zero(),
            kp.address(),
            0,
            5_000,
            vec![],
            0,
        );
        block.sign(&kp).unwrap();

        assert!(block.validate_structure(&genesis.header).is_err());
    }

    #[test]
    fn test_validate_rejects_tampered_transactions() {
        let kp = producer();
        let sender = producer();
        let genesis = Block::genesis(0, Hash::zero());
        let mut block = child_of(&genesis, &kp, vec![sample_tx(&sender, 0)]);

        // swap the transaction list without recomputing the root
        block.transactions = vec![sample_tx(&sender, 1)];
        assert!(block.validate_structure(&genesis.header).is_err());
    }
}
