//! Wire DTOs for the REST surface.
//!
//! Identifiers render as `0x`-prefixed hex, balances and fees as
//! decimal strings, timestamps as milliseconds since the epoch.

use serde::{Deserialize, Serialize};
use signet_core::block::Block;
use signet_core::transaction::{ExecStatus, LogEntry, Receipt, Transaction, TxKind};
use signet_core::types::{Gas, GasPrice, Height, Round, TimestampMs};
use signet_crypto::Hash;
use signet_execution::ContractMeta;

/// Largest page a list endpoint will serve
pub const MAX_PAGE: usize = 100;
/// Page size when the caller does not ask for one
pub const DEFAULT_PAGE: usize = 20;

pub(crate) fn hash_hex(hash: &Hash) -> String {
    format!("0x{}", hash.to_hex())
}

pub(crate) fn bytes_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub(crate) fn status_str(status: ExecStatus) -> &'static str {
    match status {
        ExecStatus::Success => "success",
        ExecStatus::Failed => "failed",
        ExecStatus::Reverted => "reverted",
    }
}

/// `limit`/`offset` query parameters, newest first
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageQuery {
    /// Applies defaults and the page-size cap
    pub fn clamp(&self) -> (usize, usize) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        (limit, self.offset.unwrap_or(0))
    }
}

// ==================== NODE ====================

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub chain_id: String,
    pub version: String,
    pub height: Height,
    pub head_hash: String,
    pub head_timestamp: TimestampMs,
    pub validator_count: usize,
    pub active_validators: usize,
    pub pending_transactions: usize,
    pub node_address: Option<String>,
    pub role: String,
    pub halted: bool,
    pub timestamp: TimestampMs,
}

// ==================== BLOCKS ====================

#[derive(Debug, Serialize)]
pub struct BlockSummary {
    pub height: Height,
    pub hash: String,
    pub parent_hash: String,
    pub producer: String,
    pub round: Round,
    pub timestamp: TimestampMs,
    pub transactions: usize,
    pub gas_used: Gas,
}

impl BlockSummary {
    pub fn from_block(block: &Block) -> Self {
        BlockSummary {
            height: block.height(),
            hash: hash_hex(&block.hash()),
            parent_hash: hash_hex(&block.header.parent_hash),
            producer: block.header.producer.to_hex(),
            round: block.header.round,
            timestamp: block.header.timestamp,
            transactions: block.transactions.len(),
            gas_used: block.header.gas_used,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlockDetail {
    pub height: Height,
    pub hash: String,
    pub parent_hash: String,
    pub state_root: String,
    pub transactions_root: String,
    pub producer: String,
    pub round: Round,
    pub timestamp: TimestampMs,
    pub gas_used: Gas,
    pub transactions: Vec<TransactionDto>,
}

// ==================== TRANSACTIONS ====================

#[derive(Debug, Serialize)]
pub struct TransactionDto {
    pub hash: String,
    pub from: String,
    pub kind: &'static str,
    pub nonce: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    pub gas_limit: Gas,
    pub gas_price: GasPrice,
    pub timestamp: TimestampMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Height>,
}

impl TransactionDto {
    /// `receipt` is `None` for transactions still in the pool
    pub fn from_parts(tx: &Transaction, receipt: Option<&Receipt>) -> Self {
        let (to, amount, contract) = match &tx.kind {
            TxKind::Transfer { to, amount } => {
                (Some(to.to_hex()), Some(amount.to_decimal_string()), None)
            }
            TxKind::ContractCall {
                contract, value, ..
            } => (
                None,
                Some(value.to_decimal_string()),
                Some(contract.to_hex()),
            ),
            TxKind::ContractCreate { value, .. } => {
                (None, Some(value.to_decimal_string()), None)
            }
            TxKind::AddValidator { validator, .. }
            | TxKind::RemoveValidator { validator } => (Some(validator.to_hex()), None, None),
        };
        TransactionDto {
            hash: hash_hex(&tx.hash()),
            from: tx.from.to_hex(),
            kind: tx.kind.name(),
            nonce: tx.nonce,
            to,
            amount,
            contract,
            gas_limit: tx.gas_limit,
            gas_price: tx.gas_price,
            timestamp: tx.timestamp,
            status: receipt.map(|r| status_str(r.status)),
            height: receipt.map(|r| r.block_height),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TxStatusResponse {
    pub hash: String,
    /// `pending`, `confirmed`, `failed`, or `unknown`
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<Height>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<Gas>,
}

#[derive(Debug, Serialize)]
pub struct LogDto {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

impl LogDto {
    pub fn from_log(log: &LogEntry) -> Self {
        LogDto {
            address: log.address.to_hex(),
            topics: log.topics.iter().map(hash_hex).collect(),
            data: bytes_hex(&log.data),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiptDto {
    pub tx_hash: String,
    pub block_hash: String,
    pub block_height: Height,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub status: &'static str,
    pub gas_used: Gas,
    pub output: String,
    pub logs: Vec<LogDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReceiptDto {
    pub fn from_receipt(receipt: &Receipt) -> Self {
        ReceiptDto {
            tx_hash: hash_hex(&receipt.tx_hash),
            block_hash: hash_hex(&receipt.block_hash),
            block_height: receipt.block_height,
            from: receipt.from.to_hex(),
            to: receipt.to.map(|a| a.to_hex()),
            status: status_str(receipt.status),
            gas_used: receipt.gas_used,
            output: bytes_hex(&receipt.output),
            logs: receipt.logs.iter().map(LogDto::from_log).collect(),
            contract_address: receipt.contract_address.map(|a| a.to_hex()),
            error: receipt.error.clone(),
        }
    }
}

/// Submission body: either a fully signed transaction or a bare
/// transfer the node signs with its own key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SubmitTxRequest {
    Signed(Box<Transaction>),
    Simple(SimpleTransfer),
}

#[derive(Debug, Deserialize)]
pub struct SimpleTransfer {
    pub to: String,
    /// Decimal token amount
    pub amount: String,
    pub gas_limit: Option<Gas>,
    pub gas_price: Option<GasPrice>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub hash: String,
}

// ==================== VALIDATORS ====================

#[derive(Debug, Serialize)]
pub struct ValidatorDto {
    pub address: String,
    pub public_key: String,
    pub joined_at: Height,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<Height>,
    pub active: bool,
    pub blocks_produced: u64,
    pub blocks_missed: u64,
}

#[derive(Debug, Serialize)]
pub struct CurrentValidatorResponse {
    pub address: String,
    pub public_key: String,
    pub height: Height,
}

#[derive(Debug, Deserialize)]
pub struct AddValidatorRequest {
    pub address: String,
    /// Hex public key matching the address
    pub public_key: String,
    /// `ed25519` (default) or `secp256k1`
    pub scheme: Option<String>,
}

// ==================== CONTRACTS ====================

#[derive(Debug, Serialize)]
pub struct ContractDto {
    pub address: String,
    pub name: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
    pub code_hash: String,
    pub deploy_tx: String,
    pub deployed_at: Height,
    pub created_at: TimestampMs,
    pub verified: bool,
    pub enabled: bool,
    /// `pending` until the deploy commits, then `active` or `failed`
    pub status: &'static str,
    pub balance: String,
    pub transactions: usize,
}

impl ContractDto {
    pub fn from_meta(
        meta: &ContractMeta,
        status: &'static str,
        balance: String,
        transactions: usize,
    ) -> Self {
        ContractDto {
            address: meta.address.to_hex(),
            name: meta.name.clone(),
            owner: meta.owner.to_hex(),
            abi: meta.abi.clone(),
            code_hash: hash_hex(&meta.code_hash),
            deploy_tx: hash_hex(&meta.deploy_tx),
            deployed_at: meta.deployed_at,
            created_at: meta.created_at,
            verified: meta.verified,
            enabled: meta.enabled,
            status,
            balance,
            transactions,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub name: String,
    /// Source text for the external compiler
    pub source: Option<String>,
    /// Precompiled bytecode as hex, bypasses the compiler
    pub code: Option<String>,
    /// ABI JSON accompanying precompiled bytecode
    pub abi: Option<serde_json::Value>,
    /// Constructor input as hex
    pub init_input: Option<String>,
    /// Decimal endowment moved to the contract account
    pub value: Option<String>,
    pub gas_limit: Option<Gas>,
    pub gas_price: Option<GasPrice>,
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub hash: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Call input as hex
    pub input: Option<String>,
    /// Decimal token amount sent along with the call
    pub value: Option<String>,
    pub gas_limit: Option<Gas>,
    pub gas_price: Option<GasPrice>,
}

/// Body of the owner-gated enable and disable calls
#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    /// Must match the contract's registered owner
    pub owner: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(alias = "sourceCode")]
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub address: String,
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    /// Sender to simulate as; defaults to the node account
    pub from: Option<String>,
    /// Transfer recipient
    pub to: Option<String>,
    /// Decimal transfer amount
    pub amount: Option<String>,
    /// Contract to call
    pub contract: Option<String>,
    /// Call or constructor input as hex
    pub input: Option<String>,
    /// Decimal value sent with a call or deployment
    pub value: Option<String>,
    /// Deployment bytecode as hex
    pub code: Option<String>,
    /// Deployment source for the external compiler
    pub source: Option<String>,
    /// Gas envelope for the dry run
    pub gas_limit: Option<Gas>,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub gas_limit: Gas,
    pub gas_price: GasPrice,
    pub total_cost: String,
    /// `execution` for a dry run, `static` for the schedule fallback
    pub source: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ContractTxRow {
    pub hash: String,
    pub from: String,
    pub status: &'static str,
    pub gas_used: Gas,
    pub height: Height,
    pub timestamp: TimestampMs,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ContractTxPage {
    pub transactions: Vec<ContractTxRow>,
    /// Rows visible to the index scan, not the all-time count
    pub total: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Drops events from blocks older than this timestamp
    pub from_timestamp: Option<TimestampMs>,
}

#[derive(Debug, Serialize)]
pub struct EventRow {
    pub tx_hash: String,
    pub height: Height,
    pub timestamp: TimestampMs,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsQuery {
    /// `24h`, `7d`, or `30d`; unset means everything visible
    pub range: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GasStats {
    pub total: Gas,
    pub average: Gas,
    pub max: Gas,
    pub min: Gas,
}

#[derive(Debug, Serialize)]
pub struct CallerStat {
    pub address: String,
    pub calls: usize,
    pub gas_used: Gas,
}

#[derive(Debug, Serialize)]
pub struct AnalyticsResponse {
    pub address: String,
    pub total_calls: usize,
    pub successes: usize,
    pub failures: usize,
    pub gas: GasStats,
    pub unique_callers: usize,
    pub top_callers: Vec<CallerStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<TimestampMs>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query_clamps_limit() {
        let query = PageQuery {
            limit: Some(10_000),
            offset: Some(5),
        };
        assert_eq!(query.clamp(), (MAX_PAGE, 5));

        let query = PageQuery::default();
        assert_eq!(query.clamp(), (DEFAULT_PAGE, 0));

        let query = PageQuery {
            limit: Some(0),
            offset: None,
        };
        assert_eq!(query.clamp(), (1, 0));
    }

    #[test]
    fn test_hash_rendering_is_prefixed() {
        let hash = Hash::new([0xab; 32]);
        let rendered = hash_hex(&hash);
        assert!(rendered.starts_with("0x"));
        assert_eq!(rendered.len(), 2 + 64);
    }

    #[test]
    fn test_submit_request_accepts_simple_form() {
        let body = r#"{"to": "0x0101010101010101010101010101010101010101", "amount": "25"}"#;
        match serde_json::from_str::<SubmitTxRequest>(body) {
            Ok(SubmitTxRequest::Simple(form)) => {
                assert_eq!(form.amount, "25");
                assert!(form.gas_limit.is_none());
            }
            other => panic!("expected simple form, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_request_accepts_camel_case_alias() {
        let body = r#"{"sourceCode": "contract C {}"}"#;
        let request: VerifyRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.source, "contract C {}");
    }
}
