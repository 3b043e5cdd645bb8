//! REST route handlers.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use tracing::{debug, info};

use signet_core::block::Block;
use signet_core::now_millis;
use signet_core::transaction::{ExecStatus, Transaction, TxKind};
use signet_core::types::{Amount, Gas, GasPrice, Height, TimestampMs};
use signet_crypto::{Address, Hash, Hashable, PublicKey, SignatureScheme};
use signet_execution::{BlockEnv, ContractMeta};
use signet_storage::ChainStore;

use crate::server::ApiContext;
use crate::types::*;
use crate::{ApiError, ApiResult};

/// Blocks walked when flattening the global transaction list
const TX_SCAN_BLOCKS: usize = 256;
/// Index entries walked for per-contract counts and analytics
const ANALYTICS_SCAN: usize = 1_000;
/// Gas price stamped on node-built transactions
const DEFAULT_GAS_PRICE: GasPrice = 1;
/// Gas envelope for node-built contract calls
const DEFAULT_CALL_GAS: Gas = 200_000;
/// Gas envelope for estimation dry runs
const ESTIMATE_GAS_CAP: Gas = 10_000_000;

// ==================== HELPERS ====================

fn parse_address(s: &str) -> ApiResult<Address> {
    Address::from_hex(s).map_err(|_| ApiError::BadRequest(format!("invalid address: {}", s)))
}

fn parse_hash(s: &str) -> ApiResult<Hash> {
    Hash::from_hex(s).map_err(|_| ApiError::BadRequest(format!("invalid hash: {}", s)))
}

fn parse_amount(s: &str) -> ApiResult<Amount> {
    Amount::from_decimal_string(s)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid amount: {}", s)))
}

fn parse_hex_bytes(s: &str) -> ApiResult<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| ApiError::BadRequest(format!("invalid hex payload: {}", e)))
}

fn tx_value(tx: &Transaction) -> String {
    match &tx.kind {
        TxKind::Transfer { amount, .. } => amount.to_decimal_string(),
        TxKind::ContractCall { value, .. } | TxKind::ContractCreate { value, .. } => {
            value.to_decimal_string()
        }
        _ => Amount::zero().to_decimal_string(),
    }
}

/// Where a contract's deploy transaction stands
fn deploy_status(store: &ChainStore, meta: &ContractMeta) -> ApiResult<&'static str> {
    Ok(match store.receipt(&meta.deploy_tx)? {
        Some(receipt) if receipt.status == ExecStatus::Success => "active",
        Some(_) => "failed",
        None => "pending",
    })
}

/// Builds and signs a transaction from the node's own account
async fn node_signed(
    ctx: &ApiContext,
    kind: TxKind,
    gas_limit: Gas,
    gas_price: GasPrice,
) -> ApiResult<Transaction> {
    let keypair = ctx
        .node_key
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("node has no signing key configured".to_string()))?;
    let from = keypair.address();

    let account_nonce = ctx.state.read().await.nonce(&from);
    let nonce = ctx.mempool.read().await.pending_nonce(&from, account_nonce);

    let mut tx = Transaction::new(
        from,
        keypair.public_key().clone(),
        nonce,
        kind,
        gas_limit,
        gas_price,
    );
    tx.sign(keypair)
        .map_err(|e| ApiError::Internal(format!("signing failed: {}", e)))?;
    Ok(tx)
}

/// Validates a transaction against committed state and admits it to
/// the pool, announcing it on acceptance
async fn admit(ctx: &ApiContext, tx: Transaction) -> ApiResult<Hash> {
    let (nonce, balance) = {
        let state = ctx.state.read().await;
        (state.nonce(&tx.from), state.balance(&tx.from))
    };
    let hash = ctx
        .mempool
        .write()
        .await
        .submit(tx, nonce, &balance)
        .map_err(|reason| ApiError::BadRequest(reason.to_string()))?;
    ctx.gossip.announce_transaction(hash).await;
    Ok(hash)
}

// ==================== NODE ====================

pub async fn info(State(ctx): State<ApiContext>) -> ApiResult<Json<InfoResponse>> {
    let head = ctx.engine.head().await;
    let set = ctx.engine.validator_set().await;
    let pending = ctx.mempool.read().await.len();
    let validator_count = ctx.state.read().await.state().validators().count();

    let node_address = ctx.node_key.as_ref().map(|k| k.address());
    let role = match node_address {
        Some(address) if set.contains(&address) => "validator",
        _ => "observer",
    };

    Ok(Json(InfoResponse {
        chain_id: ctx.chain_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        height: head.height,
        head_hash: hash_hex(&head.hash),
        head_timestamp: head.timestamp,
        validator_count,
        active_validators: set.len(),
        pending_transactions: pending,
        node_address: node_address.map(|a| a.to_hex()),
        role: role.to_string(),
        halted: ctx.engine.is_halted(),
        timestamp: now_millis(),
    }))
}

// ==================== BLOCKS ====================

pub async fn list_blocks(
    State(ctx): State<ApiContext>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<BlockSummary>>> {
    let (limit, offset) = query.clamp();
    let blocks = ctx.store.recent_blocks(limit, offset)?;
    Ok(Json(blocks.iter().map(BlockSummary::from_block).collect()))
}

/// Accepts either a block hash or a decimal height
pub async fn block_by_id(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> ApiResult<Json<BlockDetail>> {
    let block = if let Ok(height) = id.parse::<Height>() {
        ctx.store.block_by_height(height)?
    } else {
        ctx.store.block(&parse_hash(&id)?)?
    };
    let block = block.ok_or_else(|| ApiError::NotFound(format!("block {}", id)))?;

    let mut transactions = Vec::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let receipt = ctx.store.receipt(&tx.hash())?;
        transactions.push(TransactionDto::from_parts(tx, receipt.as_ref()));
    }

    Ok(Json(BlockDetail {
        height: block.height(),
        hash: hash_hex(&block.hash()),
        parent_hash: hash_hex(&block.header.parent_hash),
        state_root: hash_hex(&block.header.state_root),
        transactions_root: hash_hex(&block.header.transactions_root),
        producer: block.header.producer.to_hex(),
        round: block.header.round,
        timestamp: block.header.timestamp,
        gas_used: block.header.gas_used,
        transactions,
    }))
}

// ==================== TRANSACTIONS ====================

/// Committed transactions, newest block first. Serves from the most
/// recent blocks only; deep history goes through block lookups.
pub async fn list_transactions(
    State(ctx): State<ApiContext>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Vec<TransactionDto>>> {
    let (limit, offset) = query.clamp();
    let blocks = ctx.store.recent_blocks(TX_SCAN_BLOCKS, 0)?;

    let mut rows = Vec::with_capacity(limit);
    let mut skipped = 0usize;
    'outer: for block in &blocks {
        for tx in &block.transactions {
            if skipped < offset {
                skipped += 1;
                continue;
            }
            let receipt = ctx.store.receipt(&tx.hash())?;
            rows.push(TransactionDto::from_parts(tx, receipt.as_ref()));
            if rows.len() == limit {
                break 'outer;
            }
        }
    }
    Ok(Json(rows))
}

pub async fn submit_transaction(
    State(ctx): State<ApiContext>,
    Json(request): Json<SubmitTxRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    let tx = match request {
        SubmitTxRequest::Signed(tx) => *tx,
        SubmitTxRequest::Simple(form) => {
            let to = parse_address(&form.to)?;
            let amount = parse_amount(&form.amount)?;
            let kind = TxKind::Transfer { to, amount };
            let gas_limit = form
                .gas_limit
                .unwrap_or_else(|| ctx.exec.schedule().intrinsic_gas(&kind));
            let gas_price = form.gas_price.unwrap_or(DEFAULT_GAS_PRICE);
            node_signed(&ctx, kind, gas_limit, gas_price).await?
        }
    };
    let hash = admit(&ctx, tx).await?;
    debug!(%hash, "transaction accepted");
    Ok(Json(SubmitResponse {
        hash: hash_hex(&hash),
    }))
}

pub async fn transaction_status(
    State(ctx): State<ApiContext>,
    Path(hash): Path<String>,
) -> ApiResult<Json<TxStatusResponse>> {
    let hash = parse_hash(&hash)?;

    if ctx.mempool.read().await.contains(&hash) {
        return Ok(Json(TxStatusResponse {
            hash: hash_hex(&hash),
            status: "pending",
            block_hash: None,
            height: None,
            gas_used: None,
        }));
    }

    let response = match ctx.store.receipt(&hash)? {
        Some(receipt) => TxStatusResponse {
            hash: hash_hex(&hash),
            status: if receipt.status == ExecStatus::Success {
                "confirmed"
            } else {
                "failed"
            },
            block_hash: Some(hash_hex(&receipt.block_hash)),
            height: Some(receipt.block_height),
            gas_used: Some(receipt.gas_used),
        },
        None => TxStatusResponse {
            hash: hash_hex(&hash),
            status: "unknown",
            block_hash: None,
            height: None,
            gas_used: None,
        },
    };
    Ok(Json(response))
}

pub async fn transaction_receipt(
    State(ctx): State<ApiContext>,
    Path(hash): Path<String>,
) -> ApiResult<Json<ReceiptDto>> {
    let hash = parse_hash(&hash)?;
    let receipt = ctx
        .store
        .receipt(&hash)?
        .ok_or_else(|| ApiError::NotFound(format!("receipt for {}", hash_hex(&hash))))?;
    Ok(Json(ReceiptDto::from_receipt(&receipt)))
}

// ==================== VALIDATORS ====================

pub async fn list_validators(
    State(ctx): State<ApiContext>,
) -> ApiResult<Json<Vec<ValidatorDto>>> {
    let set = ctx.engine.validator_set().await;
    let stats = ctx.engine.stats().await;
    let state = ctx.state.read().await;

    let mut rows: Vec<ValidatorDto> = state
        .state()
        .validators()
        .map(|(address, record)| ValidatorDto {
            address: address.to_hex(),
            public_key: record.public_key.to_hex(),
            joined_at: record.joined_at,
            retired_at: record.retired_at,
            active: set.contains(address),
            blocks_produced: stats.produced(address),
            blocks_missed: stats.missed(address),
        })
        .collect();
    rows.sort_by(|a, b| {
        a.joined_at
            .cmp(&b.joined_at)
            .then_with(|| a.address.cmp(&b.address))
    });
    Ok(Json(rows))
}

/// The validator whose turn the next block is, at round zero
pub async fn current_validator(
    State(ctx): State<ApiContext>,
) -> ApiResult<Json<CurrentValidatorResponse>> {
    let head = ctx.engine.head().await;
    let set = ctx.engine.validator_set().await;
    let next = head.height + 1;
    let entry = set
        .producer_for(next, 0)
        .ok_or_else(|| ApiError::NotFound("active validator".to_string()))?;
    Ok(Json(CurrentValidatorResponse {
        address: entry.address.to_hex(),
        public_key: entry.public_key.to_hex(),
        height: next,
    }))
}

pub async fn add_validator(
    State(ctx): State<ApiContext>,
    Json(request): Json<AddValidatorRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    let validator = parse_address(&request.address)?;
    let scheme = match request.scheme.as_deref() {
        None | Some("ed25519") => SignatureScheme::Ed25519,
        Some("secp256k1") => SignatureScheme::Secp256k1,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "unknown signature scheme: {}",
                other
            )))
        }
    };
    let key_hex = request
        .public_key
        .strip_prefix("0x")
        .unwrap_or(&request.public_key);
    let public_key = PublicKey::from_hex(scheme, key_hex)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let kind = TxKind::AddValidator {
        validator,
        public_key,
    };
    let gas_limit = ctx.exec.schedule().intrinsic_gas(&kind);
    let tx = node_signed(&ctx, kind, gas_limit, DEFAULT_GAS_PRICE).await?;
    let hash = admit(&ctx, tx).await?;
    info!(%validator, "validator admission submitted");
    Ok(Json(SubmitResponse {
        hash: hash_hex(&hash),
    }))
}

pub async fn remove_validator(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
) -> ApiResult<Json<SubmitResponse>> {
    let validator = parse_address(&address)?;
    let kind = TxKind::RemoveValidator { validator };
    let gas_limit = ctx.exec.schedule().intrinsic_gas(&kind);
    let tx = node_signed(&ctx, kind, gas_limit, DEFAULT_GAS_PRICE).await?;
    let hash = admit(&ctx, tx).await?;
    info!(%validator, "validator retirement submitted");
    Ok(Json(SubmitResponse {
        hash: hash_hex(&hash),
    }))
}

// ==================== CONTRACTS ====================

pub async fn list_contracts(State(ctx): State<ApiContext>) -> ApiResult<Json<Vec<ContractDto>>> {
    let metas = ctx.store.contracts()?;
    let state = ctx.state.read().await;

    let mut rows = Vec::with_capacity(metas.len());
    for meta in &metas {
        let status = deploy_status(&ctx.store, meta)?;
        let balance = state.balance(&meta.address).to_decimal_string();
        let transactions = ctx
            .store
            .contract_transactions(&meta.address, ANALYTICS_SCAN, 0)?
            .len();
        rows.push(ContractDto::from_meta(meta, status, balance, transactions));
    }
    Ok(Json(rows))
}

pub async fn contract_info(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
) -> ApiResult<Json<ContractDto>> {
    let address = parse_address(&address)?;
    let meta = ctx
        .store
        .contract(&address)?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", address.to_hex())))?;

    let status = deploy_status(&ctx.store, &meta)?;
    let balance = ctx.state.read().await.balance(&address).to_decimal_string();
    let transactions = ctx
        .store
        .contract_transactions(&address, ANALYTICS_SCAN, 0)?
        .len();
    Ok(Json(ContractDto::from_meta(
        &meta,
        status,
        balance,
        transactions,
    )))
}

pub async fn deploy_contract(
    State(ctx): State<ApiContext>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<Json<DeployResponse>> {
    let (code, abi) = match (&request.source, &request.code) {
        (Some(source), _) => {
            let artifact = ctx.compiler.compile(source).await?;
            (artifact.bytecode, Some(artifact.abi))
        }
        (None, Some(code_hex)) => {
            let code = parse_hex_bytes(code_hex)?;
            if code.is_empty() {
                return Err(ApiError::BadRequest("empty bytecode".to_string()));
            }
            (code, request.abi.as_ref().map(|v| v.to_string()))
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "deployment needs source or code".to_string(),
            ))
        }
    };

    let init_input = match &request.init_input {
        Some(hex_input) => parse_hex_bytes(hex_input)?,
        None => Vec::new(),
    };
    let value = match &request.value {
        Some(raw) => parse_amount(raw)?,
        None => Amount::zero(),
    };

    let code_hash = code.hash();
    let kind = TxKind::ContractCreate {
        code,
        init_input,
        value,
    };
    // intrinsic covers payload and deployment costs; doubling leaves
    // room for constructor execution
    let gas_limit = request
        .gas_limit
        .unwrap_or_else(|| ctx.exec.schedule().intrinsic_gas(&kind).saturating_mul(2));
    let gas_price = request.gas_price.unwrap_or(DEFAULT_GAS_PRICE);

    let tx = node_signed(&ctx, kind, gas_limit, gas_price).await?;
    let address = Address::for_contract(&tx.from, tx.nonce, &code_hash);
    let owner = tx.from;
    let hash = admit(&ctx, tx).await?;

    let meta = ContractMeta::new(
        address,
        request.name,
        owner,
        abi,
        code_hash,
        hash,
        0,
        now_millis(),
    );
    ctx.store.put_contract(&meta)?;
    ctx.bus
        .publish(signet_core::ChainEvent::ContractDeployStarted {
            address,
            tx_hash: hash,
        });
    info!(%address, %hash, "contract deployment submitted");

    Ok(Json(DeployResponse {
        hash: hash_hex(&hash),
        address: address.to_hex(),
    }))
}

pub async fn execute_contract(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    let address = parse_address(&address)?;

    if let Some(meta) = ctx.store.contract(&address)? {
        if !meta.enabled {
            return Err(ApiError::BadRequest(format!(
                "contract {} is disabled",
                address.to_hex()
            )));
        }
    }
    if ctx.state.read().await.contract_code(&address).is_none() {
        return Err(ApiError::BadRequest(format!(
            "no code at {}",
            address.to_hex()
        )));
    }

    let input = match &request.input {
        Some(hex_input) => parse_hex_bytes(hex_input)?,
        None => Vec::new(),
    };
    let value = match &request.value {
        Some(raw) => parse_amount(raw)?,
        None => Amount::zero(),
    };

    let kind = TxKind::ContractCall {
        contract: address,
        input,
        value,
    };
    let gas_limit = request.gas_limit.unwrap_or(DEFAULT_CALL_GAS);
    let gas_price = request.gas_price.unwrap_or(DEFAULT_GAS_PRICE);
    let tx = node_signed(&ctx, kind, gas_limit, gas_price).await?;
    let hash = admit(&ctx, tx).await?;
    Ok(Json(SubmitResponse {
        hash: hash_hex(&hash),
    }))
}

async fn set_contract_enabled(
    ctx: &ApiContext,
    address: &str,
    request: &ToggleRequest,
    enabled: bool,
) -> ApiResult<Json<ContractDto>> {
    let address = parse_address(address)?;
    let owner = parse_address(&request.owner)?;
    let mut meta = ctx
        .store
        .contract(&address)?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", address.to_hex())))?;
    if !meta.is_owner(&owner) {
        return Err(ApiError::BadRequest("not the contract owner".to_string()));
    }

    if meta.enabled != enabled {
        meta.enabled = enabled;
        ctx.store.put_contract(&meta)?;
        info!(%address, enabled, "contract toggled");
    }

    let status = deploy_status(&ctx.store, &meta)?;
    let balance = ctx.state.read().await.balance(&address).to_decimal_string();
    let transactions = ctx
        .store
        .contract_transactions(&address, ANALYTICS_SCAN, 0)?
        .len();
    Ok(Json(ContractDto::from_meta(
        &meta,
        status,
        balance,
        transactions,
    )))
}

pub async fn enable_contract(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> ApiResult<Json<ContractDto>> {
    set_contract_enabled(&ctx, &address, &request, true).await
}

pub async fn disable_contract(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> ApiResult<Json<ContractDto>> {
    set_contract_enabled(&ctx, &address, &request, false).await
}

pub async fn contract_transactions(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ContractTxPage>> {
    let address = parse_address(&address)?;
    let (limit, offset) = query.clamp();

    let hashes = ctx.store.contract_transactions(&address, limit, offset)?;
    let total = ctx
        .store
        .contract_transactions(&address, ANALYTICS_SCAN, 0)?
        .len();

    let mut blocks: HashMap<Hash, Block> = HashMap::new();
    let mut rows = Vec::with_capacity(hashes.len());
    for tx_hash in hashes {
        let receipt = match ctx.store.receipt(&tx_hash)? {
            Some(receipt) => receipt,
            None => continue,
        };
        let block = match blocks.get(&receipt.block_hash) {
            Some(block) => block,
            None => match ctx.store.block(&receipt.block_hash)? {
                Some(block) => blocks.entry(receipt.block_hash).or_insert(block),
                None => continue,
            },
        };
        let value = block
            .transactions
            .iter()
            .find(|t| t.hash() == tx_hash)
            .map(tx_value)
            .unwrap_or_else(|| Amount::zero().to_decimal_string());
        rows.push(ContractTxRow {
            hash: hash_hex(&tx_hash),
            from: receipt.from.to_hex(),
            status: status_str(receipt.status),
            gas_used: receipt.gas_used,
            height: receipt.block_height,
            timestamp: block.header.timestamp,
            value,
        });
    }
    Ok(Json(ContractTxPage {
        transactions: rows,
        total,
    }))
}

pub async fn contract_events(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<Vec<EventRow>>> {
    let address = parse_address(&address)?;
    let (limit, offset) = PageQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .clamp();

    let hashes = ctx.store.contract_transactions(&address, limit, offset)?;
    let mut blocks: HashMap<Hash, Block> = HashMap::new();
    let mut rows = Vec::new();
    for tx_hash in hashes {
        let receipt = match ctx.store.receipt(&tx_hash)? {
            Some(receipt) => receipt,
            None => continue,
        };
        let timestamp = match blocks.get(&receipt.block_hash) {
            Some(block) => block.header.timestamp,
            None => match ctx.store.block(&receipt.block_hash)? {
                Some(block) => {
                    let ts = block.header.timestamp;
                    blocks.insert(receipt.block_hash, block);
                    ts
                }
                None => continue,
            },
        };
        if let Some(cutoff) = query.from_timestamp {
            // newest first and timestamps grow with height, so
            // everything after this is older still
            if timestamp < cutoff {
                break;
            }
        }
        for log in receipt.logs.iter().filter(|l| l.address == address) {
            rows.push(EventRow {
                tx_hash: hash_hex(&tx_hash),
                height: receipt.block_height,
                timestamp,
                topics: log.topics.iter().map(hash_hex).collect(),
                data: bytes_hex(&log.data),
            });
        }
    }
    Ok(Json(rows))
}

fn range_cutoff(range: Option<&str>) -> ApiResult<Option<TimestampMs>> {
    let hours = match range {
        None => return Ok(None),
        Some("24h") => 24,
        Some("7d") => 7 * 24,
        Some("30d") => 30 * 24,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "unknown range: {} (expected 24h, 7d, or 30d)",
                other
            )))
        }
    };
    Ok(Some(now_millis().saturating_sub(hours * 3_600_000)))
}

pub async fn contract_analytics(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Json<AnalyticsResponse>> {
    let address = parse_address(&address)?;
    let cutoff = range_cutoff(query.range.as_deref())?;

    let hashes = ctx
        .store
        .contract_transactions(&address, ANALYTICS_SCAN, 0)?;

    let mut blocks: HashMap<Hash, Block> = HashMap::new();
    let mut total_calls = 0usize;
    let mut successes = 0usize;
    let mut gas_total = 0u64;
    let mut gas_max = 0u64;
    let mut gas_min = u64::MAX;
    let mut callers: HashMap<Address, (usize, Gas)> = HashMap::new();
    let mut last_activity: Option<TimestampMs> = None;

    for tx_hash in hashes {
        let receipt = match ctx.store.receipt(&tx_hash)? {
            Some(receipt) => receipt,
            None => continue,
        };
        let timestamp = match blocks.get(&receipt.block_hash) {
            Some(block) => block.header.timestamp,
            None => match ctx.store.block(&receipt.block_hash)? {
                Some(block) => {
                    let ts = block.header.timestamp;
                    blocks.insert(receipt.block_hash, block);
                    ts
                }
                None => continue,
            },
        };
        if let Some(cutoff) = cutoff {
            if timestamp < cutoff {
                break;
            }
        }

        total_calls += 1;
        if receipt.status == ExecStatus::Success {
            successes += 1;
        }
        gas_total = gas_total.saturating_add(receipt.gas_used);
        gas_max = gas_max.max(receipt.gas_used);
        gas_min = gas_min.min(receipt.gas_used);
        let entry = callers.entry(receipt.from).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(receipt.gas_used);
        if last_activity.map_or(true, |seen| timestamp > seen) {
            last_activity = Some(timestamp);
        }
    }

    let mut top_callers: Vec<CallerStat> = callers
        .iter()
        .map(|(caller, (calls, gas_used))| CallerStat {
            address: caller.to_hex(),
            calls: *calls,
            gas_used: *gas_used,
        })
        .collect();
    top_callers.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.address.cmp(&b.address)));
    top_callers.truncate(5);

    Ok(Json(AnalyticsResponse {
        address: address.to_hex(),
        total_calls,
        successes,
        failures: total_calls - successes,
        gas: GasStats {
            total: gas_total,
            average: gas_total / total_calls.max(1) as u64,
            max: gas_max,
            min: if total_calls == 0 { 0 } else { gas_min },
        },
        unique_callers: callers.len(),
        top_callers,
        last_activity,
    }))
}

pub async fn verify_contract(
    State(ctx): State<ApiContext>,
    Path(address): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<Json<VerifyResponse>> {
    let address = parse_address(&address)?;
    let mut meta = ctx
        .store
        .contract(&address)?
        .ok_or_else(|| ApiError::NotFound(format!("contract {}", address.to_hex())))?;

    let deployed = ctx
        .state
        .read()
        .await
        .contract_code(&address)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("no code at {}", address.to_hex()))
        })?;

    let artifact = ctx.compiler.compile(&request.source).await?;
    if artifact.bytecode != deployed {
        return Err(ApiError::BadRequest(
            "compiled bytecode does not match deployed code".to_string(),
        ));
    }

    meta.verified = true;
    meta.abi = Some(artifact.abi);
    ctx.store.put_contract(&meta)?;
    ctx.bus
        .publish(signet_core::ChainEvent::ContractVerified { address });
    info!(%address, "contract verified");

    Ok(Json(VerifyResponse {
        address: address.to_hex(),
        verified: true,
    }))
}

pub async fn estimate_gas(
    State(ctx): State<ApiContext>,
    Json(request): Json<EstimateRequest>,
) -> ApiResult<Json<EstimateResponse>> {
    let input = match &request.input {
        Some(hex_input) => parse_hex_bytes(hex_input)?,
        None => Vec::new(),
    };
    let value = match &request.value {
        Some(raw) => parse_amount(raw)?,
        None => Amount::zero(),
    };

    let kind = if let Some(source) = &request.source {
        let artifact = ctx.compiler.compile(source).await?;
        TxKind::ContractCreate {
            code: artifact.bytecode,
            init_input: input,
            value,
        }
    } else if let Some(code_hex) = &request.code {
        TxKind::ContractCreate {
            code: parse_hex_bytes(code_hex)?,
            init_input: input,
            value,
        }
    } else if let Some(contract) = &request.contract {
        TxKind::ContractCall {
            contract: parse_address(contract)?,
            input,
            value,
        }
    } else if let Some(to) = &request.to {
        let amount = match &request.amount {
            Some(raw) => parse_amount(raw)?,
            None => value,
        };
        TxKind::Transfer {
            to: parse_address(to)?,
            amount,
        }
    } else {
        return Err(ApiError::BadRequest(
            "estimate needs source, code, contract, or to".to_string(),
        ));
    };

    let from = match &request.from {
        Some(raw) => parse_address(raw)?,
        None => ctx
            .node_key
            .as_ref()
            .map(|k| k.address())
            .unwrap_or_else(Address::zero),
    };
    // apply never checks signatures, so a placeholder key is enough
    // when simulating for an arbitrary sender
    let public_key = ctx
        .node_key
        .as_ref()
        .map(|k| k.public_key().clone())
        .unwrap_or_else(|| PublicKey::new(SignatureScheme::Ed25519, Vec::new()));

    let (snapshot, nonce) = {
        let state = ctx.state.read().await;
        (state.snapshot(), state.nonce(&from))
    };
    let head = ctx.engine.head().await;
    let env = BlockEnv {
        height: head.height + 1,
        timestamp: now_millis(),
        producer: Address::zero(),
    };
    // zero price keeps balance checks out of the simulation
    let gas_cap = request.gas_limit.unwrap_or(ESTIMATE_GAS_CAP);
    let tx = Transaction::new(from, public_key, nonce, kind.clone(), gas_cap, 0);

    let (gas_limit, source) = match ctx.exec.estimate(snapshot, &tx, &env) {
        Ok(gas) => (gas, "execution"),
        Err(reason) => {
            debug!(%reason, "dry run failed, using static estimate");
            let intrinsic = ctx.exec.schedule().intrinsic_gas(&kind);
            (intrinsic.saturating_mul(2), "static")
        }
    };

    Ok(Json(EstimateResponse {
        gas_limit,
        gas_price: DEFAULT_GAS_PRICE,
        total_cost: (gas_limit as u128 * DEFAULT_GAS_PRICE as u128).to_string(),
        source,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;
    use tokio::sync::RwLock;

    use signet_consensus::{BlockSink, ConsensusConfig, ConsensusEngine, NullGossip};
    use signet_core::state::{AccountState, ChainState, StateStore, ValidatorRecord};
    use signet_core::{EventBus, Mempool, MempoolConfig};
    use signet_crypto::{KeyPair, SignatureScheme};
    use signet_execution::{DisabledCompiler, ExecutionEngine};
    use signet_storage::StoreConfig;

    const GENESIS_TS: TimestampMs = 1_000;

    fn test_ctx() -> (ApiContext, TempDir) {
        let keypair = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let mut genesis = ChainState::new();
        genesis.set_account(
            keypair.address(),
            AccountState::with_balance(Amount::from_u64(1_000_000_000)),
        );
        genesis.set_validator(
            keypair.address(),
            ValidatorRecord {
                public_key: keypair.public_key().clone(),
                joined_at: 0,
                retired_at: None,
            },
        );
        let genesis_block = Block::genesis(GENESIS_TS, genesis.root());

        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            ChainStore::open(StoreConfig {
                path: dir.path().join("chain"),
                ..StoreConfig::default()
            })
            .unwrap(),
        );
        let state = Arc::new(RwLock::new(StateStore::new(genesis)));
        let exec = ExecutionEngine::with_defaults(1);
        let bus = EventBus::new(64);
        let engine = Arc::new(ConsensusEngine::new(
            ConsensusConfig::default(),
            state.clone(),
            exec.clone(),
            bus.clone(),
            store.clone() as Arc<dyn BlockSink>,
            genesis_block,
        ));

        let ctx = ApiContext {
            chain_id: "signet-test".to_string(),
            node_key: Some(keypair),
            state,
            mempool: Arc::new(RwLock::new(Mempool::new(MempoolConfig::default()))),
            store,
            engine,
            exec,
            bus,
            compiler: Arc::new(DisabledCompiler),
            gossip: Arc::new(NullGossip),
        };
        (ctx, dir)
    }

    fn node_keypair(ctx: &ApiContext) -> KeyPair {
        ctx.node_key.clone().unwrap()
    }

    /// Executes `txs` on a fresh snapshot, assembles the next block, and
    /// commits it through the engine
    async fn commit_next(ctx: &ApiContext, txs: Vec<Transaction>) -> Block {
        let head = ctx.engine.head().await;
        let producer = node_keypair(ctx);
        let timestamp = head.timestamp + 1_000;
        let env = BlockEnv {
            height: head.height + 1,
            timestamp,
            producer: producer.address(),
        };

        let mut snapshot = ctx.state.read().await.snapshot();
        let mut gas_used = 0;
        for tx in &txs {
            let receipt = ctx.exec.apply(&mut snapshot, tx, &env).unwrap();
            gas_used += receipt.gas_used;
        }
        let state_root = snapshot.root();

        let mut block = Block::new(
            head.height + 1,
            head.hash,
            state_root,
            producer.address(),
            0,
            timestamp,
            txs,
            gas_used,
        );
        block.sign(&producer).unwrap();
        ctx.engine.commit_block(block.clone()).await.unwrap();
        block
    }

    fn signed_transfer(ctx: &ApiContext, nonce: u64, to: Address, amount: u64) -> Transaction {
        let keypair = node_keypair(ctx);
        let kind = TxKind::Transfer {
            to,
            amount: Amount::from_u64(amount),
        };
        let gas = ctx.exec.schedule().intrinsic_gas(&kind);
        let mut tx = Transaction::new(
            keypair.address(),
            keypair.public_key().clone(),
            nonce,
            kind,
            gas,
            1,
        );
        tx.sign(&keypair).unwrap();
        tx
    }

    fn other_address() -> Address {
        KeyPair::generate(SignatureScheme::Ed25519)
            .unwrap()
            .address()
    }

    #[tokio::test]
    async fn test_info_reports_genesis_shape() {
        let (ctx, _dir) = test_ctx();
        let info = info(State(ctx.clone())).await.unwrap().0;

        assert_eq!(info.chain_id, "signet-test");
        assert_eq!(info.height, 0);
        assert_eq!(info.role, "validator");
        assert_eq!(info.active_validators, 1);
        assert_eq!(info.pending_transactions, 0);
        assert!(!info.halted);
    }

    #[tokio::test]
    async fn test_simple_transfer_enters_pool() {
        let (ctx, _dir) = test_ctx();
        let to = other_address();

        let body = SubmitTxRequest::Simple(SimpleTransfer {
            to: to.to_hex(),
            amount: "25".to_string(),
            gas_limit: None,
            gas_price: None,
        });
        let response = submit_transaction(State(ctx.clone()), Json(body))
            .await
            .unwrap()
            .0;
        assert_eq!(ctx.mempool.read().await.len(), 1);

        let status = transaction_status(State(ctx.clone()), Path(response.hash.clone()))
            .await
            .unwrap()
            .0;
        assert_eq!(status.status, "pending");
        assert_eq!(status.hash, response.hash);
    }

    #[tokio::test]
    async fn test_submission_with_nonce_gap_is_rejected() {
        let (ctx, _dir) = test_ctx();
        let tx = signed_transfer(&ctx, 5, other_address(), 1);

        let result = submit_transaction(
            State(ctx.clone()),
            Json(SubmitTxRequest::Signed(Box::new(tx))),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(ctx.mempool.read().await.len(), 0);
    }

    #[tokio::test]
    async fn test_block_lookup_by_height_and_hash() {
        let (ctx, _dir) = test_ctx();
        let block = commit_next(&ctx, vec![]).await;

        let by_height = block_by_id(State(ctx.clone()), Path("1".to_string()))
            .await
            .unwrap()
            .0;
        assert_eq!(by_height.height, 1);

        let by_hash = block_by_id(State(ctx.clone()), Path(hash_hex(&block.hash())))
            .await
            .unwrap()
            .0;
        assert_eq!(by_hash.hash, by_height.hash);

        let missing = block_by_id(State(ctx.clone()), Path("99".to_string())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_confirmed_transfer_round_trip() {
        let (ctx, _dir) = test_ctx();
        let to = other_address();
        let tx = signed_transfer(&ctx, 0, to, 40);
        let tx_hash = tx.hash();
        commit_next(&ctx, vec![tx]).await;

        let status = transaction_status(State(ctx.clone()), Path(hash_hex(&tx_hash)))
            .await
            .unwrap()
            .0;
        assert_eq!(status.status, "confirmed");
        assert_eq!(status.height, Some(1));

        let receipt = transaction_receipt(State(ctx.clone()), Path(hash_hex(&tx_hash)))
            .await
            .unwrap()
            .0;
        assert_eq!(receipt.status, "success");
        assert_eq!(receipt.block_height, 1);

        let listed = list_transactions(State(ctx.clone()), Query(PageQuery::default()))
            .await
            .unwrap()
            .0;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hash, hash_hex(&tx_hash));
        assert_eq!(listed[0].status, Some("success"));

        assert_eq!(ctx.state.read().await.balance(&to), Amount::from_u64(40));
    }

    #[tokio::test]
    async fn test_unknown_transaction_status() {
        let (ctx, _dir) = test_ctx();
        let status = transaction_status(State(ctx.clone()), Path(hash_hex(&Hash::zero())))
            .await
            .unwrap()
            .0;
        assert_eq!(status.status, "unknown");

        let receipt = transaction_receipt(State(ctx), Path(hash_hex(&Hash::zero()))).await;
        assert!(matches!(receipt, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validator_listing_and_rotation() {
        let (ctx, _dir) = test_ctx();

        let rows = list_validators(State(ctx.clone())).await.unwrap().0;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].active);
        assert_eq!(rows[0].joined_at, 0);

        let current = current_validator(State(ctx.clone())).await.unwrap().0;
        assert_eq!(current.address, rows[0].address);
        assert_eq!(current.height, 1);
    }

    #[tokio::test]
    async fn test_deploy_requires_an_artifact() {
        let (ctx, _dir) = test_ctx();
        let request = DeployRequest {
            name: "empty".to_string(),
            source: None,
            code: None,
            abi: None,
            init_input: None,
            value: None,
            gas_limit: None,
            gas_price: None,
        };
        let result = deploy_contract(State(ctx), Json(request)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_deploy_with_code_registers_pending_contract() {
        let (ctx, _dir) = test_ctx();
        let request = DeployRequest {
            name: "counter".to_string(),
            source: None,
            code: Some("0x0102".to_string()),
            abi: None,
            init_input: None,
            value: None,
            gas_limit: None,
            gas_price: None,
        };
        let response = deploy_contract(State(ctx.clone()), Json(request))
            .await
            .unwrap()
            .0;
        assert_eq!(ctx.mempool.read().await.len(), 1);

        let listed = list_contracts(State(ctx.clone())).await.unwrap().0;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].address, response.address);
        assert_eq!(listed[0].status, "pending");

        let detail = contract_info(State(ctx.clone()), Path(response.address.clone()))
            .await
            .unwrap()
            .0;
        assert_eq!(detail.name, "counter");
        assert!(!detail.verified);
    }

    #[tokio::test]
    async fn test_execute_requires_deployed_code() {
        let (ctx, _dir) = test_ctx();
        let request = ExecuteRequest {
            input: None,
            value: None,
            gas_limit: None,
            gas_price: None,
        };
        let result = execute_contract(
            State(ctx),
            Path(Address::new([9u8; 20]).to_hex()),
            Json(request),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_toggle_is_owner_gated() {
        let (ctx, _dir) = test_ctx();
        let owner = node_keypair(&ctx).address();

        let request = DeployRequest {
            name: "switch".to_string(),
            source: None,
            code: Some("0x0102".to_string()),
            abi: None,
            init_input: None,
            value: None,
            gas_limit: None,
            gas_price: None,
        };
        let deployed = deploy_contract(State(ctx.clone()), Json(request))
            .await
            .unwrap()
            .0;

        // a stranger cannot flip the switch
        let result = disable_contract(
            State(ctx.clone()),
            Path(deployed.address.clone()),
            Json(ToggleRequest {
                owner: Address::new([9u8; 20]).to_hex(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let detail = disable_contract(
            State(ctx.clone()),
            Path(deployed.address.clone()),
            Json(ToggleRequest {
                owner: owner.to_hex(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(!detail.enabled);

        // disabled contracts reject execution outright
        let result = execute_contract(
            State(ctx.clone()),
            Path(deployed.address.clone()),
            Json(ExecuteRequest {
                input: None,
                value: None,
                gas_limit: None,
                gas_price: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let detail = enable_contract(
            State(ctx.clone()),
            Path(deployed.address),
            Json(ToggleRequest {
                owner: owner.to_hex(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert!(detail.enabled);
    }

    #[tokio::test]
    async fn test_contract_history_after_failed_create() {
        let (ctx, _dir) = test_ctx();
        let keypair = node_keypair(&ctx);

        // 0xFF is not an opcode, so the create commits as failed
        let code = vec![0xFF, 0xEE];
        let kind = TxKind::ContractCreate {
            code: code.clone(),
            init_input: Vec::new(),
            value: Amount::zero(),
        };
        let gas = ctx.exec.schedule().intrinsic_gas(&kind) * 2;
        let mut tx = Transaction::new(
            keypair.address(),
            keypair.public_key().clone(),
            0,
            kind,
            gas,
            1,
        );
        tx.sign(&keypair).unwrap();
        let contract = Address::for_contract(&tx.from, tx.nonce, &code.hash());
        commit_next(&ctx, vec![tx]).await;

        let page = contract_transactions(
            State(ctx.clone()),
            Path(contract.to_hex()),
            Query(PageQuery::default()),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(page.total, 1);
        assert_eq!(page.transactions[0].status, "failed");

        let analytics = contract_analytics(
            State(ctx.clone()),
            Path(contract.to_hex()),
            Query(AnalyticsQuery::default()),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(analytics.total_calls, 1);
        assert_eq!(analytics.failures, 1);
        assert_eq!(analytics.unique_callers, 1);
    }

    #[tokio::test]
    async fn test_estimate_transfer_uses_dry_run() {
        let (ctx, _dir) = test_ctx();
        let request = EstimateRequest {
            from: None,
            to: Some(other_address().to_hex()),
            amount: Some("5".to_string()),
            contract: None,
            input: None,
            value: None,
            code: None,
            source: None,
            gas_limit: None,
        };
        let estimate = estimate_gas(State(ctx.clone()), Json(request))
            .await
            .unwrap()
            .0;
        assert_eq!(estimate.source, "execution");
        assert!(estimate.gas_limit >= ctx.exec.schedule().tx_base);
    }

    #[tokio::test]
    async fn test_estimate_falls_back_on_failed_dry_run() {
        let (ctx, _dir) = test_ctx();
        // a one-gas envelope cannot cover the intrinsic cost
        let request = EstimateRequest {
            from: None,
            to: Some(other_address().to_hex()),
            amount: Some("5".to_string()),
            contract: None,
            input: None,
            value: None,
            code: None,
            source: None,
            gas_limit: Some(1),
        };
        let estimate = estimate_gas(State(ctx), Json(request)).await.unwrap().0;
        assert_eq!(estimate.source, "static");
        assert!(estimate.gas_limit > 0);
    }

    #[tokio::test]
    async fn test_verify_unknown_contract_is_not_found() {
        let (ctx, _dir) = test_ctx();
        let result = verify_contract(
            State(ctx),
            Path(Address::new([7u8; 20]).to_hex()),
            Json(VerifyRequest {
                source: "contract C {}".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
