//! The block-scoped optimistic execution scheduler.
//!
//! One fiber per transaction runs on the priority pool, each against a
//! forked [State] whose base is the shared [BlockState]. Fibers execute
//! optimistically and commit strictly in transaction-index order: fiber `i`
//! waits on `promise[i-1]`, revalidates its reads, and either merges or
//! re-executes against the updated view.
//!
//! [State]: monad_state::State
//! [BlockState]: monad_state::BlockState

use crate::{
    chain::MonadChain,
    errors::{BlockError, BlockResult, TransactionError},
    evm::{BlockEnv, Evm, EvmResult, Message},
    gas::{intrinsic_gas, prepaid_gas_cost, total_blob_gas},
    metrics::BlockMetrics,
    reserve::{must_revert_for_reserve, FeeBuffer},
    tx::TxContext,
    validate::{static_validate_transaction, validate_transaction},
};
use alloy_consensus::{Receipt, ReceiptEnvelope, ReceiptWithBloom};
use alloy_eips::eip4844::calc_blob_gasprice;
use alloy_primitives::{logs_bloom, Address, Bloom, Log, U256};
use monad_fiber::{PriorityPool, Promise};
use monad_primitives::{with_revision, Block, BlockHashBuffer, MonadRevision, Traits};
use monad_state::{BlockState, CallFrame, CallKind, Db, State};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::{debug, info, warn};

mod commit;
pub use commit::{commit_block, commit_block_outputs, finalize_block, BlockOutputs};

/// Upper bound on re-executions of a single transaction within a block.
pub const MAX_RETRIES: u32 = 32;

/// Wei per gwei, for withdrawal amounts.
const GWEI_TO_WEI: u64 = 1_000_000_000;

/// The outcome of one transaction, index-aligned with the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// EIP-2718 type byte, for receipt enveloping.
    pub tx_type: u8,
    /// Whether execution succeeded.
    pub status: bool,
    /// Gas consumed, refunds already deducted.
    pub gas_used: u64,
    /// Logs emitted (empty for failed transactions).
    pub logs: Vec<Log>,
    /// Call trace frames.
    pub call_frames: Vec<CallFrame>,
    /// The validation error, when the transaction was rejected without
    /// state effects.
    pub error: Option<TransactionError>,
}

impl ExecutionResult {
    fn rejected(tx_type: u8, error: TransactionError) -> Self {
        Self {
            tx_type,
            status: false,
            gas_used: 0,
            logs: Vec::new(),
            call_frames: Vec::new(),
            error: Some(error),
        }
    }
}

/// Executes a block's transactions in parallel against `block_state`,
/// dispatching on the chain's active revision pair.
#[allow(clippy::too_many_arguments)]
pub fn execute_block<D, E>(
    chain: &Arc<MonadChain>,
    evm: &Arc<E>,
    block: &Block,
    senders: Vec<Option<Address>>,
    block_state: &Arc<BlockState<D>>,
    block_hashes: &Arc<BlockHashBuffer>,
    pool: &PriorityPool,
    metrics: &Arc<BlockMetrics>,
    fee_buffer: &Arc<FeeBuffer>,
) -> BlockResult<Vec<ExecutionResult>>
where
    D: Db + 'static,
    E: Evm + 'static,
{
    let revision = chain.revision_pair(block.header.number, block.header.timestamp);
    with_revision!(
        revision,
        execute_block_inner::<D, E>(
            chain,
            evm,
            block,
            senders,
            block_state,
            block_hashes,
            pool,
            metrics,
            fee_buffer
        )
    )
}

#[allow(clippy::too_many_arguments)]
fn execute_block_inner<T, D, E>(
    chain: &Arc<MonadChain>,
    evm: &Arc<E>,
    block: &Block,
    senders: Vec<Option<Address>>,
    block_state: &Arc<BlockState<D>>,
    block_hashes: &Arc<BlockHashBuffer>,
    pool: &PriorityPool,
    metrics: &Arc<BlockMetrics>,
    fee_buffer: &Arc<FeeBuffer>,
) -> BlockResult<Vec<ExecutionResult>>
where
    T: Traits,
    D: Db + 'static,
    E: Evm + 'static,
{
    let header = &block.header;
    let env = BlockEnv {
        number: header.number,
        timestamp: header.timestamp,
        beneficiary: header.beneficiary,
        gas_limit: header.gas_limit,
        base_fee: header.base_fee_per_gas.unwrap_or_default() as u128,
        blob_base_fee: header
            .excess_blob_gas
            .map(|excess| calc_blob_gasprice(excess as u64))
            .unwrap_or_default(),
        prev_randao: header.mix_hash,
        chain_id: chain.chain_id,
    };

    info!(
        target: "block_executor",
        block_number = header.number,
        gas_limit = header.gas_limit,
        tx_count = block.transactions.len(),
        "executing block"
    );

    // Static validation and fee recording happen up front, in order.
    // Failures here are mandatory: consensus never proposes such a block.
    let mut contexts = Vec::with_capacity(block.transactions.len());
    fee_buffer.clear();
    for (index, tx) in block.transactions.iter().enumerate() {
        let context = TxContext::new(tx);
        static_validate_transaction::<T>(
            &context,
            header.base_fee_per_gas.map(|fee| fee as u128),
            header.excess_blob_gas.map(|excess| excess as u64),
            chain.chain_id,
        )?;
        if context.gas_limit > header.gas_limit {
            return Err(BlockError::InvalidTransaction(TransactionError::GasLimitReached));
        }
        let sender = senders[index].ok_or(TransactionError::MissingSender)?;

        let mut fee = U256::from(context.gas_limit)
            .saturating_mul(U256::from(context.max_fee_per_gas));
        if let Some(blob_fee) = context.max_fee_per_blob_gas {
            fee = fee.saturating_add(
                U256::from(blob_fee).saturating_mul(U256::from(total_blob_gas(&context))),
            );
        }
        fee_buffer.record(index as u64, sender, fee);
        contexts.push((context, sender));
    }
    let contexts = Arc::new(contexts);

    let started = Instant::now();
    let tx_count = contexts.len();
    let commit_promises: Arc<Vec<Promise<bool>>> =
        Arc::new((0..tx_count).map(|_| Promise::new()).collect());
    let outcome_promises: Vec<Promise<ExecutionResult>> =
        (0..tx_count).map(|_| Promise::new()).collect();
    let aborted = Arc::new(AtomicBool::new(false));

    for index in 0..tx_count {
        let chain = Arc::clone(chain);
        let evm = Arc::clone(evm);
        let block_state = Arc::clone(block_state);
        let block_hashes = Arc::clone(block_hashes);
        let contexts = Arc::clone(&contexts);
        let commit_promises = Arc::clone(&commit_promises);
        let outcome_promise = outcome_promises[index].clone();
        let metrics = Arc::clone(metrics);
        let fee_buffer = Arc::clone(fee_buffer);
        let aborted = Arc::clone(&aborted);

        pool.submit(index as u64, move || {
            let (tx, sender) = &contexts[index];
            let outcome = run_transaction_fiber::<T, D, E>(
                &chain,
                &evm,
                &env,
                &fee_buffer,
                index as u64,
                tx,
                *sender,
                &block_state,
                &block_hashes,
                &commit_promises,
                &metrics,
                &aborted,
            );
            outcome_promise.set(outcome);
        });
    }

    let results: Vec<ExecutionResult> =
        outcome_promises.iter().map(Promise::wait).collect();
    metrics.set_tx_exec_time(started.elapsed());

    if aborted.load(Ordering::Acquire) {
        warn!(
            target: "block_executor",
            block_number = header.number,
            retries = metrics.num_retries(),
            "block aborted after retry exhaustion"
        );
        return Err(BlockError::RetryLimitExceeded);
    }

    // Withdrawals land after the last transaction, at the serial point.
    if !block.withdrawals.is_empty() {
        let mut system_state = State::new(block_state);
        for withdrawal in &block.withdrawals {
            system_state.add_balance(
                &withdrawal.address,
                U256::from(withdrawal.amount) * U256::from(GWEI_TO_WEI),
            );
            system_state.touch(&withdrawal.address);
        }
        let (_, writes) = system_state.into_parts();
        block_state.merge(&writes);
    }

    info!(
        target: "block_executor",
        block_number = header.number,
        retries = metrics.num_retries(),
        elapsed_us = started.elapsed().as_micros() as u64,
        stats = %metrics.print_access_stats(),
        "block execution complete"
    );
    Ok(results)
}

/// The per-transaction fiber body: execute optimistically, wait for the
/// predecessor, revalidate, merge or retry.
#[allow(clippy::too_many_arguments)]
fn run_transaction_fiber<T, D, E>(
    chain: &MonadChain,
    evm: &E,
    env: &BlockEnv,
    fee_buffer: &FeeBuffer,
    index: u64,
    tx: &TxContext,
    sender: Address,
    block_state: &BlockState<D>,
    block_hashes: &BlockHashBuffer,
    commit_promises: &[Promise<bool>],
    metrics: &BlockMetrics,
    aborted: &AtomicBool,
) -> ExecutionResult
where
    T: Traits,
    D: Db,
    E: Evm,
{
    let mut attempt = 0u32;
    loop {
        let mut state = State::new(block_state).with_block_hashes(block_hashes);
        let executed = execute_transaction::<T, D, E>(
            chain, evm, env, fee_buffer, index, tx, sender, &mut state,
        );

        let (reads, writes, mut outcome) = match executed {
            Ok(outcome) => {
                let (reads, writes) = state.into_parts();
                (reads, writes, outcome)
            }
            Err(error) => {
                // Validation failures leave no writes, but their reads are
                // still revalidated: a stale balance may be exactly why the
                // check failed.
                let (reads, _) = state.into_parts();
                (reads, Default::default(), ExecutionResult::rejected(tx.tx_type, error))
            }
        };

        // Commits are strictly ordered: wait out the predecessor.
        if index > 0 && commit_promises[index as usize - 1].wait() {
            commit_promises[index as usize].set(true);
            return ExecutionResult::rejected(tx.tx_type, TransactionError::GasLimitReached);
        }

        if block_state.can_merge(&reads) {
            outcome.logs = writes.logs.clone();
            outcome.call_frames = writes.call_frames.clone();
            block_state.merge(&writes);
            metrics.record_accesses(&writes.access_stats);
            commit_promises[index as usize].set(false);
            return outcome;
        }

        metrics.inc_retries();
        attempt += 1;
        debug!(target: "block_executor", index, attempt, "merge conflict, re-executing");
        if attempt > MAX_RETRIES {
            aborted.store(true, Ordering::Release);
            commit_promises[index as usize].set(true);
            return ExecutionResult::rejected(tx.tx_type, TransactionError::GasLimitReached);
        }
    }
}

/// Executes one transaction against its forked state: validation, fee
/// debit, the message call, refunds and the beneficiary reward.
#[allow(clippy::too_many_arguments)]
fn execute_transaction<T, D, E>(
    chain: &MonadChain,
    evm: &E,
    env: &BlockEnv,
    fee_buffer: &FeeBuffer,
    index: u64,
    tx: &TxContext,
    sender: Address,
    state: &mut State<'_, D>,
) -> Result<ExecutionResult, TransactionError>
where
    T: Traits,
    D: Db,
    E: Evm,
{
    validate_transaction::<T, D>(chain, fee_buffer, index, tx, &sender, state)?;

    let effective_gas_price = tx.effective_gas_price(env.base_fee);
    let original_balance = state.get_balance(&sender);

    // Irrevocable changes: nonce bump and the up-front gas purchase.
    state.set_nonce(&sender, tx.nonce + 1);
    state.subtract_balance(&sender, prepaid_gas_cost(tx, env.base_fee));
    if tx.max_fee_per_blob_gas.is_some() {
        let blob_cost = U256::from(env.blob_base_fee)
            .saturating_mul(U256::from(total_blob_gas(tx)));
        state.subtract_balance(&sender, blob_cost);
    }

    // Warm the access list (EIP-2929) and the standing warm set (EIP-3651).
    state.access_account(&sender);
    if T::evm_rev_at_least(monad_primitives::Revision::Shanghai) {
        state.access_account(&env.beneficiary);
    }
    for item in tx.access_list.iter() {
        state.access_account(&item.address);
        for key in &item.storage_keys {
            state.access_storage(&item.address, key);
        }
    }

    let intrinsic = intrinsic_gas::<T>(tx)?;
    let msg_gas = tx.gas_limit - intrinsic;

    state.checkpoint();
    let result = match tx.to {
        Some(recipient) => execute_call::<T, D, E>(evm, state, tx, sender, recipient, msg_gas),
        None => execute_create::<T, D, E>(chain, evm, state, tx, sender, msg_gas),
    };

    let mut success = result.success;
    if !success {
        state.revert();
        // Failed messages burn their message gas but keep the checkpointed
        // state rollback; the fee charge below stands either way.
    }

    // Monad reserve rule: a successful call that dips the sender below the
    // protected reserve is rolled back, fee retained.
    if success
        && T::monad_rev_at_least(MonadRevision::MonadFour)
        && must_revert_for_reserve(
            chain,
            fee_buffer,
            index,
            &sender,
            original_balance,
            state.get_balance(&sender),
        )
    {
        state.revert();
        success = false;
    } else if success {
        state.commit();
    }

    // Refund unspent gas at the effective price. A revert returns its
    // remaining gas; out-of-gas surfaces as zero remaining.
    let gas_remaining = result.gas_remaining;
    let refund =
        chain.compute_gas_refund::<T>(tx, gas_remaining, state.refund() + result.gas_refund);
    let gas_used = tx.gas_limit - gas_remaining - refund;
    let leftover = tx.gas_limit - gas_used;
    state.add_balance(
        &sender,
        U256::from(leftover).saturating_mul(U256::from(effective_gas_price)),
    );

    // Priority reward to the beneficiary.
    let priority_fee = tx.priority_fee_per_gas(env.base_fee);
    state.add_balance(
        &env.beneficiary,
        U256::from(gas_used).saturating_mul(U256::from(priority_fee)),
    );
    state.touch(&env.beneficiary);

    Ok(ExecutionResult {
        tx_type: tx.tx_type,
        status: success,
        gas_used,
        logs: Vec::new(),
        call_frames: Vec::new(),
        error: None,
    })
}

fn execute_call<T, D, E>(
    evm: &E,
    state: &mut State<'_, D>,
    tx: &TxContext,
    sender: Address,
    recipient: Address,
    gas: u64,
) -> EvmResult
where
    T: Traits,
    D: Db,
    E: Evm,
{
    state.access_account(&recipient);
    state.touch(&recipient);
    state.subtract_balance(&sender, tx.value);
    state.add_balance(&recipient, tx.value);

    let msg = Message {
        kind: CallKind::Call,
        depth: 0,
        gas,
        recipient,
        sender,
        input: tx.input.clone(),
        value: tx.value,
        is_static: false,
    };
    state.emit_call_frame(CallFrame {
        kind: CallKind::Call,
        depth: 0,
        sender,
        recipient,
        value: tx.value,
        gas,
        input_len: tx.input.len(),
    });

    let code = state.get_code(&recipient);
    if code.is_empty() {
        return EvmResult {
            success: true,
            gas_remaining: gas,
            gas_refund: 0,
            output: Default::default(),
        };
    }
    evm.execute(state, T::EVM_REV, &msg, &code)
}

fn execute_create<T, D, E>(
    chain: &MonadChain,
    evm: &E,
    state: &mut State<'_, D>,
    tx: &TxContext,
    sender: Address,
    gas: u64,
) -> EvmResult
where
    T: Traits,
    D: Db,
    E: Evm,
{
    let created = sender.create(tx.nonce);
    state.access_account(&created);
    state.create_contract(&created);
    state.set_nonce(&created, 1);
    state.touch(&created);
    state.subtract_balance(&sender, tx.value);
    state.add_balance(&created, tx.value);

    let msg = Message {
        kind: CallKind::Create,
        depth: 0,
        gas,
        recipient: created,
        sender,
        input: tx.input.clone(),
        value: tx.value,
        is_static: false,
    };
    state.emit_call_frame(CallFrame {
        kind: CallKind::Create,
        depth: 0,
        sender,
        recipient: created,
        value: tx.value,
        gas,
        input_len: tx.input.len(),
    });

    let result = evm.execute(state, T::EVM_REV, &msg, &tx.input);
    if !result.success {
        return result;
    }

    // Deploy the returned code, charging the deposit cost.
    let deposit = result.output.len() as u64 * 200;
    if result.output.len() > chain.get_max_code_size::<T>() || deposit > result.gas_remaining {
        return EvmResult {
            success: false,
            gas_remaining: 0,
            gas_refund: 0,
            output: Default::default(),
        };
    }
    state.set_code(&created, result.output.clone());
    EvmResult { gas_remaining: result.gas_remaining - deposit, ..result }
}

/// Assembles receipts in transaction order. `cumulative_gas_used` is
/// non-decreasing by construction; the returned bloom covers the block.
pub fn build_receipts(results: &[ExecutionResult]) -> (Vec<ReceiptEnvelope>, u64, Bloom) {
    let mut cumulative_gas_used = 0u64;
    let mut receipts = Vec::with_capacity(results.len());
    for result in results {
        cumulative_gas_used += result.gas_used;
        let receipt = Receipt {
            status: result.status.into(),
            cumulative_gas_used: cumulative_gas_used as u128,
            logs: result.logs.clone(),
        };
        let with_bloom = ReceiptWithBloom {
            logs_bloom: logs_bloom(receipt.logs.iter()),
            receipt,
        };
        receipts.push(match result.tx_type {
            1 => ReceiptEnvelope::Eip2930(with_bloom),
            2 => ReceiptEnvelope::Eip1559(with_bloom),
            3 => ReceiptEnvelope::Eip4844(with_bloom),
            4 => ReceiptEnvelope::Eip7702(with_bloom),
            _ => ReceiptEnvelope::Legacy(with_bloom),
        });
    }

    let bloom = logs_bloom(results.iter().flat_map(|result| result.logs.iter()));
    (receipts, cumulative_gas_used, bloom)
}
