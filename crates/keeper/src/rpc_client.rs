//! Solana JSON-RPC implementation of [`ChainClient`]

use async_trait::async_trait;
use solana_account_decoder::UiAccountEncoding;
use solana_client::client_error::ClientError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::{
    account::{from_account, Account},
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature, Signer},
    sysvar::clock::{self, Clock},
    transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use tranche_types::{
    account_discriminator, execute_epoch_data, CloseEpochArgs, EpochSnapshot, InvestorOrderAccount,
    LendingPoolAccount, OrderBook, Pool, PoolId, ORDER_ACCOUNT_NAME, ORDER_POOL_OFFSET,
};

use crate::chain::{ChainClient, HealthReport, TransactionIntent, TransactionOutcome};
use crate::config::KeeperConfig;
use crate::error::{KeeperError, KeeperResult};

/// Load the signer keypair. Any failure is fatal for the process.
pub fn load_keypair(path: &str) -> KeeperResult<Keypair> {
    read_keypair_file(path)
        .map_err(|e| KeeperError::SignerUnavailable(format!("failed to load keypair from {}: {}", path, e)))
}

/// Chain client backed by a nonblocking RPC connection
pub struct SolanaChainClient {
    rpc: Arc<RpcClient>,

    /// Keeper authority keypair
    keypair: Arc<Keypair>,

    program_id: Pubkey,
    commitment: CommitmentConfig,
    read_timeout: Duration,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    min_balance_lamports: u64,

    /// Signing lane. Serializes blockhash fetch, signing and sending for the
    /// single signer and counts submissions.
    lane: Mutex<u64>,
}

impl SolanaChainClient {
    pub fn new(config: &KeeperConfig, keypair: Arc<Keypair>) -> Self {
        let chain = &config.chain;
        let rpc = RpcClient::new_with_timeout_and_commitment(
            chain.rpc_url.clone(),
            chain.read_timeout(),
            chain.commitment(),
        );

        Self {
            rpc: Arc::new(rpc),
            keypair,
            program_id: chain.program_id,
            commitment: chain.commitment(),
            read_timeout: chain.read_timeout(),
            confirmation_timeout: chain.confirmation_timeout(),
            poll_interval: chain.poll_interval(),
            min_balance_lamports: config.signer.min_balance_lamports,
            lane: Mutex::new(0),
        }
    }

    async fn fetch_snapshot(&self, pool: &Pool) -> KeeperResult<EpochSnapshot> {
        let address = pool.address;
        let read_error = |reason: String| KeeperError::ReadError { pool: address, reason };

        // Pool and clock share one slot context
        let response = self
            .rpc
            .get_multiple_accounts_with_commitment(&[address, clock::id()], self.commitment)
            .await
            .map_err(|e| read_error(e.to_string()))?;
        let slot = response.context.slot;
        let mut accounts = response.value.into_iter();

        let pool_account = accounts
            .next()
            .flatten()
            .ok_or_else(|| read_error("pool account not found".to_string()))?;
        let clock_account = accounts
            .next()
            .flatten()
            .ok_or_else(|| read_error("clock sysvar not returned".to_string()))?;

        if pool_account.owner != self.program_id {
            return Err(read_error(format!(
                "pool account owned by {}, expected {}",
                pool_account.owner, self.program_id
            )));
        }

        let state = LendingPoolAccount::decode(&pool_account.data).map_err(|e| read_error(e.to_string()))?;
        let clock: Clock =
            from_account(&clock_account).ok_or_else(|| read_error("undecodable clock sysvar".to_string()))?;

        let orders = self.fetch_orders(address, state.current_epoch, slot).await?;

        Ok(EpochSnapshot {
            pool: address,
            slot,
            observed_at: clock.unix_timestamp,
            epoch_id: state.current_epoch,
            timing: state.timing(),
            reserve: state.reserve,
            outstanding_debt: state.outstanding_debt,
            senior_asset: state.senior_asset,
            params: state.params(),
            orders,
        })
    }

    /// Order accounts of `pool` for `epoch`, read no earlier than `slot`
    async fn fetch_orders(&self, pool: PoolId, epoch: u64, slot: u64) -> KeeperResult<OrderBook> {
        let read_error = |reason: String| KeeperError::ReadError { pool, reason };

        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                    0,
                    account_discriminator(ORDER_ACCOUNT_NAME).to_vec(),
                )),
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(ORDER_POOL_OFFSET, pool.to_bytes().to_vec())),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(self.commitment),
                min_context_slot: Some(slot),
                ..Default::default()
            },
            ..Default::default()
        };

        let accounts = self
            .rpc
            .get_program_accounts_with_config(&self.program_id, config)
            .await
            .map_err(|e| read_error(e.to_string()))?;

        collect_orders(pool, epoch, accounts)
    }

    fn build_instruction(&self, intent: &TransactionIntent) -> KeeperResult<Instruction> {
        let data = match intent {
            TransactionIntent::CloseEpoch { plan, .. } => CloseEpochArgs {
                senior_supply: plan.senior.supply,
                senior_redeem: plan.senior.redeem,
                junior_supply: plan.junior.supply,
                junior_redeem: plan.junior.redeem,
            }
            .data()?,
            TransactionIntent::ExecuteEpoch { .. } => execute_epoch_data(),
        };

        Ok(Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(intent.pool(), false),
                AccountMeta::new_readonly(self.keypair.pubkey(), true),
            ],
            data,
        })
    }

    /// Sign and send under the signing lane
    async fn sign_and_send(&self, intent: &TransactionIntent) -> KeeperResult<Result<Signature, TransactionOutcome>> {
        let pool = intent.pool();
        let instruction = self.build_instruction(intent)?;

        let mut sequence = self.lane.lock().await;
        *sequence += 1;

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| KeeperError::SubmitFailed { pool, reason: e.to_string() })?;
        let transaction = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.keypair.pubkey()),
            &[&*self.keypair],
            blockhash,
        );

        debug!(
            pool = %pool,
            sequence = *sequence,
            kind = intent.kind(),
            "Signed transaction"
        );

        let send_config = RpcSendTransactionConfig {
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: Some(0),
            ..Default::default()
        };

        match self.rpc.send_transaction_with_config(&transaction, send_config).await {
            Ok(signature) => Ok(Ok(signature)),
            Err(err) => rejected_or_failed(pool, err),
        }
    }

    async fn await_confirmation(&self, pool: PoolId, signature: Signature) -> TransactionOutcome {
        let deadline = Instant::now() + self.confirmation_timeout;

        loop {
            match self.rpc.get_signature_statuses(&[signature]).await {
                Ok(response) => {
                    if let Some(Some(status)) = response.value.into_iter().next() {
                        if let Some(err) = status.err {
                            return TransactionOutcome::Reverted {
                                signature: Some(signature),
                                reason: err.to_string(),
                            };
                        }
                        if status.satisfies_commitment(self.commitment) {
                            return TransactionOutcome::Confirmed {
                                signature,
                                slot: status.slot,
                            };
                        }
                    }
                }
                Err(e) => {
                    // The transaction may still land, keep polling until the deadline
                    warn!(pool = %pool, signature = %signature, error = %e, "Signature status poll failed");
                }
            }

            if Instant::now() >= deadline {
                return TransactionOutcome::TimedOut { signature };
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn rejected_or_failed(pool: PoolId, err: ClientError) -> KeeperResult<Result<Signature, TransactionOutcome>> {
    match err.get_transaction_error() {
        Some(tx_err) => Ok(Err(TransactionOutcome::Reverted {
            signature: None,
            reason: tx_err.to_string(),
        })),
        None => Err(KeeperError::SubmitFailed {
            pool,
            reason: err.to_string(),
        }),
    }
}

#[async_trait]
impl ChainClient for SolanaChainClient {
    async fn read_epoch_state(&self, pool: &Pool) -> KeeperResult<EpochSnapshot> {
        match timeout(self.read_timeout, self.fetch_snapshot(pool)).await {
            Ok(result) => result,
            Err(_) => Err(KeeperError::ReadTimeout {
                pool: pool.address,
                timeout_ms: self.read_timeout.as_millis() as u64,
            }),
        }
    }

    async fn submit(&self, intent: TransactionIntent) -> KeeperResult<TransactionOutcome> {
        let pool = intent.pool();
        let signature = match self.sign_and_send(&intent).await? {
            Ok(signature) => signature,
            Err(rejected) => return Ok(rejected),
        };

        info!(
            pool = %pool,
            epoch = intent.epoch_id(),
            kind = intent.kind(),
            signature = %signature,
            "Transaction sent, awaiting confirmation"
        );

        Ok(self.await_confirmation(pool, signature).await)
    }

    fn signer(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Health check for keeper service
    async fn health_check(&self) -> KeeperResult<HealthReport> {
        self.rpc
            .get_health()
            .await
            .map_err(|e| KeeperError::RpcError(e.to_string()))?;

        let balance = self
            .rpc
            .get_balance(&self.keypair.pubkey())
            .await
            .map_err(|e| KeeperError::RpcError(e.to_string()))?;

        Ok(HealthReport {
            balance_lamports: balance,
            min_balance_lamports: self.min_balance_lamports,
        })
    }
}

/// Build the order book of `epoch` from raw order accounts.
///
/// Accounts still carrying an earlier epoch's intents were settled by that
/// epoch's close and are skipped.
fn collect_orders(pool: PoolId, epoch: u64, mut accounts: Vec<(Pubkey, Account)>) -> KeeperResult<OrderBook> {
    let read_error = |reason: String| KeeperError::ReadError { pool, reason };
    accounts.sort_by_key(|(address, _)| *address);

    let mut orders = Vec::new();
    let mut stale = 0usize;
    for (address, account) in accounts {
        let order = InvestorOrderAccount::decode(&account.data)
            .map_err(|e| read_error(format!("order account {}: {}", address, e)))?;
        if order.epoch != epoch {
            stale += 1;
            continue;
        }
        orders.extend(order.orders().map_err(|e| read_error(e.to_string()))?);
    }

    let book = OrderBook::new(orders);
    if book.is_empty() {
        debug!(pool = %pool, epoch, stale, "No pending orders");
    } else {
        debug!(pool = %pool, epoch, orders = book.len(), stale, "Loaded order book");
    }
    Ok(book)
}
