/// On-chain account layouts and instruction encodings of the lending program.
///
/// Accounts and instructions carry an 8-byte discriminator (the first bytes
/// of `sha256("account:<Name>")` or `sha256("global:<name>")`) followed by a
/// Borsh body.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::hash::hash;
use solana_program::pubkey::Pubkey;

use crate::{
    Amount, EpochTiming, Order, OrderSide, ProtocolError, ProtocolResult, Ratio, Tranche,
    TrancheParams, CLOSE_EPOCH_IX, DISCRIMINATOR_LEN, EXECUTE_EPOCH_IX, ORDER_ACCOUNT_NAME,
    POOL_ACCOUNT_NAME,
};

// ============================================================================
// Discriminators
// ============================================================================

fn discriminator(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = hash(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest.to_bytes()[..DISCRIMINATOR_LEN]);
    out
}

pub fn account_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    discriminator("account", name)
}

pub fn instruction_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    discriminator("global", name)
}

fn decode_account<T: BorshDeserialize>(name: &str, data: &[u8]) -> ProtocolResult<T> {
    if data.len() < DISCRIMINATOR_LEN {
        return Err(ProtocolError::decode_failed(
            name,
            &format!("{} bytes is shorter than the discriminator", data.len()),
        ));
    }

    let expected = account_discriminator(name);
    let mut actual = [0u8; DISCRIMINATOR_LEN];
    actual.copy_from_slice(&data[..DISCRIMINATOR_LEN]);
    if actual != expected {
        return Err(ProtocolError::InvalidDiscriminator {
            account: name.to_string(),
            expected,
            actual,
        });
    }

    // Accounts may be allocated larger than their body, trailing bytes are ignored
    let mut body = &data[DISCRIMINATOR_LEN..];
    T::deserialize(&mut body).map_err(|e| ProtocolError::decode_failed(name, &e.to_string()))
}

fn encode_account<T: BorshSerialize>(name: &str, value: &T) -> ProtocolResult<Vec<u8>> {
    let mut data = account_discriminator(name).to_vec();
    let body = value
        .try_to_vec()
        .map_err(|e| ProtocolError::decode_failed(name, &e.to_string()))?;
    data.extend_from_slice(&body);
    Ok(data)
}

// ============================================================================
// Pool Account
// ============================================================================

/// `LendingPool` account body
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LendingPoolAccount {
    pub currency_mint: [u8; 32],
    pub current_epoch: u64,
    pub last_epoch_closed: i64,
    pub minimum_epoch_time: i64,
    pub challenge_time: i64,
    pub submission_period: bool,
    pub min_challenge_period_end: i64,
    pub last_epoch_executed: u64,
    pub execution_pending: bool,
    pub reserve: Amount,
    pub outstanding_debt: Amount,
    pub senior_asset: Amount,
    pub min_junior_ratio: Ratio,
    pub max_junior_ratio: Ratio,
    pub max_reserve: Amount,
}

impl LendingPoolAccount {
    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        decode_account(POOL_ACCOUNT_NAME, data)
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_account(POOL_ACCOUNT_NAME, self)
    }

    pub fn timing(&self) -> EpochTiming {
        EpochTiming {
            last_epoch_closed: self.last_epoch_closed,
            minimum_epoch_time: self.minimum_epoch_time,
            challenge_time: self.challenge_time,
            submission_period: self.submission_period,
            min_challenge_period_end: self.min_challenge_period_end,
            last_epoch_executed: self.last_epoch_executed,
            execution_pending: self.execution_pending,
        }
    }

    pub fn params(&self) -> TrancheParams {
        TrancheParams {
            min_junior_ratio: self.min_junior_ratio,
            max_junior_ratio: self.max_junior_ratio,
            max_reserve: self.max_reserve,
        }
    }
}

// ============================================================================
// Order Account
// ============================================================================

/// `InvestorOrder` account body. One account per investor, pool and tranche.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct InvestorOrderAccount {
    /// Must stay the first field, order lookups filter on its offset
    pub pool: [u8; 32],
    pub investor: [u8; 32],
    /// 0 = senior, 1 = junior
    pub tranche: u8,
    pub epoch: u64,
    pub supply_amount: Amount,
    pub redeem_amount: Amount,
}

impl InvestorOrderAccount {
    pub fn decode(data: &[u8]) -> ProtocolResult<Self> {
        decode_account(ORDER_ACCOUNT_NAME, data)
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_account(ORDER_ACCOUNT_NAME, self)
    }

    pub fn tranche(&self) -> ProtocolResult<Tranche> {
        match self.tranche {
            0 => Ok(Tranche::Senior),
            1 => Ok(Tranche::Junior),
            other => Err(ProtocolError::decode_failed(
                ORDER_ACCOUNT_NAME,
                &format!("unknown tranche tag {}", other),
            )),
        }
    }

    /// Split the account into its supply and redeem intents
    pub fn orders(&self) -> ProtocolResult<Vec<Order>> {
        let tranche = self.tranche()?;
        let investor = Pubkey::new_from_array(self.investor);
        Ok([
            (OrderSide::Supply, self.supply_amount),
            (OrderSide::Redeem, self.redeem_amount),
        ]
        .into_iter()
        .filter(|(_, amount)| *amount > 0)
        .map(|(side, amount)| Order {
            investor,
            tranche,
            side,
            amount,
        })
        .collect())
    }
}

// ============================================================================
// Instructions
// ============================================================================

/// Arguments of `close_epoch`, the per-tranche fulfilled amounts
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseEpochArgs {
    pub senior_supply: Amount,
    pub senior_redeem: Amount,
    pub junior_supply: Amount,
    pub junior_redeem: Amount,
}

impl CloseEpochArgs {
    pub fn data(&self) -> ProtocolResult<Vec<u8>> {
        let mut data = instruction_discriminator(CLOSE_EPOCH_IX).to_vec();
        let args = self
            .try_to_vec()
            .map_err(|e| ProtocolError::generic(&format!("Failed to encode close_epoch: {}", e)))?;
        data.extend_from_slice(&args);
        Ok(data)
    }
}

pub fn execute_epoch_data() -> Vec<u8> {
    instruction_discriminator(EXECUTE_EPOCH_IX).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_account() -> LendingPoolAccount {
        LendingPoolAccount {
            current_epoch: 12,
            last_epoch_closed: 1_700_000_000,
            minimum_epoch_time: 86_400,
            reserve: 1_000,
            outstanding_debt: 4_000,
            senior_asset: 4_200,
            min_junior_ratio: 50_000_000_000_000_000,
            max_junior_ratio: 200_000_000_000_000_000,
            max_reserve: 1_200,
            ..Default::default()
        }
    }

    #[test]
    fn test_pool_account_decodes_with_padding() {
        let mut data = pool_account().encode().unwrap();
        data.extend_from_slice(&[0u8; 64]);

        let decoded = LendingPoolAccount::decode(&data).unwrap();
        assert_eq!(decoded, pool_account());
        assert_eq!(decoded.params().max_reserve, 1_200);
        assert_eq!(decoded.timing().closable_at(), 1_700_086_400);
    }

    #[test]
    fn test_wrong_discriminator_is_rejected() {
        let order = InvestorOrderAccount::default().encode().unwrap();
        assert!(matches!(
            LendingPoolAccount::decode(&order),
            Err(ProtocolError::InvalidDiscriminator { .. })
        ));
        assert!(LendingPoolAccount::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let data = pool_account().encode().unwrap();
        assert!(matches!(
            LendingPoolAccount::decode(&data[..20]),
            Err(ProtocolError::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_order_account_splits_intents() {
        let pool = Pubkey::new_unique();
        let account = InvestorOrderAccount {
            pool: pool.to_bytes(),
            investor: Pubkey::new_unique().to_bytes(),
            tranche: 1,
            epoch: 12,
            supply_amount: 0,
            redeem_amount: 50,
        };
        let data = account.encode().unwrap();
        assert_eq!(&data[8..40], pool.as_ref());

        let orders = InvestorOrderAccount::decode(&data).unwrap().orders().unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].tranche, Tranche::Junior);
        assert_eq!(orders[0].side, OrderSide::Redeem);
        assert_eq!(orders[0].amount, 50);
    }

    #[test]
    fn test_unknown_tranche_tag() {
        let account = InvestorOrderAccount {
            tranche: 7,
            supply_amount: 1,
            ..Default::default()
        };
        assert!(account.orders().is_err());
    }

    #[test]
    fn test_instruction_data_layout() {
        let args = CloseEpochArgs {
            senior_supply: 100,
            senior_redeem: 0,
            junior_supply: 0,
            junior_redeem: 50,
        };
        let data = args.data().unwrap();
        assert_eq!(data.len(), 8 + 4 * 8);
        assert_eq!(&data[..8], &instruction_discriminator("close_epoch"));
        assert_eq!(&data[8..16], &100u64.to_le_bytes());
        assert_eq!(execute_epoch_data(), instruction_discriminator("execute_epoch").to_vec());
        assert_ne!(
            instruction_discriminator("close_epoch"),
            instruction_discriminator("execute_epoch")
        );
    }
}
