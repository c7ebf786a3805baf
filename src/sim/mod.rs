//! In-process simulation of both ledgers
//!
//! One shared state backs the wrapped-token contract on the host side and the
//! token accounts plus constant-ratio pool program on the counterparty side.
//! Every operation validates fully before it writes, so a rejected call leaves
//! no trace. Fault switches let tests force failures at each boundary.

use crate::bridge::custody::derive_token_account;
use crate::bridge::{TokenError, WrappedTokenLedger};
use crate::config::{parse_pool_id, Settings};
use crate::error::{codes, ForeignError};
use crate::pool::instruction::{accounts, decode, Instruction, PoolCall};
use crate::pool::{CounterpartyLedger, PoolKeys, PoolState};
use crate::types::{AccountKey, PoolId, BPS_DENOMINATOR};
use crate::vault::VaultOrchestrator;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Owner of the third-party liquidity seeded from configuration
pub const SEED_PROVIDER: AccountKey = AccountKey::new([0x5e; 32]);

/// Build simulated ledgers from the `[simulation]` section and a vault wired
/// to them
pub async fn bootstrap(
    settings: &Settings,
) -> anyhow::Result<(Arc<SimulatedLedgers>, VaultOrchestrator)> {
    let sim = Arc::new(SimulatedLedgers::new(
        settings.vault.host_address,
        settings.pool_program_id()?,
        settings.token_program_id()?,
    ));

    for mapping in &settings.token_mappings {
        sim.register_token(mapping.wrapped, mapping.mint.parse()?).await;
    }

    for pool in &settings.simulation.pools {
        let pool_id = parse_pool_id(&pool.pool_id)?;
        let keys = sim.create_pool(pool_id, pool.mint.parse()?).await;
        if pool.initial_liquidity > 0 {
            sim.seed_liquidity(&pool_id, &SEED_PROVIDER, pool.initial_liquidity)
                .await?;
        }
        info!(
            "Simulated pool {} (mint {}, lp mint {}) with {} seeded liquidity",
            pool_id, keys.token_mint, keys.lp_mint, pool.initial_liquidity
        );
    }

    for account in &settings.simulation.accounts {
        sim.mint_wrapped(account.token, account.address, U256::from(account.balance))
            .await;
        if account.allowance > 0 {
            sim.approve(account.token, account.address, U256::from(account.allowance))
                .await;
        }
    }

    let vault = VaultOrchestrator::from_settings(settings, sim.clone(), sim.clone())?;
    Ok((sim, vault))
}

#[derive(Debug, Clone, Copy)]
struct TokenAccount {
    mint: AccountKey,
    amount: u64,
}

#[derive(Debug, Clone)]
struct SimPool {
    keys: PoolKeys,
    lp_supply: u64,
}

#[derive(Debug, Default)]
struct Faults {
    next_invoke: Option<ForeignError>,
    wrap: bool,
    unwrap: bool,
    ignore_min_guard: bool,
    lp_haircut_bps: u64,
}

#[derive(Debug, Default)]
struct SimState {
    wrapped_mints: HashMap<Address, AccountKey>,
    wrapped: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address), U256>,
    accounts: HashMap<AccountKey, TokenAccount>,
    pools: HashMap<PoolId, SimPool>,
    faults: Faults,
}

impl SimState {
    fn balance(&self, account: &AccountKey) -> u64 {
        self.accounts.get(account).map(|a| a.amount).unwrap_or(0)
    }

    fn credit(&mut self, account: AccountKey, mint: AccountKey, amount: u64) {
        let entry = self
            .accounts
            .entry(account)
            .or_insert(TokenAccount { mint, amount: 0 });
        entry.amount = entry.amount.saturating_add(amount);
    }

    fn debit(&mut self, account: &AccountKey, amount: u64) {
        if let Some(entry) = self.accounts.get_mut(account) {
            entry.amount -= amount;
        }
    }

    fn wrapped_balance(&self, token: Address, holder: Address) -> U256 {
        self.wrapped
            .get(&(token, holder))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    fn pool_state(&self, pool: &SimPool) -> PoolState {
        PoolState {
            keys: pool.keys.clone(),
            reserve: self.balance(&pool.keys.token_vault),
            lp_supply: pool.lp_supply,
        }
    }
}

fn derive(pool_id: &PoolId, label: &[u8]) -> AccountKey {
    let mut hasher = Keccak256::new();
    hasher.update(b"xledger-vault/sim-pool");
    hasher.update(pool_id.0.as_slice());
    hasher.update(label);
    AccountKey(hasher.finalize().into())
}

fn program_error(code: u32, message: &str) -> ForeignError {
    ForeignError::from_code(code, message)
}

/// Simulated host and counterparty ledgers
pub struct SimulatedLedgers {
    vault: Address,
    program_id: AccountKey,
    token_program_id: AccountKey,
    state: Mutex<SimState>,
}

impl SimulatedLedgers {
    /// `vault` is the only spender the wrapped-token contract recognises
    pub fn new(vault: Address, program_id: AccountKey, token_program_id: AccountKey) -> Self {
        Self {
            vault,
            program_id,
            token_program_id,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Register a wrapped token backed by `mint`
    pub async fn register_token(&self, wrapped: Address, mint: AccountKey) {
        self.state.lock().await.wrapped_mints.insert(wrapped, mint);
    }

    /// Create an empty pool for `token_mint`
    pub async fn create_pool(&self, pool_id: PoolId, token_mint: AccountKey) -> PoolKeys {
        let keys = PoolKeys {
            id: pool_id,
            authority: derive(&pool_id, b"authority"),
            token_mint,
            token_vault: derive(&pool_id, b"token-vault"),
            lp_mint: derive(&pool_id, b"lp-mint"),
        };
        self.state.lock().await.pools.insert(
            pool_id,
            SimPool {
                keys: keys.clone(),
                lp_supply: 0,
            },
        );
        keys
    }

    pub async fn mint_wrapped(&self, token: Address, holder: Address, amount: U256) {
        let mut state = self.state.lock().await;
        let balance = state.wrapped_balance(token, holder);
        state.wrapped.insert((token, holder), balance.saturating_add(amount));
    }

    /// Allow the vault to pull `amount` of `token` from `owner`
    pub async fn approve(&self, token: Address, owner: Address, amount: U256) {
        self.state.lock().await.allowances.insert((token, owner), amount);
    }

    pub async fn allowance(&self, token: Address, owner: Address) -> U256 {
        self.state
            .lock()
            .await
            .allowances
            .get(&(token, owner))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub async fn account_balance(&self, account: &AccountKey) -> u64 {
        self.state.lock().await.balance(account)
    }

    /// Add liquidity on behalf of a third party; returns LP minted to `owner`
    pub async fn seed_liquidity(
        &self,
        pool_id: &PoolId,
        owner: &AccountKey,
        amount: u64,
    ) -> Result<u64, ForeignError> {
        let mut state = self.state.lock().await;
        let pool = state
            .pools
            .get(pool_id)
            .cloned()
            .ok_or_else(|| program_error(codes::POOL_NOT_FOUND, "pool not found"))?;
        let lp = state.pool_state(&pool).quote_add_liquidity(amount);
        if lp == 0 {
            return Err(program_error(codes::INSUFFICIENT_LIQUIDITY, "zero lp"));
        }

        state.credit(pool.keys.token_vault, pool.keys.token_mint, amount);
        state.credit(
            derive_token_account(owner, &pool.keys.lp_mint),
            pool.keys.lp_mint,
            lp,
        );
        if let Some(p) = state.pools.get_mut(pool_id) {
            p.lp_supply += lp;
        }
        Ok(lp)
    }

    /// Move tokens between two accounts of the same mint
    pub async fn transfer_tokens(
        &self,
        from: &AccountKey,
        to: &AccountKey,
        amount: u64,
    ) -> Result<(), ForeignError> {
        let mut state = self.state.lock().await;
        let source = state
            .accounts
            .get(from)
            .copied()
            .ok_or_else(|| program_error(codes::INSUFFICIENT_FUNDS, "no source account"))?;
        if source.amount < amount {
            return Err(program_error(codes::INSUFFICIENT_FUNDS, "insufficient funds"));
        }
        state.debit(from, amount);
        state.credit(*to, source.mint, amount);
        Ok(())
    }

    /// Grow a pool's reserve without minting LP, raising the value of every LP token
    pub async fn accrue_fees(&self, pool_id: &PoolId, amount: u64) -> Result<(), ForeignError> {
        let mut state = self.state.lock().await;
        let keys = state
            .pools
            .get(pool_id)
            .map(|p| p.keys.clone())
            .ok_or_else(|| program_error(codes::POOL_NOT_FOUND, "pool not found"))?;
        state.credit(keys.token_vault, keys.token_mint, amount);
        Ok(())
    }

    /// Fail the next pool instruction with `error`, before it has any effect
    pub async fn fail_next_invoke(&self, error: ForeignError) {
        self.state.lock().await.faults.next_invoke = Some(error);
    }

    /// Reject every wrap (custody to host) while set
    pub async fn set_fail_wrap(&self, fail: bool) {
        self.state.lock().await.faults.wrap = fail;
    }

    /// Reject every unwrap (host to custody) while set
    pub async fn set_fail_unwrap(&self, fail: bool) {
        self.state.lock().await.faults.unwrap = fail;
    }

    /// Let the pool program mint below the caller's floor instead of failing
    pub async fn set_ignore_min_guard(&self, ignore: bool) {
        self.state.lock().await.faults.ignore_min_guard = ignore;
    }

    /// Withhold this share of minted LP on every add
    pub async fn set_lp_haircut_bps(&self, bps: u64) {
        self.state.lock().await.faults.lp_haircut_bps = bps.min(BPS_DENOMINATOR);
    }

    fn validate_accounts(
        &self,
        instruction: &Instruction,
        pool: &PoolKeys,
        signer: &AccountKey,
    ) -> Result<(), ForeignError> {
        let key = |index: usize| instruction.accounts[index].pubkey;
        let owner = &instruction.accounts[accounts::OWNER];
        if !owner.is_signer || owner.pubkey != *signer {
            return Err(program_error(codes::MISSING_SIGNATURE, "owner did not sign"));
        }

        let expected = [
            (accounts::POOL_AUTHORITY, pool.authority),
            (accounts::OWNER_TOKEN, derive_token_account(signer, &pool.token_mint)),
            (accounts::OWNER_LP, derive_token_account(signer, &pool.lp_mint)),
            (accounts::TOKEN_VAULT, pool.token_vault),
            (accounts::LP_MINT, pool.lp_mint),
            (accounts::TOKEN_PROGRAM, self.token_program_id),
        ];
        if expected.iter().any(|(index, k)| key(*index) != *k) {
            return Err(program_error(codes::MALFORMED_ACCOUNTS, "account mismatch"));
        }

        let writable = [
            accounts::POOL_STATE,
            accounts::OWNER_TOKEN,
            accounts::OWNER_LP,
            accounts::TOKEN_VAULT,
            accounts::LP_MINT,
        ];
        if writable.iter().any(|i| !instruction.accounts[*i].is_writable) {
            return Err(program_error(codes::MALFORMED_ACCOUNTS, "account not writable"));
        }
        Ok(())
    }
}

#[async_trait]
impl WrappedTokenLedger for SimulatedLedgers {
    async fn transfer_from(
        &self,
        token: Address,
        owner: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        let mut state = self.state.lock().await;
        if !state.wrapped_mints.contains_key(&token) {
            return Err(TokenError::UnknownToken(token.to_string()));
        }

        let allowance = state
            .allowances
            .get(&(token, owner))
            .copied()
            .unwrap_or(U256::ZERO);
        let spends_allowance = owner != self.vault;
        if spends_allowance && allowance < amount {
            return Err(TokenError::InsufficientAllowance {
                have: allowance.to_string(),
                need: amount.to_string(),
            });
        }
        let balance = state.wrapped_balance(token, owner);
        if balance < amount {
            return Err(TokenError::InsufficientBalance {
                have: balance.to_string(),
                need: amount.to_string(),
            });
        }

        if spends_allowance {
            state.allowances.insert((token, owner), allowance - amount);
        }
        state.wrapped.insert((token, owner), balance - amount);
        let credited = state.wrapped_balance(token, to) + amount;
        state.wrapped.insert((token, to), credited);
        Ok(())
    }

    async fn unwrap_to(
        &self,
        token: Address,
        from: Address,
        account: AccountKey,
        amount: u64,
    ) -> Result<(), TokenError> {
        let mut state = self.state.lock().await;
        if state.faults.unwrap {
            return Err(TokenError::Rejected("unwrap disabled".into()));
        }
        let mint = *state
            .wrapped_mints
            .get(&token)
            .ok_or_else(|| TokenError::UnknownToken(token.to_string()))?;

        let amount_wide = U256::from(amount);
        let balance = state.wrapped_balance(token, from);
        if balance < amount_wide {
            return Err(TokenError::InsufficientBalance {
                have: balance.to_string(),
                need: amount.to_string(),
            });
        }

        state.wrapped.insert((token, from), balance - amount_wide);
        state.credit(account, mint, amount);
        Ok(())
    }

    async fn wrap_from(
        &self,
        token: Address,
        account: AccountKey,
        to: Address,
        amount: u64,
    ) -> Result<(), TokenError> {
        let mut state = self.state.lock().await;
        if state.faults.wrap {
            return Err(TokenError::Rejected("wrap disabled".into()));
        }
        let mint = *state
            .wrapped_mints
            .get(&token)
            .ok_or_else(|| TokenError::UnknownToken(token.to_string()))?;

        let source = state.accounts.get(&account).copied();
        let have = source.map(|a| a.amount).unwrap_or(0);
        if source.is_some_and(|a| a.mint != mint) {
            return Err(TokenError::Rejected("mint mismatch".into()));
        }
        if have < amount {
            return Err(TokenError::InsufficientBalance {
                have: have.to_string(),
                need: amount.to_string(),
            });
        }

        state.debit(&account, amount);
        let credited = state.wrapped_balance(token, to) + U256::from(amount);
        state.wrapped.insert((token, to), credited);
        Ok(())
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, TokenError> {
        Ok(self.state.lock().await.wrapped_balance(token, owner))
    }
}

#[async_trait]
impl CounterpartyLedger for SimulatedLedgers {
    async fn pool_state(&self, pool_id: &PoolId) -> Result<Option<PoolState>, ForeignError> {
        let state = self.state.lock().await;
        Ok(state.pools.get(pool_id).map(|p| state.pool_state(p)))
    }

    async fn token_balance(&self, account: &AccountKey) -> Result<u64, ForeignError> {
        Ok(self.state.lock().await.balance(account))
    }

    async fn invoke(&self, instruction: &Instruction, signer: &AccountKey) -> Result<(), ForeignError> {
        if instruction.program_id != self.program_id {
            return Err(program_error(codes::UNKNOWN_INSTRUCTION, "unknown program"));
        }
        if instruction.accounts.len() != accounts::COUNT {
            return Err(program_error(codes::MALFORMED_ACCOUNTS, "wrong account count"));
        }
        let call = decode(&instruction.data)
            .ok_or_else(|| program_error(codes::UNKNOWN_INSTRUCTION, "bad instruction data"))?;

        let mut state = self.state.lock().await;
        let pool_id = PoolId::from(instruction.accounts[accounts::POOL_STATE].pubkey);
        let pool = state
            .pools
            .get(&pool_id)
            .cloned()
            .ok_or_else(|| program_error(codes::POOL_NOT_FOUND, "pool not found"))?;
        self.validate_accounts(instruction, &pool.keys, signer)?;

        if let Some(error) = state.faults.next_invoke.take() {
            return Err(error);
        }

        let owner_token = instruction.accounts[accounts::OWNER_TOKEN].pubkey;
        let owner_lp = instruction.accounts[accounts::OWNER_LP].pubkey;
        let snapshot = state.pool_state(&pool);
        let ignore_guard = state.faults.ignore_min_guard;

        match call {
            PoolCall::AddLiquidity { amount, min_lp_out } => {
                if state.balance(&owner_token) < amount {
                    return Err(program_error(codes::INSUFFICIENT_FUNDS, "insufficient funds"));
                }
                let quoted = snapshot.quote_add_liquidity(amount) as u128;
                let kept = BPS_DENOMINATOR - state.faults.lp_haircut_bps;
                let lp = (quoted * kept as u128 / BPS_DENOMINATOR as u128) as u64;
                if lp == 0 {
                    return Err(program_error(codes::INSUFFICIENT_LIQUIDITY, "zero lp out"));
                }
                if lp < min_lp_out && !ignore_guard {
                    return Err(program_error(codes::EXCEEDED_SLIPPAGE, "lp below minimum"));
                }

                state.debit(&owner_token, amount);
                state.credit(pool.keys.token_vault, pool.keys.token_mint, amount);
                state.credit(owner_lp, pool.keys.lp_mint, lp);
                if let Some(p) = state.pools.get_mut(&pool_id) {
                    p.lp_supply += lp;
                }
                debug!("Sim pool {}: add {} -> {} lp", pool_id, amount, lp);
            }
            PoolCall::RemoveLiquidity { lp_amount, min_out } => {
                if state.balance(&owner_lp) < lp_amount || snapshot.lp_supply < lp_amount {
                    return Err(program_error(codes::INSUFFICIENT_FUNDS, "insufficient lp"));
                }
                let out = snapshot.quote_remove_liquidity(lp_amount);
                if out == 0 {
                    return Err(program_error(codes::INSUFFICIENT_LIQUIDITY, "zero out"));
                }
                if out < min_out && !ignore_guard {
                    return Err(program_error(codes::EXCEEDED_SLIPPAGE, "out below minimum"));
                }

                state.debit(&owner_lp, lp_amount);
                state.debit(&pool.keys.token_vault, out);
                state.credit(owner_token, pool.keys.token_mint, out);
                if let Some(p) = state.pools.get_mut(&pool_id) {
                    p.lp_supply -= lp_amount;
                }
                debug!("Sim pool {}: remove {} lp -> {}", pool_id, lp_amount, out);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Custody;
    use crate::pool::PoolInstructionBuilder;

    const PROGRAM: AccountKey = AccountKey::new([0xaa; 32]);
    const TOKEN_PROGRAM: AccountKey = AccountKey::new([0xbb; 32]);
    const MINT: AccountKey = AccountKey::new([0x06; 32]);

    fn vault() -> Address {
        Address::repeat_byte(0x55)
    }

    async fn setup() -> (SimulatedLedgers, PoolKeys, Custody) {
        let sim = SimulatedLedgers::new(vault(), PROGRAM, TOKEN_PROGRAM);
        let keys = sim.create_pool(PoolId::new([9u8; 32]), MINT).await;
        (sim, keys, Custody::new(vault(), "seed"))
    }

    #[tokio::test]
    async fn test_add_then_remove_at_constant_ratio() {
        let (sim, keys, custody) = setup().await;
        let builder = PoolInstructionBuilder::new(PROGRAM, TOKEN_PROGRAM, custody.clone());
        let token_account = custody.token_account(&MINT);
        let lp_account = custody.token_account(&keys.lp_mint);
        sim.state.lock().await.credit(token_account, MINT, 1_000);

        let add = builder.build_add_liquidity(&keys, 1_000, 1_000).unwrap();
        sim.invoke(&add, &custody.owner()).await.unwrap();
        assert_eq!(sim.account_balance(&lp_account).await, 1_000);
        assert_eq!(sim.account_balance(&token_account).await, 0);

        sim.accrue_fees(&keys.id, 500).await.unwrap();
        let remove = builder.build_remove_liquidity(&keys, 500, 750).unwrap();
        sim.invoke(&remove, &custody.owner()).await.unwrap();
        assert_eq!(sim.account_balance(&token_account).await, 750);

        let state = CounterpartyLedger::pool_state(&sim, &keys.id).await.unwrap().unwrap();
        assert_eq!(state.reserve, 750);
        assert_eq!(state.lp_supply, 500);
    }

    #[tokio::test]
    async fn test_guard_and_signer_enforced() {
        let (sim, keys, custody) = setup().await;
        let builder = PoolInstructionBuilder::new(PROGRAM, TOKEN_PROGRAM, custody.clone());
        sim.state
            .lock()
            .await
            .credit(custody.token_account(&MINT), MINT, 100);

        let greedy = builder.build_add_liquidity(&keys, 100, 101).unwrap();
        let err = sim.invoke(&greedy, &custody.owner()).await.unwrap_err();
        assert!(matches!(err, ForeignError::SlippageExceeded { .. }));

        let ok = builder.build_add_liquidity(&keys, 100, 100).unwrap();
        let err = sim.invoke(&ok, &AccountKey([0xee; 32])).await.unwrap_err();
        assert!(matches!(err, ForeignError::MalformedAccounts { .. }));

        // Nothing landed
        let state = CounterpartyLedger::pool_state(&sim, &keys.id).await.unwrap().unwrap();
        assert_eq!(state.reserve, 0);
        assert_eq!(state.lp_supply, 0);
    }

    #[tokio::test]
    async fn test_transfer_from_requires_allowance() {
        let (sim, _, _) = setup().await;
        let token = Address::repeat_byte(0xc7);
        let user = Address::repeat_byte(1);
        sim.register_token(token, MINT).await;
        sim.mint_wrapped(token, user, U256::from(100u64)).await;

        let err = sim
            .transfer_from(token, user, vault(), U256::from(10u64))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InsufficientAllowance { .. }));

        sim.approve(token, user, U256::from(10u64)).await;
        sim.transfer_from(token, user, vault(), U256::from(10u64))
            .await
            .unwrap();
        assert_eq!(sim.balance_of(token, vault()).await.unwrap(), U256::from(10u64));
        assert_eq!(sim.allowance(token, user).await, U256::ZERO);
    }
}
