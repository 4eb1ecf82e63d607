// Internal credit ledger and the boundary the engine settles against.
//
// The engine never touches balances directly; it sequences `debit` and
// `credit` calls around its own state transitions. The canister wires in
// `StableLedger`; tests inject mocks.

use crate::types::{LedgerAccount, LedgerError};
use crate::Memory;
use candid::Principal;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;

/// Escrow boundary consumed by the engine. `debit` pulls a stake into escrow
/// and is the only fallible half; `credit` mints winnings and always succeeds
/// for a trusted, engine-authorized implementation.
pub trait CreditLedger {
    fn debit(&self, player: Principal, amount: u128) -> Result<(), LedgerError>;
    fn credit(&self, player: Principal, amount: u128);
}

thread_local! {
    static ACCOUNTS: RefCell<StableBTreeMap<Principal, LedgerAccount, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::LEDGER_ACCOUNTS))),
        )
    );
}

/// Credit ledger backed by stable memory, with ICRC-2 style pre-authorization:
/// a debit consumes both balance and approved allowance.
pub struct StableLedger;

impl CreditLedger for StableLedger {
    fn debit(&self, player: Principal, amount: u128) -> Result<(), LedgerError> {
        ACCOUNTS.with(|accounts| {
            let mut accounts = accounts.borrow_mut();
            let mut account = accounts.get(&player).unwrap_or_default();
            if account.allowance < amount {
                return Err(LedgerError::InsufficientAuthorization);
            }
            if account.balance < amount {
                return Err(LedgerError::InsufficientFunds);
            }
            account.allowance -= amount;
            account.balance -= amount;
            accounts.insert(player, account);
            Ok(())
        })
    }

    fn credit(&self, player: Principal, amount: u128) {
        ACCOUNTS.with(|accounts| {
            let mut accounts = accounts.borrow_mut();
            let mut account = accounts.get(&player).unwrap_or_default();
            account.balance = account.balance.saturating_add(amount);
            accounts.insert(player, account);
        });
    }
}

// =============================================================================
// ACCOUNT OPERATIONS
// =============================================================================

/// Set the caller's spending allowance. Approve semantics: the new value
/// replaces the old one, it does not accumulate.
pub fn approve(caller: Principal, amount: u128) -> u128 {
    ACCOUNTS.with(|accounts| {
        let mut accounts = accounts.borrow_mut();
        let mut account = accounts.get(&caller).unwrap_or_default();
        account.allowance = amount;
        accounts.insert(caller, account);
        amount
    })
}

pub fn balance_of(player: Principal) -> u128 {
    ACCOUNTS.with(|accounts| accounts.borrow().get(&player).unwrap_or_default().balance)
}

pub fn allowance_of(player: Principal) -> u128 {
    ACCOUNTS.with(|accounts| accounts.borrow().get(&player).unwrap_or_default().allowance)
}

/// Mint credits to an account. Caller gating happens at the endpoint.
pub fn mint(to: Principal, amount: u128) -> u128 {
    ACCOUNTS.with(|accounts| {
        let mut accounts = accounts.borrow_mut();
        let mut account = accounts.get(&to).unwrap_or_default();
        account.balance = account.balance.saturating_add(amount);
        let balance = account.balance;
        accounts.insert(to, account);
        balance
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SCALE;

    fn player(n: u8) -> Principal {
        Principal::from_slice(&[n; 29])
    }

    #[test]
    fn debit_checks_allowance_before_balance() {
        let p = player(1);
        // Nothing approved, nothing funded: authorization fails first.
        assert_eq!(
            StableLedger.debit(p, SCALE),
            Err(LedgerError::InsufficientAuthorization)
        );

        approve(p, 10 * SCALE);
        assert_eq!(
            StableLedger.debit(p, SCALE),
            Err(LedgerError::InsufficientFunds)
        );

        mint(p, 10 * SCALE);
        assert_eq!(StableLedger.debit(p, SCALE), Ok(()));
        assert_eq!(balance_of(p), 9 * SCALE);
        assert_eq!(allowance_of(p), 9 * SCALE);
    }

    #[test]
    fn debit_consumes_allowance() {
        let p = player(2);
        mint(p, 100 * SCALE);
        approve(p, 3 * SCALE);

        assert_eq!(StableLedger.debit(p, 2 * SCALE), Ok(()));
        assert_eq!(allowance_of(p), SCALE);
        assert_eq!(
            StableLedger.debit(p, 2 * SCALE),
            Err(LedgerError::InsufficientAuthorization)
        );
        // Balance untouched by the failed debit.
        assert_eq!(balance_of(p), 98 * SCALE);
    }

    #[test]
    fn approve_replaces_rather_than_accumulates() {
        let p = player(3);
        approve(p, 5 * SCALE);
        approve(p, 2 * SCALE);
        assert_eq!(allowance_of(p), 2 * SCALE);
    }

    #[test]
    fn credit_mints_to_balance() {
        let p = player(4);
        StableLedger.credit(p, 7 * SCALE);
        assert_eq!(balance_of(p), 7 * SCALE);
        // Credits do not grant allowance.
        assert_eq!(allowance_of(p), 0);
    }

    #[test]
    fn mint_accumulates_and_reports_new_balance() {
        let p = player(5);
        assert_eq!(mint(p, SCALE), SCALE);
        assert_eq!(mint(p, SCALE), 2 * SCALE);
    }
}
