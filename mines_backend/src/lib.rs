//! Provably-Fair Mines Backend
//!
//! **Design Philosophy:**
//! A 5x5 mines game where hazard placement is a pure function of seed
//! material fixed at game start, so every finished game can be re-derived
//! and audited by anyone.
//!
//! **House Edge:**
//! - Multipliers are true survival odds scaled by a 95% retention factor
//! - All table entries are exact integer constants at 10^18 fixed-point
//!
//! **Transparency & Fairness:**
//! - Engine seeds: IC VRF (raw_rand) pool, rotated on a games/time schedule
//! - Per-game engine seed is SHA256(pool_seed || game_id), published once
//!   the game is terminal; `verify_game` replays the derivation on-chain
//! - Player seeds are caller-chosen and committed before any hazard exists

use candid::Principal;
use ic_cdk::{init, post_upgrade, pre_upgrade, query, update};
use ic_stable_structures::memory_manager::{MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

pub mod game;
pub mod ledger;
pub mod multiplier;
pub mod seed;
pub mod types;

pub use types::*;

use ledger::StableLedger;

// =============================================================================
// MEMORY MANAGEMENT
// =============================================================================

pub type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    pub static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));
}

/// One MemoryId per stable structure. Append-only: never renumber.
pub mod memory_ids {
    pub const GAMES: u8 = 0;
    pub const NEXT_GAME_ID: u8 = 1;
    pub const PLAYER_STATS: u8 = 2;
    pub const SEED_POOL: u8 = 3;
    pub const LEDGER_ACCOUNTS: u8 = 4;
    pub const EVENTS: u8 = 5;
    pub const NEXT_EVENT_ID: u8 = 6;
    pub const HOUSE_STATE: u8 = 7;
}

// =============================================================================
// LIFECYCLE HOOKS
// =============================================================================

#[init]
fn init() {
    ic_cdk::println!("Mines Backend Initialized - provably-fair settlement engine");

    // Seed the VRF pool once init has returned; raw_rand cannot be awaited
    // inside init itself.
    ic_cdk_timers::set_timer(std::time::Duration::ZERO, || {
        ic_cdk::spawn(seed::initialize_seed_pool());
    });
}

#[pre_upgrade]
fn pre_upgrade() {
    // Stable structures persist automatically, no special handling needed.
    ic_cdk::println!("Pre-upgrade: state persists automatically");
}

#[post_upgrade]
fn post_upgrade() {
    // The seed pool survives the upgrade in stable memory; the timer only
    // matters if the canister was upgraded before the first pool landed.
    ic_cdk_timers::set_timer(std::time::Duration::ZERO, || {
        ic_cdk::spawn(seed::initialize_seed_pool());
    });
    ic_cdk::println!("Post-upgrade: stable state restored");
}

// =============================================================================
// GAME ENDPOINTS
// =============================================================================

/// Start a game: validate, pull the stake into escrow, derive hazards.
#[update]
fn start_game(stake: u128, hazard_count: u8, player_seed: String) -> Result<GameView, GameError> {
    // Rotation is scheduled, never awaited: this message settles against the
    // pool that existed when it arrived.
    seed::maybe_rotate();
    game::start_game(
        &StableLedger,
        ic_cdk::caller(),
        stake,
        hazard_count,
        player_seed,
        ic_cdk::api::time(),
    )
}

#[update]
fn reveal_cell(game_id: u64, cell: u8) -> Result<RevealOutcome, GameError> {
    game::reveal_cell(
        &StableLedger,
        game_id,
        cell,
        ic_cdk::caller(),
        ic_cdk::api::time(),
    )
}

#[update]
fn cash_out(game_id: u64) -> Result<GameView, GameError> {
    game::cash_out(&StableLedger, game_id, ic_cdk::caller(), ic_cdk::api::time())
}

/// Claim-based settlement. Trusts the caller's reveal tally; see the engine
/// doc comment for the trust trade-off.
#[update]
fn cash_out_with_claim(game_id: u64, claimed_safe_found: u8) -> Result<GameView, GameError> {
    game::cash_out_with_claim(
        &StableLedger,
        game_id,
        ic_cdk::caller(),
        claimed_safe_found,
        ic_cdk::api::time(),
    )
}

#[update]
fn forfeit(game_id: u64) -> Result<GameView, GameError> {
    game::forfeit(game_id, ic_cdk::caller(), ic_cdk::api::time())
}

#[update]
fn abandon_game(game_id: u64) -> Result<GameView, GameError> {
    game::abandon_game(game_id, ic_cdk::caller(), ic_cdk::api::time())
}

// =============================================================================
// GAME QUERIES
// =============================================================================

#[query]
fn get_game(game_id: u64) -> Option<GameView> {
    game::get_game(game_id)
}

#[query]
fn get_player_stats(player: Principal) -> PlayerStats {
    game::get_player_stats(player)
}

#[query]
fn get_my_stats() -> PlayerStats {
    game::get_player_stats(ic_cdk::caller())
}

#[query]
fn get_active_games(player: Principal) -> Vec<GameView> {
    game::get_active_games(player)
}

#[query]
fn get_config() -> EngineConfig {
    game::get_config()
}

#[query]
fn get_multiplier_table(hazard_count: u8) -> Option<Vec<u128>> {
    multiplier::table_for(hazard_count)
}

#[query]
fn get_events(start_id: u64, limit: u32) -> Vec<GameEvent> {
    game::get_events(start_id, limit)
}

#[query]
fn verify_game(game_id: u64) -> Option<HazardVerification> {
    game::verify_game(game_id)
}

#[query]
fn get_house_state() -> HouseState {
    game::get_house_state()
}

/// SHA-256 commitment to the live pool seed. Record it before playing,
/// compare it once the pool rotates out.
#[query]
fn get_seed_commitment() -> String {
    seed::pool_commitment()
}

// =============================================================================
// CREDIT LEDGER ENDPOINTS
// =============================================================================

/// Set the caller's spending allowance for stakes (ICRC-2 approve semantics).
#[update]
fn approve(amount: u128) -> u128 {
    ledger::approve(ic_cdk::caller(), amount)
}

/// Mint credits to an account. Controller-only funding path.
#[update]
fn mint(to: Principal, amount: u128) -> Result<u128, String> {
    let caller = ic_cdk::caller();
    if !ic_cdk::api::is_controller(&caller) {
        return Err("Only controllers can mint credits".to_string());
    }
    let balance = ledger::mint(to, amount);
    ic_cdk::println!("Minted {} base units to {}", amount, to);
    Ok(balance)
}

#[query]
fn get_balance(player: Principal) -> u128 {
    ledger::balance_of(player)
}

#[query]
fn get_my_balance() -> u128 {
    ledger::balance_of(ic_cdk::caller())
}

#[query]
fn get_my_allowance() -> u128 {
    ledger::allowance_of(ic_cdk::caller())
}

// =============================================================================
// MISC
// =============================================================================

#[query]
fn greet(name: String) -> String {
    format!(
        "Welcome to Mines, {}! Pick your cells carefully and cash out while you can.",
        name
    )
}

ic_cdk::export_candid!();
