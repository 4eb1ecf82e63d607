// Seed pool and deterministic hazard derivation.
//
// The engine side of every game seed comes from a pooled 32-byte secret drawn
// from the IC VRF (raw_rand) and rotated on a games/time schedule. A game's
// engine seed is SHA256(pool_seed || game_id), which is one-way: a terminal
// game can publish its engine seed for verification without leaking the pool
// seed still in use by live games. The player cannot predict the engine seed
// when submitting a player seed, and the engine cannot pick hazards after the
// fact: the layout is a pure function of material fixed at start.

use crate::types::{SeedPool, GRID_SIZE};
use crate::Memory;
use ic_cdk::api::management_canister::main::raw_rand;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableCell;
use sha2::{Digest, Sha256};
use std::cell::RefCell;

pub const SEED_ROTATION_GAMES: u64 = 500;
pub const SEED_ROTATION_NANOS: u64 = 86_400_000_000_000; // 24 hours
const MIN_ROTATION_GAP_NANOS: u64 = 10_000_000_000; // 10 seconds between rotations

thread_local! {
    static SEED_POOL: RefCell<StableCell<SeedPool, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::SEED_POOL))),
            SeedPool::default()
        ).expect("Failed to initialize SEED_POOL")
    );

    static ROTATION_IN_FLIGHT: RefCell<bool> = const { RefCell::new(false) };
}

// =============================================================================
// POOL MANAGEMENT
// =============================================================================

/// Install a new pool seed, resetting the per-pool game counter.
pub fn install_pool_seed(seed: [u8; 32], now_ns: u64) {
    SEED_POOL.with(|cell| {
        cell.borrow_mut()
            .set(SeedPool {
                seed,
                created_at: now_ns,
                games_used: 0,
            })
            .expect("Failed to update SEED_POOL");
    });
}

/// The current pool, or None until VRF initialization has completed.
pub fn active_pool() -> Option<SeedPool> {
    SEED_POOL.with(|cell| {
        let pool = cell.borrow().get().clone();
        if pool.created_at == 0 {
            None
        } else {
            Some(pool)
        }
    })
}

/// Count one game against the current pool's rotation budget.
pub fn record_pool_use() {
    SEED_POOL.with(|cell| {
        let mut cell = cell.borrow_mut();
        let mut pool = cell.get().clone();
        pool.games_used += 1;
        cell.set(pool).expect("Failed to update SEED_POOL");
    });
}

/// SHA-256 commitment to the current pool seed, for fairness audits. Players
/// can record this before a game and check it against rotated-out seeds.
pub fn pool_commitment() -> String {
    match active_pool() {
        Some(pool) => hex::encode(Sha256::digest(pool.seed)),
        None => "uninitialized".to_string(),
    }
}

/// Fetch VRF entropy and install the first pool seed. No-op if a pool already
/// exists or another initialization is in flight.
pub async fn initialize_seed_pool() {
    if active_pool().is_some() {
        return;
    }
    if ROTATION_IN_FLIGHT.with(|flag| *flag.borrow()) {
        return;
    }
    ROTATION_IN_FLIGHT.with(|flag| *flag.borrow_mut() = true);

    match raw_rand().await {
        Ok((bytes,)) => {
            // Re-check after the await; a concurrent message may have won.
            if active_pool().is_none() {
                install_pool_seed(digest32(&bytes), ic_cdk::api::time());
                ic_cdk::println!("Seed pool initialized from VRF");
            }
        }
        Err((code, msg)) => {
            // Leave the pool uninitialized rather than fall back to weak
            // entropy; game starts fail SeedUnavailable until a retry lands.
            ic_cdk::println!("Seed pool initialization failed: {:?} {}", code, msg);
        }
    }

    ROTATION_IN_FLIGHT.with(|flag| *flag.borrow_mut() = false);
}

/// Replace the pool seed with fresh VRF entropy.
pub async fn rotate_pool() {
    if ROTATION_IN_FLIGHT.with(|flag| *flag.borrow()) {
        return;
    }
    ROTATION_IN_FLIGHT.with(|flag| *flag.borrow_mut() = true);

    let now = ic_cdk::api::time();
    let too_recent = active_pool()
        .map(|pool| now.saturating_sub(pool.created_at) < MIN_ROTATION_GAP_NANOS)
        .unwrap_or(false);

    if !too_recent {
        match raw_rand().await {
            Ok((bytes,)) => {
                install_pool_seed(digest32(&bytes), ic_cdk::api::time());
                ic_cdk::println!("Seed pool rotated");
            }
            Err((code, msg)) => {
                ic_cdk::println!("Seed pool rotation failed: {:?} {}", code, msg);
            }
        }
    }

    ROTATION_IN_FLIGHT.with(|flag| *flag.borrow_mut() = false);
}

/// Schedule pool initialization or rotation when due. Non-blocking; the
/// current message proceeds against the existing pool.
pub fn maybe_rotate() {
    match active_pool() {
        None => ic_cdk::spawn(initialize_seed_pool()),
        Some(pool) => {
            let now = ic_cdk::api::time();
            if pool.games_used >= SEED_ROTATION_GAMES
                || now.saturating_sub(pool.created_at) >= SEED_ROTATION_NANOS
            {
                ic_cdk::spawn(rotate_pool());
            }
        }
    }
}

// =============================================================================
// DERIVATION
// =============================================================================

fn digest32(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Per-game engine seed: SHA256(pool_seed || nonce). The game id is the nonce.
pub fn derive_engine_seed(pool_seed: &[u8; 32], nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pool_seed);
    hasher.update(nonce.to_be_bytes());
    hasher.finalize().into()
}

/// Deterministic hazard layout from the combined seeds.
///
/// combined = SHA256(engine_seed || player_seed); then repeatedly hash the
/// running digest and reduce the first 8 bytes mod the grid size to nominate a
/// candidate cell. The running digest advances on every draw whether or not
/// the candidate was already chosen, so placement carries no bias toward early
/// positions, and duplicates are simply skipped until `hazard_count` distinct
/// cells are collected.
pub fn derive_hazards(
    engine_seed: &[u8; 32],
    player_seed: &str,
    hazard_count: u8,
) -> [bool; GRID_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(engine_seed);
    hasher.update(player_seed.as_bytes());
    let mut running: [u8; 32] = hasher.finalize().into();

    let mut hazards = [false; GRID_SIZE];
    let mut placed = 0u8;
    while placed < hazard_count {
        let digest: [u8; 32] = Sha256::digest(running).into();
        let candidate =
            (u64::from_be_bytes(digest[0..8].try_into().unwrap()) % GRID_SIZE as u64) as usize;
        running = digest;
        if !hazards[candidate] {
            hazards[candidate] = true;
            placed += 1;
        }
    }

    hazards
}
