// Game engine: lifecycle state machine, settlement, stats, and audit events.
//
// Operations are synchronous and take the caller and (where time matters) the
// current time as parameters, so the full engine is exercisable off-canister.
// Each operation reads one record, validates, and commits as a unit; on every
// win path the terminal state is persisted before the ledger credit is issued,
// so a reentrant call on the same id fails GameNotActive.

use crate::ledger::CreditLedger;
use crate::multiplier;
use crate::seed;
use crate::types::*;
use crate::Memory;
use candid::Principal;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::{StableBTreeMap, StableCell};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::cell::RefCell;

thread_local! {
    static GAMES: RefCell<StableBTreeMap<u64, GameRecord, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::GAMES))),
        )
    );

    static NEXT_GAME_ID: RefCell<StableCell<u64, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::NEXT_GAME_ID))),
            0u64
        ).expect("Failed to initialize NEXT_GAME_ID")
    );

    static EVENTS: RefCell<StableBTreeMap<u64, GameEvent, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::EVENTS))),
        )
    );

    static NEXT_EVENT_ID: RefCell<StableCell<u64, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::NEXT_EVENT_ID))),
            0u64
        ).expect("Failed to initialize NEXT_EVENT_ID")
    );

    static PLAYER_STATS: RefCell<StableBTreeMap<Principal, PlayerStats, Memory>> = RefCell::new(
        StableBTreeMap::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::PLAYER_STATS))),
        )
    );

    static HOUSE: RefCell<StableCell<HouseState, Memory>> = RefCell::new(
        StableCell::init(
            crate::MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(crate::memory_ids::HOUSE_STATE))),
            HouseState::default()
        ).expect("Failed to initialize HOUSE")
    );
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Start a new game: validate, debit the stake into escrow, derive the hazard
/// layout, and persist the record in Active state.
pub fn start_game(
    ledger: &dyn CreditLedger,
    caller: Principal,
    stake: u128,
    hazard_count: u8,
    player_seed: String,
    now_ns: u64,
) -> Result<GameView, GameError> {
    if !(MIN_HAZARDS..=MAX_HAZARDS).contains(&hazard_count) {
        return Err(GameError::InvalidConfiguration(format!(
            "hazard count must be between {} and {}",
            MIN_HAZARDS, MAX_HAZARDS
        )));
    }
    if !multiplier::is_tabulated(hazard_count) {
        return Err(GameError::InvalidConfiguration(format!(
            "no multiplier table for {} hazards",
            hazard_count
        )));
    }
    if stake < MIN_BET || stake > MAX_BET {
        return Err(GameError::InvalidConfiguration(format!(
            "stake must be between {} and {} base units",
            MIN_BET, MAX_BET
        )));
    }
    if player_seed.len() > MAX_SEED_LEN {
        return Err(GameError::InvalidConfiguration(format!(
            "player seed exceeds {} bytes",
            MAX_SEED_LEN
        )));
    }
    if active_game_count(caller) >= MAX_ACTIVE_GAMES_PER_PLAYER {
        return Err(GameError::InvalidConfiguration(format!(
            "maximum {} active games per player",
            MAX_ACTIVE_GAMES_PER_PLAYER
        )));
    }

    let pool = seed::active_pool().ok_or(GameError::SeedUnavailable)?;

    // No state is written until the stake debit succeeds.
    ledger.debit(caller, stake)?;

    let game_id = next_game_id();
    let engine_seed = seed::derive_engine_seed(&pool.seed, game_id);
    let hazards = seed::derive_hazards(&engine_seed, &player_seed, hazard_count);
    seed::record_pool_use();

    let game = GameRecord {
        id: game_id,
        player: caller,
        stake,
        hazard_count,
        hazards,
        revealed: [false; GRID_SIZE],
        safe_found: 0,
        multiplier: SCALE,
        state: GameState::Active,
        payout: 0,
        engine_seed,
        player_seed,
        nonce: game_id,
        created_at: now_ns,
    };
    GAMES.with(|games| games.borrow_mut().insert(game_id, game.clone()));

    house_mut(|house| {
        house.total_wagered = house.total_wagered.saturating_add(stake);
        house.escrowed = house.escrowed.saturating_add(stake);
    });
    stats_mut(caller, |stats| {
        stats.total_games += 1;
        stats.game_ids.push(game_id);
    });
    push_event(
        now_ns,
        GameEventKind::GameStarted {
            game_id,
            player: caller,
            stake,
            hazard_count,
        },
    );

    Ok(to_view(&game))
}

/// Reveal one cell. A hazard ends the game with zero payout; revealing the
/// last remaining safe cell settles automatically at the table maximum.
pub fn reveal_cell(
    ledger: &dyn CreditLedger,
    game_id: u64,
    cell: u8,
    caller: Principal,
    now_ns: u64,
) -> Result<RevealOutcome, GameError> {
    let mut game = load_active(game_id, caller)?;
    if cell as usize >= GRID_SIZE {
        return Err(GameError::CellOutOfRange);
    }
    if game.revealed[cell as usize] {
        return Err(GameError::CellAlreadyRevealed);
    }

    game.revealed[cell as usize] = true;

    if game.hazards[cell as usize] {
        push_event(
            now_ns,
            GameEventKind::CellRevealed {
                game_id,
                cell,
                hazard: true,
                safe_found: game.safe_found,
                multiplier: game.multiplier,
            },
        );
        let game = settle_loss(game, now_ns);
        return Ok(reveal_outcome(&game, cell, true));
    }

    game.safe_found += 1;
    game.multiplier = lookup_multiplier(game.hazard_count, game.safe_found)?;
    push_event(
        now_ns,
        GameEventKind::CellRevealed {
            game_id,
            cell,
            hazard: false,
            safe_found: game.safe_found,
            multiplier: game.multiplier,
        },
    );

    if game.safe_found == game.safe_total() {
        let game = settle_win(ledger, game, now_ns);
        return Ok(reveal_outcome(&game, cell, false));
    }

    GAMES.with(|games| games.borrow_mut().insert(game_id, game.clone()));
    Ok(reveal_outcome(&game, cell, false))
}

/// Settle an active game as a win at the current multiplier. Requires at
/// least one safe reveal.
pub fn cash_out(
    ledger: &dyn CreditLedger,
    game_id: u64,
    caller: Principal,
    now_ns: u64,
) -> Result<GameView, GameError> {
    let game = load_active(game_id, caller)?;
    if game.safe_found == 0 {
        return Err(GameError::NoSafeReveals);
    }
    let game = settle_win(ledger, game, now_ns);
    Ok(to_view(&game))
}

/// Single-step settlement that trusts the caller's reveal tally.
///
/// The claimed count is NOT verified against the hazard layout. This is a
/// deliberate trade-off for deployments that track reveals off the critical
/// path; anything that needs trustless settlement must use the reveal-driven
/// path instead.
pub fn cash_out_with_claim(
    ledger: &dyn CreditLedger,
    game_id: u64,
    caller: Principal,
    claimed_safe_found: u8,
    now_ns: u64,
) -> Result<GameView, GameError> {
    let mut game = load_active(game_id, caller)?;
    if claimed_safe_found == 0 || claimed_safe_found > game.safe_total() {
        return Err(GameError::InvalidClaim);
    }
    game.safe_found = claimed_safe_found;
    game.multiplier = lookup_multiplier(game.hazard_count, claimed_safe_found)?;
    let game = settle_win(ledger, game, now_ns);
    Ok(to_view(&game))
}

/// Give up an active game immediately. The stake stays with the house.
pub fn forfeit(game_id: u64, caller: Principal, now_ns: u64) -> Result<GameView, GameError> {
    let game = load_active(game_id, caller)?;
    let game = settle_loss(game, now_ns);
    Ok(to_view(&game))
}

/// Recovery path for stuck sessions: after the timeout the owner can close
/// the game without payout. Kept distinct from Completed for audit clarity.
pub fn abandon_game(game_id: u64, caller: Principal, now_ns: u64) -> Result<GameView, GameError> {
    let mut game = load_active(game_id, caller)?;
    if now_ns.saturating_sub(game.created_at) < ABANDON_TIMEOUT_NANOS {
        return Err(GameError::AbandonTooEarly);
    }
    game.state = GameState::Abandoned;
    GAMES.with(|games| games.borrow_mut().insert(game_id, game.clone()));
    release_escrow(game.stake);
    push_event(now_ns, GameEventKind::GameAbandoned { game_id });
    Ok(to_view(&game))
}

// =============================================================================
// SETTLEMENT
// =============================================================================

/// payout = stake * multiplier / SCALE, truncating. The intermediate product
/// exceeds u128 at the table maximum, so it runs through BigUint.
pub fn compute_payout(stake: u128, multiplier: u128) -> u128 {
    let gross = BigUint::from(stake) * BigUint::from(multiplier) / BigUint::from(SCALE);
    gross.to_u128().unwrap_or(u128::MAX)
}

fn settle_win(ledger: &dyn CreditLedger, mut game: GameRecord, now_ns: u64) -> GameRecord {
    game.state = GameState::Completed;
    game.payout = compute_payout(game.stake, game.multiplier);

    // Terminal state is persisted before the credit call, so a reentrant
    // operation on this id fails GameNotActive.
    GAMES.with(|games| games.borrow_mut().insert(game.id, game.clone()));

    house_mut(|house| {
        house.escrowed = house.escrowed.saturating_sub(game.stake);
        house.total_paid_out = house.total_paid_out.saturating_add(game.payout);
    });
    stats_mut(game.player, |stats| stats.total_wins += 1);
    push_event(
        now_ns,
        GameEventKind::GameCompleted {
            game_id: game.id,
            won: true,
            payout: game.payout,
        },
    );

    ledger.credit(game.player, game.payout);
    game
}

fn settle_loss(mut game: GameRecord, now_ns: u64) -> GameRecord {
    game.state = GameState::Completed;
    game.payout = 0;
    GAMES.with(|games| games.borrow_mut().insert(game.id, game.clone()));
    release_escrow(game.stake);
    push_event(
        now_ns,
        GameEventKind::GameCompleted {
            game_id: game.id,
            won: false,
            payout: 0,
        },
    );
    game
}

// =============================================================================
// QUERIES
// =============================================================================

pub fn get_game(game_id: u64) -> Option<GameView> {
    GAMES.with(|games| games.borrow().get(&game_id)).map(|game| to_view(&game))
}

pub fn get_player_stats(player: Principal) -> PlayerStats {
    PLAYER_STATS.with(|stats| stats.borrow().get(&player).unwrap_or_default())
}

pub fn get_active_games(player: Principal) -> Vec<GameView> {
    let ids = get_player_stats(player).game_ids;
    GAMES.with(|games| {
        let games = games.borrow();
        ids.iter()
            .filter_map(|id| games.get(id))
            .filter(|game| game.state == GameState::Active)
            .map(|game| to_view(&game))
            .collect()
    })
}

pub fn get_house_state() -> HouseState {
    HOUSE.with(|cell| cell.borrow().get().clone())
}

pub fn game_count() -> u64 {
    GAMES.with(|games| games.borrow().len())
}

pub fn event_count() -> u64 {
    EVENTS.with(|events| events.borrow().len())
}

/// Events in id order starting at `start_id`, up to `limit` entries.
pub fn get_events(start_id: u64, limit: u32) -> Vec<GameEvent> {
    let limit = (limit as usize).min(MAX_EVENT_PAGE);
    EVENTS.with(|events| {
        events
            .borrow()
            .range(start_id..)
            .take(limit)
            .map(|(_, event)| event)
            .collect()
    })
}

/// Recompute the hazard layout from the stored seed material and compare.
/// None for unknown ids and for games still running; layout material is never
/// exposed for a live game.
pub fn verify_game(game_id: u64) -> Option<HazardVerification> {
    let game = GAMES.with(|games| games.borrow().get(&game_id))?;
    if game.state == GameState::Active {
        return None;
    }
    let derived = seed::derive_hazards(&game.engine_seed, &game.player_seed, game.hazard_count);
    Some(HazardVerification {
        game_id,
        engine_seed: hex::encode(game.engine_seed),
        player_seed: game.player_seed.clone(),
        nonce: game.nonce,
        derived_positions: positions(&derived),
        stored_positions: positions(&game.hazards),
        matches: derived == game.hazards,
    })
}

pub fn get_config() -> EngineConfig {
    EngineConfig {
        grid_size: GRID_SIZE as u8,
        min_hazards: MIN_HAZARDS,
        max_hazards: MAX_HAZARDS,
        populated_hazard_counts: multiplier::POPULATED_HAZARD_COUNTS.to_vec(),
        min_bet: MIN_BET,
        max_bet: MAX_BET,
        multiplier_scale: SCALE,
        abandon_timeout_nanos: ABANDON_TIMEOUT_NANOS,
        max_seed_len: MAX_SEED_LEN as u32,
        max_active_games_per_player: MAX_ACTIVE_GAMES_PER_PLAYER as u32,
    }
}

// =============================================================================
// INTERNAL HELPERS
// =============================================================================

fn load_active(game_id: u64, caller: Principal) -> Result<GameRecord, GameError> {
    let game = GAMES
        .with(|games| games.borrow().get(&game_id))
        .ok_or(GameError::GameNotFound)?;
    if game.state != GameState::Active {
        return Err(GameError::GameNotActive);
    }
    if game.player != caller {
        return Err(GameError::NotOwner);
    }
    Ok(game)
}

fn lookup_multiplier(hazard_count: u8, safe_found: u8) -> Result<u128, GameError> {
    multiplier::multiplier_for(hazard_count, safe_found).ok_or_else(|| {
        GameError::InvalidConfiguration(format!(
            "no multiplier entry for {} hazards at {} reveals",
            hazard_count, safe_found
        ))
    })
}

fn active_game_count(player: Principal) -> usize {
    let ids = get_player_stats(player).game_ids;
    GAMES.with(|games| {
        let games = games.borrow();
        ids.iter()
            .filter_map(|id| games.get(id))
            .filter(|game| game.state == GameState::Active)
            .count()
    })
}

fn next_game_id() -> u64 {
    NEXT_GAME_ID.with(|cell| {
        let mut cell = cell.borrow_mut();
        let current = *cell.get();
        cell.set(current + 1)
            .expect("Failed to increment NEXT_GAME_ID");
        current
    })
}

fn push_event(now_ns: u64, kind: GameEventKind) {
    let id = NEXT_EVENT_ID.with(|cell| {
        let mut cell = cell.borrow_mut();
        let current = *cell.get();
        cell.set(current + 1)
            .expect("Failed to increment NEXT_EVENT_ID");
        current
    });
    EVENTS.with(|events| {
        events.borrow_mut().insert(
            id,
            GameEvent {
                id,
                timestamp: now_ns,
                kind,
            },
        )
    });
}

fn house_mut(f: impl FnOnce(&mut HouseState)) {
    HOUSE.with(|cell| {
        let mut cell = cell.borrow_mut();
        let mut house = cell.get().clone();
        f(&mut house);
        cell.set(house).expect("Failed to update HOUSE");
    });
}

fn release_escrow(stake: u128) {
    house_mut(|house| house.escrowed = house.escrowed.saturating_sub(stake));
}

fn stats_mut(player: Principal, f: impl FnOnce(&mut PlayerStats)) {
    PLAYER_STATS.with(|stats| {
        let mut stats = stats.borrow_mut();
        let mut entry = stats.get(&player).unwrap_or_default();
        f(&mut entry);
        stats.insert(player, entry);
    });
}

fn to_view(game: &GameRecord) -> GameView {
    let terminal = game.state != GameState::Active;
    GameView {
        id: game.id,
        player: game.player,
        stake: game.stake,
        hazard_count: game.hazard_count,
        revealed: game.revealed.to_vec(),
        safe_found: game.safe_found,
        multiplier: game.multiplier,
        state: game.state,
        payout: game.payout,
        hazard_positions: terminal.then(|| positions(&game.hazards)),
        engine_seed: terminal.then(|| hex::encode(game.engine_seed)),
        player_seed: game.player_seed.clone(),
        nonce: game.nonce,
        created_at: game.created_at,
    }
}

fn reveal_outcome(game: &GameRecord, cell: u8, hazard: bool) -> RevealOutcome {
    RevealOutcome {
        game_id: game.id,
        cell,
        hazard,
        safe_found: game.safe_found,
        multiplier: game.multiplier,
        state: game.state,
        payout: game.payout,
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
