use candid::Principal;
use mines_backend::game;
use mines_backend::ledger::{self, CreditLedger, StableLedger};
use mines_backend::multiplier;
use mines_backend::seed;
use mines_backend::types::*;

// Each test runs on its own thread, so the thread-local stable structures
// start empty; off-wasm they are backed by plain vector memory.

const POOL: [u8; 32] = [99u8; 32];

fn player(n: u8) -> Principal {
    Principal::from_slice(&[n; 29])
}

fn funded_player(n: u8, credits: u128) -> Principal {
    let p = player(n);
    ledger::mint(p, credits * SCALE);
    ledger::approve(p, credits * SCALE);
    p
}

fn hazards_for(game_id: u64, player_seed: &str, hazard_count: u8) -> [bool; GRID_SIZE] {
    let engine_seed = seed::derive_engine_seed(&POOL, game_id);
    seed::derive_hazards(&engine_seed, player_seed, hazard_count)
}

fn safe_cells(hazards: &[bool; GRID_SIZE]) -> Vec<u8> {
    (0..GRID_SIZE as u8).filter(|&c| !hazards[c as usize]).collect()
}

#[test]
fn full_round_trip_against_the_stable_ledger() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(1, 1_000);

    // Start: stake leaves the balance and allowance, escrow grows.
    let view = game::start_game(&StableLedger, p, 100 * SCALE, 3, "trip".to_string(), 10).unwrap();
    assert_eq!(view.state, GameState::Active);
    assert_eq!(ledger::balance_of(p), 900 * SCALE);
    assert_eq!(ledger::allowance_of(p), 900 * SCALE);
    assert_eq!(game::get_house_state().escrowed, 100 * SCALE);

    // One safe reveal, then cash out at table[3][1].
    let hazards = hazards_for(0, "trip", 3);
    let outcome = game::reveal_cell(&StableLedger, 0, safe_cells(&hazards)[0], p, 11).unwrap();
    assert_eq!(outcome.multiplier, multiplier::multiplier_for(3, 1).unwrap());

    let settled = game::cash_out(&StableLedger, 0, p, 12).unwrap();
    assert_eq!(settled.state, GameState::Completed);
    assert_eq!(settled.payout, 100 * 1_079_545_454_545_454_545);
    assert_eq!(ledger::balance_of(p), 900 * SCALE + settled.payout);

    // Escrow drained; the ledger holds exactly what the house books say.
    let house = game::get_house_state();
    assert_eq!(house.escrowed, 0);
    assert_eq!(house.total_wagered, 100 * SCALE);
    assert_eq!(house.total_paid_out, settled.payout);

    // Terminal view exposes the layout; verification replays it.
    let view = game::get_game(0).unwrap();
    assert_eq!(view.hazard_positions, Some(positions(&hazards)));
    assert!(game::verify_game(0).unwrap().matches);
}

#[test]
fn hazard_hit_keeps_the_stake_with_the_house() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(2, 500);

    game::start_game(&StableLedger, p, 100 * SCALE, 3, "bust".to_string(), 10).unwrap();
    let hazards = hazards_for(0, "bust", 3);

    let outcome = game::reveal_cell(&StableLedger, 0, positions(&hazards)[0], p, 11).unwrap();
    assert!(outcome.hazard);
    assert_eq!(outcome.state, GameState::Completed);
    assert_eq!(outcome.payout, 0);

    // Nothing came back; the stake stays on the house books.
    assert_eq!(ledger::balance_of(p), 400 * SCALE);
    let house = game::get_house_state();
    assert_eq!(house.escrowed, 0);
    assert_eq!(house.total_wagered, 100 * SCALE);
    assert_eq!(house.total_paid_out, 0);
}

#[test]
fn invalid_configuration_never_touches_the_ledger() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(3, 100);

    let result = game::start_game(&StableLedger, p, 10 * SCALE, 11, String::new(), 10);
    assert!(matches!(result, Err(GameError::InvalidConfiguration(_))));

    // Untabulated count inside the bounds fails the same way.
    let result = game::start_game(&StableLedger, p, 10 * SCALE, 7, String::new(), 10);
    assert!(matches!(result, Err(GameError::InvalidConfiguration(_))));

    assert_eq!(ledger::balance_of(p), 100 * SCALE);
    assert_eq!(ledger::allowance_of(p), 100 * SCALE);
    assert_eq!(game::get_house_state().total_wagered, 0);
}

#[test]
fn stake_needs_both_funds_and_allowance() {
    seed::install_pool_seed(POOL, 1);

    // Funded but nothing approved.
    let p = player(4);
    ledger::mint(p, 50 * SCALE);
    assert_eq!(
        game::start_game(&StableLedger, p, 10 * SCALE, 3, String::new(), 10).unwrap_err(),
        GameError::InsufficientAuthorization
    );

    // Approved beyond the balance.
    ledger::approve(p, 100 * SCALE);
    assert_eq!(
        game::start_game(&StableLedger, p, 60 * SCALE, 3, String::new(), 10).unwrap_err(),
        GameError::InsufficientFunds
    );

    // Remediation is external: approve and fund, then retry succeeds.
    ledger::mint(p, 10 * SCALE);
    assert!(game::start_game(&StableLedger, p, 60 * SCALE, 3, String::new(), 10).is_ok());
}

#[test]
fn abandoned_games_settle_nothing_but_stay_auditable() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(5, 500);

    let t0 = 1_000;
    game::start_game(&StableLedger, p, 100 * SCALE, 5, "stuck".to_string(), t0).unwrap();
    let hazards = hazards_for(0, "stuck", 5);
    game::reveal_cell(&StableLedger, 0, safe_cells(&hazards)[0], p, t0 + 1).unwrap();

    assert_eq!(
        game::abandon_game(0, p, t0 + ABANDON_TIMEOUT_NANOS - 1).unwrap_err(),
        GameError::AbandonTooEarly
    );

    let view = game::abandon_game(0, p, t0 + ABANDON_TIMEOUT_NANOS).unwrap();
    assert_eq!(view.state, GameState::Abandoned);
    assert_eq!(view.payout, 0);
    // Progress before the abandonment is recorded but pays nothing.
    assert_eq!(view.safe_found, 1);
    assert_eq!(ledger::balance_of(p), 400 * SCALE);

    // Abandoned games are still verifiable.
    let verification = game::verify_game(0).unwrap();
    assert!(verification.matches);
    assert_eq!(verification.player_seed, "stuck");
}

#[test]
fn concurrent_sessions_settle_independently() {
    seed::install_pool_seed(POOL, 1);
    let a = funded_player(6, 1_000);
    let b = funded_player(7, 1_000);

    game::start_game(&StableLedger, a, 100 * SCALE, 3, "a".to_string(), 10).unwrap();
    game::start_game(&StableLedger, b, 200 * SCALE, 5, "b".to_string(), 10).unwrap();
    assert_eq!(game::get_house_state().escrowed, 300 * SCALE);

    // b wins via claim while a is still live.
    let view_b = game::cash_out_with_claim(&StableLedger, 1, b, 2, 11).unwrap();
    assert_eq!(view_b.multiplier, 1_500_000_000_000_000_000);
    assert_eq!(view_b.payout, 300 * SCALE);

    // a's record and escrow share are untouched.
    let view_a = game::get_game(0).unwrap();
    assert_eq!(view_a.state, GameState::Active);
    assert_eq!(view_a.safe_found, 0);
    assert_eq!(game::get_house_state().escrowed, 100 * SCALE);

    // Cross-player operations are rejected without mutating anything.
    assert_eq!(
        game::forfeit(0, b, 12).unwrap_err(),
        GameError::NotOwner
    );
    game::forfeit(0, a, 13).unwrap();
    assert_eq!(game::get_house_state().escrowed, 0);
}

#[test]
fn claimed_tallies_are_bounded_by_the_safe_cell_count() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(8, 1_000);

    game::start_game(&StableLedger, p, 10 * SCALE, 10, String::new(), 10).unwrap();
    assert_eq!(
        game::cash_out_with_claim(&StableLedger, 0, p, 16, 11).unwrap_err(),
        GameError::InvalidClaim
    );

    // A full-clear claim pays the table maximum, same as revealing every cell.
    let view = game::cash_out_with_claim(&StableLedger, 0, p, 15, 11).unwrap();
    assert_eq!(view.multiplier, multiplier::max_multiplier(10).unwrap());
    assert_eq!(view.payout, 10 * 3_105_322 * SCALE);
}

#[test]
fn settlement_is_final_across_every_entry_point() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(9, 1_000);

    game::start_game(&StableLedger, p, 100 * SCALE, 3, "final".to_string(), 10).unwrap();
    let hazards = hazards_for(0, "final", 3);
    game::reveal_cell(&StableLedger, 0, safe_cells(&hazards)[0], p, 11).unwrap();
    game::cash_out(&StableLedger, 0, p, 12).unwrap();

    let balance_after = ledger::balance_of(p);
    let paid_after = game::get_house_state().total_paid_out;

    assert_eq!(
        game::reveal_cell(&StableLedger, 0, safe_cells(&hazards)[1], p, 13).unwrap_err(),
        GameError::GameNotActive
    );
    assert_eq!(
        game::cash_out(&StableLedger, 0, p, 13).unwrap_err(),
        GameError::GameNotActive
    );
    assert_eq!(
        game::cash_out_with_claim(&StableLedger, 0, p, 5, 13).unwrap_err(),
        GameError::GameNotActive
    );
    assert_eq!(game::forfeit(0, p, 13).unwrap_err(), GameError::GameNotActive);
    assert_eq!(
        game::abandon_game(0, p, u64::MAX).unwrap_err(),
        GameError::GameNotActive
    );

    // No repeat attempt moved a single base unit.
    assert_eq!(ledger::balance_of(p), balance_after);
    assert_eq!(game::get_house_state().total_paid_out, paid_after);
}

#[test]
fn event_log_tells_the_whole_story() {
    seed::install_pool_seed(POOL, 1);
    let p = funded_player(10, 1_000);

    game::start_game(&StableLedger, p, 100 * SCALE, 3, "log".to_string(), 10).unwrap();
    let hazards = hazards_for(0, "log", 3);
    let safe = safe_cells(&hazards);
    game::reveal_cell(&StableLedger, 0, safe[0], p, 11).unwrap();
    game::reveal_cell(&StableLedger, 0, safe[1], p, 12).unwrap();
    game::cash_out(&StableLedger, 0, p, 13).unwrap();

    let events = game::get_events(0, 100);
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[0].kind,
        GameEventKind::GameStarted { game_id: 0, hazard_count: 3, .. }
    ));
    assert!(matches!(
        events[1].kind,
        GameEventKind::CellRevealed { safe_found: 1, hazard: false, .. }
    ));
    assert!(matches!(
        events[2].kind,
        GameEventKind::CellRevealed { safe_found: 2, hazard: false, .. }
    ));
    assert!(matches!(
        events[3].kind,
        GameEventKind::GameCompleted { won: true, .. }
    ));
    // Ids and timestamps are monotone.
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.id, i as u64);
    }
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

// A ledger that records calls without holding balances, for checking the
// exact credit the engine issues at the trust-based claim boundary.
struct RecordingLedger {
    calls: std::cell::RefCell<Vec<(Principal, u128)>>,
}

impl CreditLedger for RecordingLedger {
    fn debit(&self, _player: Principal, _amount: u128) -> Result<(), LedgerError> {
        Ok(())
    }

    fn credit(&self, player: Principal, amount: u128) {
        self.calls.borrow_mut().push((player, amount));
    }
}

#[test]
fn claim_settlement_credits_exactly_the_claimed_odds() {
    seed::install_pool_seed(POOL, 1);
    let p = player(11);
    let ledger = RecordingLedger {
        calls: std::cell::RefCell::new(Vec::new()),
    };

    game::start_game(&ledger, p, 7 * SCALE, 3, "odds".to_string(), 10).unwrap();
    let view = game::cash_out_with_claim(&ledger, 0, p, 1, 11).unwrap();

    // 7 * 1.079545... truncates below the exact rational product.
    let expected = game::compute_payout(7 * SCALE, 1_079_545_454_545_454_545);
    assert_eq!(expected, 7_556_818_181_818_181_815);
    assert_eq!(view.payout, expected);
    assert_eq!(*ledger.calls.borrow(), vec![(p, expected)]);
}
