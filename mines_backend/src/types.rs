use candid::{CandidType, Deserialize, Principal};
use serde::Serialize;
use std::borrow::Cow;

// =============================================================================
// CONSTANTS
// =============================================================================

pub const GRID_SIZE: usize = 25; // 5x5
pub const MIN_HAZARDS: u8 = 1;
pub const MAX_HAZARDS: u8 = 10;
pub const SCALE: u128 = 1_000_000_000_000_000_000; // 1.0x in fixed-point (18 decimals)
pub const MIN_BET: u128 = SCALE; // 1 credit
pub const MAX_BET: u128 = 10_000 * SCALE; // 10,000 credits
pub const ABANDON_TIMEOUT_NANOS: u64 = 3_600_000_000_000; // 1 hour
pub const MAX_SEED_LEN: usize = 256;
pub const MAX_ACTIVE_GAMES_PER_PLAYER: usize = 10; // DoS protection
pub const MAX_EVENT_PAGE: usize = 1_000;

// =============================================================================
// GAME STATE
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameState {
    Active,
    Completed,
    Abandoned,
}

// One record per game session. Persisted for the lifetime of the canister;
// terminal records are frozen and kept as the audit trail.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GameRecord {
    pub id: u64,
    pub player: Principal,
    pub stake: u128,
    pub hazard_count: u8,
    pub hazards: [bool; GRID_SIZE], // true = hazard; never exposed while Active
    pub revealed: [bool; GRID_SIZE], // true = revealed
    pub safe_found: u8,
    pub multiplier: u128, // fixed-point, SCALE = 1.0x
    pub state: GameState,
    pub payout: u128, // written once, at the terminal transition
    pub engine_seed: [u8; 32],
    pub player_seed: String,
    pub nonce: u64,
    pub created_at: u64,
}

impl GameRecord {
    pub fn safe_total(&self) -> u8 {
        GRID_SIZE as u8 - self.hazard_count
    }
}

/// Cell indices set in a grid mask, in ascending order.
pub fn positions(mask: &[bool; GRID_SIZE]) -> Vec<u8> {
    mask.iter()
        .enumerate()
        .filter(|(_, &set)| set)
        .map(|(i, _)| i as u8)
        .collect()
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum GameError {
    InvalidConfiguration(String),
    InsufficientFunds,
    InsufficientAuthorization,
    SeedUnavailable,
    GameNotFound,
    GameNotActive,
    NotOwner,
    CellOutOfRange,
    CellAlreadyRevealed,
    NoSafeReveals,
    InvalidClaim,
    AbandonTooEarly,
}

#[derive(CandidType, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    InsufficientFunds,
    InsufficientAuthorization,
}

impl From<LedgerError> for GameError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds => GameError::InsufficientFunds,
            LedgerError::InsufficientAuthorization => GameError::InsufficientAuthorization,
        }
    }
}

// =============================================================================
// VIEWS
// =============================================================================

// Client-facing snapshot of a game. Hazard layout and engine seed are only
// populated once the game is terminal.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct GameView {
    pub id: u64,
    pub player: Principal,
    pub stake: u128,
    pub hazard_count: u8,
    pub revealed: Vec<bool>,
    pub safe_found: u8,
    pub multiplier: u128,
    pub state: GameState,
    pub payout: u128,
    pub hazard_positions: Option<Vec<u8>>,
    pub engine_seed: Option<String>, // hex
    pub player_seed: String,
    pub nonce: u64,
    pub created_at: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct RevealOutcome {
    pub game_id: u64,
    pub cell: u8,
    pub hazard: bool,
    pub safe_found: u8,
    pub multiplier: u128,
    pub state: GameState,
    pub payout: u128,
}

// Everything needed to replicate the hazard derivation off-chain.
#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct HazardVerification {
    pub game_id: u64,
    pub engine_seed: String, // hex
    pub player_seed: String,
    pub nonce: u64,
    pub derived_positions: Vec<u8>,
    pub stored_positions: Vec<u8>,
    pub matches: bool,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct EngineConfig {
    pub grid_size: u8,
    pub min_hazards: u8,
    pub max_hazards: u8,
    pub populated_hazard_counts: Vec<u8>,
    pub min_bet: u128,
    pub max_bet: u128,
    pub multiplier_scale: u128,
    pub abandon_timeout_nanos: u64,
    pub max_seed_len: u32,
    pub max_active_games_per_player: u32,
}

// =============================================================================
// STATS, EVENTS, LEDGER STATE
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default)]
pub struct PlayerStats {
    pub total_games: u64,
    pub total_wins: u64,
    pub game_ids: Vec<u64>,
}

// Aggregate house accounting. Escrowed stakes move out at settlement; the
// difference between wagered and paid out is the house result.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default)]
pub struct HouseState {
    pub escrowed: u128,
    pub total_wagered: u128,
    pub total_paid_out: u128,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub enum GameEventKind {
    GameStarted {
        game_id: u64,
        player: Principal,
        stake: u128,
        hazard_count: u8,
    },
    CellRevealed {
        game_id: u64,
        cell: u8,
        hazard: bool,
        safe_found: u8,
        multiplier: u128,
    },
    GameCompleted {
        game_id: u64,
        won: bool,
        payout: u128,
    },
    GameAbandoned {
        game_id: u64,
    },
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct GameEvent {
    pub id: u64,
    pub timestamp: u64,
    pub kind: GameEventKind,
}

// Internal credit ledger account. Allowance follows ICRC-2 approve semantics:
// it is set, not accumulated, and is consumed by debits.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct LedgerAccount {
    pub balance: u128,
    pub allowance: u128,
}

// Engine seed pool. created_at == 0 marks an uninitialized pool.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SeedPool {
    pub seed: [u8; 32],
    pub created_at: u64,
    pub games_used: u64,
}

// =============================================================================
// STABLE STORAGE ENCODING
// =============================================================================

impl ic_stable_structures::Storable for GameRecord {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Unbounded;
}

impl ic_stable_structures::Storable for PlayerStats {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Unbounded;
}

impl ic_stable_structures::Storable for HouseState {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Bounded {
            max_size: 512,
            is_fixed_size: false,
        };
}

impl ic_stable_structures::Storable for GameEvent {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Unbounded;
}

impl ic_stable_structures::Storable for LedgerAccount {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Bounded {
            max_size: 256,
            is_fixed_size: false,
        };
}

impl ic_stable_structures::Storable for SeedPool {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap()
    }

    const BOUND: ic_stable_structures::storable::Bound =
        ic_stable_structures::storable::Bound::Bounded {
            max_size: 512,
            is_fixed_size: false,
        };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_lists_set_cells_in_order() {
        let mut mask = [false; GRID_SIZE];
        mask[3] = true;
        mask[0] = true;
        mask[24] = true;
        assert_eq!(positions(&mask), vec![0, 3, 24]);
    }

    #[test]
    fn game_record_roundtrips_through_stable_encoding() {
        use ic_stable_structures::Storable;

        let mut hazards = [false; GRID_SIZE];
        hazards[7] = true;
        let record = GameRecord {
            id: 42,
            player: Principal::anonymous(),
            stake: MAX_BET,
            hazard_count: 1,
            hazards,
            revealed: [false; GRID_SIZE],
            safe_found: 0,
            multiplier: SCALE,
            state: GameState::Active,
            payout: 0,
            engine_seed: [9u8; 32],
            player_seed: "abc".to_string(),
            nonce: 42,
            created_at: 1,
        };

        let decoded = GameRecord::from_bytes(record.to_bytes());
        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.stake, record.stake);
        assert_eq!(decoded.hazards, record.hazards);
        assert_eq!(decoded.state, GameState::Active);
        assert_eq!(decoded.engine_seed, record.engine_seed);
    }
}
