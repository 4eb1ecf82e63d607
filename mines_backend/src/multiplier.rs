// Payout multiplier tables.
//
// For a game with h hazards, the multiplier after k safe reveals is the true
// combinatorial survival odds scaled by the retention factor:
//
//   m(h, k) = (95/100) * product_{i=0..k-1} (25 - i) / (25 - h - i)
//
// Tables are precomputed once per supported hazard count so the reveal path is
// a plain lookup, and entries are exact integer constants at SCALE that can be
// audited offline. Entry 0 is always the identity multiplier, and each table is
// clamped non-decreasing (the raw single-hazard entry at one reveal would
// otherwise dip below 1.0x).

use crate::types::{GRID_SIZE, SCALE};
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

/// Hazard counts with a populated table. Any other count fails game validation.
pub const POPULATED_HAZARD_COUNTS: [u8; 4] = [1, 3, 5, 10];

const RETENTION_NUM: u32 = 95;
const RETENTION_DEN: u32 = 100;

thread_local! {
    static TABLES: Vec<(u8, Vec<u128>)> = POPULATED_HAZARD_COUNTS
        .iter()
        .map(|&hazard_count| (hazard_count, build_table(hazard_count)))
        .collect();
}

// Exact table construction. The running numerator exceeds u128 near the end of
// the ten-hazard table, so the products are carried in BigUint; every final
// entry fits u128 comfortably.
fn build_table(hazard_count: u8) -> Vec<u128> {
    let safe_total = GRID_SIZE - hazard_count as usize;
    let mut table = Vec::with_capacity(safe_total + 1);
    table.push(SCALE);

    let mut numerator = BigUint::one();
    let mut denominator = BigUint::one();
    for k in 0..safe_total {
        numerator *= (GRID_SIZE - k) as u32;
        denominator *= (safe_total - k) as u32;
        let raw = BigUint::from(SCALE) * RETENTION_NUM * &numerator
            / (&denominator * RETENTION_DEN);
        let value = raw.to_u128().unwrap_or(u128::MAX);
        table.push(value.max(table[k]));
    }

    table
}

pub fn is_tabulated(hazard_count: u8) -> bool {
    POPULATED_HAZARD_COUNTS.contains(&hazard_count)
}

/// Multiplier to pay at `safe_found` reveals, if the hazard count is tabulated
/// and the reveal count is reachable.
pub fn multiplier_for(hazard_count: u8, safe_found: u8) -> Option<u128> {
    TABLES.with(|tables| {
        tables
            .iter()
            .find(|(h, _)| *h == hazard_count)
            .and_then(|(_, table)| table.get(safe_found as usize).copied())
    })
}

/// Full table for a hazard count, for client display and audits.
pub fn table_for(hazard_count: u8) -> Option<Vec<u128>> {
    TABLES.with(|tables| {
        tables
            .iter()
            .find(|(h, _)| *h == hazard_count)
            .map(|(_, table)| table.clone())
    })
}

/// Multiplier paid when every safe cell has been revealed.
pub fn max_multiplier(hazard_count: u8) -> Option<u128> {
    table_for(hazard_count).and_then(|table| table.last().copied())
}
