#![allow(dead_code)]

use proptest::prelude::*;

/// One submission in an arrival schedule: which key, and how long to wait before
/// submitting it
#[derive(Debug, Clone)]
pub struct Arrival {
    pub key_index: usize,
    pub delay_ms: u64,
}

/// Strategy for scale set names
pub fn scale_set_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,11}"
}

/// Strategy for a small set of distinct group keys
pub fn key_set_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(scale_set_strategy(), 1..4).prop_map(|keys| keys.into_iter().collect())
}

/// Strategy for arrival schedules whose gaps straddle the quiet period used by the
/// property tests, so both rearms and fresh windows occur
pub fn arrival_schedule_strategy(key_count: usize) -> impl Strategy<Value = Vec<Arrival>> {
    prop::collection::vec(
        (0..key_count, prop_oneof![3 => 0u64..5, 1 => 20u64..40]).prop_map(|(key_index, delay_ms)| {
            Arrival {
                key_index,
                delay_ms,
            }
        }),
        1..24,
    )
}

/// Keys plus an arrival schedule over them
pub fn keyed_schedule_strategy() -> impl Strategy<Value = (Vec<String>, Vec<Arrival>)> {
    key_set_strategy().prop_flat_map(|keys| {
        let count = keys.len();
        (Just(keys), arrival_schedule_strategy(count))
    })
}
