//! Node identity: a stable string per process, derived from the local
//! hostname plus a seeded suffix (§3).

use rand::{Rng, RngCore, SeedableRng};

/// Build a node id from the local hostname and `random_seed`.
///
/// A `random_seed` of `0` draws the suffix from the process-global thread
/// RNG (randomized per run); any other value seeds a deterministic RNG so
/// repeated runs with the same seed reproduce the same node id.
pub fn build_node_id(random_seed: u64) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let suffix = suffix(random_seed);
    format!("{host}_{suffix}")
}

fn suffix(random_seed: u64) -> u32 {
    if random_seed == 0 {
        rand::thread_rng().gen_range(0..u32::MAX)
    } else {
        let mut rng = rand::rngs::StdRng::seed_from_u64(random_seed);
        rng.next_u32()
    }
}
