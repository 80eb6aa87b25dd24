//! Deterministic PRNG for process seeds and random recipe outputs.
//!
//! Uses SplitMix64: 8 bytes of state, no dependencies, and the same sequence
//! on every platform, so a saved machine replays the same draws after a
//! restore.

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// A generator for one named stream of a process: `seed` mixed with a
    /// stable hash of `label`. Equal inputs give equal sequences.
    pub fn for_stream(seed: u64, label: &str) -> Self {
        Self::new(seed ^ fnv1a(label.as_bytes()))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform in `0..bound`; `0` when `bound` is `0`.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        // Multiply-shift keeps the bias below 2^-32 for u32-sized bounds.
        ((self.next_u64() as u128 * bound as u128) >> 64) as u64
    }

    /// Draw up to `picks` distinct indices from `weights`, each with
    /// probability proportional to its weight among those not yet drawn.
    /// Zero-weight entries are never drawn.
    pub fn weighted_distinct(&mut self, weights: &[u32], picks: usize) -> Vec<usize> {
        let mut remaining: Vec<(usize, u64)> = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .map(|(i, w)| (i, u64::from(*w)))
            .collect();
        let mut drawn = Vec::with_capacity(picks.min(remaining.len()));
        while drawn.len() < picks && !remaining.is_empty() {
            let total: u64 = remaining.iter().map(|(_, w)| w).sum();
            let mut roll = self.below(total);
            let mut chosen = remaining.len() - 1;
            for (pos, (_, weight)) in remaining.iter().enumerate() {
                if roll < *weight {
                    chosen = pos;
                    break;
                }
                roll -= weight;
            }
            drawn.push(remaining.remove(chosen).0);
        }
        drawn
    }

    /// Internal state, for snapshots.
    pub fn state(&self) -> u64 {
        self.state
    }
}

/// 64-bit FNV-1a. `std`'s hasher is not stable across releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xCBF2_9CE4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01B3)
    })
}
