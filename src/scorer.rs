//! `BrightnessScorer`: magnitude-voting brightness update.

use tracing::debug;

/// A read-only view of one live token, in the same order as the aggregated
/// attention vector `a` (`A[0]` is the BOS-equivalent attention sink).
#[derive(Debug, Clone, Copy)]
pub struct LiveTokenView {
    pub position: u64,
    pub turn_id: u64,
    pub brightness: i64,
}

/// Stateless magnitude-voting scorer.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrightnessScorer;

impl BrightnessScorer {
    pub fn new() -> Self {
        Self
    }

    /// Compute brightness deltas for one streamed token. Returns
    /// `(position, new_brightness)` pairs to apply via
    /// [`crate::store::TokenStore::update_brightness_batch`]; never touches
    /// the store directly so the hot path stays allocation-light and
    /// testable in isolation.
    ///
    /// Never fails: degenerate input (too few live tokens, non-finite or
    /// non-positive threshold) is a documented no-op, not an error.
    pub fn compute_updates(
        &self,
        a: &[f32],
        live: &[LiveTokenView],
        current_turn_id: u64,
        b_cap: i64,
    ) -> Vec<(u64, i64)> {
        let c = live.len();
        if c < 2 || a.len() != c {
            return Vec::new();
        }

        let bos = a[0] as f64;
        let theta = (1.0 - bos) / (c as f64 - 1.0);
        if !(theta > 0.0) || !theta.is_finite() {
            debug!(theta, bos, "magnitude voting skipped: degenerate threshold");
            return Vec::new();
        }

        let mut updates = Vec::with_capacity(c - 1);
        for (i, tok) in live.iter().enumerate().skip(1) {
            if tok.turn_id == current_turn_id {
                continue;
            }
            let ai = a[i] as f64;
            let new_brightness = if ai > theta {
                let bonus = (ai / theta).floor() as i64;
                (tok.brightness + bonus).min(b_cap)
            } else {
                tok.brightness - 1
            };
            updates.push((tok.position, new_brightness));
        }
        updates
    }
}
