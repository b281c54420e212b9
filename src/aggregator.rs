//! `AttentionAggregator`: reduces a per-step attention payload to a
//! per-active-token vector.

use crate::error::AggregatorError;
use crate::external::AttentionPayload;

/// Stateless reducer, kept independent of token identities so it can be
/// swapped without touching [`crate::scorer::BrightnessScorer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AttentionAggregator;

impl AttentionAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Returns `a` where `a[i]` is the aggregated attention mass the
    /// just-generated token placed on the `i`-th currently-live token.
    /// Does not normalize: the scorer expects a softmax approximation, not
    /// a true probability distribution.
    pub fn aggregate(&self, payload: &AttentionPayload) -> Result<Vec<f32>, AggregatorError> {
        match payload {
            AttentionPayload::PreAggregated(v) => {
                if v.is_empty() {
                    return Err(AggregatorError::EmptyContext);
                }
                Ok(v.clone())
            }
            AttentionPayload::Raw {
                tensor,
                layers,
                heads,
                context_len,
            } => {
                if *context_len == 0 {
                    return Err(AggregatorError::EmptyContext);
                }
                let expected = layers
                    .checked_mul(*heads)
                    .and_then(|lh| lh.checked_mul(*context_len));
                if expected != Some(tensor.len()) {
                    return Err(AggregatorError::InvalidAttentionShape {
                        layers: *layers,
                        heads: *heads,
                        context_len: *context_len,
                        buffer_len: tensor.len(),
                    });
                }

                let lh = (layers * heads) as f32;
                let mut out = vec![0.0f32; *context_len];
                // tensor is [L, H, C] row-major: index = (l*H + h)*C + i
                for l in 0..*layers {
                    for h in 0..*heads {
                        let base = (l * heads + h) * context_len;
                        for (i, slot) in out.iter_mut().enumerate() {
                            *slot += tensor[base + i];
                        }
                    }
                }
                for slot in out.iter_mut() {
                    *slot /= lh;
                }
                Ok(out)
            }
        }
    }
}
