//! Progressive training phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A state of the progressive growing protocol.
///
/// Each block `b` is trained in a burn-in phase; blocks above 0 are first
/// blended in by a fade-in phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingPhase {
    /// Fixed-resolution training without blending.
    BurnIn {
        /// Active block.
        block: usize,
    },
    /// New block blended in via a shared alpha ramp.
    FadeIn {
        /// Block being faded in.
        block: usize,
    },
}

impl TrainingPhase {
    /// Block index of this phase.
    pub fn block(&self) -> usize {
        match self {
            Self::BurnIn { block } | Self::FadeIn { block } => *block,
        }
    }

    /// Whether this is a fade-in phase.
    pub fn is_fade_in(&self) -> bool {
        matches!(self, Self::FadeIn { .. })
    }

    /// Phase order up to and including `BurnIn(target_block)`.
    pub fn sequence(target_block: usize) -> Vec<TrainingPhase> {
        let mut phases = vec![Self::BurnIn { block: 0 }];
        for block in 1..=target_block {
            phases.push(Self::FadeIn { block });
            phases.push(Self::BurnIn { block });
        }
        phases
    }

    /// Phase following this one, or `None` once `target_block` is burnt in.
    pub fn next(&self, target_block: usize) -> Option<TrainingPhase> {
        match *self {
            Self::FadeIn { block } => Some(Self::BurnIn { block }),
            Self::BurnIn { block } if block < target_block => {
                Some(Self::FadeIn { block: block + 1 })
            }
            Self::BurnIn { .. } => None,
        }
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BurnIn { block } => write!(f, "burn-in({})", block),
            Self::FadeIn { block } => write!(f, "fade-in({})", block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_skips_fade_in_for_block_zero() {
        let phases = TrainingPhase::sequence(2);
        assert_eq!(
            phases,
            vec![
                TrainingPhase::BurnIn { block: 0 },
                TrainingPhase::FadeIn { block: 1 },
                TrainingPhase::BurnIn { block: 1 },
                TrainingPhase::FadeIn { block: 2 },
                TrainingPhase::BurnIn { block: 2 },
            ]
        );
        assert_eq!(TrainingPhase::sequence(0).len(), 1);
    }

    #[test]
    fn test_next_matches_sequence() {
        let phases = TrainingPhase::sequence(3);
        for pair in phases.windows(2) {
            assert_eq!(pair[0].next(3), Some(pair[1]));
        }
        assert_eq!(phases.last().unwrap().next(3), None);
    }

    #[test]
    fn test_serde_tagged() {
        let json = serde_json::to_string(&TrainingPhase::FadeIn { block: 2 }).unwrap();
        assert_eq!(json, r#"{"kind":"fade_in","block":2}"#);
    }
}
