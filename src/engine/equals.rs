//! Exact matching on tuple equality, binned by value hash.

use super::{MatchEngine, MatchKit};
use crate::tuple::{BinKey, DescribedValue, Tuple, ValueInfo, ValueKind};
use crate::{MatchError, Result};

/// Matches tuples whose elements are all equal.
///
/// Score is 0 for a match and -1 otherwise.
#[derive(Debug, Clone)]
pub struct EqualsMatchEngine {
    arity: usize,
}

impl EqualsMatchEngine {
    pub fn new(arity: usize) -> Self {
        Self { arity }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl Default for EqualsMatchEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MatchEngine for EqualsMatchEngine {
    fn name(&self) -> &str {
        "Exact Value"
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        (1..=self.arity)
            .map(|i| {
                ValueInfo::new(format!("Matched Value {i}"), ValueKind::Any)
                    .with_description("Value for exact match")
            })
            .collect()
    }

    fn score_info(&self) -> ValueInfo {
        ValueInfo::new("Score", ValueKind::Number).with_description("Always zero for a match")
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        Vec::new()
    }

    fn set_parameter(&mut self, name: &str, _value: f64) -> Result<()> {
        Err(MatchError::UnknownParameter(name.to_string()))
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        Box::new(EqualsKit { arity: self.arity })
    }
}

struct EqualsKit {
    arity: usize,
}

impl MatchKit for EqualsKit {
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey> {
        if tuple.len() != self.arity {
            return Vec::new();
        }
        tuple.canonical_hash().map(BinKey::Hash).into_iter().collect()
    }

    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64 {
        let equal = a.len() == self.arity
            && b.len() == self.arity
            && a.iter().zip(b.iter()).all(|(x, y)| x.widened_eq(y));
        if equal { 0.0 } else { -1.0 }
    }
}
