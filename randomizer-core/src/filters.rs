//! Composable predicates over species candidates. Steps that randomize
//! species take one filter; several constraints combine through `All`.

use std::collections::HashSet;

use crate::tables::SpeciesRecord;

#[derive(Debug, Clone)]
pub enum Filter {
    /// True iff the candidate's id is not in the set.
    NotInSet(HashSet<u16>),
    /// True iff the candidate's BST is within the given relative factor of
    /// the reference species' BST.
    BstWithinFactor(f64),
    /// Logical AND, short-circuiting. Empty list is always true.
    All(Vec<Filter>),
}

impl Filter {
    pub fn allows(&self, candidate: &SpeciesRecord, reference: &SpeciesRecord) -> bool {
        match self {
            Filter::NotInSet(excluded) => !excluded.contains(&candidate.id),
            Filter::BstWithinFactor(factor) => {
                let reference_bst = reference.bst();
                if reference_bst == 0 {
                    return false;
                }
                let delta = (candidate.bst() as f64 - reference_bst as f64).abs();
                delta / reference_bst as f64 <= *factor
            }
            Filter::All(parts) => parts.iter().all(|f| f.allows(candidate, reference)),
        }
    }
}
