//! Near-duplicate request detection over cached dispatch results

mod index;
mod normalize;

pub use index::{DedupMatch, MatchKind, SemanticDedupIndex};
pub use normalize::{fingerprint, jaccard, normalize};
