pub mod hlr;

pub use hlr::{HalfLifeState, ReviewCandidate, ReviewStatsEntry};
