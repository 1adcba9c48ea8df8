//! Question selection and answer normalization shared by the quiz runner
//! and the REST handlers.

pub mod normalizer;
pub mod selection;

pub use normalizer::{NormalizeMode, NormalizedAnswer, answers_match, normalize_answer};
pub use selection::{DifficultySpec, SampleMode, SelectionSpec, select};
