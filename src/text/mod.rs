pub mod lexicon;
pub mod section;
pub mod tokenize;

pub use tokenize::{tokenize, CanonicalToken, TokenizerConfig};
