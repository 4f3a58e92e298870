pub mod aligner;
pub mod asr;

pub use aligner::{AlignerClient, AlignerConfig};
pub use asr::{AsrClient, AsrConfig};
