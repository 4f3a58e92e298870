pub mod dp_segment;
pub mod edit_distance;
pub mod lis;
pub mod ngram;

pub use dp_segment::plan_windows;
pub use edit_distance::{cer, wer};
pub use lis::longest_increasing_subsequence;
pub use ngram::mine_anchors;
