//! Chain-level pieces that sit next to the forest: the hard-coded tip tables and
//! the inserter that moves ready tips into storage.

pub mod hard_tips;
pub mod inserter;

pub use hard_tips::{HardTips, decode_table, encode_table};
pub use inserter::HeaderInserter;
