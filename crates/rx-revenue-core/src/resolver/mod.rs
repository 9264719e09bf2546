//! Name resolution for invoices.
//!
//! Pipeline: Normalization → Identity Coding → Product Matching
//!
//! - `normalizer`: core/variant product names and exact product keys
//! - `identity`: facility name → fixed-width identity code
//! - `similarity`: 0..=100 string similarity measures
//! - `matcher`: cached catalog index and the matching cascade

mod identity;
mod matcher;
mod normalizer;
mod similarity;

pub use identity::*;
pub use matcher::*;
pub use normalizer::*;
pub use similarity::*;
