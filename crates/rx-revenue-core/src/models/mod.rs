//! Domain models for the revenue attribution engine.

mod catalog;
mod invoice;
mod master;
mod result;
mod run;
mod split_rule;
mod unmatched;

pub use catalog::*;
pub use invoice::*;
pub use master::*;
pub use result::*;
pub use run::*;
pub use split_rule::*;
pub use unmatched::*;
