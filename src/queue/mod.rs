//! Remote job queue: deduplicated, priority-ordered, bounded in size and age.

mod health;
mod job;
mod normalize;
mod remote;

pub use health::*;
pub use job::*;
pub use normalize::*;
pub use remote::*;
