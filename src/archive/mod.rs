//! Daily archive of probe outcomes and the window metrics computed from it.

mod daily;
mod recent;
mod service;
mod window;

pub use daily::*;
pub use recent::*;
pub use service::*;
pub use window::*;
