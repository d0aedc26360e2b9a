pub mod daemon_set;
pub mod labels;

pub use daemon_set::make_daemon_set;
pub use labels::*;
