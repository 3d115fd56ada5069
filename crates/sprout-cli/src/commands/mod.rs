pub mod common;
pub mod device;
pub mod log;
pub mod queue;
pub mod sync;
pub mod watch;
