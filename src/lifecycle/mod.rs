//! Process lifecycle: shutdown signalling and hardware teardown

mod shutdown;
mod teardown;

pub use shutdown::ShutdownSignal;
pub use teardown::teardown;
