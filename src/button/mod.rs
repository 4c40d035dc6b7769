//! Push-button input
//!
//! Configures the button line, debounces presses and feeds them to the
//! controller from a dedicated thread.

mod debounce;
mod watcher;

pub use watcher::{ButtonWatcher, WatcherHandle};
