pub mod config;
pub mod cover;
pub mod debounce;
pub mod entry;
pub mod error;
pub mod metadata;
pub mod playback;
pub mod prelude;
pub mod refresh;
pub mod scanner;
pub mod session;
pub mod store;
pub mod sync;
pub mod watch;

pub use config::*;
pub use entry::*;
pub use error::*;
pub use session::*;
