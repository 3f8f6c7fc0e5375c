pub mod command;
pub mod lock;
pub mod state;
pub mod store;

pub use command::{Command, Response};
pub use lock::{KeepAliveGroup, LockHandle};
pub use state::CoordState;
pub use store::{acquire_lock, Change, CoordinationStore, RaftCoordStore};
