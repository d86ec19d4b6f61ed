pub mod event;
pub mod record;
pub mod session;

pub use event::{ChangeEvent, ChangeKind};
pub use record::{AccessGuard, PlayerRecord, SharedRecord};
pub use session::SessionWindow;
