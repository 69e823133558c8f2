//! Real-time messaging core: live sessions, chat rooms, the ordered message
//! pipeline, presence and typing, and seen-state reconciliation with the
//! pull path.

pub mod connection;
pub mod dispatcher;
pub mod locks;
pub mod pipeline;
pub mod presence;
pub mod reconcile;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod store;

pub use dispatcher::Dispatcher;
pub use session::SessionHandle;
pub use store::StoreHandle;
