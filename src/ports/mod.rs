//! Port traits defining external boundaries.
//!
//! Each trait represents a boundary between the engine core and an external
//! system (time, ids, filesystem, notification delivery). Implementations
//! live in `src/adapters/`.

pub mod clock;
pub mod filesystem;
pub mod id_gen;
pub mod notifier;

pub use clock::Clock;
pub use filesystem::FileSystem;
pub use id_gen::IdGenerator;
pub use notifier::{Channel, Notification, Notifier, NotifyFuture};
