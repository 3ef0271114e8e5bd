//! Playback rotation
//!
//! [`PlaybackCoordinator`] is the single owner of rotation state. It runs as
//! an actor task fed by a [`CoordinatorHandle`], and [`supervise`] restarts it
//! from persisted state if it fails.

pub mod coordinator;
pub mod handle;
pub mod session;
pub mod supervisor;

pub use coordinator::{Collaborators, CoordinatorStatus, LastError, PlaybackCoordinator};
pub use handle::{Command, CoordinatorHandle};
pub use session::PlaybackSession;
pub use supervisor::{supervise, CoordinatorFactory, RestartPolicy};
