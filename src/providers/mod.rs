//! Production implementations of the injected collaborators in
//! [`crate::traits`].
//!
//! Chain RPC clients live in [`crate::adapter`]; this module holds the
//! process-level services they share.

mod tokio_clock;

pub use self::tokio_clock::TokioClock;
