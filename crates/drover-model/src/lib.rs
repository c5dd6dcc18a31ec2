//! Plain data shared by every drover crate.
//!
//! Nothing here talks to the network or spawns tasks: the types describe
//! tasks, the events derived from the coordination store, the records the
//! worker emits after an execution and the directory layout in the store.

mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;
