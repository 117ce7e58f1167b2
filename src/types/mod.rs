//! Core types for kestrel.

pub mod generation;
pub mod turn;
pub mod usage;

pub use generation::*;
pub use turn::*;
pub use usage::*;
