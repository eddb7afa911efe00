//! Typed command modules.
//!
//! Each struct implements [`ToolCommand`](crate::tool_traits::ToolCommand) for
//! one external program invocation.

pub mod disk;
pub mod encryption;
pub mod network;
pub mod stage;
