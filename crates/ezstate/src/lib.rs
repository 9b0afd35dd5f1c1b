//! ezstate
//!
//! Reader and writer for EzState (ESD) scripts: binary state machines whose
//! transition guards and command arguments are packed stack-machine
//! expressions.
//!
//! Reading goes bytes -> [`tables::RawTables`] -> [`graph::State`] list.
//! Writing walks the graph back into tables with [`pack::Repacker`], sharing
//! identical conditions and recomputing every offset.

pub mod codec;
pub mod error;
pub mod expr;
pub mod graph;
pub mod header;
pub mod names;
pub mod pack;
pub mod script;
pub mod tables;

pub use error::{Corruption, DecodeError, EncodeError};
pub use graph::{BuildOptions, Command, CommandList, Condition, Expression, State};
pub use script::EsdScript;
