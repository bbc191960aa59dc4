//! Layered packet assembly (C1) and probe/reply matching (C2).
//!
//! This crate never exposes raw byte offsets to its callers: every read or
//! write goes through a named [`field::FieldKey`], and every layer's wire
//! format lives in the static tables in [`descriptor`].

pub mod address;
pub mod checksum;
pub mod descriptor;
pub mod error;
pub mod field;
pub mod layer;
pub mod packet;
pub mod probe;

pub use address::{Address, Family};
pub use error::{PacketError, Result};
pub use field::{Field, FieldKey, FieldType, FieldValue};
pub use layer::Layer;
pub use packet::Packet;
pub use probe::{MatchingKey, Probe, Reply, ReplyClassification};
