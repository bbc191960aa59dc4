use crate::field::{FieldKey, FieldType};
use crate::layer::Layer;
use thiserror::Error;

/// Errors raised while assembling or mutating a [`crate::packet::Packet`].
///
/// All of these correspond to `PROTOCOL_UNSUPPORTED` at the `flowtrace-core`
/// boundary: a packet-assembly failure is fatal to the probe it belongs to,
/// never to the algorithm driving it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("unknown protocol layer: {0}")]
    UnknownLayer(String),

    #[error("layer {upper} cannot be stacked above {lower}")]
    IncompatibleLayers { lower: Layer, upper: Layer },

    #[error("unknown field: {0}")]
    UnknownField(FieldKey),

    #[error("field {key} expects type {expected:?}, got {actual:?}")]
    TypeMismatch {
        key: FieldKey,
        expected: FieldType,
        actual: FieldType,
    },

    #[error("packet has no layers; call set_protocols first")]
    NoLayers,

    #[error("{0} layers given, at most {1} are supported")]
    TooManyLayers(usize, usize),

    #[error("packet is dirty: finalize() must be called before send")]
    NotFinalized,

    #[error("flow id can only be set on a packet carrying a UDP or TCP layer")]
    NoFlowCarryingLayer,
}

pub type Result<T> = std::result::Result<T, PacketError>;
