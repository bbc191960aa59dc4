use crate::address::Address;
use std::fmt;

/// The name of a field exposed by a [`crate::descriptor::LayerDescriptor`].
///
/// A thin wrapper over a static string so callers never need to know the
/// byte offset a field lives at; only [`crate::descriptor`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey(pub &'static str);

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type tag of a [`FieldValue`], used to validate `set_field` callers
/// against a field's declared type without exposing byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U4,
    U8,
    U16,
    U32,
    V4,
    V6,
    Bytes,
    String,
}

/// A named, typed value written into or read out of a [`crate::packet::Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U4(u8),
    U8(u8),
    U16(u16),
    U32(u32),
    V4([u8; 4]),
    V6([u8; 16]),
    Bytes(Vec<u8>),
    String(String),
}

impl FieldValue {
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::U4(_) => FieldType::U4,
            Self::U8(_) => FieldType::U8,
            Self::U16(_) => FieldType::U16,
            Self::U32(_) => FieldType::U32,
            Self::V4(_) => FieldType::V4,
            Self::V6(_) => FieldType::V6,
            Self::Bytes(_) => FieldType::Bytes,
            Self::String(_) => FieldType::String,
        }
    }

    /// View this value as an unsigned integer, network byte order semantics
    /// applied by the caller at write time.
    #[must_use]
    pub const fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::U4(v) | Self::U8(v) => Some(v as u32),
            Self::U16(v) => Some(v as u32),
            Self::U32(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Address> for FieldValue {
    fn from(addr: Address) -> Self {
        match addr {
            Address::V4(b) => Self::V4(b),
            Address::V6(b) => Self::V6(b),
        }
    }
}

/// A key/value pair accepted by [`crate::packet::Packet::set_field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: FieldKey,
    pub value: FieldValue,
}

impl Field {
    #[must_use]
    pub const fn new(key: FieldKey, value: FieldValue) -> Self {
        Self { key, value }
    }
}
