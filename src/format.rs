use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("unsupported link item: {0}")]
    UnsupportedItem(u8),
    #[error("unknown extension link item type: {0:#04x}")]
    UnknownExtension(u8),
    #[error("unknown arithmetic operator code: {0}")]
    UnknownOperator(u8),
    #[error("invalid address space code in extension item: {0}")]
    InvalidAddressSpace(u8),
    #[error("malformed extension link item")]
    MalformedExtension,
    #[error("record cannot be encoded: {0}")]
    Unencodable(&'static str),
    #[error("unexpected end of file while reading relocatable stream")]
    UnexpectedEof,
}

/// Address space a relocatable value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressSpace {
    Absolute,
    Code,
    Data,
    Common,
}

impl AddressSpace {
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Absolute,
            0b01 => Self::Code,
            0b10 => Self::Data,
            _ => Self::Common,
        }
    }

    #[must_use]
    pub fn to_bits(self) -> u8 {
        match self {
            Self::Absolute => 0b00,
            Self::Code => 0b01,
            Self::Data => 0b10,
            Self::Common => 0b11,
        }
    }

    #[must_use]
    pub fn is_relocatable(self) -> bool {
        !matches!(self, Self::Absolute)
    }
}

pub mod rel;
