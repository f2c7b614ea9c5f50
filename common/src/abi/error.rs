use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of input while reading {0}")]
    Eof(&'static str),
    #[error("unknown type '{0}' in ABI")]
    UnknownType(String),
    #[error("unknown variant index {index} for variant '{variant}'")]
    UnknownVariantIndex { variant: String, index: u32 },
    #[error("unsupported table delta '{0}'")]
    UnsupportedDelta(String),
    #[error("decoded {consumed} bytes out of {total} for type '{type_name}'")]
    TrailingBytes {
        type_name: String,
        consumed: usize,
        total: usize,
    },
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("varint longer than 5 bytes")]
    VarintOverflow,
    #[error("invalid ABI document: {0}")]
    InvalidAbi(String),
    #[error("typedef cycle detected at '{0}'")]
    TypedefCycle(String),
}
