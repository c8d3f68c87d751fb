use thiserror::Error;

/// Failures raised while reading, rewriting or re-emitting a single class file.
///
/// Orchestration code wraps these into `anyhow::Error` with the entry path,
/// class name and method attached.
#[derive(Error, Debug)]
pub(crate) enum DesugarError {
    #[error("unexpected end of input at offset {offset} (needed {wanted} more bytes)")]
    Truncated { offset: usize, wanted: usize },

    #[error("wrong magic: got {0:#x}, expected 0xcafebabe")]
    BadMagic(u32),

    #[error("{0} trailing bytes after the end of the structure")]
    TrailingBytes(usize),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: usize },

    #[error("constant pool index {index} is not a valid {expected} entry")]
    BadConstant { index: u16, expected: &'static str },

    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("branch at offset {from} targets offset {to}, outside of the method body")]
    BranchOutsideBody { from: usize, to: i64 },

    #[error("malformed switch instruction at offset {0}")]
    BadSwitch(usize),

    #[error("offset {0} does not start an instruction")]
    BadOffset(usize),

    #[error("invalid method descriptor {descriptor:?}: {reason}")]
    BadDescriptor { descriptor: String, reason: String },

    #[error("relocated branch from offset {from} to offset {to} does not fit its encoding")]
    BranchOutOfRange { from: usize, to: usize },

    #[error("method body of {0} bytes exceeds the 65535 byte limit")]
    CodeTooLarge(usize),

    #[error("reserved stack map frame type {0}")]
    BadStackMapFrame(u8),

    #[error("unknown verification type tag {0}")]
    BadVerificationType(u8),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T> = std::result::Result<T, DesugarError>;
