use thiserror::Error;

/// Malformed structure input: unreadable files, missing chains, positions that cannot be mapped.
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("Failed to read structure file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Chain '{0}' not found in structure")]
    UnknownChain(String),

    #[error("Chain '{0}' contains no protein residues")]
    EmptyChain(String),

    #[error("Structure contains no protein residues")]
    EmptyStructure,

    #[error("Position '{0}' does not match any residue in the structure")]
    UnmappablePosition(String),

    #[error("Invalid position selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Residue index {index} out of range for structure of length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    #[error("Inconsistent structure arrays: {0}")]
    Shape(String),
}
