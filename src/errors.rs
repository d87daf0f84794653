use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

#[derive(Debug)]
pub enum GrappaError {
    /// A fee table does not have the expected number of rows
    FeesDimension { table: &'static str, expected: usize, found: usize },

    /// An emission row is not as wide as the symbol code requires
    EmissionWidth { position: usize, expected: usize, found: usize },

    /// A reconstructed path carries a position without a valid event
    InvalidPathEvent { position: usize },

    /// Error variant when we couldn't read a fee file
    FileReadError { source: io::Error },

    /// Error variant when a fee file could not be parsed
    ParseError { source: serde_json::Error },
}

impl Error for GrappaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            Self::FileReadError { ref source } => Some(source),
            Self::ParseError { ref source } => Some(source),
            _ => None
        }
    }
}

impl From<io::Error> for GrappaError {
    fn from(value: io::Error) -> Self {
        Self::FileReadError {
            source: value
        }
    }
}

impl From<serde_json::Error> for GrappaError {
    fn from(value: serde_json::Error) -> Self {
        Self::ParseError {
            source: value
        }
    }
}

impl Display for GrappaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::FeesDimension { table, expected, found } =>
                write!(f, "The {table} table has {found} rows, expected {expected}!"),
            Self::EmissionWidth { position, expected, found } =>
                write!(f, "The emission row at position {position} has {found} columns, expected {expected}!"),
            Self::InvalidPathEvent { position } =>
                write!(f, "The path carries no valid event at position {position}!"),
            Self::FileReadError { source: _ } =>
                write!(f, "Could not read the fee file!"),
            Self::ParseError { source: _ } =>
                write!(f, "Could not parse the fee file!"),
        }
    }
}
