use super::code::SynLabel;
use super::BinaryName;
use std::fmt;

/// Errors building or linking classes and method bodies
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    MethodCodeNotFinished {
        pending_block: Option<SynLabel>,
        unplaced_labels: Vec<SynLabel>,
    },

    /// Two blocks claim to have the same label (indicates a bug)
    DuplicateLabel(SynLabel),

    /// A jump or exception handler refers to a label that was never placed
    UnplacedLabel(SynLabel),

    /// A block falls through to a label that isn't laid out right after it
    BadFallThrough(SynLabel, SynLabel),

    /// Invalid class or member name
    BadName(String),

    /// Invalid field or method descriptor
    BadDescriptor(String),

    /// The same class was defined twice in a program
    DuplicateClass(BinaryName),

    /// A method marked neither `abstract` nor `native` has no code (or vice versa)
    MissingCode(BinaryName, String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::MethodCodeNotFinished {
                pending_block,
                unplaced_labels,
            } => write!(
                f,
                "method code not finished (open block {:?}, unplaced labels {:?})",
                pending_block, unplaced_labels
            ),
            Error::DuplicateLabel(lbl) => write!(f, "label {:?} placed twice", lbl),
            Error::UnplacedLabel(lbl) => write!(f, "label {:?} is never placed", lbl),
            Error::BadFallThrough(from, to) => {
                write!(f, "block {:?} falls through to {:?} out of order", from, to)
            }
            Error::BadName(msg) => write!(f, "bad name: {}", msg),
            Error::BadDescriptor(msg) => write!(f, "bad descriptor: {}", msg),
            Error::DuplicateClass(name) => write!(f, "class {} defined twice", name),
            Error::MissingCode(class, method) => {
                write!(f, "method {}.{} has inconsistent code", class, method)
            }
        }
    }
}

impl std::error::Error for Error {}
