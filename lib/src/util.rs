mod binary_format;

pub use binary_format::*;

/// Elements with a width measured in operand stack or local variable slots
///
/// `long` and `double` occupy two slots, everything else occupies one.
pub trait Width {
    fn width(&self) -> usize;
}
