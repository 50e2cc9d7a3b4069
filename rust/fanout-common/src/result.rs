//! Crate-wide result alias and the check behind [`verify_arg!`](crate::verify_arg).

use crate::error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `Ok(())` if `holds`, otherwise `InvalidArgument` naming `name` and the
/// violated `condition`.
#[inline]
pub fn check_arg(holds: bool, name: &str, condition: &str) -> Result<()> {
    if holds {
        return Ok(());
    }
    Err(argument_error(name, condition))
}

#[cold]
fn argument_error(name: &str, condition: &str) -> Error {
    Error::invalid_arg(name, condition)
}
