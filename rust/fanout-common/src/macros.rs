/// Returns early with `InvalidArgument` unless `$cond` holds.
///
/// The error carries the argument name and the condition text.
#[macro_export]
macro_rules! verify_arg {
    ($name:ident, $cond:expr) => {
        $crate::result::check_arg($cond, stringify!($name), stringify!($cond))?
    };
}
