//! Transform-level errors.

use outpost_syntax::ErrorSpan;
use thiserror::Error;

/// Errors the transformer surfaces to the build.
///
/// Parse failures are deliberately absent: per the transform-skip policy
/// they are logged and the original source is returned unmodified. A
/// directive inside a synchronous function is not an error either; such a
/// function is simply not annotated.
#[derive(Error, Debug)]
pub enum TransformError {
    /// An anonymous `export default` carries the directive. There is no
    /// deterministic name to derive an id from, so the transform fails
    /// loudly rather than guessing.
    #[error("{}", .span.format_error(
        "anonymous default-exported sandbox function: give the function a name"
    ))]
    AnonymousDefaultExport { span: ErrorSpan },
}
