use derive_more::Display;

/// An error that means generated output is unusable. These are never
/// degraded into a fallback, regardless of the configured failure policy.
/// They're returned wrapped in [anyhow::Error]; use
/// `error.downcast_ref::<FatalValidation>()` to tell them apart from other
/// failures.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum FatalValidation {
    #[display(fmt = "elevation pipeline has no steps")]
    EmptyPipeline,

    #[display(fmt = "{} grid contains non-finite values", _0)]
    NonFinite(String),

    #[display(
        fmt = "{} grid is {}x{}, expected {}x{}",
        layer,
        "actual.0",
        "actual.1",
        "expected.0",
        "expected.1"
    )]
    ShapeMismatch {
        layer: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl std::error::Error for FatalValidation {}
