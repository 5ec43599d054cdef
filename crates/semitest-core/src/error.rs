//! Error types for test-step orchestration.
//!
//! Two layers of error exist:
//!
//! - **`DriverError`**: what a channel-family collaborator reports when a
//!   hardware call fails. It may carry a native numeric code.
//! - **`TestError`**: the orchestration taxonomy. Validation variants are raised
//!   before any hardware call; `FamilyOperationFailure` wraps a `DriverError`
//!   together with the family whose branch failed; `Aggregate` is what a
//!   lower-level fan-out produces when it keeps every failure.
//!
//! At the step boundary, [`StepFailure::from_error`] collapses a `TestError`
//! into one representative failure plus a numeric code for the host sequencer.

use crate::family::ChannelFamily;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Code reported for argument/validation failures (`E_INVALIDARG`).
pub const INVALID_ARGUMENT_CODE: i32 = -2_147_024_809;

/// Code reported when nothing more specific is known.
pub const GENERAL_FAILURE_CODE: i32 = -2_146_233_088;

#[allow(clippy::unwrap_used)]
static ERROR_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Error code:\s*(-\d+)").unwrap());

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Configuration,
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a channel-family collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver}' {kind} error: {message}")]
pub struct DriverError {
    pub driver: String,
    pub kind: DriverErrorKind,
    pub message: String,
    /// Native code reported by the driver, if any.
    pub code: Option<i32>,
}

impl DriverError {
    pub fn new(driver: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Attach a native driver code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

/// Result alias for channel-family collaborator calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

// =============================================================================
// Orchestration Errors
// =============================================================================

/// Result alias for orchestration operations.
pub type TestResult<T> = std::result::Result<T, TestError>;

/// Orchestration failure.
///
/// Every failure is fatal to the current step invocation. Nothing in this
/// crate retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TestError {
    /// The pin/pin-group request was empty.
    #[error("No pins or pin groups were specified")]
    NoPinsSpecified,

    /// A requested name is not claimed by any channel family.
    #[error("Pin or pin group '{0}' is not mapped to any supported channel family")]
    UnresolvedPin(String),

    /// A per-pin-group array violated the 0/1/N broadcast rule.
    #[error(
        "Parameter '{name}' has {actual} elements; expected 0, 1, or {expected} (one per pin or pin group)"
    )]
    ParameterArraySizeMismatch {
        name: String,
        actual: usize,
        expected: usize,
    },

    /// A parameter that has no default was supplied empty.
    #[error("Parameter '{0}' requires at least one value")]
    MissingParameter(String),

    /// The context has no controller for a family the request resolved to.
    #[error("No controller is registered for channel family '{0}'")]
    FamilyNotAvailable(ChannelFamily),

    /// A per-family branch's driver call failed.
    #[error("{family} operation failed: {source}")]
    FamilyOperationFailure {
        family: ChannelFamily,
        #[source]
        source: DriverError,
    },

    /// A fan-out branch panicked or was cancelled before producing a result.
    #[error("Branch '{branch}' did not complete: {message}")]
    BranchPanicked { branch: String, message: String },

    /// A sequential sweep failed partway through.
    #[error("Sweep aborted at pin {pin_index} ('{pin}'): {source}")]
    SweepAborted {
        pin_index: usize,
        pin: String,
        #[source]
        source: Box<TestError>,
    },

    /// Every failure of a fan-out, in declaration order.
    #[error("{} concurrent operations failed", .0.len())]
    Aggregate(Vec<TestError>),
}

impl TestError {
    /// Wrap a driver failure with the family that raised it.
    pub fn family(family: ChannelFamily, source: DriverError) -> Self {
        Self::FamilyOperationFailure { family, source }
    }

    /// Expand nested `Aggregate` failures into their leaves, preserving order.
    pub fn flatten(self) -> Vec<TestError> {
        match self {
            TestError::Aggregate(inner) => inner.into_iter().flat_map(TestError::flatten).collect(),
            leaf => vec![leaf],
        }
    }

    /// Whether the failure happened before any hardware was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TestError::NoPinsSpecified
                | TestError::UnresolvedPin(_)
                | TestError::ParameterArraySizeMismatch { .. }
                | TestError::MissingParameter(_)
                | TestError::FamilyNotAvailable(_)
        )
    }

    /// Code this failure carries without looking at its message text.
    pub fn native_code(&self) -> i32 {
        match self {
            TestError::NoPinsSpecified
            | TestError::UnresolvedPin(_)
            | TestError::ParameterArraySizeMismatch { .. }
            | TestError::MissingParameter(_) => INVALID_ARGUMENT_CODE,
            TestError::FamilyOperationFailure { source, .. } => {
                source.code.unwrap_or(GENERAL_FAILURE_CODE)
            }
            TestError::SweepAborted { source, .. } => source.native_code(),
            TestError::Aggregate(inner) => inner
                .first()
                .map(TestError::native_code)
                .unwrap_or(GENERAL_FAILURE_CODE),
            TestError::FamilyNotAvailable(_) | TestError::BranchPanicked { .. } => {
                GENERAL_FAILURE_CODE
            }
        }
    }
}

// =============================================================================
// Step boundary translation
// =============================================================================

/// The single failure surfaced to a test sequencer for a failed step.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Step failed (code {code}): {source}")]
pub struct StepFailure {
    pub code: i32,
    #[source]
    pub source: TestError,
}

impl StepFailure {
    /// Flatten, keep the first leaf, and resolve its numeric code.
    ///
    /// The code comes from an `Error code: <negative integer>` fragment in the
    /// leaf's message when exactly one is present, otherwise from
    /// [`TestError::native_code`].
    pub fn from_error(error: TestError) -> Self {
        let leaf = match error.flatten().into_iter().next() {
            Some(leaf) => leaf,
            None => TestError::Aggregate(Vec::new()),
        };
        let code = parse_error_code(&leaf.to_string()).unwrap_or_else(|| leaf.native_code());
        Self { code, source: leaf }
    }
}

impl From<TestError> for StepFailure {
    fn from(error: TestError) -> Self {
        Self::from_error(error)
    }
}

/// Extract the code from an `Error code: -NNNN` fragment.
///
/// Returns `None` when the fragment is absent, ambiguous (more than one
/// match), or does not fit an `i32`.
pub fn parse_error_code(message: &str) -> Option<i32> {
    let mut captures = ERROR_CODE_PATTERN.captures_iter(message);
    let first = captures.next()?;
    if captures.next().is_some() {
        return None;
    }
    first.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw(message: &str) -> DriverError {
        DriverError::new("mock_smu", DriverErrorKind::Hardware, message)
    }

    #[test]
    fn parses_single_error_code() {
        assert_eq!(
            parse_error_code("Output overranged. Error code: -1074118644"),
            Some(-1_074_118_644)
        );
        assert_eq!(parse_error_code("error CODE:   -17"), Some(-17));
    }

    #[test]
    fn ignores_missing_or_ambiguous_codes() {
        assert_eq!(parse_error_code("something broke"), None);
        assert_eq!(parse_error_code("Error code: 17"), None);
        assert_eq!(parse_error_code("Error code: -1 and Error code: -2"), None);
    }

    #[test]
    fn flatten_preserves_declaration_order() {
        let nested = TestError::Aggregate(vec![
            TestError::Aggregate(vec![
                TestError::family(ChannelFamily::SourceMeasure, hw("a")),
                TestError::family(ChannelFamily::DigitalPpmu, hw("b")),
            ]),
            TestError::NoPinsSpecified,
        ]);
        let leaves = nested.flatten();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0], TestError::family(ChannelFamily::SourceMeasure, hw("a")));
        assert_eq!(leaves[2], TestError::NoPinsSpecified);
    }

    #[test]
    fn step_failure_prefers_code_in_message() {
        let error = TestError::family(
            ChannelFamily::DigitalPpmu,
            hw("Voltage clamp tripped. Error code: -1074097794").with_code(-1),
        );
        let failure = StepFailure::from_error(error);
        assert_eq!(failure.code, -1_074_097_794);
    }

    #[test]
    fn step_failure_falls_back_to_native_code() {
        let error = TestError::Aggregate(vec![
            TestError::family(ChannelFamily::SourceMeasure, hw("overcurrent").with_code(-200)),
            TestError::family(ChannelFamily::DigitalPpmu, hw("other")),
        ]);
        let failure = StepFailure::from_error(error);
        assert_eq!(failure.code, -200);
        assert!(matches!(
            failure.source,
            TestError::FamilyOperationFailure {
                family: ChannelFamily::SourceMeasure,
                ..
            }
        ));
    }

    #[test]
    fn validation_errors_use_invalid_argument_code() {
        let failure = StepFailure::from_error(TestError::NoPinsSpecified);
        assert_eq!(failure.code, INVALID_ARGUMENT_CODE);
        assert!(failure.source.is_validation());
    }
}
