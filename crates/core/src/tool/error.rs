use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display};

use serde_json::json;

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input provided to the tool was invalid.
    InvalidInput,
    /// Error occurred while executing the tool.
    ExecutionError,
    /// A numeric argument is out of its allowed range.
    Range,
    /// A remote service the tool depends on is unreachable or failed.
    UpstreamUnavailable,
    /// The location is not a known timezone.
    UnknownTimezone,
    /// The operator is not supported.
    UnsupportedOperator,
    /// Division by zero.
    DivisionByZero,
    /// The market index is not known.
    UnknownIndex,
    /// No data matches the requested range.
    NoDataInRange,
}

impl ErrorKind {
    /// Returns the stable identifier reported back to the model.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::Range => "RangeError",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::UnknownTimezone => "UnknownTimezone",
            ErrorKind::UnsupportedOperator => "UnsupportedOperator",
            ErrorKind::DivisionByZero => "DivisionByZero",
            ErrorKind::UnknownIndex => "UnknownIndex",
            ErrorKind::NoDataInRange => "NoDataInRange",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::ExecutionError => write!(f, "Execution error"),
            ErrorKind::Range => write!(f, "Value out of range"),
            ErrorKind::UpstreamUnavailable => {
                write!(f, "Upstream service unavailable")
            }
            ErrorKind::UnknownTimezone => write!(f, "Unknown timezone"),
            ErrorKind::UnsupportedOperator => write!(f, "Unsupported operator"),
            ErrorKind::DivisionByZero => write!(f, "Division by zero"),
            ErrorKind::UnknownIndex => write!(f, "Unknown index"),
            ErrorKind::NoDataInRange => write!(f, "No data in range"),
        }
    }
}

/// Describes a tool call error.
///
/// A tool error never aborts a run. It is reported back to the model as
/// the observation of the call, see [`Error::to_observation`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

macro_rules! constructors {
    ($($(#[$meta:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $name() -> Self {
                Self::new(ErrorKind::$kind)
            }
        )*
    };
}

impl Error {
    /// Creates a new error with the given kind.
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, reason: None }
    }

    constructors! {
        /// Creates a new error with the `InvalidInput` kind.
        invalid_input => InvalidInput;
        /// Creates a new error with the `ExecutionError` kind.
        execution_error => ExecutionError;
        /// Creates a new error with the `Range` kind.
        range => Range;
        /// Creates a new error with the `UpstreamUnavailable` kind.
        upstream_unavailable => UpstreamUnavailable;
        /// Creates a new error with the `UnknownTimezone` kind.
        unknown_timezone => UnknownTimezone;
        /// Creates a new error with the `UnsupportedOperator` kind.
        unsupported_operator => UnsupportedOperator;
        /// Creates a new error with the `DivisionByZero` kind.
        division_by_zero => DivisionByZero;
        /// Creates a new error with the `UnknownIndex` kind.
        unknown_index => UnknownIndex;
        /// Creates a new error with the `NoDataInRange` kind.
        no_data_in_range => NoDataInRange;
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of the error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }

    /// Encodes the error as the observation fed back to the model.
    pub fn to_observation(&self) -> String {
        json!({
            "error": self.kind.as_str(),
            "reason": self.reason(),
        })
        .to_string()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{}: {reason}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl StdError for Error {}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_observation() {
        let err = Error::division_by_zero().with_reason("num2 is 0");
        let value: Value = serde_json::from_str(&err.to_observation()).unwrap();
        assert_eq!(value["error"], "DivisionByZero");
        assert_eq!(value["reason"], "num2 is 0");

        let err = Error::range();
        let value: Value = serde_json::from_str(&err.to_observation()).unwrap();
        assert_eq!(value["error"], "RangeError");
        assert_eq!(value["reason"], "Value out of range");
    }
}
