use serde::{Deserialize, Serialize};

/// The outcome taxonomy that flows through the pipeline/skill/interpreter
/// path. Unlike [`RuntimeError`](crate::error::RuntimeError) this is never a
/// Rust `Error` impl — it is a plain data value carried in both `Ok` and
/// `Err` positions and echoed back verbatim in control-channel responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Success,
    Failed,
    Aborted,
    Unexpected,
    Skipped,
    Escaped,
    Unknown,
}

impl StatusKind {
    /// Worst-outcome ordering used to aggregate per-robot adapter results
    /// into one combined status: `Aborted > Failed > Unexpected > Success`.
    /// `Skipped`/`Escaped`/`Unknown` never arise from adapter dispatch and
    /// rank below `Success` here since they only matter to the interpreter.
    fn severity(self) -> u8 {
        match self {
            StatusKind::Aborted => 4,
            StatusKind::Failed => 3,
            StatusKind::Unexpected => 2,
            StatusKind::Success => 1,
            StatusKind::Skipped => 0,
            StatusKind::Escaped => 0,
            StatusKind::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    None,
    SuccessfulTermination,
    ConnectionError,
    ProcessFailure,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub kind: StatusKind,
    pub reason: Reason,
    pub message: String,
}

impl Status {
    pub fn new(kind: StatusKind, reason: Reason, message: impl Into<String>) -> Self {
        Status {
            kind,
            reason,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Status::new(StatusKind::Success, Reason::SuccessfulTermination, "")
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Status::new(StatusKind::Failed, Reason::ProcessFailure, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Status::new(StatusKind::Aborted, Reason::Other, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Status::new(StatusKind::Unexpected, Reason::Other, message)
    }

    pub fn skipped() -> Self {
        Status::new(StatusKind::Skipped, Reason::None, "")
    }

    pub fn escaped() -> Self {
        Status::new(StatusKind::Escaped, Reason::None, "")
    }

    pub fn unknown() -> Self {
        Status::new(StatusKind::Unknown, Reason::None, "")
    }

    pub fn is_success(&self) -> bool {
        self.kind == StatusKind::Success
    }

    /// Folds `other` into `self` using the worst-outcome ordering, keeping
    /// the message of whichever side is more severe (ties keep `self`'s).
    pub fn fold(self, other: Status) -> Status {
        if other.kind.severity() > self.kind.severity() {
            other
        } else {
            self
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::unknown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_keeps_more_severe_outcome() {
        let ok = Status::success();
        let aborted = Status::aborted("cancelled");
        assert_eq!(ok.clone().fold(aborted.clone()).kind, StatusKind::Aborted);
        assert_eq!(aborted.fold(ok).kind, StatusKind::Aborted);
    }

    #[test]
    fn fold_prefers_failed_over_unexpected() {
        let failed = Status::failed("boom");
        let unexpected = Status::unexpected("huh");
        assert_eq!(
            unexpected.fold(failed).kind,
            StatusKind::Failed
        );
    }

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&StatusKind::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
    }
}
