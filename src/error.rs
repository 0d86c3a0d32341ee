use thiserror::Error;

/// Conditions the reconciliation core reports to its caller. The core never
/// logs or prints; surfacing these is the CLI layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A forbidden keyword was found, so the affected query cannot be
    /// processed further.
    #[error("query '{alias}' is blocked: contains forbidden keyword '{keyword}'")]
    Blocked { alias: String, keyword: String },
}
