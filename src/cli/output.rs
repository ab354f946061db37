//! CLI output: error mapping from domain errors to the CLI surface.

use crate::error::PrivacyError;

/// Map domain errors to a one-line message, with a hint where the operator can act.
pub fn map_error(e: &PrivacyError) -> String {
    match e {
        PrivacyError::RequestNotFound(_) => format!("{} (see `dataprivacy requests list --all`)", e),
        PrivacyError::InvalidTransition { .. } => {
            format!("{} (only requests that have not started processing can be cancelled)", e)
        }
        PrivacyError::Configuration(_) => format!("{} (run `dataprivacy config validate`)", e),
        _ => e.to_string(),
    }
}
