use serde::{Deserialize, Serialize};

/// Outcome vocabulary shared by every repository and workflow operation.
///
/// Expected business outcomes are reported through this enum; only genuine
/// infrastructure failures travel as errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStatus {
    Invalid,
    Conflict,
    Created,
    Success,
    Deleted,
    Failed,
}

impl ResultStatus {
    /// HTTP status code an HTTP-facing caller must answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ResultStatus::Created => 201,
            ResultStatus::Success | ResultStatus::Deleted => 200,
            ResultStatus::Invalid => 400,
            ResultStatus::Conflict => 409,
            ResultStatus::Failed => 500,
        }
    }

    pub fn is_successful(self) -> bool {
        !matches!(
            self,
            ResultStatus::Invalid | ResultStatus::Conflict | ResultStatus::Failed
        )
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            ResultStatus::Invalid => "INVALID",
            ResultStatus::Conflict => "CONFLICT",
            ResultStatus::Created => "CREATED",
            ResultStatus::Success => "SUCCESS",
            ResultStatus::Deleted => "DELETED",
            ResultStatus::Failed => "FAILED",
        };
        f.write_str(token)
    }
}
