use serde_json::Value;
use thiserror::Error;

use crate::jobs::JobRequest;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmissionValidationError {
    #[error("submission must be a JSON object")]
    NotAnObject,
    #[error("field '{0}' must be a string")]
    NotAString(&'static str),
}

/// Checks the shape of a submission. A missing `url` passes here and is
/// rejected by the job manager.
pub fn validate_submission(value: Value) -> Result<JobRequest, SubmissionValidationError> {
    let Value::Object(object) = value else {
        return Err(SubmissionValidationError::NotAnObject);
    };

    Ok(JobRequest {
        url: string_field(&object, "url")?,
        user_agent: string_field(&object, "user-agent")?,
    })
}

fn string_field(
    object: &serde_json::Map<String, Value>,
    name: &'static str,
) -> Result<Option<String>, SubmissionValidationError> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(SubmissionValidationError::NotAString(name)),
    }
}
