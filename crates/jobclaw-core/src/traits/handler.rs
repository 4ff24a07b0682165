//! Handler trait: the pluggable executor for one job type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::types::{Inputs, ResourceRequest};

/// What a handler produced on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutput {
    #[serde(default)]
    pub output: serde_json::Value,
    /// Ask a human before this job dispatches again.
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_requests: Vec<ResourceRequest>,
}

impl HandlerOutput {
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn with_approval(mut self, requests: Vec<ResourceRequest>) -> Self {
        self.requires_approval = true;
        self.approval_requests = requests;
        self
    }

    /// Approval is only raised with a flag plus a non-empty request list.
    pub fn wants_approval(&self) -> bool {
        self.requires_approval && !self.approval_requests.is_empty()
    }

    /// Interpret a plain map result: `success: false` is a logical failure,
    /// `requires_approval` + `approval_requests` raise the approval flow.
    /// Approval fields are checked first so a failing result can still ask
    /// for a resource.
    pub fn from_value(value: serde_json::Value) -> std::result::Result<Self, HandlerError> {
        let (requires_approval, approval_requests) = approval_fields(&value)?;
        if value.get("success").and_then(|s| s.as_bool()) == Some(false) {
            let message = value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("handler reported success=false")
                .to_string();
            return Err(HandlerError::Failed { message, output: value });
        }
        Ok(Self {
            output: value,
            requires_approval,
            approval_requests,
        })
    }

    /// The approval part of a failed handler's output. Malformed request
    /// lists are dropped since the run already failed.
    pub fn from_failure(output: serde_json::Value) -> Self {
        match approval_fields(&output) {
            Ok((requires_approval, approval_requests)) => Self {
                output,
                requires_approval,
                approval_requests,
            },
            Err(e) => {
                tracing::warn!("⚠️ Ignoring approval fields on failed output: {e}");
                Self::new(output)
            }
        }
    }
}

fn approval_fields(
    value: &serde_json::Value,
) -> std::result::Result<(bool, Vec<ResourceRequest>), HandlerError> {
    let requires_approval = value
        .get("requires_approval")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let approval_requests = value
        .get("approval_requests")
        .cloned()
        .map(serde_json::from_value::<Vec<ResourceRequest>>)
        .transpose()
        .map_err(|e| HandlerError::exception(format!("invalid approval_requests: {e}")))?
        .unwrap_or_default();
    Ok((requires_approval, approval_requests))
}

/// Why a handler did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The handler ran and explicitly reported failure.
    #[error("{message}")]
    Failed {
        message: String,
        output: serde_json::Value,
    },
    /// The handler blew up; `trace` carries whatever context it had.
    #[error("{message}")]
    Exception {
        message: String,
        trace: Option<String>,
    },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
            output: serde_json::Value::Null,
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        HandlerError::Exception {
            message: message.into(),
            trace: None,
        }
    }
}

impl From<crate::traits::ToolError> for HandlerError {
    fn from(e: crate::traits::ToolError) -> Self {
        HandlerError::exception(e.to_string())
    }
}

/// Executes jobs of one type.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Job type this handler serves.
    fn job_type(&self) -> &str;

    /// Input keys that must be present at save time.
    fn required_inputs(&self) -> &[&str] {
        &[]
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        inputs: &Inputs,
    ) -> std::result::Result<HandlerOutput, HandlerError>;
}

/// Checks a job's inputs against whatever the handler for its type declares.
pub trait InputValidator: Send + Sync {
    fn validate_inputs(&self, job_type: &str, inputs: &Inputs) -> Result<()>;
}
