//! Approval gate: human sign-off requested by a handler's output.
//!
//! At most one request per run, created atomically. A pending request
//! blocks further dispatch of its job until someone decides it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use jobclaw_core::error::{JobClawError, Result};
use jobclaw_core::traits::Store;
use jobclaw_core::types::{ApprovalRequest, ApprovalStatus, ResourceRequest, names};

use crate::events::EventLog;
use crate::keys;

pub struct ApprovalGate {
    store: Arc<dyn Store>,
    events: EventLog,
}

impl ApprovalGate {
    pub fn new(store: Arc<dyn Store>, events: EventLog) -> Self {
        Self { store, events }
    }

    /// Create the request for `run_id`, or return the existing one.
    /// The flag is `true` only when this call created it.
    pub fn create(
        &self,
        run_id: &str,
        job_id: &str,
        requests: Vec<ResourceRequest>,
    ) -> Result<(ApprovalRequest, bool)> {
        let fresh_id = uuid::Uuid::new_v4().to_string();
        let run_key = keys::approval_by_run(run_id);
        let approval_id = if self.store.set_nx(&run_key, &fresh_id)? {
            fresh_id
        } else {
            let existing_id = self.store.get(&run_key)?.ok_or_else(|| {
                JobClawError::Conflict(format!("approval index for run {run_id} vanished"))
            })?;
            if let Some(existing) = self.get(&existing_id)? {
                tracing::debug!("Approval for run {run_id} already exists ({existing_id})");
                return Ok((existing, false));
            }
            // Index written but the record never was; finish the job.
            existing_id
        };

        let request = ApprovalRequest {
            approval_id: approval_id.clone(),
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            status: ApprovalStatus::Pending,
            requests,
            created_at: Utc::now(),
            decision_by: None,
            decision_note: None,
            decided_at: None,
        };
        keys::save(self.store.as_ref(), &keys::approval(&approval_id), &request)?;
        self.store.zadd(
            keys::APPROVALS_INDEX,
            &approval_id,
            request.created_at.timestamp_millis() as f64,
        )?;
        self.store.sadd(&keys::pending_approvals(job_id), &approval_id)?;

        let resources: Vec<&str> = request.requests.iter().map(|r| r.resource.as_str()).collect();
        tracing::info!(
            "🙋 Approval requested for job '{job_id}' (run {run_id}): {}",
            resources.join(", ")
        );
        self.events.emit(
            names::APPROVAL_CREATED,
            json!({ "approval_id": approval_id, "run_id": run_id, "job_id": job_id, "resources": resources }),
        );
        Ok((request, true))
    }

    /// Approve or reject a pending request. Decisions are final.
    pub fn decide(
        &self,
        approval_id: &str,
        status: ApprovalStatus,
        actor: &str,
        note: Option<&str>,
    ) -> Result<ApprovalRequest> {
        if !status.is_decided() {
            return Err(JobClawError::invalid(
                "decision must be 'approved' or 'rejected'",
            ));
        }
        let mut request = self
            .get(approval_id)?
            .ok_or_else(|| JobClawError::NotFound(format!("approval '{approval_id}'")))?;
        if request.status.is_decided() {
            return Err(JobClawError::Conflict(format!(
                "approval '{approval_id}' already {}",
                request.status
            )));
        }

        request.status = status;
        request.decision_by = Some(actor.to_string());
        request.decision_note = note.map(str::to_string);
        request.decided_at = Some(Utc::now());
        keys::save(self.store.as_ref(), &keys::approval(approval_id), &request)?;
        self.store
            .srem(&keys::pending_approvals(&request.job_id), approval_id)?;

        tracing::info!(
            "✅ Approval {approval_id} for '{}' {status} by {actor}",
            request.job_id
        );
        self.events.emit(
            names::APPROVAL_DECIDED,
            json!({ "approval_id": approval_id, "job_id": request.job_id, "status": status, "actor": actor }),
        );
        Ok(request)
    }

    pub fn get(&self, approval_id: &str) -> Result<Option<ApprovalRequest>> {
        keys::load(self.store.as_ref(), &keys::approval(approval_id))
    }

    pub fn get_by_run(&self, run_id: &str) -> Result<Option<ApprovalRequest>> {
        match self.store.get(&keys::approval_by_run(run_id))? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    /// Newest first, optionally filtered by status.
    pub fn list(&self, status: Option<ApprovalStatus>, limit: usize) -> Result<Vec<ApprovalRequest>> {
        let total = self.store.zcard(keys::APPROVALS_INDEX)?;
        let mut out = Vec::new();
        for id in self.store.zrevrange(keys::APPROVALS_INDEX, total)? {
            if out.len() >= limit {
                break;
            }
            if let Some(req) = self.get(&id)?
                && status.is_none_or(|s| s == req.status)
            {
                out.push(req);
            }
        }
        Ok(out)
    }

    pub fn has_pending_for_job(&self, job_id: &str) -> Result<bool> {
        Ok(self.store.scard(&keys::pending_approvals(job_id))? > 0)
    }
}
