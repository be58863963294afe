//! Application lifecycle: `pending -> approved` or `pending -> rejected`.
//!
//! Transitions are single conditional updates, so two clients acting on the
//! same application at once cannot both move it.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{require_identity, require_role};
use crate::catalog;
use crate::db::{ApplicationFilter, Database, NewApplication};
use crate::error::{require_field, Result, WorkflowError};
use crate::models::{Application, ApplicationStats, ApplicationStatus, Identity, Page, Role};

#[derive(Debug, Clone, Serialize)]
pub struct MyApplications {
    pub applications: Vec<Application>,
    pub stats: ApplicationStats,
}

pub fn submit_application(
    db: &Database,
    caller: Option<&Identity>,
    job_id: i64,
    applicant_name: &str,
    cover_letter: &str,
) -> Result<Application> {
    let identity = require_identity(caller)?;
    require_role(db, caller, Role::Worker)?;
    require_field(applicant_name, "applicant name")?;
    require_field(cover_letter, "cover letter")?;

    // Title is copied so later edits to the job leave history alone.
    let job = catalog::get_job(db, job_id)?;

    let id = db.insert_application(&NewApplication {
        job_id: job.id,
        job_title: job.fields.title.clone(),
        applicant_id: identity.uid.clone(),
        applicant_name: applicant_name.trim().to_string(),
        applicant_email: identity.email.clone(),
        cover_letter: cover_letter.trim().to_string(),
        applied_at: Utc::now(),
        status: ApplicationStatus::Pending,
        processed_at: None,
        processed_by: None,
    })?;
    info!(application_id = id, job_id, applicant = %identity.uid, "submitted application");
    load(db, id)
}

pub fn list_pending(db: &Database, caller: Option<&Identity>, page: Page) -> Result<Vec<Application>> {
    list_by_status(db, caller, ApplicationStatus::Pending, page)
}

pub fn list_approved(
    db: &Database,
    caller: Option<&Identity>,
    page: Page,
) -> Result<Vec<Application>> {
    list_by_status(db, caller, ApplicationStatus::Approved, page)
}

fn list_by_status(
    db: &Database,
    caller: Option<&Identity>,
    status: ApplicationStatus,
    page: Page,
) -> Result<Vec<Application>> {
    require_role(db, caller, Role::Client)?;
    let filter = ApplicationFilter {
        status: Some(status),
        ..Default::default()
    };
    let apps = db.list_applications(&filter, page)?;
    debug!(count = apps.len(), %status, "listed applications");
    Ok(apps)
}

pub fn approve(db: &Database, caller: Option<&Identity>, id: i64) -> Result<Application> {
    transition(db, caller, id, ApplicationStatus::Approved)
}

pub fn reject(db: &Database, caller: Option<&Identity>, id: i64) -> Result<Application> {
    transition(db, caller, id, ApplicationStatus::Rejected)
}

/// Repeating the transition that already happened returns the stored record;
/// crossing to the other terminal state is refused.
fn transition(
    db: &Database,
    caller: Option<&Identity>,
    id: i64,
    target: ApplicationStatus,
) -> Result<Application> {
    let client = require_role(db, caller, Role::Client)?;

    let changed = db.transition_application(
        id,
        ApplicationStatus::Pending,
        target,
        Utc::now(),
        &client.uid,
    )?;
    let app = load(db, id)?;

    if changed == 0 && app.status != target {
        return Err(WorkflowError::InvalidTransition {
            id,
            from: app.status,
        });
    }
    if changed == 1 {
        info!(application_id = id, status = %target, by = %client.uid, "processed application");
    }
    Ok(app)
}

pub fn list_mine(db: &Database, caller: Option<&Identity>, page: Page) -> Result<MyApplications> {
    let identity = require_identity(caller)?;
    let filter = ApplicationFilter {
        applicant_id: Some(identity.uid.as_str()),
        ..Default::default()
    };
    let applications = db.list_applications(&filter, page)?;
    let stats = db.application_stats(&identity.uid)?;
    Ok(MyApplications {
        applications,
        stats,
    })
}

/// Clients see every application; workers only their own.
pub fn get_application(db: &Database, caller: Option<&Identity>, id: i64) -> Result<Application> {
    let identity = require_identity(caller)?;
    let app = load(db, id)?;
    if app.applicant_id == identity.uid {
        return Ok(app);
    }
    require_role(db, caller, Role::Client)?;
    Ok(app)
}

pub fn list_for_job(
    db: &Database,
    caller: Option<&Identity>,
    job_id: i64,
    page: Page,
) -> Result<Vec<Application>> {
    require_role(db, caller, Role::Client)?;
    let filter = ApplicationFilter {
        job_id: Some(job_id),
        ..Default::default()
    };
    Ok(db.list_applications(&filter, page)?)
}

/// `None` when the caller may not see the job's applications; store failures still propagate.
pub fn applications_visible_for_job(
    db: &Database,
    caller: Option<&Identity>,
    job_id: i64,
    page: Page,
) -> Result<Option<Vec<Application>>> {
    match list_for_job(db, caller, job_id, page) {
        Ok(apps) => Ok(Some(apps)),
        Err(WorkflowError::NotAuthenticated | WorkflowError::Forbidden { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn load(db: &Database, id: i64) -> Result<Application> {
    db.get_application(id)?
        .ok_or(WorkflowError::ApplicationNotFound(id))
}
