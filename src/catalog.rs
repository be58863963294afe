use chrono::Utc;
use tracing::{debug, info};

use crate::auth::require_role;
use crate::db::Database;
use crate::error::{require_field, Result, WorkflowError};
use crate::models::{Identity, Job, JobFields, Page, Role, User};

#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub search: Option<String>,
    pub page: Page,
}

fn validate(fields: &JobFields) -> Result<()> {
    require_field(&fields.title, "title")?;
    require_field(&fields.description, "description")?;
    require_field(&fields.company, "company")?;
    require_field(&fields.location, "location")?;
    require_field(&fields.salary, "salary")?;
    require_field(&fields.job_type, "type")?;
    Ok(())
}

fn trimmed(fields: &JobFields) -> JobFields {
    JobFields {
        title: fields.title.trim().to_string(),
        description: fields.description.trim().to_string(),
        company: fields.company.trim().to_string(),
        location: fields.location.trim().to_string(),
        salary: fields.salary.trim().to_string(),
        job_type: fields.job_type.trim().to_string(),
    }
}

pub fn create_job(db: &Database, caller: Option<&Identity>, fields: &JobFields) -> Result<Job> {
    let owner = require_role(db, caller, Role::Client)?;
    validate(fields)?;

    let id = db.insert_job(&trimmed(fields), Some(&owner.uid), Utc::now())?;
    info!(job_id = id, owner = %owner.uid, "created job");
    get_job(db, id)
}

pub fn update_job(
    db: &Database,
    caller: Option<&Identity>,
    id: i64,
    fields: &JobFields,
) -> Result<Job> {
    let user = require_role(db, caller, Role::Client)?;
    validate(fields)?;
    let job = get_job(db, id)?;
    ensure_owner(&job, &user)?;

    // Last writer wins; no version check.
    if db.update_job(id, &trimmed(fields), Utc::now())? == 0 {
        return Err(WorkflowError::JobNotFound(id));
    }
    info!(job_id = id, "updated job");
    get_job(db, id)
}

/// Applications that reference the job are left in place.
pub fn delete_job(db: &Database, caller: Option<&Identity>, id: i64) -> Result<()> {
    let user = require_role(db, caller, Role::Client)?;
    let job = get_job(db, id)?;
    ensure_owner(&job, &user)?;

    if db.delete_job(id)? == 0 {
        return Err(WorkflowError::JobNotFound(id));
    }
    info!(job_id = id, "deleted job");
    Ok(())
}

pub fn get_job(db: &Database, id: i64) -> Result<Job> {
    db.get_job(id)?.ok_or(WorkflowError::JobNotFound(id))
}

pub fn list_jobs(db: &Database, query: &JobQuery) -> Result<Vec<Job>> {
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let jobs = db.list_jobs(search, query.page)?;
    debug!(count = jobs.len(), search = ?search, "listed jobs");
    Ok(jobs)
}

fn ensure_owner(job: &Job, user: &User) -> Result<()> {
    match &job.posted_by {
        Some(owner) if *owner != user.uid => Err(WorkflowError::NotOwner(job.id)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, client, fields, memory_db, worker};
    use pretty_assertions::assert_eq;

    fn search(db: &Database, term: &str) -> Vec<Job> {
        list_jobs(
            db,
            &JobQuery {
                search: Some(term.to_string()),
                page: Page::default(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_created_job_is_listed() {
        let db = memory_db();
        let me = client(&db);
        let input = JobFields {
            title: "Backend Engineer".into(),
            description: "Build APIs".into(),
            company: "Acme".into(),
            location: "Remote".into(),
            salary: "$100k".into(),
            job_type: "Full-time".into(),
        };

        let created = create_job(&db, Some(&me), &input).unwrap();
        assert_eq!(created.posted_by.as_deref(), Some(me.uid.as_str()));

        let jobs = list_jobs(&db, &JobQuery::default()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].fields, input);
        assert_eq!(jobs[0].id, created.id);
    }

    #[test]
    fn test_create_requires_every_field() {
        let db = memory_db();
        let me = client(&db);
        let mut input = fields("Backend Engineer", "Acme");
        input.salary = "  ".into();

        assert!(matches!(
            create_job(&db, Some(&me), &input),
            Err(WorkflowError::MissingField("salary"))
        ));
        assert!(list_jobs(&db, &JobQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_only_clients_post_jobs() {
        let db = memory_db();
        let w = worker(&db);
        let input = fields("Backend Engineer", "Acme");

        assert!(matches!(
            create_job(&db, None, &input),
            Err(WorkflowError::NotAuthenticated)
        ));
        assert!(matches!(
            create_job(&db, Some(&w), &input),
            Err(WorkflowError::Forbidden { required: Role::Client })
        ));
    }

    #[test]
    fn test_update_overwrites_in_place() {
        let db = memory_db();
        let me = client(&db);
        let job = create_job(&db, Some(&me), &fields("Backend Engineer", "Acme")).unwrap();

        let mut edited = fields("Staff Engineer", "Acme");
        edited.salary = "$180k".into();
        let updated = update_job(&db, Some(&me), job.id, &edited).unwrap();

        assert_eq!(updated.id, job.id);
        assert_eq!(updated.fields, edited);
        assert_eq!(updated.created_at, job.created_at);
        assert!(updated.updated_at.is_some());
    }

    #[test]
    fn test_other_clients_cannot_edit_or_delete() {
        let db = memory_db();
        let owner = client(&db);
        let rival = account(&db, "rival@globex.test", "Globex", Role::Client);
        let job = create_job(&db, Some(&owner), &fields("Backend Engineer", "Acme")).unwrap();

        assert!(matches!(
            update_job(&db, Some(&rival), job.id, &fields("Hijacked", "Globex")),
            Err(WorkflowError::NotOwner(id)) if id == job.id
        ));
        let err = delete_job(&db, Some(&rival), job.id).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Job #{} was posted by another client", job.id)
        );
        assert_eq!(get_job(&db, job.id).unwrap().fields.title, "Backend Engineer");
    }

    #[test]
    fn test_delete_and_missing_job() {
        let db = memory_db();
        let me = client(&db);
        let job = create_job(&db, Some(&me), &fields("Backend Engineer", "Acme")).unwrap();

        delete_job(&db, Some(&me), job.id).unwrap();
        assert!(matches!(get_job(&db, job.id), Err(WorkflowError::JobNotFound(_))));
        assert!(matches!(
            delete_job(&db, Some(&me), job.id),
            Err(WorkflowError::JobNotFound(_))
        ));
        assert!(matches!(
            update_job(&db, Some(&me), 999, &fields("X", "Y")),
            Err(WorkflowError::JobNotFound(999))
        ));
    }

    #[test]
    fn test_search_is_case_insensitive_subset() {
        let db = memory_db();
        let me = client(&db);
        let titles = [
            ("Backend Engineer", "Acme"),
            ("Frontend Developer", "Globex"),
            ("Data Analyst", "Initech"),
            ("Platform Engineer", "Umbrella"),
        ];
        for (title, company) in titles {
            create_job(&db, Some(&me), &fields(title, company)).unwrap();
        }
        let all = list_jobs(&db, &JobQuery::default()).unwrap();

        for term in ["engineer", "ACME", "globex", "an", "wanted at", "nothing-here", ""] {
            let hits = search(&db, term);
            // subset of the full listing
            assert!(hits.iter().all(|h| all.contains(h)), "term {:?}", term);
            // contains every job that matches
            for job in &all {
                assert_eq!(
                    hits.contains(job),
                    job.fields.matches(term),
                    "term {:?} job {:?}",
                    term,
                    job.fields.title
                );
            }
        }

        assert_eq!(search(&db, "engineer").len(), 2);
        assert_eq!(search(&db, "ACME").len(), 1);
        assert!(search(&db, "nothing-here").is_empty());
    }

    #[test]
    fn test_search_matches_non_ascii_case() {
        let db = memory_db();
        let me = client(&db);
        create_job(&db, Some(&me), &fields("Ingénieur Backend", "Société Générale")).unwrap();
        assert_eq!(search(&db, "SOCIÉTÉ").len(), 1);
        assert_eq!(search(&db, "ingénieur").len(), 1);
    }
}
