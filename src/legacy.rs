//! Import of documents exported from the old hosted store.
//!
//! Two write paths produced the same collections with different field names
//! (`approved` vs `Application_approved`, `title` vs `job_title`, ...). Every
//! reader here accepts either spelling and yields the canonical record.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::db::{is_constraint_violation, Database, NewApplication, NewReview};
use crate::models::{ApplicationStatus, JobFields, Role, User};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub users: usize,
    pub jobs: usize,
    pub applications: usize,
    pub reviews: usize,
    pub skipped: usize,
    /// Documents a previous import already brought in.
    pub unchanged: usize,
}

type Doc = Map<String, Value>;

pub fn import_file(db: &Database, path: &Path) -> Result<ImportStats> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read export file: {}", path.display()))?;
    let export: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Export file is not valid JSON: {}", path.display()))?;
    import_export(db, &export)
}

/// `export` maps collection names to arrays of documents carrying an `id`.
/// Runs in one transaction; either everything importable lands or nothing does.
/// Legacy ids are remembered, so importing the same export again adds nothing.
pub fn import_export(db: &Database, export: &Value) -> Result<ImportStats> {
    let collections = export
        .as_object()
        .ok_or_else(|| anyhow!("Export must be a JSON object of collections"))?;

    let tx = db.begin()?;
    let mut stats = ImportStats::default();

    for doc in documents(collections, "users") {
        import_user(db, doc, &mut stats)?;
    }
    for doc in documents(collections, "Profile") {
        import_profile(db, doc, &mut stats)?;
    }

    let mut job_ids: HashMap<String, i64> = HashMap::new();
    for doc in documents(collections, "Jobs") {
        let Some(legacy_id) = doc_id(doc) else {
            warn!("job document without id, skipping");
            stats.skipped += 1;
            continue;
        };
        if let Some(id) = db.get_legacy_id("Jobs", &legacy_id)? {
            job_ids.insert(legacy_id, id);
            stats.unchanged += 1;
            continue;
        }
        match job_fields(doc) {
            Some(fields) => {
                let posted_by = text(doc, &["postedBy", "job_posted_by", "clientId"]);
                let created_at = timestamp(doc, &["createdAt", "job_createdAt"]).unwrap_or_else(Utc::now);
                let id = db.insert_job(&fields, posted_by.as_deref(), created_at)?;
                db.record_legacy_id("Jobs", &legacy_id, id)?;
                job_ids.insert(legacy_id, id);
                stats.jobs += 1;
            }
            None => {
                warn!(legacy_id = %legacy_id, "job document without title, skipping");
                stats.skipped += 1;
            }
        }
    }

    let mut application_ids: HashMap<String, i64> = HashMap::new();
    for doc in documents(collections, "Applications") {
        let legacy_id = doc_id(doc);
        if let Some(known) = &legacy_id {
            if let Some(id) = db.get_legacy_id("Applications", known)? {
                application_ids.insert(known.clone(), id);
                stats.unchanged += 1;
                continue;
            }
        }
        let job_ref = text(doc, &["jobId", "Application_Job_Id"]);
        let job_id = job_ref.as_ref().and_then(|r| job_ids.get(r)).copied();
        let (Some(legacy_id), Some(_), Some(app)) =
            (legacy_id, job_id, application(doc, job_id.unwrap_or_default()))
        else {
            warn!(job_ref = ?job_ref, "application references an unknown job or lacks an applicant, skipping");
            stats.skipped += 1;
            continue;
        };
        let id = db.insert_application(&app)?;
        db.record_legacy_id("Applications", &legacy_id, id)?;
        application_ids.insert(legacy_id, id);
        stats.applications += 1;
    }

    for doc in documents(collections, "Reviews") {
        let legacy_id = doc_id(doc);
        if let Some(known) = &legacy_id {
            if db.get_legacy_id("Reviews", known)?.is_some() {
                stats.unchanged += 1;
                continue;
            }
        }
        // The old approval page stored the application id under `jobId`.
        let app_ref = text(doc, &["applicationId", "Review_Application_Id", "jobId"]);
        let app = match app_ref.as_ref().and_then(|r| application_ids.get(r)) {
            Some(id) => db.get_application(*id)?,
            None => None,
        };
        let Some(app) = app else {
            warn!(app_ref = ?app_ref, "review references an unknown application, skipping");
            stats.skipped += 1;
            continue;
        };
        if !app.approved() {
            warn!(application_id = app.id, status = %app.status, "review of an application that was never approved, skipping");
            stats.skipped += 1;
            continue;
        }
        let rating = number(doc, &["rating", "Review_rating"]).map(|r| r.round() as i64);
        let comment = text(doc, &["comment", "Review_comment"]).unwrap_or_default();
        let client_id = text(doc, &["clientId", "Review_Client_UID"]);
        let (Some(rating @ 1..=5), Some(client_id)) = (rating, client_id) else {
            warn!(application_id = app.id, "review without valid rating or reviewer, skipping");
            stats.skipped += 1;
            continue;
        };

        let review = NewReview {
            application_id: app.id,
            client_id,
            worker_id: text(doc, &["workerId", "Review_User_UID"]).unwrap_or(app.applicant_id),
            job_id: app.job_id,
            rating: rating as u8,
            comment,
            created_at: timestamp(doc, &["createdAt", "Review_createdAt"]).unwrap_or_else(Utc::now),
        };
        match db.insert_review(&review) {
            Ok(id) => {
                if let Some(legacy_id) = &legacy_id {
                    db.record_legacy_id("Reviews", legacy_id, id)?;
                }
                stats.reviews += 1;
            }
            Err(e) if is_constraint_violation(&e) => {
                warn!(application_id = app.id, "duplicate review, keeping the first");
                stats.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit()?;
    info!(?stats, "imported legacy export");
    Ok(stats)
}

fn import_user(db: &Database, doc: &Doc, stats: &mut ImportStats) -> Result<()> {
    let Some(uid) = doc_id(doc).or_else(|| text(doc, &["uid"])) else {
        stats.skipped += 1;
        return Ok(());
    };
    if db.get_user(&uid)?.is_some() {
        return Ok(());
    }
    let role = text(doc, &["role"])
        .and_then(|r| r.parse::<Role>().ok())
        .unwrap_or(Role::Worker);
    db.insert_user(&User {
        uid,
        role,
        name: text(doc, &["name", "Profile_name"]),
        bio: text(doc, &["bio"]),
        created_at: timestamp(doc, &["createdAt"]).unwrap_or_else(Utc::now),
    })?;
    stats.users += 1;
    Ok(())
}

/// `Profile` documents only carry a display name for a uid.
fn import_profile(db: &Database, doc: &Doc, stats: &mut ImportStats) -> Result<()> {
    let (Some(uid), Some(name)) = (
        text(doc, &["PROFILE_User_id", "uid"]),
        text(doc, &["Profile_name", "name"]),
    ) else {
        stats.skipped += 1;
        return Ok(());
    };
    match db.get_user(&uid)? {
        Some(user) if user.name.is_some() => {}
        Some(_) => {
            db.update_user_profile(&uid, Some(&name), None)?;
        }
        None => {
            db.insert_user(&User {
                uid,
                role: Role::Worker,
                name: Some(name),
                bio: None,
                created_at: Utc::now(),
            })?;
            stats.users += 1;
        }
    }
    Ok(())
}

fn job_fields(doc: &Doc) -> Option<JobFields> {
    Some(JobFields {
        title: text(doc, &["title", "job_title"])?,
        description: text(doc, &["description", "job_description", "desc"]).unwrap_or_default(),
        company: text(doc, &["company", "job_company"]).unwrap_or_default(),
        location: text(doc, &["location", "job_location"]).unwrap_or_default(),
        salary: text(doc, &["salary", "job_salary"]).unwrap_or_default(),
        job_type: text(doc, &["type", "job_type"]).unwrap_or_default(),
    })
}

fn application(doc: &Doc, job_id: i64) -> Option<NewApplication> {
    let status = status(doc);
    let applied_at = timestamp(doc, &["appliedAt", "Application_appliedAt"]).unwrap_or_else(Utc::now);
    let processed_at = timestamp(doc, &["processedAt", "Application_processedAt"]);
    Some(NewApplication {
        job_id,
        job_title: text(doc, &["jobTitle", "Application_Job_Title"]).unwrap_or_default(),
        applicant_id: text(doc, &["applicantId", "Application_User_Id"])?,
        applicant_name: text(doc, &["applicantName", "Application_User_Name"]).unwrap_or_default(),
        applicant_email: text(doc, &["applicantEmail", "Application_User_Email"])
            .unwrap_or_default(),
        cover_letter: text(doc, &["coverLetter", "Application_coverLetter"]).unwrap_or_default(),
        applied_at,
        status,
        // decided applications always carry a decision time
        processed_at: match status {
            ApplicationStatus::Pending => None,
            _ => processed_at.or(Some(applied_at)),
        },
        processed_by: None,
    })
}

/// The boolean flag wins over the status string; absent both, pending.
fn status(doc: &Doc) -> ApplicationStatus {
    let approved = field(doc, &["approved", "Application_approved"]).and_then(Value::as_bool);
    if approved == Some(true) {
        return ApplicationStatus::Approved;
    }
    text(doc, &["status", "Application_status"])
        .and_then(|s| s.parse().ok())
        .filter(|s| *s != ApplicationStatus::Approved || approved.is_none())
        .unwrap_or(ApplicationStatus::Pending)
}

// --- Field readers ---

fn documents<'a>(collections: &'a Map<String, Value>, name: &str) -> impl Iterator<Item = &'a Doc> {
    collections
        .get(name)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn doc_id(doc: &Doc) -> Option<String> {
    text(doc, &["id"])
}

fn field<'a>(doc: &'a Doc, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| doc.get(*k))
        .find(|v| !v.is_null())
}

fn text(doc: &Doc, keys: &[&str]) -> Option<String> {
    let value = field(doc, keys)?;
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn number(doc: &Doc, keys: &[&str]) -> Option<f64> {
    match field(doc, keys)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339 strings, epoch milliseconds, or `{seconds, nanoseconds}` objects.
fn timestamp(doc: &Doc, keys: &[&str]) -> Option<DateTime<Utc>> {
    match field(doc, keys)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single(),
        Value::Object(obj) => {
            let seconds = obj
                .get("seconds")
                .or_else(|| obj.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, u32::try_from(nanos).ok()?).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Page;
    use crate::test_support::memory_db;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mixed_export() -> Value {
        json!({
            "users": [
                { "id": "client-1", "role": "client", "name": "Acme Hiring" },
                { "id": "worker-1", "role": "worker" }
            ],
            "Profile": [
                { "PROFILE_User_id": "worker-1", "Profile_name": "Dana" }
            ],
            "Jobs": [
                { "id": "j-new", "title": "Backend Engineer", "company": "Acme",
                  "description": "APIs", "location": "Remote", "salary": "$100k",
                  "type": "Full-time", "createdAt": { "seconds": 1700000000, "nanoseconds": 0 } },
                { "id": "j-old", "job_title": "Designer", "job_company": "Globex",
                  "job_location": "NYC", "job_salary": "$90k", "job_type": "Contract",
                  "job_description": "Figma", "createdAt": "2024-01-02T03:04:05Z" },
                { "id": "j-broken", "company": "No Title Inc" }
            ],
            "Applications": [
                { "id": "a-new", "jobId": "j-new", "jobTitle": "Backend Engineer",
                  "applicantId": "worker-1", "applicantName": "Dana",
                  "applicantEmail": "dana@example.com", "coverLetter": "Hi",
                  "approved": true, "status": "pending" },
                { "id": "a-old", "Application_Job_Id": "j-old",
                  "Application_Job_Title": "Designer", "Application_User_Id": "worker-1",
                  "Application_User_Name": "Dana", "Application_User_Email": "dana@example.com",
                  "Application_coverLetter": "Hello", "Application_status": "pending",
                  "Application_approved": false, "Application_appliedAt": 1704164645000i64 },
                { "id": "a-orphan", "jobId": "deleted-job", "applicantId": "worker-1" }
            ],
            "Reviews": [
                { "clientId": "client-1", "comment": "Great", "rating": 5.0,
                  "workerId": "worker-1", "jobId": "a-new" },
                { "clientId": "client-1", "comment": "Again", "rating": 4,
                  "jobId": "a-new" },
                { "clientId": "client-1", "comment": "Lost", "rating": 3,
                  "jobId": "a-missing" }
            ]
        })
    }

    #[test]
    fn test_import_translates_both_conventions() {
        let db = memory_db();
        let stats = import_export(&db, &mixed_export()).unwrap();
        assert_eq!(
            stats,
            ImportStats {
                users: 2,
                jobs: 2,
                applications: 2,
                reviews: 1,
                skipped: 4,
                unchanged: 0,
            }
        );

        let jobs = db.list_jobs(None, Page::default()).unwrap();
        let designer = jobs.iter().find(|j| j.fields.title == "Designer").unwrap();
        assert_eq!(designer.fields.company, "Globex");
        assert_eq!(designer.fields.job_type, "Contract");
        assert_eq!(designer.created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");

        let worker = db.get_user("worker-1").unwrap().unwrap();
        assert_eq!(worker.name.as_deref(), Some("Dana"));
        let client = db.get_user("client-1").unwrap().unwrap();
        assert_eq!(client.role, Role::Client);
    }

    #[test]
    fn test_import_reconciles_status_and_reviews() {
        let db = memory_db();
        import_export(&db, &mixed_export()).unwrap();

        let stats = db.application_stats("worker-1").unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.pending, 1);

        let reviews = db.list_reviews_with_workers(Page::default()).unwrap();
        assert_eq!(reviews.len(), 1);
        let (review, name) = &reviews[0];
        assert_eq!(review.rating, 5);
        assert_eq!(review.worker_id, "worker-1");
        assert_eq!(name.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_reviews_of_unapproved_applications_are_skipped() {
        let db = memory_db();
        let export = json!({
            "Jobs": [{ "id": "j1", "title": "Backend Engineer" }],
            "Applications": [
                { "id": "a1", "jobId": "j1", "applicantId": "worker-1",
                  "approved": false, "status": "pending" },
                { "id": "a2", "jobId": "j1", "applicantId": "worker-1",
                  "approved": false, "status": "approved" }
            ],
            "Reviews": [
                { "id": "r1", "clientId": "client-1", "rating": 4, "comment": "Fine",
                  "applicationId": "a1" },
                { "id": "r2", "clientId": "client-1", "rating": 5, "comment": "Great",
                  "applicationId": "a2" }
            ]
        });

        let stats = import_export(&db, &export).unwrap();
        assert_eq!(stats.applications, 2);
        assert_eq!(stats.reviews, 0);
        assert_eq!(stats.skipped, 2);
        assert!(db.list_reviews_with_workers(Page::default()).unwrap().is_empty());
    }

    #[test]
    fn test_reimport_adds_nothing() {
        let db = memory_db();
        let mut export = mixed_export();
        export["Reviews"][0]["id"] = json!("r-great");

        let first = import_export(&db, &export).unwrap();
        let second = import_export(&db, &export).unwrap();

        assert_eq!(second.users, 0);
        assert_eq!(second.jobs, 0);
        assert_eq!(second.applications, 0);
        assert_eq!(second.reviews, 0);
        assert_eq!(second.unchanged, first.jobs + first.applications + first.reviews);

        assert_eq!(db.list_jobs(None, Page::default()).unwrap().len(), 2);
        assert_eq!(db.application_stats("worker-1").unwrap().total, 2);
        assert_eq!(db.list_reviews_with_workers(Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_decided_application_gets_processed_at() {
        let db = memory_db();
        import_export(&db, &mixed_export()).unwrap();

        let filter = crate::db::ApplicationFilter {
            status: Some(ApplicationStatus::Approved),
            ..Default::default()
        };
        let approved = db.list_applications(&filter, Page::default()).unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].processed_at, Some(approved[0].applied_at));
    }

    #[test]
    fn test_status_flag_disagreement() {
        let doc = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(
            status(&doc(json!({ "Application_approved": true, "Application_status": "pending" }))),
            ApplicationStatus::Approved
        );
        assert_eq!(
            status(&doc(json!({ "approved": false, "status": "approved" }))),
            ApplicationStatus::Pending
        );
        assert_eq!(
            status(&doc(json!({ "status": "rejected" }))),
            ApplicationStatus::Rejected
        );
        assert_eq!(status(&doc(json!({}))), ApplicationStatus::Pending);
    }

    #[test]
    fn test_timestamp_formats() {
        let doc = json!({
            "a": "2024-05-06T07:08:09Z",
            "b": 1715000000000i64,
            "c": { "_seconds": 1715000000, "_nanoseconds": 5 },
            "d": "yesterday"
        });
        let doc = doc.as_object().unwrap();
        assert_eq!(timestamp(doc, &["a"]).unwrap().to_rfc3339(), "2024-05-06T07:08:09+00:00");
        assert_eq!(timestamp(doc, &["b"]).unwrap().timestamp(), 1715000000);
        assert_eq!(timestamp(doc, &["c"]).unwrap().timestamp_subsec_nanos(), 5);
        assert!(timestamp(doc, &["d"]).is_none());
        assert!(timestamp(doc, &["missing"]).is_none());
    }

    #[test]
    fn test_rejects_non_object_export() {
        let db = memory_db();
        assert!(import_export(&db, &json!([1, 2, 3])).is_err());
    }
}
