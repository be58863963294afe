use chrono::Utc;
use tracing::{debug, info};

use crate::auth::require_role;
use crate::db::{is_constraint_violation, Database, NewReview};
use crate::error::{require_field, Result, WorkflowError};
use crate::models::{Identity, Page, Review, ReviewWithWorker, Role};

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

/// One review per approved application. The reviewer is the signed-in client.
pub fn submit_review(
    db: &Database,
    caller: Option<&Identity>,
    application_id: i64,
    rating: i64,
    comment: &str,
) -> Result<Review> {
    let client = require_role(db, caller, Role::Client)?;
    require_field(comment, "comment")?;
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(WorkflowError::InvalidRating(rating));
    }

    let app = db
        .get_application(application_id)?
        .ok_or(WorkflowError::ApplicationNotFound(application_id))?;
    if !app.approved() {
        return Err(WorkflowError::NotApproved(application_id));
    }
    if db.review_exists_for_application(application_id)? {
        return Err(WorkflowError::DuplicateReview(application_id));
    }

    let id = db
        .insert_review(&NewReview {
            application_id,
            client_id: client.uid.clone(),
            worker_id: app.applicant_id.clone(),
            job_id: app.job_id,
            rating: rating as u8,
            comment: comment.trim().to_string(),
            created_at: Utc::now(),
        })
        .map_err(|e| {
            // lost a race with another submission for the same application
            if is_constraint_violation(&e) {
                WorkflowError::DuplicateReview(application_id)
            } else {
                e.into()
            }
        })?;
    info!(review_id = id, application_id, rating, "submitted review");

    db.get_review(id)?
        .ok_or(WorkflowError::Store(rusqlite::Error::QueryReturnedNoRows))
}

pub fn list_reviews_joined(db: &Database, page: Page) -> Result<Vec<ReviewWithWorker>> {
    let rows = db.list_reviews_with_workers(page)?;
    debug!(count = rows.len(), "listed reviews");
    Ok(rows.into_iter().map(ReviewWithWorker::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::create_job;
    use crate::models::Application;
    use crate::test_support::{client, fields, memory_db, worker};
    use crate::workflow::{approve, list_approved, list_pending, submit_application};
    use pretty_assertions::assert_eq;

    fn approved_application(db: &Database, c: &Identity, w: &Identity) -> Application {
        let job = create_job(db, Some(c), &fields("Backend Engineer", "Acme")).unwrap();
        let app = submit_application(db, Some(w), job.id, "Dana", "Hire me").unwrap();
        approve(db, Some(c), app.id).unwrap()
    }

    #[test]
    fn test_full_marketplace_scenario() {
        let db = memory_db();
        let c = client(&db);
        let w = worker(&db);

        let job = create_job(&db, Some(&c), &fields("Backend Engineer", "Acme")).unwrap();
        let app = submit_application(&db, Some(&w), job.id, "Dana", "Hire me").unwrap();

        let pending = list_pending(&db, Some(&c), Page::default()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, app.id);
        assert_eq!(pending[0].job_title, "Backend Engineer");

        approve(&db, Some(&c), app.id).unwrap();
        assert!(list_pending(&db, Some(&c), Page::default()).unwrap().is_empty());
        let approved = list_approved(&db, Some(&c), Page::default()).unwrap();
        assert_eq!(approved.len(), 1);
        assert!(approved[0].processed_at.is_some());

        submit_review(&db, Some(&c), app.id, 5, "Great").unwrap();
        let reviews = list_reviews_joined(&db, Page::default()).unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].review.rating, 5);
        assert_eq!(reviews[0].review.comment, "Great");
        assert_eq!(reviews[0].worker_name, "Dana");
    }

    #[test]
    fn test_review_links_worker_and_job() {
        let db = memory_db();
        let c = client(&db);
        let w = worker(&db);
        let app = approved_application(&db, &c, &w);

        let review = submit_review(&db, Some(&c), app.id, 4, "Reliable").unwrap();
        assert_eq!(review.application_id, app.id);
        assert_eq!(review.client_id, c.uid);
        assert_eq!(review.worker_id, w.uid);
        assert_eq!(review.job_id, app.job_id);
        assert_eq!(review.rating, 4);
    }

    #[test]
    fn test_second_review_is_rejected() {
        let db = memory_db();
        let c = client(&db);
        let w = worker(&db);
        let app = approved_application(&db, &c, &w);

        submit_review(&db, Some(&c), app.id, 5, "Great").unwrap();
        let err = submit_review(&db, Some(&c), app.id, 1, "Changed my mind").unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateReview(id) if id == app.id));
        assert_eq!(list_reviews_joined(&db, Page::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_review_requires_approval() {
        let db = memory_db();
        let c = client(&db);
        let w = worker(&db);
        let job = create_job(&db, Some(&c), &fields("Backend Engineer", "Acme")).unwrap();
        let app = submit_application(&db, Some(&w), job.id, "Dana", "Hire me").unwrap();

        assert!(matches!(
            submit_review(&db, Some(&c), app.id, 5, "Great"),
            Err(WorkflowError::NotApproved(_))
        ));
        assert!(matches!(
            submit_review(&db, Some(&c), 404, 5, "Great"),
            Err(WorkflowError::ApplicationNotFound(404))
        ));
    }

    #[test]
    fn test_review_input_validation() {
        let db = memory_db();
        let c = client(&db);
        let w = worker(&db);
        let app = approved_application(&db, &c, &w);

        for bad in [0, 6, -3] {
            assert!(matches!(
                submit_review(&db, Some(&c), app.id, bad, "Great"),
                Err(WorkflowError::InvalidRating(r)) if r == bad
            ));
        }
        assert!(matches!(
            submit_review(&db, Some(&c), app.id, 3, ""),
            Err(WorkflowError::MissingField("comment"))
        ));
        assert!(matches!(
            submit_review(&db, Some(&w), app.id, 3, "self review"),
            Err(WorkflowError::Forbidden { required: Role::Client })
        ));
        assert!(matches!(
            submit_review(&db, None, app.id, 3, "anon"),
            Err(WorkflowError::NotAuthenticated)
        ));
    }

    #[test]
    fn test_joined_listing_resolves_worker_name() {
        let db = memory_db();
        let c = client(&db);
        let w = worker(&db);
        let app = approved_application(&db, &c, &w);
        submit_review(&db, Some(&c), app.id, 5, "Great").unwrap();

        let reviews = list_reviews_joined(&db, Page::default()).unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].worker_name, "Dana");
        assert_eq!(reviews[0].review.comment, "Great");
    }
}
