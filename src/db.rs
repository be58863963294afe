use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::{
    matches_search, Application, ApplicationStats, ApplicationStatus, Credential, Job, JobFields,
    Page, Review, ReviewWithWorker, Role, User,
};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

/// Equality predicates pushed down into the applications query.
#[derive(Debug, Default, Clone)]
pub struct ApplicationFilter<'a> {
    pub status: Option<ApplicationStatus>,
    pub applicant_id: Option<&'a str>,
    pub job_id: Option<i64>,
}

/// Insert shape for an application; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub job_id: i64,
    pub job_title: String,
    pub applicant_id: String,
    pub applicant_name: String,
    pub applicant_email: String,
    pub cover_letter: String,
    pub applied_at: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub application_id: i64,
    pub client_id: String,
    pub worker_id: String,
    pub job_id: i64,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str =
    "id, title, description, company, location, salary, job_type, posted_by, created_at, updated_at";

const APPLICATION_COLUMNS: &str = "id, job_id, job_title, applicant_id, applicant_name, \
     applicant_email, cover_letter, applied_at, status, processed_at, processed_by";

impl Database {
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::with_connection(conn, path.to_path_buf())
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.create_scalar_function(
            "matches_search",
            4,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let title: Option<String> = ctx.get(0)?;
                let description: Option<String> = ctx.get(1)?;
                let company: Option<String> = ctx.get(2)?;
                let term: Option<String> = ctx.get(3)?;
                Ok(matches_search(
                    title.as_deref().unwrap_or(""),
                    description.as_deref().unwrap_or(""),
                    company.as_deref().unwrap_or(""),
                    term.as_deref().unwrap_or(""),
                ))
            },
        )?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                role TEXT NOT NULL DEFAULT 'worker' CHECK (role IN ('worker', 'client')),
                name TEXT,
                bio TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                uid TEXT PRIMARY KEY REFERENCES users(uid),
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                display_name TEXT,
                password_hash TEXT,
                salt TEXT
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL,
                salary TEXT NOT NULL,
                job_type TEXT NOT NULL,
                posted_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT
            );

            -- job_id is not a foreign key: deleting a job leaves its applications readable
            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                job_title TEXT NOT NULL,
                applicant_id TEXT NOT NULL,
                applicant_name TEXT NOT NULL,
                applicant_email TEXT NOT NULL,
                cover_letter TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'approved', 'rejected')),
                processed_at TEXT,
                processed_by TEXT
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL UNIQUE REFERENCES applications(id),
                client_id TEXT NOT NULL,
                worker_id TEXT NOT NULL,
                job_id INTEGER NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- store ids assigned to documents imported from the old hosted store
            CREATE TABLE IF NOT EXISTS legacy_ids (
                collection TEXT NOT NULL,
                legacy_id TEXT NOT NULL,
                id INTEGER NOT NULL,
                PRIMARY KEY (collection, legacy_id)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            CREATE INDEX IF NOT EXISTS idx_applications_applicant ON applications(applicant_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_worker ON reviews(worker_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'smartmatch init' first."
            ));
        }
        Ok(())
    }

    /// Statements issued through `self` while the returned transaction is alive join it.
    pub fn begin(&self) -> rusqlite::Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    // --- User and credential operations ---

    pub fn insert_user(&self, user: &User) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO users (uid, role, name, bio, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.uid, user.role.as_str(), user.name, user.bio, user.created_at],
        )?;
        Ok(())
    }

    /// Registration writes the provider credential and the profile together.
    pub fn create_account(&self, user: &User, credential: &Credential) -> rusqlite::Result<()> {
        let tx = self.begin()?;
        self.insert_user(user)?;
        self.conn.execute(
            "INSERT INTO credentials (uid, email, display_name, password_hash, salt)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                credential.uid,
                credential.email,
                credential.display_name,
                credential.password_hash,
                credential.salt
            ],
        )?;
        tx.commit()
    }

    pub fn get_user(&self, uid: &str) -> rusqlite::Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT uid, role, name, bio, created_at FROM users WHERE uid = ?1",
                [uid],
                Self::row_to_user,
            )
            .optional()
    }

    pub fn update_user_profile(
        &self,
        uid: &str,
        name: Option<&str>,
        bio: Option<&str>,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE users SET name = COALESCE(?2, name), bio = COALESCE(?3, bio) WHERE uid = ?1",
            params![uid, name, bio],
        )
    }

    pub fn get_credential_by_email(&self, email: &str) -> rusqlite::Result<Option<Credential>> {
        self.conn
            .query_row(
                "SELECT uid, email, display_name, password_hash, salt
                 FROM credentials WHERE email = ?1",
                [email.trim()],
                |row| {
                    Ok(Credential {
                        uid: row.get(0)?,
                        email: row.get(1)?,
                        display_name: row.get(2)?,
                        password_hash: row.get(3)?,
                        salt: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            uid: row.get(0)?,
            role: parse_column::<Role>(row, 1)?,
            name: row.get(2)?,
            bio: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    // --- Job operations ---

    pub fn insert_job(
        &self,
        fields: &JobFields,
        posted_by: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO jobs (title, description, company, location, salary, job_type, posted_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fields.title,
                fields.description,
                fields.company,
                fields.location,
                fields.salary,
                fields.job_type,
                posted_by,
                created_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_job(
        &self,
        id: i64,
        fields: &JobFields,
        updated_at: DateTime<Utc>,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE jobs SET title = ?2, description = ?3, company = ?4, location = ?5,
                    salary = ?6, job_type = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                id,
                fields.title,
                fields.description,
                fields.company,
                fields.location,
                fields.salary,
                fields.job_type,
                updated_at
            ],
        )
    }

    pub fn delete_job(&self, id: i64) -> rusqlite::Result<usize> {
        self.conn.execute("DELETE FROM jobs WHERE id = ?1", [id])
    }

    pub fn get_job(&self, id: i64) -> rusqlite::Result<Option<Job>> {
        self.conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id],
                Self::row_to_job,
            )
            .optional()
    }

    /// Newest first. The search term is evaluated by the same predicate the
    /// catalog exposes, registered as a SQL function.
    pub fn list_jobs(&self, search: Option<&str>, page: Page) -> rusqlite::Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE ?1 IS NULL OR matches_search(title, description, company, ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(
            params![search, i64::from(page.limit), i64::from(page.offset)],
            Self::row_to_job,
        )?;
        rows.collect()
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get(0)?,
            fields: JobFields {
                title: row.get(1)?,
                description: row.get(2)?,
                company: row.get(3)?,
                location: row.get(4)?,
                salary: row.get(5)?,
                job_type: row.get(6)?,
            },
            posted_by: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    // --- Application operations ---

    pub fn insert_application(&self, app: &NewApplication) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO applications (job_id, job_title, applicant_id, applicant_name,
                    applicant_email, cover_letter, applied_at, status, processed_at, processed_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                app.job_id,
                app.job_title,
                app.applicant_id,
                app.applicant_name,
                app.applicant_email,
                app.cover_letter,
                app.applied_at,
                app.status.as_str(),
                app.processed_at,
                app.processed_by
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_application(&self, id: i64) -> rusqlite::Result<Option<Application>> {
        self.conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                [id],
                Self::row_to_application,
            )
            .optional()
    }

    pub fn list_applications(
        &self,
        filter: &ApplicationFilter<'_>,
        page: Page,
    ) -> rusqlite::Result<Vec<Application>> {
        let limit = i64::from(page.limit);
        let offset = i64::from(page.offset);
        let mut sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE 1=1");
        let mut params: Vec<&dyn ToSql> = vec![];

        let status = filter.status.map(|s| s.as_str());
        if let Some(s) = &status {
            params.push(s);
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        if let Some(applicant) = &filter.applicant_id {
            params.push(applicant);
            sql.push_str(&format!(" AND applicant_id = ?{}", params.len()));
        }
        if let Some(job_id) = &filter.job_id {
            params.push(job_id);
            sql.push_str(&format!(" AND job_id = ?{}", params.len()));
        }

        params.push(&limit);
        sql.push_str(&format!(" ORDER BY applied_at ASC, id ASC LIMIT ?{}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ?{}", params.len()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(&params[..], Self::row_to_application)?;
        rows.collect()
    }

    /// Moves an application out of `from` only if it is still in `from`.
    /// Returns the number of rows changed (0 or 1).
    pub fn transition_application(
        &self,
        id: i64,
        from: ApplicationStatus,
        to: ApplicationStatus,
        processed_at: DateTime<Utc>,
        processed_by: &str,
    ) -> rusqlite::Result<usize> {
        self.conn.execute(
            "UPDATE applications SET status = ?3, processed_at = ?4, processed_by = ?5
             WHERE id = ?1 AND status = ?2",
            params![id, from.as_str(), to.as_str(), processed_at, processed_by],
        )
    }

    pub fn application_stats(&self, applicant_id: &str) -> rusqlite::Result<ApplicationStats> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM applications WHERE applicant_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map([applicant_id], |row| {
            Ok((parse_column::<ApplicationStatus>(row, 0)?, row.get::<_, u32>(1)?))
        })?;

        let mut stats = ApplicationStats::default();
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            match status {
                ApplicationStatus::Pending => stats.pending += count,
                ApplicationStatus::Approved => stats.approved += count,
                ApplicationStatus::Rejected => stats.rejected += count,
            }
        }
        Ok(stats)
    }

    fn row_to_application(row: &Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            job_id: row.get(1)?,
            job_title: row.get(2)?,
            applicant_id: row.get(3)?,
            applicant_name: row.get(4)?,
            applicant_email: row.get(5)?,
            cover_letter: row.get(6)?,
            applied_at: row.get(7)?,
            status: parse_column::<ApplicationStatus>(row, 8)?,
            processed_at: row.get(9)?,
            processed_by: row.get(10)?,
        })
    }

    // --- Review operations ---

    pub fn insert_review(&self, review: &NewReview) -> rusqlite::Result<i64> {
        self.conn.execute(
            "INSERT INTO reviews (application_id, client_id, worker_id, job_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                review.application_id,
                review.client_id,
                review.worker_id,
                review.job_id,
                review.rating,
                review.comment,
                review.created_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn review_exists_for_application(&self, application_id: i64) -> rusqlite::Result<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM reviews WHERE application_id = ?1)",
            [application_id],
            |row| row.get(0),
        )
    }

    pub fn get_review(&self, id: i64) -> rusqlite::Result<Option<Review>> {
        self.conn
            .query_row(
                "SELECT id, application_id, client_id, worker_id, job_id, rating, comment, created_at
                 FROM reviews WHERE id = ?1",
                [id],
                Self::row_to_review,
            )
            .optional()
    }

    /// Reviews with the worker's profile name; `None` when the worker has no profile.
    pub fn list_reviews_with_workers(
        &self,
        page: Page,
    ) -> rusqlite::Result<Vec<(Review, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.application_id, r.client_id, r.worker_id, r.job_id, r.rating,
                    r.comment, r.created_at, u.name
             FROM reviews r
             LEFT JOIN users u ON u.uid = r.worker_id
             ORDER BY r.created_at DESC, r.id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(
            params![i64::from(page.limit), i64::from(page.offset)],
            |row| Ok((Self::row_to_review(row)?, row.get::<_, Option<String>>(8)?)),
        )?;
        rows.collect()
    }

    // --- Legacy import bookkeeping ---

    pub fn get_legacy_id(&self, collection: &str, legacy_id: &str) -> rusqlite::Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM legacy_ids WHERE collection = ?1 AND legacy_id = ?2",
                [collection, legacy_id],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn record_legacy_id(&self, collection: &str, legacy_id: &str, id: i64) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO legacy_ids (collection, legacy_id, id) VALUES (?1, ?2, ?3)",
            params![collection, legacy_id, id],
        )?;
        Ok(())
    }

    fn row_to_review(row: &Row) -> rusqlite::Result<Review> {
        Ok(Review {
            id: row.get(0)?,
            application_id: row.get(1)?,
            client_id: row.get(2)?,
            worker_id: row.get(3)?,
            job_id: row.get(4)?,
            rating: row.get(5)?,
            comment: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl From<(Review, Option<String>)> for ReviewWithWorker {
    fn from((review, name): (Review, Option<String>)) -> Self {
        let worker_name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Unknown Worker".to_string());
        ReviewWithWorker {
            review,
            worker_name,
        }
    }
}

fn parse_column<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// True when the error is a UNIQUE/CHECK constraint rejection.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
