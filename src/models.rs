use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Worker,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Worker => "worker",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "worker" => Ok(Role::Worker),
            "client" => Ok(Role::Client),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The authenticated principal, as issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub role: Role,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The editable part of a job posting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFields {
    pub title: String,
    pub description: String,
    pub company: String,
    pub location: String,
    pub salary: String,
    #[serde(rename = "type")]
    pub job_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    #[serde(flatten)]
    pub fields: JobFields,
    pub posted_by: Option<String>, // owner uid; empty for imported legacy jobs
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ApplicationStatus::Pending),
            "approved" => Ok(ApplicationStatus::Approved),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(format!("unknown application status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub job_id: i64,
    pub job_title: String, // snapshot taken at submission
    pub applicant_id: String,
    pub applicant_name: String,
    pub applicant_email: String,
    pub cover_letter: String,
    pub applied_at: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

impl Application {
    pub fn approved(&self) -> bool {
        self.status == ApplicationStatus::Approved
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationStats {
    pub total: u32,
    pub pending: u32,
    pub approved: u32,
    pub rejected: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub application_id: i64,
    pub client_id: String,
    pub worker_id: String,
    pub job_id: i64,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewWithWorker {
    #[serde(flatten)]
    pub review: Review,
    pub worker_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 50;

    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit: limit.max(1),
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(0, limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

/// Auth-provider record backing an [`Identity`]; federated identities carry no password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub salt: Option<String>,
}

impl Credential {
    pub fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Case-insensitive containment over title, description and company.
/// An empty term matches every job.
pub fn matches_search(title: &str, description: &str, company: &str, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    [title, description, company]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

impl JobFields {
    pub fn matches(&self, term: &str) -> bool {
        matches_search(&self.title, &self.description, &self.company, term)
    }
}
