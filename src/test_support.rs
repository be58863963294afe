use crate::auth::AuthProvider;
use crate::db::Database;
use crate::models::{Identity, JobFields, Role};

pub fn memory_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.init().unwrap();
    db
}

pub fn fields(title: &str, company: &str) -> JobFields {
    JobFields {
        title: title.to_string(),
        description: format!("{} wanted at {}", title, company),
        company: company.to_string(),
        location: "Remote".to_string(),
        salary: "$100k".to_string(),
        job_type: "Full-time".to_string(),
    }
}

pub fn account(db: &Database, email: &str, name: &str, role: Role) -> Identity {
    AuthProvider::new(db)
        .register(email, "password1", name, role)
        .unwrap()
}

pub fn client(db: &Database) -> Identity {
    account(db, "client@acme.test", "Acme Hiring", Role::Client)
}

pub fn worker(db: &Database) -> Identity {
    account(db, "dana@workers.test", "Dana", Role::Worker)
}
