use tracing::info;

use crate::auth::require_identity;
use crate::db::Database;
use crate::error::{Result, WorkflowError};
use crate::models::{Identity, User};

pub fn get_profile(db: &Database, caller: Option<&Identity>) -> Result<User> {
    let identity = require_identity(caller)?;
    db.get_user(&identity.uid)?
        .ok_or_else(|| WorkflowError::UserNotFound(identity.uid.clone()))
}

/// Only name and bio are editable; role and email stay with the account.
pub fn update_profile(
    db: &Database,
    caller: Option<&Identity>,
    name: Option<&str>,
    bio: Option<&str>,
) -> Result<User> {
    let identity = require_identity(caller)?;
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    let bio = bio.map(str::trim);

    if db.update_user_profile(&identity.uid, name, bio)? == 0 {
        return Err(WorkflowError::UserNotFound(identity.uid.clone()));
    }
    info!(uid = %identity.uid, "updated profile");
    get_profile(db, caller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::test_support::{memory_db, worker};

    #[test]
    fn test_update_name_and_bio() {
        let db = memory_db();
        let me = worker(&db);

        let user = update_profile(&db, Some(&me), Some("Dana K."), Some("Rust dev")).unwrap();
        assert_eq!(user.name.as_deref(), Some("Dana K."));
        assert_eq!(user.bio.as_deref(), Some("Rust dev"));
        assert_eq!(user.role, Role::Worker);

        // omitted fields are left alone; a blank name is ignored
        let user = update_profile(&db, Some(&me), Some("   "), None).unwrap();
        assert_eq!(user.name.as_deref(), Some("Dana K."));
        assert_eq!(user.bio.as_deref(), Some("Rust dev"));
    }

    #[test]
    fn test_get_profile_reads_caller_record() {
        let db = memory_db();
        let me = worker(&db);

        let user = get_profile(&db, Some(&me)).unwrap();
        assert_eq!(user.uid, me.uid);
        assert_eq!(user.role, Role::Worker);
        assert_eq!(user.name.as_deref(), Some("Dana"));

        let orphan = Identity {
            uid: "no-profile".into(),
            email: "ghost@example.com".into(),
            display_name: None,
        };
        assert!(matches!(
            get_profile(&db, Some(&orphan)),
            Err(WorkflowError::UserNotFound(uid)) if uid == "no-profile"
        ));
    }

    #[test]
    fn test_profile_requires_identity() {
        let db = memory_db();
        assert!(matches!(
            get_profile(&db, None),
            Err(WorkflowError::NotAuthenticated)
        ));
        assert!(matches!(
            update_profile(&db, None, Some("x"), None),
            Err(WorkflowError::NotAuthenticated)
        ));
    }
}
