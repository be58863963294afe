use anyhow::Context;
use chrono::Utc;
use rand::distributions::{Alphanumeric, DistString};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::db::{is_constraint_violation, Database};
use crate::error::{require_field, Result, WorkflowError};
use crate::models::{Credential, Identity, Role, User};

pub const MIN_PASSWORD_LEN: usize = 6;
const UID_LEN: usize = 28;

pub type ListenerId = usize;
type Listener = Box<dyn FnMut(Option<&Identity>)>;

/// Local stand-in for the hosted auth provider: issues identities and
/// notifies subscribers whenever the signed-in identity changes.
pub struct AuthProvider<'a> {
    db: &'a Database,
    current: Option<Identity>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: ListenerId,
}

impl<'a> AuthProvider<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            current: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Resumes a previously persisted session without notifying anyone.
    pub fn with_session(db: &'a Database, identity: Option<Identity>) -> Self {
        let mut provider = Self::new(db);
        provider.current = identity;
        provider
    }

    pub fn current_user(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    /// The listener fires immediately with the current state, then on every change.
    pub fn on_auth_state_changed<F>(&mut self, mut listener: F) -> ListenerId
    where
        F: FnMut(Option<&Identity>) + 'static,
    {
        listener(self.current.as_ref());
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn register(
        &mut self,
        email: &str,
        password: &str,
        name: &str,
        role: Role,
    ) -> Result<Identity> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(WorkflowError::WeakPassword {
                min: MIN_PASSWORD_LEN,
            });
        }
        require_field(name, "name")?;

        let salt = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
        let credential = Credential {
            uid: new_uid(),
            email,
            display_name: Some(name.trim().to_string()),
            password_hash: Some(hash_password(&salt, password)),
            salt: Some(salt),
        };
        self.create_account(&credential, role)?;
        info!(uid = %credential.uid, role = %role, "registered account");

        let identity = credential.identity();
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    pub fn sign_in(&mut self, email: &str, password: &str) -> Result<Identity> {
        let credential = self
            .db
            .get_credential_by_email(email)?
            .ok_or(WorkflowError::InvalidCredentials)?;

        let verified = match (&credential.salt, &credential.password_hash) {
            (Some(salt), Some(hash)) => hash_password(salt, password) == *hash,
            _ => false,
        };
        if !verified {
            warn!(email = %credential.email, "rejected sign-in");
            return Err(WorkflowError::InvalidCredentials);
        }

        let identity = credential.identity();
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    /// Accepts an identity already asserted by an external provider. First
    /// sight creates the profile with `role`.
    pub fn sign_in_federated(
        &mut self,
        email: &str,
        display_name: Option<&str>,
        role: Role,
    ) -> Result<Identity> {
        let email = normalize_email(email)?;
        let credential = match self.db.get_credential_by_email(&email)? {
            Some(existing) => existing,
            None => {
                let credential = Credential {
                    uid: new_uid(),
                    email,
                    display_name: display_name.map(|n| n.trim().to_string()),
                    password_hash: None,
                    salt: None,
                };
                self.create_account(&credential, role)?;
                info!(uid = %credential.uid, role = %role, "created federated account");
                credential
            }
        };

        let identity = credential.identity();
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    pub fn sign_out(&mut self) {
        if self.current.is_some() {
            self.set_current(None);
        }
    }

    fn create_account(&self, credential: &Credential, role: Role) -> Result<()> {
        let user = User {
            uid: credential.uid.clone(),
            role,
            name: credential.display_name.clone(),
            bio: None,
            created_at: Utc::now(),
        };
        self.db.create_account(&user, credential).map_err(|e| {
            if is_constraint_violation(&e) {
                WorkflowError::EmailInUse(credential.email.clone())
            } else {
                e.into()
            }
        })
    }

    fn set_current(&mut self, identity: Option<Identity>) {
        self.current = identity;
        for (_, listener) in self.listeners.iter_mut() {
            listener(self.current.as_ref());
        }
    }
}

/// Resolves the caller or fails with `NotAuthenticated`.
pub fn require_identity(caller: Option<&Identity>) -> Result<&Identity> {
    caller.ok_or(WorkflowError::NotAuthenticated)
}

/// Looks up the caller's profile and checks its role.
pub fn require_role(db: &Database, caller: Option<&Identity>, role: Role) -> Result<User> {
    let identity = require_identity(caller)?;
    let user = db
        .get_user(&identity.uid)?
        .ok_or_else(|| WorkflowError::UserNotFound(identity.uid.clone()))?;
    if user.role != role {
        warn!(uid = %identity.uid, required = %role, actual = %user.role, "forbidden");
        return Err(WorkflowError::Forbidden { required: role });
    }
    Ok(user)
}

fn normalize_email(email: &str) -> Result<String> {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    });
    let email = email.trim();
    if !re.is_match(email) {
        return Err(WorkflowError::InvalidEmail(email.to_string()));
    }
    Ok(email.to_lowercase())
}

fn hash_password(salt: &str, password: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", salt, password).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn new_uid() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), UID_LEN)
}

// --- Session persistence between CLI invocations ---

pub fn load_session(path: &Path) -> anyhow::Result<Option<Identity>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let identity = serde_json::from_str(&raw)
        .with_context(|| format!("Corrupt session file: {}", path.display()))?;
    Ok(Some(identity))
}

pub fn save_session(path: &Path, identity: Option<&Identity>) -> anyhow::Result<()> {
    match identity {
        Some(identity) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, serde_json::to_string_pretty(identity)?)
                .with_context(|| format!("Failed to write session file: {}", path.display()))?;
        }
        None => {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
    }
    Ok(())
}
