use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
}

pub type SessionListener = Box<dyn Fn(Option<&Session>) + Send + Sync>;

/// Source of the signed-in user. The planner only needs the user id to
/// scope its row store calls.
pub trait IdentityProvider: Send + Sync {
    fn session(&self) -> Option<Session>;

    fn sign_in(&self, user_id: &str, email: Option<&str>) -> anyhow::Result<Session>;

    /// Registers the user and starts a session. Providers without a
    /// separate registration step just sign in.
    fn sign_up(&self, user_id: &str, email: Option<&str>) -> anyhow::Result<Session> {
        self.sign_in(user_id, email)
    }

    fn sign_out(&self) -> anyhow::Result<()>;

    fn on_session_change(&self, listener: SessionListener);
}

/// Keeps the session in `session.json` under the data directory.
pub struct LocalIdentity {
    session_path: PathBuf,
    current: Mutex<Option<Session>>,
    listeners: Mutex<Vec<SessionListener>>,
}

impl LocalIdentity {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let session_path = data_dir.join("session.json");
        let current = read_session(&session_path)?;
        debug!(
            file = %session_path.display(),
            signed_in = current.is_some(),
            "opened local identity"
        );

        Ok(Self {
            session_path,
            current: Mutex::new(current),
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn publish(&self, session: Option<&Session>) {
        for listener in self.listeners.lock().iter() {
            listener(session);
        }
    }
}

impl IdentityProvider for LocalIdentity {
    fn session(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    #[tracing::instrument(skip(self))]
    fn sign_in(&self, user_id: &str, email: Option<&str>) -> anyhow::Result<Session> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(anyhow!("user id cannot be empty"));
        }

        let session = Session {
            user_id: user_id.to_string(),
            email: email
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string),
        };
        let payload = serde_json::to_string_pretty(&session)?;
        fs::write(&self.session_path, payload)
            .with_context(|| format!("failed writing {}", self.session_path.display()))?;

        *self.current.lock() = Some(session.clone());
        info!(user_id = %session.user_id, "signed in");
        self.publish(Some(&session));
        Ok(session)
    }

    #[tracing::instrument(skip(self))]
    fn sign_out(&self) -> anyhow::Result<()> {
        if self.session_path.exists() {
            fs::remove_file(&self.session_path)
                .with_context(|| format!("failed removing {}", self.session_path.display()))?;
        }
        *self.current.lock() = None;
        info!("signed out");
        self.publish(None);
        Ok(())
    }

    fn on_session_change(&self, listener: SessionListener) {
        self.listeners.lock().push(listener);
    }
}

fn read_session(path: &Path) -> anyhow::Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<Session>(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(err) => {
            warn!(file = %path.display(), error = %err, "ignoring unreadable session file");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn session_survives_reopen_and_notifies_listeners() {
        let temp = tempdir().expect("tempdir");
        let identity = LocalIdentity::open(temp.path()).expect("open identity");
        assert_eq!(identity.session(), None);

        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        identity.on_session_change(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let session = identity
            .sign_in(" ana ", Some("ana@example.com"))
            .expect("sign in");
        assert_eq!(session.user_id, "ana");

        let reopened = LocalIdentity::open(temp.path()).expect("reopen identity");
        assert_eq!(reopened.session(), Some(session));

        identity.sign_out().expect("sign out");
        assert_eq!(identity.session(), None);
        assert_eq!(changes.load(Ordering::SeqCst), 2);
        assert!(identity.sign_in("  ", None).is_err());
    }
}
