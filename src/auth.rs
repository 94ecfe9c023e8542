//! Interactive login/logout flows and the local session marker.
//!
//! These run instead of the bridge loop when the process is invoked with
//! the `login` / `logout` subcommand: prompt on the controlling terminal,
//! drive the daemon's auth calls, and record who is signed in. The marker
//! file is informational (the daemon owns the real credentials) but it
//! lets the bridge refuse to start with a clear message when nobody is
//! logged in.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dialoguer::Input;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::backend::BackendClient;
use crate::client::ChatError;
use crate::models::UserInfo;

/// How many times a wrong confirmation code may be retried.
const MAX_CODE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("too many failed code attempts")]
    TooManyAttempts,
}

/// Local record of the signed-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: i64,
    pub phone: String,
    pub logged_in_at: i64,
}

/// Stores the session marker under the data dir with owner-only access.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<Option<SessionInfo>, AuthError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err)),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn store(&self, info: &SessionInfo) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let payload = serde_json::to_string_pretty(info)?;
        fs::write(&self.path, payload)?;
        set_file_permissions(&self.path, 0o600)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err)),
        }
    }
}

/// Interactive login: phone → code → signed in.
///
/// The phone may come from the command line; the confirmation code is
/// always prompted. A wrong code can be retried a few times before the
/// flow gives up.
pub async fn login(
    client: &BackendClient,
    store: &SessionStore,
    phone: Option<String>,
) -> Result<UserInfo, AuthError> {
    let phone = match phone {
        Some(phone) => phone.trim().to_string(),
        None => prompt_phone()?,
    };

    let code_hash = client.send_login_code(&phone).await?;

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = prompt_code()?;
        match client.sign_in(&phone, &code_hash, &code).await {
            Ok(me) => {
                store.store(&SessionInfo {
                    user_id: me.id,
                    phone: phone.clone(),
                    logged_in_at: chrono::Utc::now().timestamp(),
                })?;
                println!("Welcome, {}.", me.display_name());
                return Ok(me);
            }
            Err(err) if attempt < MAX_CODE_ATTEMPTS => {
                eprintln!("Sign-in failed: {err}. Try again.");
            }
            Err(err) => {
                eprintln!("Sign-in failed: {err}.");
                return Err(err.into());
            }
        }
    }

    Err(AuthError::TooManyAttempts)
}

/// Invalidate the daemon session and remove the local marker.
///
/// The daemon call is best-effort: a dead daemon must not keep the local
/// state around.
pub async fn logout(client: Option<&BackendClient>, store: &SessionStore) -> Result<(), AuthError> {
    if let Some(client) = client {
        if let Err(err) = client.log_out().await {
            warn!("daemon logout failed: {err}");
        }
    }
    store.clear()?;
    println!("Logged out.");
    Ok(())
}

fn prompt_phone() -> Result<String, AuthError> {
    let phone: String = Input::new()
        .with_prompt("Phone (international format)")
        .interact_text()?;
    Ok(phone.trim().to_string())
}

fn prompt_code() -> Result<String, AuthError> {
    let code: String = Input::new().with_prompt("Code").interact_text()?;
    Ok(code.trim().to_string())
}

fn ensure_dir(path: &Path) -> Result<(), io::Error> {
    fs::create_dir_all(path)?;
    set_dir_permissions(path, 0o700)?;
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let perm = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perm)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path, mode: u32) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let perm = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perm)
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path, _mode: u32) -> Result<(), io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> SessionStore {
        let path = std::env::temp_dir().join(format!(
            "tgram-test-{}-{}-{}.json",
            name,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        SessionStore::new(path)
    }

    #[test]
    fn test_load_missing_marker_is_none() {
        let store = temp_store("missing");
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_store_load_clear_roundtrip() {
        let store = temp_store("roundtrip");
        let info = SessionInfo {
            user_id: 42,
            phone: "+15550100".to_string(),
            logged_in_at: 1_700_000_000,
        };
        store.store(&info).unwrap();

        let loaded = store.load().unwrap().expect("marker should exist");
        assert_eq!(loaded.user_id, 42);
        assert_eq!(loaded.phone, "+15550100");

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_marker_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let store = temp_store("perms");
        store
            .store(&SessionInfo {
                user_id: 1,
                phone: "+1".to_string(),
                logged_in_at: 0,
            })
            .unwrap();

        let mode = fs::metadata(&store.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        store.clear().unwrap();
    }
}
