//! Runtime configuration for the bridge process.
//!
//! Everything resolves from the environment with platform defaults; there
//! is no config file. `TGRAM_SOCKET` points at the session daemon,
//! `TGRAM_DATA_DIR` holds the session marker written by `login`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::default_socket_path;

/// Default number of daemon connection attempts at startup.
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub struct Config {
    /// Session daemon socket.
    pub socket_path: PathBuf,
    /// Directory for persistent state (session marker).
    pub data_dir: PathBuf,
    /// Session marker file written on login, removed on logout.
    pub session_path: PathBuf,
    /// Per-call timeout against the daemon.
    pub call_timeout: Duration,
    /// Connection attempts (with exponential backoff) at startup.
    pub connect_attempts: u32,
}

impl Config {
    pub fn load() -> Self {
        let socket_path = env::var("TGRAM_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_socket_path());

        let data_dir = env::var("TGRAM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let session_path = env::var("TGRAM_SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("session.json"));

        let call_timeout = env::var("TGRAM_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let connect_attempts = env::var("TGRAM_CONNECT_ATTEMPTS")
            .ok()
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONNECT_ATTEMPTS);

        Self {
            socket_path,
            data_dir,
            session_path,
            call_timeout,
            connect_attempts,
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("tgram");
    }
    let base = env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join(".local").join("share").join("tgram")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_path_lives_under_data_dir_by_default() {
        // Only valid when the env overrides are unset, which is the normal
        // test environment.
        if env::var_os("TGRAM_SESSION_PATH").is_none() && env::var_os("TGRAM_DATA_DIR").is_none() {
            let config = Config::load();
            assert!(config.session_path.starts_with(&config.data_dir));
            assert_eq!(
                config.session_path.file_name().unwrap().to_str().unwrap(),
                "session.json"
            );
        }
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::load();
        assert!(config.connect_attempts > 0);
        assert!(config.call_timeout >= Duration::from_secs(1));
    }
}
