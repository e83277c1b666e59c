//! Optional durable mirror of the in-memory credential
//!
//! Persists `{token, expires_at_ms, user}` to a JSON file so a restarted
//! process can resume its session. The mirror is never authoritative: a
//! restored credential has to be accepted by `GET /auth/profile` before the
//! session glue trusts it. All writes use atomic temp-file + rename with 0600
//! permissions since the file holds a bearer token.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::{Error, Result};
use crate::token::User;

/// What the mirror file holds.
///
/// `expires_at_ms` is a unix timestamp in milliseconds (absolute wall clock),
/// because the monotonic instant used in memory does not survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,
    pub expires_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

fn serialize_secret<S: Serializer>(secret: &Secret<String>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose())
}

/// File-backed credential mirror.
#[derive(Debug, Clone)]
pub struct CredentialMirror {
    path: PathBuf,
}

impl CredentialMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, if one was written.
    pub async fn load(&self) -> Result<Option<MirrorSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Io(format!("reading credential mirror: {e}")))?;
        let snapshot = serde_json::from_str(&contents)
            .map_err(|e| Error::MirrorParse(format!("parsing credential mirror: {e}")))?;
        debug!(path = %self.path.display(), "loaded credential mirror");
        Ok(Some(snapshot))
    }

    pub async fn save(&self, snapshot: &MirrorSnapshot) -> Result<()> {
        write_atomic(&self.path, snapshot).await
    }

    /// Delete the mirror file. Missing file is not an error.
    pub async fn remove(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed credential mirror");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("removing credential mirror: {e}"))),
        }
    }
}

/// Write the snapshot atomically: temp file in the same directory, 0600,
/// then rename over the target.
async fn write_atomic(path: &Path, snapshot: &MirrorSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| Error::MirrorParse(format!("serializing credential mirror: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("mirror path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp mirror file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting mirror file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp mirror file: {e}")))?;

    debug!(path = %path.display(), "persisted credential mirror");
    Ok(())
}
