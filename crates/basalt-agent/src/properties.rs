use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use basalt_core::InstanceId;
use tokio::io::AsyncWriteExt;

use crate::settings::Settings;

const PROPERTIES_FILE: &str = "server.properties";
const RCON_PASSWORD_KEY: &str = "rcon.password";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("properties template not found at {0}")]
    TemplateMissing(PathBuf),
    #[error("properties file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Idempotently creates the instance-private directory.
pub async fn ensure_instance_dir(
    settings: &Settings,
    id: &InstanceId,
) -> Result<PathBuf, ConfigError> {
    let dir = settings.instance_dir(id);
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

pub async fn remove_instance_dir(settings: &Settings, id: &InstanceId) -> Result<(), ConfigError> {
    let dir = settings.instance_dir(id);
    if tokio::fs::metadata(&dir).await.is_ok() {
        tokio::fs::remove_dir_all(&dir).await?;
    }
    Ok(())
}

/// Copies the properties template into the instance directory and injects the
/// admin credential. Used once at creation time.
pub async fn materialize_from_template(
    settings: &Settings,
    id: &InstanceId,
    rcon_password: &str,
) -> Result<(), ConfigError> {
    let dir = ensure_instance_dir(settings, id).await?;

    let template = match tokio::fs::read_to_string(&settings.template_path).await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::TemplateMissing(settings.template_path.clone()));
        }
        Err(e) => return Err(e.into()),
    };

    let out = set_key(&template, RCON_PASSWORD_KEY, rcon_password);
    write_atomic(&dir.join(PROPERTIES_FILE), out.as_bytes()).await
}

/// Read-modify-write patch of `server.properties`.
///
/// Present values overwrite their key (payload underscores become the file's
/// hyphens); `None` entries leave the key untouched. Keys not named in the
/// patch survive unchanged, as do comments and ordering.
pub async fn patch(
    settings: &Settings,
    id: &InstanceId,
    changes: &BTreeMap<String, Option<String>>,
) -> Result<(), ConfigError> {
    let path = settings.instance_dir(id).join(PROPERTIES_FILE);
    let existing = tokio::fs::read_to_string(&path).await?;

    let mut out = existing;
    for (key, value) in changes {
        if let Some(value) = value {
            out = set_key(&out, &key.replace('_', "-"), value);
        }
    }

    write_atomic(&path, out.as_bytes()).await
}

/// Overwrites (or appends) one `key=value` line, preserving everything else.
fn set_key(text: &str, key: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut wrote = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('#')
            && trimmed
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key)
        {
            out.push_str(&format!("{key}={value}\n"));
            wrote = true;
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !wrote {
        out.push_str(&format!("{key}={value}\n"));
    }
    out
}

/// A failed write must never leave a half-written properties file.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let tmp = path.with_extension("properties.tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    f.write_all(data).await?;
    f.flush().await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
