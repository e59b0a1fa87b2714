use std::path::PathBuf;

const DEFAULT_IMAGE: &str = "itzg/minecraft-server";
const DEFAULT_MIN_PORT: u16 = 25565;
const DEFAULT_MAX_PORT: u16 = 25665;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_MAX_TASK_ATTEMPTS: u32 = 3;
const DEFAULT_CONSOLE_TIMEOUT_SECS: u64 = 10;

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse::<u16>().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse::<u32>().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
}

fn data_root() -> PathBuf {
    let raw = std::env::var("BASALT_DATA_ROOT").unwrap_or_else(|_| "./data".to_string());
    let p = PathBuf::from(raw);
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };

    // Best-effort canonicalization: don't fail if the directory doesn't exist yet.
    std::fs::canonicalize(&abs).unwrap_or(abs)
}

/// Process-wide configuration, built once in `main` and passed explicitly
/// into every component that needs it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_root: PathBuf,
    pub template_path: PathBuf,
    pub image: String,
    pub min_port: u16,
    pub max_port: u16,
    pub rcon_host: String,
    pub workers: usize,
    pub max_task_attempts: u32,
    pub console_timeout: std::time::Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        let data_root = data_root();
        let template_path = std::env::var("BASALT_TEMPLATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("static").join("server.properties.template"));

        let min_port = env_u16("BASALT_MIN_PORT").unwrap_or(DEFAULT_MIN_PORT);
        let max_port = env_u16("BASALT_MAX_PORT")
            .unwrap_or(DEFAULT_MAX_PORT)
            .max(min_port);

        Self {
            data_root,
            template_path,
            image: std::env::var("BASALT_IMAGE").unwrap_or_else(|_| DEFAULT_IMAGE.to_string()),
            min_port,
            max_port,
            rcon_host: std::env::var("BASALT_RCON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            workers: env_usize("BASALT_WORKERS")
                .map(|v| v.clamp(1, 16))
                .unwrap_or(DEFAULT_WORKERS),
            max_task_attempts: env_u32("BASALT_MAX_TASK_ATTEMPTS")
                .map(|v| v.clamp(1, 10))
                .unwrap_or(DEFAULT_MAX_TASK_ATTEMPTS),
            console_timeout: std::time::Duration::from_secs(
                std::env::var("BASALT_CONSOLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|v| v.clamp(1, 120))
                    .unwrap_or(DEFAULT_CONSOLE_TIMEOUT_SECS),
            ),
        }
    }

    /// Instance-private directory, bind-mounted into the container at /data.
    pub fn instance_dir(&self, id: &basalt_core::InstanceId) -> PathBuf {
        self.data_root.join("servers").join(&id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            data_root: PathBuf::from("/tmp/basalt"),
            template_path: PathBuf::from("/tmp/basalt/server.properties.template"),
            image: DEFAULT_IMAGE.to_string(),
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
            rcon_host: "127.0.0.1".to_string(),
            workers: 1,
            max_task_attempts: 1,
            console_timeout: std::time::Duration::from_secs(1),
        }
    }

    #[test]
    fn instance_dir_is_under_servers() {
        let s = test_settings();
        let id = basalt_core::InstanceId("abc".to_string());
        assert_eq!(s.instance_dir(&id), PathBuf::from("/tmp/basalt/servers/abc"));
    }
}
