use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Runtime options, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub interval_secs: u64,
    pub listen_port: u16,
    pub target_range: String,
    pub group_name: String,
    pub scan_method: String,
    pub scan_timeout_secs: u64,
    pub verbose: bool,
}

impl ExporterConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            interval_secs: env_parsed("NMAP_COLLECTOR_INTERVAL", 30)?,
            listen_port: env_parsed("NMAP_COLLECTOR_PORT", 8000)?,
            target_range: env_or("NMAP_COLLECTOR_IP_RANGE", "192.168.0.0/24"),
            group_name: env_or("NMAP_COLLECTOR_GROUP_NAME", ""),
            scan_method: env_or("NMAP_COLLECTOR_SCAN_METHOD", "-F"),
            scan_timeout_secs: env_parsed("NMAP_COLLECTOR_SCAN_TIMEOUT", 600)?,
            verbose: env::var("NMAP_COLLECTOR_VERBOSE")
                .map(|v| !v.is_empty())
                .unwrap_or(false),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_overrides_and_rejects() {
        for key in [
            "NMAP_COLLECTOR_INTERVAL",
            "NMAP_COLLECTOR_PORT",
            "NMAP_COLLECTOR_IP_RANGE",
            "NMAP_COLLECTOR_GROUP_NAME",
            "NMAP_COLLECTOR_SCAN_METHOD",
            "NMAP_COLLECTOR_SCAN_TIMEOUT",
            "NMAP_COLLECTOR_VERBOSE",
        ] {
            env::remove_var(key);
        }

        let config = ExporterConfig::from_env().unwrap();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.listen_port, 8000);
        assert_eq!(config.target_range, "192.168.0.0/24");
        assert_eq!(config.group_name, "");
        assert_eq!(config.scan_method, "-F");
        assert_eq!(config.scan_timeout_secs, 600);
        assert!(!config.verbose);

        env::set_var("NMAP_COLLECTOR_INTERVAL", "90");
        env::set_var("NMAP_COLLECTOR_VERBOSE", "1");
        let config = ExporterConfig::from_env().unwrap();
        assert_eq!(config.interval_secs, 90);
        assert!(config.verbose);

        env::set_var("NMAP_COLLECTOR_INTERVAL", "soon");
        assert!(ExporterConfig::from_env().is_err());

        env::remove_var("NMAP_COLLECTOR_INTERVAL");
        env::remove_var("NMAP_COLLECTOR_VERBOSE");
    }
}
