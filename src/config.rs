//! Host configuration file: `<base>/pgpi_repository/hosts.conf`,
//! INI-style, one section per `serverId`. Parsed by hand the way
//! `myconf.rs` parses MySQL option files, rather than by adding an `ini`
//! crate dependency the rest of this crate has no other use for.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{PlanPulseError, Result};
use crate::permissions::{check_max_mode, HOSTS_CONF_MAX_MODE};

/// One `[serverId]` section of `hosts.conf`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEntry {
    pub host: Option<String>,
    pub port: Option<String>,
    pub username: Option<String>,
    pub input_password: bool,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HostsConfig {
    pub servers: BTreeMap<String, HostEntry>,
}

fn is_valid_server_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `hosts.conf` contents. Section headers are `[serverId]` with
/// `serverId` matching `^[A-Za-z0-9_]+$`; recognized keys are `host`,
/// `port`, `username`, `input_password` (`true`/`false`), `password`.
pub fn parse_hosts_conf(contents: &str) -> Result<HostsConfig> {
    let mut config = HostsConfig::default();
    let mut current: Option<String> = None;

    for (lineno, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let section = &line[1..line.len() - 1];
            if !is_valid_server_id(section) {
                return Err(PlanPulseError::ConfigInvalid(format!(
                    "invalid serverId '{section}' at line {}",
                    lineno + 1
                )));
            }
            config.servers.entry(section.to_string()).or_default();
            current = Some(section.to_string());
            continue;
        }

        let Some(section) = &current else {
            return Err(PlanPulseError::ConfigInvalid(format!(
                "key=value pair outside any [section] at line {}",
                lineno + 1
            )));
        };

        let Some(eq_pos) = line.find('=') else {
            return Err(PlanPulseError::ConfigInvalid(format!(
                "malformed line {}: '{line}'",
                lineno + 1
            )));
        };
        let key = line[..eq_pos].trim().to_lowercase();
        let value = line[eq_pos + 1..].trim().to_string();
        let entry = config.servers.get_mut(section).expect("section inserted above");

        match key.as_str() {
            "host" => entry.host = Some(value),
            "port" => entry.port = Some(value),
            "username" => entry.username = Some(value),
            "input_password" => entry.input_password = value.eq_ignore_ascii_case("true"),
            "password" => entry.password = Some(value),
            other => {
                debug!("hosts.conf: ignoring unknown key '{other}' in [{section}]");
            }
        }
    }

    Ok(config)
}

/// Resolved repository configuration: base directory and the paths derived
/// from it.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub base_dir: PathBuf,
}

impl RepositoryConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        RepositoryConfig { base_dir: base_dir.into() }
    }

    pub fn repository_dir(&self) -> PathBuf {
        self.base_dir.join("pgpi_repository")
    }

    pub fn hosts_conf_path(&self) -> PathBuf {
        self.repository_dir().join("hosts.conf")
    }

    /// Read and parse `hosts.conf`, enforcing its permission ceiling first.
    pub fn load_hosts(&self) -> Result<HostsConfig> {
        self.check_hosts_conf_permissions()?;
        let contents = std::fs::read_to_string(self.hosts_conf_path())?;
        parse_hosts_conf(&contents)
    }

    pub fn check_hosts_conf_permissions(&self) -> Result<()> {
        let path = self.hosts_conf_path();
        if path.exists() {
            check_max_mode(&path, HOSTS_CONF_MAX_MODE)?;
        }
        Ok(())
    }

    pub fn server_dir(&self, server_id: &str) -> PathBuf {
        self.repository_dir().join(server_id)
    }
}

/// Validate a serverId against the section-name grammar and confirm it is
/// registered in `hosts.conf`.
pub fn check_server_id(config: &HostsConfig, server_id: &str) -> Result<()> {
    if !is_valid_server_id(server_id) {
        return Err(PlanPulseError::ConfigInvalid(format!(
            "serverId '{server_id}' is invalid; must match [A-Za-z0-9_]+"
        )));
    }
    if !config.servers.contains_key(server_id) {
        return Err(PlanPulseError::ConfigInvalid(format!(
            "serverId '{server_id}' is not registered in hosts.conf"
        )));
    }
    Ok(())
}

/// `create` default content: one example section, matching the original
/// tool's freshly created `hosts.conf`.
pub fn default_hosts_conf() -> String {
    "[server_1]\nhost = localhost\nport = 5432\nusername = postgres\ninput_password = false\npassword = \n\n[server_2]\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections_and_keys() {
        let contents = "[server_1]\nhost = localhost\nport = 5432\nusername = postgres\ninput_password = false\npassword =\n\n[server_2]\nhost = remote.example.com\ninput_password = true\n";
        let config = parse_hosts_conf(contents).unwrap();
        assert_eq!(config.servers.len(), 2);
        let s1 = &config.servers["server_1"];
        assert_eq!(s1.host.as_deref(), Some("localhost"));
        assert_eq!(s1.port.as_deref(), Some("5432"));
        assert!(!s1.input_password);

        let s2 = &config.servers["server_2"];
        assert_eq!(s2.host.as_deref(), Some("remote.example.com"));
        assert!(s2.input_password);
    }

    #[test]
    fn rejects_invalid_server_id() {
        let contents = "[bad id]\nhost = localhost\n";
        assert!(parse_hosts_conf(contents).is_err());
    }

    #[test]
    fn check_server_id_rejects_unregistered_section() {
        let config = parse_hosts_conf("[server_1]\nhost = localhost\n").unwrap();
        assert!(check_server_id(&config, "server_1").is_ok());
        assert!(check_server_id(&config, "server_2").is_err());
    }
}
