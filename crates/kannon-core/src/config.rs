//! Process configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file named by
//! `KANNON_CONFIG`, then `KANNON_*` environment variables. A `.env` file in the
//! working directory is loaded into the environment first.

use std::path::Path;
use std::str::FromStr;

use kannon_smtp::{Relay, Security};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatcher::DispatchFailurePolicy;
use crate::{Error, Result};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_FILE_VAR: &str = "KANNON_CONFIG";

/// Security mode of the SMTP relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plain TCP.
    #[default]
    None,
    /// Implicit TLS.
    Tls,
    /// STARTTLS upgrade after the greeting.
    StartTls,
}

impl FromStr for SmtpSecurity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let security: Security = s.parse().map_err(|e: kannon_smtp::Error| {
            Error::Config(e.to_string())
        })?;
        Ok(security.into())
    }
}

impl From<Security> for SmtpSecurity {
    fn from(security: Security) -> Self {
        match security {
            Security::None => Self::None,
            Security::Tls => Self::Tls,
            Security::StartTls => Self::StartTls,
        }
    }
}

impl From<SmtpSecurity> for Security {
    fn from(security: SmtpSecurity) -> Self {
        match security {
            SmtpSecurity::None => Self::None,
            SmtpSecurity::Tls => Self::Tls,
            SmtpSecurity::StartTls => Self::StartTls,
        }
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Connection security.
    pub security: SmtpSecurity,
    /// Name announced in `EHLO`.
    pub hello_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            security: SmtpSecurity::None,
            hello_name: "localhost".to_string(),
        }
    }
}

/// Everything a `kannon` process needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NATS server URL.
    pub nats_url: String,
    /// SQLite database URL.
    pub database_url: String,
    /// SMTP relay used by the sending worker.
    pub smtp: SmtpConfig,
    /// What the dispatcher does with entries it cannot publish.
    pub dispatch_failure_policy: DispatchFailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nats_url: "nats://127.0.0.1:4222".to_string(),
            database_url: "sqlite:kannon.db?mode=rwc".to_string(),
            smtp: SmtpConfig::default(),
            dispatch_failure_policy: DispatchFailurePolicy::default(),
        }
    }
}

impl Config {
    /// Loads `.env`, the optional JSON file and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `.env` or the JSON file cannot be read or
    /// parsed, or an override has an invalid value.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Same as [`load`](Self::load), but `file` takes precedence over
    /// `KANNON_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on any unreadable or invalid layer.
    pub fn load_with(file: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!("cannot read .env: {e}"))),
        }

        let mut config = match (file, std::env::var(CONFIG_FILE_VAR)) {
            (Some(path), _) => Self::from_file(path)?,
            (None, Ok(path)) => Self::from_file(Path::new(&path))?,
            (None, Err(_)) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads a JSON configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))
    }

    /// Applies `KANNON_*` overrides from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a port, security mode or policy does not
    /// parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("KANNON_NATS_URL") {
            self.nats_url = url;
        }
        if let Some(url) = lookup("KANNON_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(host) = lookup("KANNON_SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(port) = lookup("KANNON_SMTP_PORT") {
            self.smtp.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid KANNON_SMTP_PORT: {port}")))?;
        }
        if let Some(security) = lookup("KANNON_SMTP_SECURITY") {
            self.smtp.security = security.parse()?;
        }
        if let Some(name) = lookup("KANNON_SMTP_HELLO_NAME") {
            self.smtp.hello_name = name;
        }
        if let Some(policy) = lookup("KANNON_DISPATCH_FAILURE_POLICY") {
            self.dispatch_failure_policy = policy.parse()?;
        }
        Ok(())
    }

    /// Builds the relay client for the sending worker.
    #[must_use]
    pub fn relay(&self) -> Relay {
        Relay::new(self.smtp.host.as_str(), self.smtp.port)
            .security(self.smtp.security.into())
            .hello_name(self.smtp.hello_name.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.nats_url, "nats://127.0.0.1:4222");
        assert_eq!(config.database_url, "sqlite:kannon.db?mode=rwc");
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.dispatch_failure_policy, DispatchFailurePolicy::Hold);
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"nats_url": "nats://queue:4222", "smtp": {{"host": "relay.acme.test", "security": "starttls"}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.nats_url, "nats://queue:4222");
        assert_eq!(config.database_url, "sqlite:kannon.db?mode=rwc");
        assert_eq!(config.smtp.host, "relay.acme.test");
        assert_eq!(config.smtp.security, SmtpSecurity::StartTls);
        assert_eq!(config.smtp.port, 25);
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_file(Path::new("/nonexistent/kannon.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("KANNON_NATS_URL", "nats://nats:4222"),
                ("KANNON_SMTP_HOST", "mx.acme.test"),
                ("KANNON_SMTP_PORT", "465"),
                ("KANNON_SMTP_SECURITY", "tls"),
                ("KANNON_SMTP_HELLO_NAME", "mailer.acme.test"),
                ("KANNON_DISPATCH_FAILURE_POLICY", "fail"),
            ]))
            .unwrap();

        assert_eq!(config.nats_url, "nats://nats:4222");
        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.smtp.security, SmtpSecurity::Tls);
        assert_eq!(config.dispatch_failure_policy, DispatchFailurePolicy::Fail);

        let relay = config.relay();
        assert_eq!(relay.host(), "mx.acme.test");
        assert_eq!(relay.port(), 465);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = Config::default();
        assert!(config.apply_env(lookup(&[("KANNON_SMTP_PORT", "smtp")])).is_err());
        assert!(config.apply_env(lookup(&[("KANNON_SMTP_SECURITY", "ssh")])).is_err());
        assert!(
            config
                .apply_env(lookup(&[("KANNON_DISPATCH_FAILURE_POLICY", "retry")]))
                .is_err()
        );
    }
}
