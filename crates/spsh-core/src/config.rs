//! Configuration for the SPSH directory client

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    DEFAULT_BASE_DN, DEFAULT_ERSATZSCHULEN_DOMAIN, DEFAULT_OEFFENTLICHE_SCHULEN_DOMAIN,
    DEFAULT_RETRIES,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpshConfig {
    #[serde(default)]
    pub ldap: LdapConfigSection,

    #[serde(default)]
    pub retry: RetryConfigSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SpshConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        tracing::debug!("Loading configuration from {}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::ConfigParse(e.to_string()))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SPSH_LDAP_URL") {
            config.ldap.url = url;
        }
        if let Ok(bind_dn) = std::env::var("SPSH_LDAP_BIND_DN") {
            config.ldap.bind_dn = bind_dn;
        }
        if let Ok(password) = std::env::var("SPSH_LDAP_ADMIN_PASSWORD") {
            config.ldap.admin_password = password;
        }
        if let Ok(base_dn) = std::env::var("SPSH_LDAP_BASE_DN") {
            config.ldap.base_dn = base_dn;
        }
        if let Ok(domain) = std::env::var("SPSH_LDAP_OEFFENTLICHE_SCHULEN_DOMAIN") {
            config.ldap.oeffentliche_schulen_domain = domain;
        }
        if let Ok(domain) = std::env::var("SPSH_LDAP_ERSATZSCHULEN_DOMAIN") {
            config.ldap.ersatzschulen_domain = domain;
        }
        if std::env::var("SPSH_LDAP_START_TLS").map(|v| v == "true").unwrap_or(false) {
            config.ldap.start_tls = true;
        }
        if let Ok(retries) = std::env::var("SPSH_LDAP_RETRY_WRAPPER_DEFAULT_RETRIES") {
            if let Ok(r) = retries.parse() {
                config.retry.default_retries = Some(r);
            }
        }
        if let Ok(delay) = std::env::var("SPSH_LDAP_RETRY_DELAY_MS") {
            if let Ok(d) = delay.parse() {
                config.retry.retry_delay_ms = d;
            }
        }
        if let Ok(level) = std::env::var("SPSH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("SPSH_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.ldap.validate()
    }
}

/// Directory server connection and layout
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfigSection {
    /// Server URL (ldap:// or ldaps://)
    #[serde(default = "default_ldap_url")]
    pub url: String,

    /// Upgrade plain connections with STARTTLS
    #[serde(default)]
    pub start_tls: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_ldap_timeout")]
    pub timeout_seconds: u64,

    /// DN of the service account all operations bind as
    #[serde(default = "default_bind_dn")]
    pub bind_dn: String,

    #[serde(default)]
    pub admin_password: String,

    /// Root of the tree; person subtrees and organisation units hang below it
    #[serde(default = "default_base_dn")]
    pub base_dn: String,

    /// Email domain whose persons live under `ou=oeffentlicheSchulen`
    #[serde(default = "default_oeffentliche_schulen_domain")]
    pub oeffentliche_schulen_domain: String,

    /// Email domain whose persons live under `ou=ersatzSchulen`
    #[serde(default = "default_ersatzschulen_domain")]
    pub ersatzschulen_domain: String,
}

fn default_ldap_url() -> String {
    "ldap://localhost:389".to_string()
}

fn default_ldap_timeout() -> u64 {
    10
}

fn default_bind_dn() -> String {
    format!("cn=admin,{}", DEFAULT_BASE_DN)
}

fn default_base_dn() -> String {
    DEFAULT_BASE_DN.to_string()
}

fn default_oeffentliche_schulen_domain() -> String {
    DEFAULT_OEFFENTLICHE_SCHULEN_DOMAIN.to_string()
}

fn default_ersatzschulen_domain() -> String {
    DEFAULT_ERSATZSCHULEN_DOMAIN.to_string()
}

impl Default for LdapConfigSection {
    fn default() -> Self {
        Self {
            url: default_ldap_url(),
            start_tls: false,
            timeout_seconds: default_ldap_timeout(),
            bind_dn: default_bind_dn(),
            admin_password: String::new(),
            base_dn: default_base_dn(),
            oeffentliche_schulen_domain: default_oeffentliche_schulen_domain(),
            ersatzschulen_domain: default_ersatzschulen_domain(),
        }
    }
}

impl std::fmt::Debug for LdapConfigSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfigSection")
            .field("url", &self.url)
            .field("start_tls", &self.start_tls)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("bind_dn", &self.bind_dn)
            .field("admin_password", &"***")
            .field("base_dn", &self.base_dn)
            .field("oeffentliche_schulen_domain", &self.oeffentliche_schulen_domain)
            .field("ersatzschulen_domain", &self.ersatzschulen_domain)
            .finish()
    }
}

impl LdapConfigSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.url.is_empty() {
            return Err(crate::Error::InvalidConfig("LDAP url is required".into()));
        }
        if !self.url.starts_with("ldap://") && !self.url.starts_with("ldaps://") {
            return Err(crate::Error::InvalidConfig(
                "LDAP url must start with ldap:// or ldaps://".into(),
            ));
        }
        if self.bind_dn.is_empty() {
            return Err(crate::Error::InvalidConfig("Bind DN is required".into()));
        }
        if self.base_dn.is_empty() {
            return Err(crate::Error::InvalidConfig("Base DN is required".into()));
        }
        if self.oeffentliche_schulen_domain.is_empty() || self.ersatzschulen_domain.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "Both school email domains must be set".into(),
            ));
        }
        if self.oeffentliche_schulen_domain == self.ersatzschulen_domain {
            return Err(crate::Error::InvalidConfig(format!(
                "School email domains must differ, both are {}",
                self.ersatzschulen_domain
            )));
        }

        Ok(())
    }
}

/// Retry bound applied to each logical directory operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfigSection {
    /// Retries after the first attempt; `DEFAULT_RETRIES` when unset
    #[serde(default)]
    pub default_retries: Option<u32>,

    /// Base delay between attempts; attempt n waits n * delay
    #[serde(default)]
    pub retry_delay_ms: u64,
}

impl RetryConfigSection {
    pub fn retries(&self) -> u32 {
        self.default_retries.unwrap_or(DEFAULT_RETRIES)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
