//! CLI command implementations

pub mod lehrer;
pub mod organisation;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use spsh_ldap::LdapClientService;

use crate::OutputFormat;

/// Context passed to all commands
pub struct CommandContext {
    pub service: LdapClientService,
    pub output_format: OutputFormat,
}

impl CommandContext {
    pub fn new(service: LdapClientService, output_format: OutputFormat) -> Self {
        Self {
            service,
            output_format,
        }
    }

    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    /// Print `value` as JSON, or `text` in text mode
    pub fn emit<T: Serialize>(&self, value: &T, text: &str) -> Result<()> {
        if self.is_json() {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text);
        }
        Ok(())
    }

    /// Print a confirmation line, or `value` as JSON
    pub fn success<T: Serialize>(&self, value: &T, msg: &str) -> Result<()> {
        if self.is_json() {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{} {}", "✓".green(), msg);
        }
        Ok(())
    }

    /// Print a line that reports a no-op
    pub fn unchanged<T: Serialize>(&self, value: &T, msg: &str) -> Result<()> {
        if self.is_json() {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{} {}", "-".yellow(), msg);
        }
        Ok(())
    }
}
