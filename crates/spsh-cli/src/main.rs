//! spsh - operator CLI for the SPSH directory client
//!
//! Runs single directory operations against the configured LDAP server.

mod commands;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use spsh_core::config::SpshConfig;
use spsh_ldap::{LdapClientService, LoggingEventPublisher};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::CommandContext;

#[derive(Parser)]
#[command(name = "spsh")]
#[command(version = spsh_core::VERSION)]
#[command(about = "Provision school staff in the LDAP directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SPSH_CONFIG")]
    config: Option<String>,

    /// LDAP server URL
    #[arg(long, global = true, env = "SPSH_LDAP_URL")]
    url: Option<String>,

    /// Retries per operation
    #[arg(long, global = true)]
    retries: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "SPSH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a Lehrer entry and add it to the school's group
    CreateLehrer {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,

        /// Given name
        #[arg(long)]
        vorname: String,

        /// Family name
        #[arg(long)]
        familienname: String,

        #[command(flatten)]
        domain: commands::lehrer::DomainArgs,

        /// Kennung of the school
        #[arg(long)]
        kennung: String,

        /// Primary email address
        #[arg(long)]
        mail: Option<String>,
    },

    /// Delete a Lehrer entry
    DeleteLehrer {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,

        #[command(flatten)]
        domain: commands::lehrer::DomainArgs,

        /// Kennung of the school
        #[arg(long, required_unless_present = "everywhere")]
        kennung: Option<String>,

        /// Delete whatever entry carries the username and leave all its groups
        #[arg(long)]
        everywhere: bool,
    },

    /// Change name attributes or the username of a person
    Rename {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,

        /// entryUUID of the person's entry, to resume an interrupted rename
        #[arg(long)]
        entry_uuid: Option<String>,

        /// New username
        #[arg(long)]
        new_username: Option<String>,

        /// New given name
        #[arg(long)]
        vorname: Option<String>,

        /// New family name
        #[arg(long)]
        familienname: Option<String>,
    },

    /// Set a new primary email address
    ChangeEmail {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,

        /// New primary address
        #[arg(long)]
        address: String,
    },

    /// Remove an alternative email address
    RemoveAlternativeAddress {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,

        /// Alternative address to remove
        #[arg(long)]
        address: String,
    },

    /// Generate and set a new password
    ResetPassword {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,
    },

    /// Show the attributes of a person's entry, creating it if missing
    Attributes {
        #[command(flatten)]
        person: commands::lehrer::PersonArgs,

        #[command(flatten)]
        domain: commands::lehrer::DomainArgs,
    },

    /// List the groups a person is a member of
    Groups {
        /// Username
        #[arg(long)]
        username: String,
    },

    /// List the members of a school's lehrer group
    Members {
        /// Kennung of the school
        #[arg(long)]
        kennung: String,
    },

    /// Delete the directory entries of an organisation
    DeleteOrganisation {
        /// Kennung of the organisation
        #[arg(long)]
        kennung: String,
    },

    /// Show which subtree an email domain belongs to
    ClassifyDomain {
        /// Email domain
        domain: String,
    },
}

fn init_logging(config: &SpshConfig, level: Option<&str>) {
    let level = level.unwrap_or(config.logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SpshConfig> {
    let mut config = match &cli.config {
        Some(path) => SpshConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => SpshConfig::from_env(),
    };

    if let Some(url) = &cli.url {
        config.ldap.url = url.clone();
    }
    if let Some(retries) = cli.retries {
        config.retry.default_retries = Some(retries);
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config, cli.log_level.as_deref());

    config.validate().context("Invalid configuration")?;
    tracing::debug!("Using directory {} below {}", config.ldap.url, config.ldap.base_dn);

    let service = LdapClientService::connect(&config, Arc::new(LoggingEventPublisher));
    let ctx = CommandContext::new(service, cli.output);

    run(&ctx, cli.command).await
}

async fn run(ctx: &CommandContext, command: Commands) -> anyhow::Result<()> {
    use commands::{lehrer, organisation};

    match command {
        Commands::CreateLehrer {
            person,
            vorname,
            familienname,
            domain,
            kennung,
            mail,
        } => {
            lehrer::create(ctx, &person, &vorname, &familienname, &domain, &kennung, mail.as_deref())
                .await
        }
        Commands::DeleteLehrer {
            person,
            domain,
            kennung,
            everywhere,
        } => {
            if everywhere {
                lehrer::delete_everywhere(ctx, &person).await
            } else {
                let kennung = kennung.context("--kennung is required")?;
                lehrer::delete(ctx, &person, &domain, &kennung).await
            }
        }
        Commands::Rename {
            person,
            entry_uuid,
            new_username,
            vorname,
            familienname,
        } => {
            lehrer::rename(ctx, &person, entry_uuid.as_deref(), new_username, vorname, familienname)
                .await
        }
        Commands::ChangeEmail { person, address } => {
            lehrer::change_email(ctx, &person, &address).await
        }
        Commands::RemoveAlternativeAddress { person, address } => {
            lehrer::remove_alternative_address(ctx, &person, &address).await
        }
        Commands::ResetPassword { person } => lehrer::reset_password(ctx, &person).await,
        Commands::Attributes { person, domain } => lehrer::attributes(ctx, &person, &domain).await,
        Commands::Groups { username } => lehrer::groups(ctx, &username).await,
        Commands::Members { kennung } => organisation::members(ctx, &kennung).await,
        Commands::DeleteOrganisation { kennung } => organisation::delete(ctx, &kennung).await,
        Commands::ClassifyDomain { domain } => organisation::classify_domain(ctx, &domain),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_lehrer() {
        let cli = Cli::try_parse_from([
            "spsh",
            "create-lehrer",
            "--person-id",
            "p-1",
            "--username",
            "mmustermann",
            "--vorname",
            "Max",
            "--familienname",
            "Mustermann",
            "--email-domain",
            "schule-sh.de",
            "--kennung",
            "1234567",
            "-o",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::CreateLehrer {
                person,
                domain,
                kennung,
                mail,
                ..
            } => {
                assert_eq!(person.username, "mmustermann");
                assert_eq!(domain.email_domain.as_deref(), Some("schule-sh.de"));
                assert_eq!(kennung, "1234567");
                assert_eq!(mail, None);
            }
            _ => panic!("expected create-lehrer"),
        }
    }

    #[test]
    fn test_delete_requires_kennung_unless_everywhere() {
        assert!(Cli::try_parse_from([
            "spsh",
            "delete-lehrer",
            "--person-id",
            "p-1",
            "--username",
            "mmustermann",
        ])
        .is_err());

        assert!(Cli::try_parse_from([
            "spsh",
            "delete-lehrer",
            "--person-id",
            "p-1",
            "--username",
            "mmustermann",
            "--everywhere",
        ])
        .is_ok());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "spsh",
            "--url",
            "ldaps://ldap.example.com:636",
            "--retries",
            "5",
            "classify-domain",
            "schule-sh.de",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.ldap.url, "ldaps://ldap.example.com:636");
        assert_eq!(config.retry.retries(), 5);
    }
}
