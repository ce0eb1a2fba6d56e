//! Person commands: create, delete, rename, mail, password, attributes

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::json;
use spsh_core::types::{InMemoryOrganisations, PersonAttributeChanges, PersonData};

use super::CommandContext;

#[derive(Debug, Clone, Args)]
pub struct PersonArgs {
    /// Id of the person in the upstream service
    #[arg(long)]
    pub person_id: Option<String>,

    /// Username
    #[arg(long)]
    pub username: String,
}

impl PersonArgs {
    /// The upstream id, falling back to the username
    pub fn person_id(&self) -> &str {
        self.person_id.as_deref().unwrap_or(&self.username)
    }
}

/// Where the email domain comes from: given directly, or resolved through
/// an organisation hierarchy file
#[derive(Debug, Clone, Args)]
pub struct DomainArgs {
    /// Email domain of the school
    #[arg(long, conflicts_with = "organisation_id")]
    pub email_domain: Option<String>,

    /// TOML file of `[[organisation]]` tables
    #[arg(long, requires = "organisation_id")]
    pub organisations: Option<String>,

    /// Organisation whose effective email domain is used
    #[arg(long, requires = "organisations")]
    pub organisation_id: Option<String>,
}

async fn resolve_email_domain(ctx: &CommandContext, args: &DomainArgs) -> Result<String> {
    if let Some(domain) = &args.email_domain {
        return Ok(domain.clone());
    }

    let (Some(path), Some(organisation_id)) = (&args.organisations, &args.organisation_id) else {
        anyhow::bail!("Either --email-domain or --organisations with --organisation-id is required");
    };

    let organisations = InMemoryOrganisations::from_file(path)
        .with_context(|| format!("Failed to load organisations from {}", path))?;

    ctx.service
        .resolve_effective_email_domain(&organisations, organisation_id)
        .await
        .with_context(|| format!("No email domain declared for organisation {}", organisation_id))
}

pub async fn create(
    ctx: &CommandContext,
    person: &PersonArgs,
    vorname: &str,
    familienname: &str,
    domain: &DomainArgs,
    kennung: &str,
    mail: Option<&str>,
) -> Result<()> {
    let email_domain = resolve_email_domain(ctx, domain).await?;
    let data = PersonData::new(person.person_id(), &person.username, vorname, familienname);

    let created = ctx
        .service
        .create_lehrer(&data, &email_domain, kennung, mail)
        .await
        .context("Failed to create lehrer")?;

    let dn = ctx.service.person_dn(&person.username, &email_domain)?;
    ctx.success(
        &json!({ "dn": dn, "person": created }),
        &format!(
            "Lehrer {} ({})",
            dn,
            created.entry_uuid.as_deref().unwrap_or("no entryUUID")
        ),
    )
}

pub async fn delete(
    ctx: &CommandContext,
    person: &PersonArgs,
    domain: &DomainArgs,
    kennung: &str,
) -> Result<()> {
    let email_domain = resolve_email_domain(ctx, domain).await?;
    let data = PersonData {
        id: person.person_id().to_string(),
        username: Some(person.username.clone()),
        vorname: String::new(),
        familienname: String::new(),
        entry_uuid: None,
    };

    let deleted = ctx
        .service
        .delete_lehrer(&data, &email_domain, kennung)
        .await
        .context("Failed to delete lehrer")?;

    let value = json!({ "username": person.username, "deleted": deleted });
    if deleted {
        ctx.success(&value, &format!("Deleted {}", person.username))
    } else {
        ctx.unchanged(&value, &format!("{} has no entry", person.username))
    }
}

pub async fn delete_everywhere(ctx: &CommandContext, person: &PersonArgs) -> Result<()> {
    let username = person.username.as_str();
    let deleted = ctx
        .service
        .delete_lehrer_by_username(person.person_id(), username)
        .await
        .context("Failed to delete lehrer")?;

    let value = json!({ "username": username, "dn": deleted });
    match &deleted {
        Some(dn) => ctx.success(&value, &format!("Deleted {}", dn)),
        None => ctx.unchanged(&value, &format!("{} has no entry", username)),
    }
}

pub async fn rename(
    ctx: &CommandContext,
    person: &PersonArgs,
    entry_uuid: Option<&str>,
    new_username: Option<String>,
    vorname: Option<String>,
    familienname: Option<String>,
) -> Result<()> {
    let changes = PersonAttributeChanges {
        vorname,
        familienname,
        username: new_username,
    };

    let update = ctx
        .service
        .modify_person_attributes(person.person_id(), &person.username, entry_uuid, &changes)
        .await
        .context("Failed to modify attributes")?;

    match update {
        Some(update) => {
            let mut text = format!("{}: changed {}", update.dn, update.changed_attributes.join(", "));
            if let Some(groups) = &update.groups {
                text.push_str(&format!("\n  {}", groups));
            }
            ctx.success(
                &json!({
                    "dn": update.dn,
                    "changedAttributes": update.changed_attributes,
                    "groups": update.groups,
                }),
                &text,
            )
        }
        None => ctx.unchanged(&json!({ "changedAttributes": [] }), "Nothing to change"),
    }
}

pub async fn change_email(ctx: &CommandContext, person: &PersonArgs, address: &str) -> Result<()> {
    let change = ctx
        .service
        .change_email_address(person.person_id(), &person.username, address)
        .await
        .context("Failed to change email address")?;

    ctx.success(
        &json!({
            "mailPrimaryAddress": change.primary,
            "previousPrimaryAddress": change.previous_primary,
        }),
        &format!("{} now receives mail at {}", person.username, change.primary),
    )
}

pub async fn remove_alternative_address(
    ctx: &CommandContext,
    person: &PersonArgs,
    address: &str,
) -> Result<()> {
    let removed = ctx
        .service
        .remove_mail_alternative_address(person.person_id(), &person.username, address)
        .await
        .context("Failed to remove alternative address")?;

    let value = json!({ "address": address, "removed": removed });
    if removed {
        ctx.success(&value, &format!("Removed {}", address))
    } else {
        ctx.unchanged(&value, &format!("{} is not an alternative address", address))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordReset<'a> {
    username: &'a str,
    password: &'a str,
}

pub async fn reset_password(ctx: &CommandContext, person: &PersonArgs) -> Result<()> {
    let password = ctx
        .service
        .change_password(person.person_id(), &person.username)
        .await
        .context("Failed to reset password")?;

    ctx.emit(
        &PasswordReset {
            username: &person.username,
            password: &password,
        },
        &password,
    )
}

pub async fn attributes(ctx: &CommandContext, person: &PersonArgs, domain: &DomainArgs) -> Result<()> {
    let email_domain = resolve_email_domain(ctx, domain).await?;
    let attributes = ctx
        .service
        .get_person_attributes(person.person_id(), &person.username, &email_domain)
        .await
        .context("Failed to read attributes")?;

    let mut text = format!("dn: {}", attributes.dn);
    let lines = [
        ("entryUUID", attributes.entry_uuid.as_deref()),
        ("givenName", attributes.given_name.as_deref()),
        ("sn", attributes.surname.as_deref()),
        ("cn", attributes.cn.as_deref()),
        ("mailPrimaryAddress", attributes.mail_primary_address.as_deref()),
    ];
    for (name, value) in lines {
        if let Some(value) = value {
            text.push_str(&format!("\n{}: {}", name, value));
        }
    }
    for address in &attributes.mail_alternative_address {
        text.push_str(&format!("\nmailAlternativeAddress: {}", address));
    }

    ctx.emit(&attributes, &text)
}

pub async fn groups(ctx: &CommandContext, username: &str) -> Result<()> {
    let groups = ctx
        .service
        .find_groups_for_person(username)
        .await
        .context("Failed to look up groups")?;

    let text = if groups.is_empty() {
        format!("{} is in no group", username)
    } else {
        groups.join("\n")
    };
    ctx.emit(&groups, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutputFormat;
    use spsh_core::SpshConfig;
    use spsh_ldap::{LdapClientService, LoggingEventPublisher};
    use std::io::Write;
    use std::sync::Arc;

    fn context() -> CommandContext {
        let service = LdapClientService::connect(&SpshConfig::default(), Arc::new(LoggingEventPublisher));
        CommandContext::new(service, OutputFormat::Text)
    }

    fn domain_args(
        email_domain: Option<&str>,
        organisations: Option<&str>,
        organisation_id: Option<&str>,
    ) -> DomainArgs {
        DomainArgs {
            email_domain: email_domain.map(str::to_string),
            organisations: organisations.map(str::to_string),
            organisation_id: organisation_id.map(str::to_string),
        }
    }

    #[test]
    fn test_person_id_falls_back_to_username() {
        let args = PersonArgs {
            person_id: None,
            username: "mmustermann".to_string(),
        };
        assert_eq!(args.person_id(), "mmustermann");
    }

    #[tokio::test]
    async fn test_explicit_domain_wins() {
        let ctx = context();
        let domain = resolve_email_domain(&ctx, &domain_args(Some("schule-sh.de"), None, None))
            .await
            .unwrap();
        assert_eq!(domain, "schule-sh.de");
    }

    #[tokio::test]
    async fn test_domain_from_organisation_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[organisation]]
            id = "traeger"
            emailDomain = "ersatzschule-sh.de"

            [[organisation]]
            id = "school"
            parentId = "traeger"
            "#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let ctx = context();
        let domain = resolve_email_domain(&ctx, &domain_args(None, Some(path), Some("school")))
            .await
            .unwrap();
        assert_eq!(domain, "ersatzschule-sh.de");

        assert!(resolve_email_domain(&ctx, &domain_args(None, Some(path), Some("unknown")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_domain_source() {
        let ctx = context();
        assert!(resolve_email_domain(&ctx, &domain_args(None, None, None)).await.is_err());
    }
}
