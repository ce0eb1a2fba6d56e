//! Organisation commands: members, delete, domain classification

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use spsh_ldap::SchoolSubtree;

use super::CommandContext;

pub async fn members(ctx: &CommandContext, kennung: &str) -> Result<()> {
    let members = ctx
        .service
        .get_organisation_members(kennung)
        .await
        .context("Failed to read organisation members")?;

    let text = if members.is_empty() {
        format!("Organisation {} has no lehrer group members", kennung)
    } else {
        members.join("\n")
    };
    ctx.emit(&members, &text)
}

pub async fn delete(ctx: &CommandContext, kennung: &str) -> Result<()> {
    ctx.service
        .delete_organisation(kennung)
        .await
        .with_context(|| format!("Failed to delete organisation {}", kennung))?;

    ctx.success(
        &json!({ "kennung": kennung, "deleted": true }),
        &format!("Deleted organisation {}", kennung),
    )
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct DomainClassification {
    email_domain: String,
    subtree: SchoolSubtree,
    ou: &'static str,
}

fn classify(ctx: &CommandContext, domain: &str) -> Result<DomainClassification> {
    let subtree = ctx.service.classify_domain(domain)?;
    Ok(DomainClassification {
        email_domain: domain.to_string(),
        subtree,
        ou: subtree.ou(),
    })
}

pub fn classify_domain(ctx: &CommandContext, domain: &str) -> Result<()> {
    let classification = classify(ctx, domain)?;
    ctx.emit(
        &classification,
        &format!("{} -> ou={}", domain, classification.ou),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutputFormat;
    use spsh_core::SpshConfig;
    use spsh_ldap::{LdapClientService, LoggingEventPublisher};
    use std::sync::Arc;

    fn context() -> CommandContext {
        let service = LdapClientService::connect(&SpshConfig::default(), Arc::new(LoggingEventPublisher));
        CommandContext::new(service, OutputFormat::Json)
    }

    #[test]
    fn test_classify_default_domains() {
        let ctx = context();
        let classification = classify(&ctx, "ersatzschule-sh.de").unwrap();
        assert_eq!(classification.subtree, SchoolSubtree::Ersatzschulen);
        assert_eq!(classification.ou, "ersatzSchulen");

        let json = serde_json::to_value(classify(&ctx, "schule-sh.de").unwrap()).unwrap();
        assert_eq!(json["subtree"], "oeffentliche_schulen");
        assert_eq!(json["emailDomain"], "schule-sh.de");
    }

    #[test]
    fn test_classify_unknown_domain() {
        let err = classify(&context(), "not-a-real-domain.de").unwrap_err();
        assert!(err.to_string().contains("not-a-real-domain.de"));
    }
}
