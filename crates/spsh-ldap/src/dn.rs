//! Distinguished name composition
//!
//! Directory layout:
//!
//! ```text
//! {base}
//! ├── ou=oeffentlicheSchulen         uid={username}   persons
//! ├── ou=ersatzSchulen               uid={username}   persons
//! └── ou={kennung}                   one per organisation
//!     └── cn=groups                  organizationalRole
//!         └── cn=lehrer-{kennung}    groupOfNames, member=<person DNs>
//! ```

/// Naming attribute of person entries
pub const PERSON_NAMING_ATTRIBUTE: &str = "uid";

/// Common name of the organisational role holding an organisation's groups
pub const GROUPS_ROLE_CN: &str = "groups";

/// Prefix of the lehrer group of an organisation
pub const LEHRER_GROUP_PREFIX: &str = "lehrer-";

/// `uid={username},ou={subtree_ou},{base_dn}`
pub fn build_person_dn(username: &str, subtree_ou: &str, base_dn: &str) -> String {
    format!(
        "{}={},ou={},{}",
        PERSON_NAMING_ATTRIBUTE, username, subtree_ou, base_dn
    )
}

/// Replace the leading RDN of `old_dn` with `uid={new_username}`, keeping
/// every other component verbatim.
pub fn rename_dn(old_dn: &str, new_username: &str) -> String {
    let leading = format!("{}={}", PERSON_NAMING_ATTRIBUTE, new_username);
    match old_dn.split_once(',') {
        Some((_, rest)) => format!("{},{}", leading, rest),
        None => leading,
    }
}

/// The value of the leading `uid=` component, if the DN starts with one
pub fn username_from_dn(dn: &str) -> Option<&str> {
    let (name, value) = leading_rdn(dn).split_once('=')?;
    if name.trim().eq_ignore_ascii_case(PERSON_NAMING_ATTRIBUTE) {
        Some(value)
    } else {
        None
    }
}

pub fn leading_rdn(dn: &str) -> &str {
    dn.split_once(',').map(|(rdn, _)| rdn).unwrap_or(dn)
}

/// DNs compare case-insensitively
pub fn dn_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

pub fn subtree_dn(subtree_ou: &str, base_dn: &str) -> String {
    format!("ou={},{}", subtree_ou, base_dn)
}

pub fn organisation_unit_dn(kennung: &str, base_dn: &str) -> String {
    format!("ou={},{}", kennung, base_dn)
}

pub fn groups_role_dn(kennung: &str, base_dn: &str) -> String {
    format!("cn={},{}", GROUPS_ROLE_CN, organisation_unit_dn(kennung, base_dn))
}

pub fn lehrer_group_cn(kennung: &str) -> String {
    format!("{}{}", LEHRER_GROUP_PREFIX, kennung)
}

pub fn lehrer_group_dn(kennung: &str, base_dn: &str) -> String {
    format!(
        "cn={},{}",
        lehrer_group_cn(kennung),
        groups_role_dn(kennung, base_dn)
    )
}
