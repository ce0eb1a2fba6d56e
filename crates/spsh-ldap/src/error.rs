//! Directory client error types

use thiserror::Error;

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// LDAP result code: a value to delete is not present
pub const RC_NO_SUCH_ATTRIBUTE: u32 = 16;
/// LDAP result code: a value to add is present already
pub const RC_ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
/// LDAP result code: the target entry does not exist
pub const RC_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code: an entry with the target DN already exists
pub const RC_ALREADY_EXISTS: u32 = 68;
/// LDAP result code: the entry still has children
pub const RC_NOT_ALLOWED_ON_NON_LEAF: u32 = 66;

/// Errors surfaced by the directory client
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Could not reach directory server: {0}")]
    Connection(String),

    #[error("Directory bind failed: {0}")]
    Bind(String),

    #[error("Invalid directory request: {0}")]
    Request(String),

    #[error("Directory {operation} on '{dn}' failed with code {code}: {message}")]
    Operation {
        operation: &'static str,
        dn: String,
        code: u32,
        message: String,
    },

    #[error("No directory entry found for {0}")]
    EntryNotFound(String),

    #[error("Person {0} has no username")]
    UsernameRequired(String),

    #[error("Email domain '{0}' does not belong to any school subtree")]
    InvalidEmailDomain(String),

    #[error("Invalid email address: '{0}'")]
    InvalidEmailAddress(String),

    #[error("Creating lehrer {dn} failed: {source}")]
    CreateLehrer {
        dn: String,
        source: Box<DirectoryError>,
    },

    #[error("Deleting lehrer {dn} failed: {source}")]
    DeleteLehrer {
        dn: String,
        source: Box<DirectoryError>,
    },

    #[error("Modifying attributes of {username} failed: {source}")]
    ModifyAttributes {
        username: String,
        source: Box<DirectoryError>,
    },

    #[error("Changing email address of {username} failed: {source}")]
    ModifyEmail {
        username: String,
        source: Box<DirectoryError>,
    },

    #[error("Changing password of {username} failed: {source}")]
    ModifyPassword {
        username: String,
        source: Box<DirectoryError>,
    },

    #[error("Adding person to group {group} failed: {source}")]
    AddPersonToGroup {
        group: String,
        source: Box<DirectoryError>,
    },

    #[error("Removing person from group {group} failed: {source}")]
    RemovePersonFromGroup {
        group: String,
        source: Box<DirectoryError>,
    },

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Could not read member attribute of group {0}")]
    MemberDataParse(String),

    #[error("Deleting organisation {kennung} failed at {step}: {source}")]
    DeleteOrganisation {
        kennung: String,
        step: &'static str,
        source: Box<DirectoryError>,
    },

    #[error("Organisation {kennung} partially deleted ({deleted:?} removed), {step} failed: {source}")]
    OrganisationPartiallyDeleted {
        kennung: String,
        deleted: Vec<&'static str>,
        step: &'static str,
        source: Box<DirectoryError>,
    },

    #[error("Publishing event failed: {0}")]
    EventPublish(String),
}

impl DirectoryError {
    pub fn operation(
        operation: &'static str,
        dn: impl Into<String>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        DirectoryError::Operation {
            operation,
            dn: dn.into(),
            code,
            message: message.into(),
        }
    }

    /// Stable kind callers can branch on
    pub fn code(&self) -> &'static str {
        match self {
            DirectoryError::Connection(_) => "ConnectionFailed",
            DirectoryError::Bind(_) => "BindFailed",
            DirectoryError::Request(_) => "InvalidRequest",
            DirectoryError::Operation { .. } => "OperationFailed",
            DirectoryError::EntryNotFound(_) => "EntryNotFound",
            DirectoryError::UsernameRequired(_) => "UsernameRequired",
            DirectoryError::InvalidEmailDomain(_) => "InvalidEmailDomain",
            DirectoryError::InvalidEmailAddress(_) => "InvalidEmailAddress",
            DirectoryError::CreateLehrer { .. } => "CreateLehrerFailed",
            DirectoryError::DeleteLehrer { .. } => "DeleteLehrerFailed",
            DirectoryError::ModifyAttributes { .. } => "ModifyAttributesFailed",
            DirectoryError::ModifyEmail { .. } => "ModifyEmailFailed",
            DirectoryError::ModifyPassword { .. } => "ModifyPasswordFailed",
            DirectoryError::AddPersonToGroup { .. } => "AddPersonToGroupFailed",
            DirectoryError::RemovePersonFromGroup { .. } => "RemovePersonFromGroupFailed",
            DirectoryError::GroupNotFound(_) => "GroupNotFound",
            DirectoryError::MemberDataParse(_) => "MemberDataParse",
            DirectoryError::DeleteOrganisation { .. } => "DeleteOrganisationFailed",
            DirectoryError::OrganisationPartiallyDeleted { .. } => "OrganisationPartiallyDeleted",
            DirectoryError::EventPublish(_) => "EventPublishFailed",
        }
    }

    /// Whether the executor should try the operation again. Input the
    /// directory can never accept fails on the first attempt; everything
    /// else, including a not-found read, gets the full retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            DirectoryError::Request(_)
            | DirectoryError::UsernameRequired(_)
            | DirectoryError::InvalidEmailDomain(_)
            | DirectoryError::InvalidEmailAddress(_)
            | DirectoryError::MemberDataParse(_) => false,
            DirectoryError::CreateLehrer { source, .. }
            | DirectoryError::DeleteLehrer { source, .. }
            | DirectoryError::ModifyAttributes { source, .. }
            | DirectoryError::ModifyEmail { source, .. }
            | DirectoryError::ModifyPassword { source, .. }
            | DirectoryError::AddPersonToGroup { source, .. }
            | DirectoryError::RemovePersonFromGroup { source, .. }
            | DirectoryError::DeleteOrganisation { source, .. }
            | DirectoryError::OrganisationPartiallyDeleted { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    /// The LDAP result code behind this error, if the server returned one
    pub fn ldap_code(&self) -> Option<u32> {
        match self {
            DirectoryError::Operation { code, .. } => Some(*code),
            DirectoryError::CreateLehrer { source, .. }
            | DirectoryError::DeleteLehrer { source, .. }
            | DirectoryError::ModifyAttributes { source, .. }
            | DirectoryError::ModifyEmail { source, .. }
            | DirectoryError::ModifyPassword { source, .. }
            | DirectoryError::AddPersonToGroup { source, .. }
            | DirectoryError::RemovePersonFromGroup { source, .. }
            | DirectoryError::DeleteOrganisation { source, .. }
            | DirectoryError::OrganisationPartiallyDeleted { source, .. } => source.ldap_code(),
            _ => None,
        }
    }

    pub fn is_no_such_object(&self) -> bool {
        self.ldap_code() == Some(RC_NO_SUCH_OBJECT)
    }

    pub fn is_already_exists(&self) -> bool {
        self.ldap_code() == Some(RC_ALREADY_EXISTS)
    }
}

impl From<ldap3::LdapError> for DirectoryError {
    fn from(err: ldap3::LdapError) -> Self {
        use ldap3::LdapError;

        match err {
            LdapError::LdapResult { result } => {
                DirectoryError::operation("request", "", result.rc, result.text)
            }
            err @ (LdapError::Io { .. }
            | LdapError::OpSend { .. }
            | LdapError::ResultRecv { .. }
            | LdapError::IdScrubSend { .. }
            | LdapError::MiscSend { .. }
            | LdapError::Timeout { .. }
            | LdapError::EndOfStream) => DirectoryError::Connection(err.to_string()),
            // filter, url and encoding errors come back the same every time
            err => DirectoryError::Request(err.to_string()),
        }
    }
}
