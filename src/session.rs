//! Remote endpoint identity for queries and subscriptions.

use crate::error::{EventLogError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value reported for a credential field that was never set.
pub const NULL_SENTINEL: &str = "(NULL)";

/// Authentication mechanism used when connecting to a remote host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlag {
    #[default]
    Default,
    Negotiate,
    Kerberos,
    Ntlm,
}

impl AuthFlag {
    /// Symbolic names, in enum order.
    const NAMES: [(&'static str, AuthFlag); 4] = [
        ("AuthDefault", AuthFlag::Default),
        ("AuthNegotiate", AuthFlag::Negotiate),
        ("AuthKerberos", AuthFlag::Kerberos),
        ("AuthNTLM", AuthFlag::Ntlm),
    ];

    /// Numeric value as understood by RPC login.
    pub fn value(self) -> u32 {
        match self {
            AuthFlag::Default => 0,
            AuthFlag::Negotiate => 1,
            AuthFlag::Kerberos => 2,
            AuthFlag::Ntlm => 3,
        }
    }

    pub fn name(self) -> &'static str {
        Self::NAMES[self.value() as usize].0
    }
}

impl fmt::Display for AuthFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthFlag {
    type Err = EventLogError;

    /// Accepts lowercase names (`"ntlm"`) and symbolic names (`"AuthNTLM"`).
    fn from_str(s: &str) -> Result<Self> {
        let flag = match s {
            "default" => Some(AuthFlag::Default),
            "negotiate" => Some(AuthFlag::Negotiate),
            "kerberos" => Some(AuthFlag::Kerberos),
            "ntlm" => Some(AuthFlag::Ntlm),
            _ => Self::NAMES
                .iter()
                .find(|(name, _)| *name == s)
                .map(|(_, flag)| *flag),
        };
        flag.ok_or_else(|| EventLogError::invalid_argument(format!("Unknown RPC login flag: {}", s)))
    }
}

impl TryFrom<&str> for AuthFlag {
    type Error = EventLogError;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<u32> for AuthFlag {
    type Error = EventLogError;

    fn try_from(value: u32) -> Result<Self> {
        Self::NAMES
            .get(value as usize)
            .map(|(_, flag)| *flag)
            .ok_or_else(|| {
                EventLogError::invalid_argument(format!("Unknown RPC login flag: {}", value))
            })
    }
}

/// Remote endpoint identity.
///
/// Credential fields that were never set read back as [`NULL_SENTINEL`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    server: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, skip_serializing)]
    password: Option<String>,
    #[serde(default)]
    flags: AuthFlag,
}

impl Session {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            domain: None,
            username: None,
            password: None,
            flags: AuthFlag::Default,
        }
    }

    /// Session with credentials, builder style.
    pub fn with_credentials(
        mut self,
        domain: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Self {
        self.domain = domain.map(str::to_string);
        self.username = username.map(str::to_string);
        self.password = password.map(str::to_string);
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn set_server(&mut self, server: impl Into<String>) {
        self.server = server.into();
    }

    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(NULL_SENTINEL)
    }

    pub fn set_domain(&mut self, domain: impl Into<String>) {
        self.domain = Some(domain.into());
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(NULL_SENTINEL)
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or(NULL_SENTINEL)
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// True when any credential field has been set.
    pub fn has_credentials(&self) -> bool {
        self.domain.is_some() || self.username.is_some() || self.password.is_some()
    }

    pub fn flags(&self) -> AuthFlag {
        self.flags
    }

    /// Set the auth mechanism from an [`AuthFlag`], a name, or a raw value.
    pub fn set_flags<T>(&mut self, flags: T) -> Result<()>
    where
        T: TryInto<AuthFlag>,
        EventLogError: From<T::Error>,
    {
        self.flags = flags.try_into()?;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.server)
            .field("domain", &self.domain())
            .field("username", &self.username())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("flags", &self.flags)
            .finish()
    }
}
