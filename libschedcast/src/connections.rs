//! Platform connection lookups
//!
//! Connections (and the OAuth dance that produces their credentials) are
//! owned by another part of the system. The engine only reads them: at
//! creation time to validate ownership and activity, and at publish time to
//! fetch the credential. Secrets stay inside [`SecretString`] and are never
//! logged or persisted by the engine.

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::ConnectionConfig;
use crate::error::{PublishError, Result};
use crate::types::Platform;

/// Opaque reference to wherever the credential lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHandle(pub String);

#[derive(Debug, Clone)]
pub struct PlatformConnection {
    pub id: String,
    pub owner_id: String,
    pub platform: Platform,
    pub account_name: String,
    pub is_active: bool,
    pub credential_handle: CredentialHandle,
    /// Platform-side account, page or site id used in API paths
    pub account_ref: Option<String>,
}

/// Resolved credential handed to an adapter for one call.
pub struct ConnectionCredentials {
    pub connection_id: String,
    pub account_ref: Option<String>,
    pub token: SecretString,
}

impl std::fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("connection_id", &self.connection_id)
            .field("account_ref", &self.account_ref)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    async fn lookup(&self, connection_id: &str) -> Result<Option<PlatformConnection>>;

    /// Fetch the credential for a publish attempt. A connection that cannot
    /// produce one is a permanent failure for that attempt.
    async fn credentials(
        &self,
        connection: &PlatformConnection,
    ) -> std::result::Result<ConnectionCredentials, PublishError>;
}

enum CredentialSource {
    Env(String),
    Inline(SecretString),
}

struct Entry {
    connection: PlatformConnection,
    source: CredentialSource,
}

/// Connections declared in the configuration file (credentials read from
/// environment variables) or registered directly.
#[derive(Default)]
pub struct StaticConnections {
    entries: RwLock<HashMap<String, Entry>>,
}

impl StaticConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(connections: &[ConnectionConfig]) -> Self {
        let directory = Self::new();
        {
            let mut entries = directory.write();
            for c in connections {
                let connection = PlatformConnection {
                    id: c.id.clone(),
                    owner_id: c.owner_id.clone(),
                    platform: c.platform,
                    account_name: c.account_name.clone(),
                    is_active: c.active,
                    credential_handle: CredentialHandle(format!("env:{}", c.credential_env)),
                    account_ref: c.account_ref.clone(),
                };
                entries.insert(
                    c.id.clone(),
                    Entry {
                        connection,
                        source: CredentialSource::Env(c.credential_env.clone()),
                    },
                );
            }
        }
        directory
    }

    /// Register a connection whose credential is held in memory.
    pub fn insert(&self, connection: PlatformConnection, token: SecretString) {
        self.write().insert(
            connection.id.clone(),
            Entry {
                connection,
                source: CredentialSource::Inline(token),
            },
        );
    }

    pub fn set_active(&self, connection_id: &str, active: bool) {
        if let Some(entry) = self.write().get_mut(connection_id) {
            entry.connection.is_active = active;
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ConnectionDirectory for StaticConnections {
    async fn lookup(&self, connection_id: &str) -> Result<Option<PlatformConnection>> {
        Ok(self
            .read()
            .get(connection_id)
            .map(|entry| entry.connection.clone()))
    }

    async fn credentials(
        &self,
        connection: &PlatformConnection,
    ) -> std::result::Result<ConnectionCredentials, PublishError> {
        let entries = self.read();
        let entry = entries.get(&connection.id).ok_or_else(|| {
            PublishError::permanent(format!("Connection {} no longer exists", connection.id))
        })?;

        if !entry.connection.is_active {
            return Err(PublishError::permanent(format!(
                "Connection {} ({}) is inactive",
                connection.id, entry.connection.account_name
            )));
        }

        let token = match &entry.source {
            CredentialSource::Inline(token) => token.clone(),
            CredentialSource::Env(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => SecretString::from(value),
                _ => {
                    return Err(PublishError::permanent(format!(
                        "Credential for connection {} is unavailable",
                        connection.id
                    )))
                }
            },
        };

        Ok(ConnectionCredentials {
            connection_id: connection.id.clone(),
            account_ref: entry.connection.account_ref.clone(),
            token,
        })
    }
}
