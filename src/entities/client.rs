// 👤 Client Account Entity - stable identity behind an exported account name
//
// "The account name in the export is a VALUE, the client UUID is IDENTITY"
//
// Exports only carry the ad account's name. A client may be displayed under a
// different name than the one the platform exports, so matching prefers
// `external_name` and falls back to `name`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

// ============================================================================
// CLIENT ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAccount {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    /// Display name
    pub name: String,

    /// ISO 4217 code (EUR, USD, MXN, ...)
    pub currency: String,

    /// Account name as the ads platform writes it in exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ClientAccount {
    /// Create new client with a fresh UUID
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        ClientAccount {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            currency: currency.into(),
            external_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_external_name(mut self, external_name: impl Into<String>) -> Self {
        self.external_name = Some(external_name.into());
        self
    }

    /// The name exports are matched against
    pub fn match_name(&self) -> &str {
        self.external_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.name)
    }

    /// Case-insensitive, whitespace-trimmed comparison with an exported account name
    pub fn matches(&self, account_name: &str) -> bool {
        normalize_account_name(self.match_name()) == normalize_account_name(account_name)
    }
}

pub fn normalize_account_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// CLIENT REGISTRY
// ============================================================================

/// Registry of all known clients, shared between readers
pub struct ClientRegistry {
    clients: Arc<RwLock<Vec<ClientAccount>>>,
}

impl ClientRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        ClientRegistry {
            clients: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn from_clients(clients: Vec<ClientAccount>) -> Self {
        ClientRegistry {
            clients: Arc::new(RwLock::new(clients)),
        }
    }

    /// Register a client, replacing any entry with the same id
    pub fn register(&self, client: ClientAccount) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.retain(|c| c.id != client.id);
        clients.push(client);
    }

    pub fn find_by_id(&self, id: &str) -> Option<ClientAccount> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.iter().find(|c| c.id == id).cloned()
    }

    /// Resolve an exported account name to its client
    pub fn resolve(&self, account_name: &str) -> Option<ClientAccount> {
        if account_name.trim().is_empty() {
            return None;
        }
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.iter().find(|c| c.matches(account_name)).cloned()
    }

    /// Get all clients sorted by display name
    pub fn all_clients(&self) -> Vec<ClientAccount> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        let mut all = clients.clone();
        all.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        all
    }

    pub fn count(&self) -> usize {
        self.clients.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
