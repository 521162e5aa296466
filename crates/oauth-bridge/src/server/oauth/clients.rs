//! Dynamic client registration (RFC 7591).
//!
//! Registration is optional and can be switched off in configuration. When a
//! registry is configured and knows a `client_id`, authorize requests from
//! that client must use one of its registered redirect URIs; unknown client
//! ids are still accepted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::types::RegisteredClient;
use crate::config::DEFAULT_MAX_REGISTERED_CLIENTS;
use crate::error::RegistrationError;

/// Lookup and registration of OAuth clients.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Register a client and return it with a fresh `client_id`.
    async fn register(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
    ) -> Result<RegisteredClient, RegistrationError>;

    async fn get(&self, client_id: &str) -> Option<RegisteredClient>;
}

/// Registry held in memory for the life of the process, bounded to
/// `capacity` clients.
#[derive(Debug)]
pub struct InMemoryClientRegistry {
    clients: RwLock<HashMap<String, RegisteredClient>>,
    capacity: usize,
}

impl InMemoryClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_REGISTERED_CLIENTS)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { clients: RwLock::new(HashMap::new()), capacity }
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl Default for InMemoryClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn register(
        &self,
        client_name: Option<String>,
        redirect_uris: Vec<String>,
    ) -> Result<RegisteredClient, RegistrationError> {
        let mut clients = self.clients.write().await;
        if clients.len() >= self.capacity {
            return Err(RegistrationError::Full { capacity: self.capacity });
        }

        let client = RegisteredClient {
            client_id: uuid::Uuid::new_v4().to_string(),
            client_name,
            redirect_uris,
            created_at: Utc::now(),
        };
        clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    async fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.read().await.get(client_id).cloned()
    }
}
