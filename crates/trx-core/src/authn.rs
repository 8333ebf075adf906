// Archivo: authn.rs
// Propósito: contrato de los proveedores de autenticación, el contexto de
// autenticación que viaja por el árbol de nodos y la petición de
// autenticación que arma el llamador.
use crate::errors::Result;
use crate::node::TrxNode;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Resultado de un proveedor: usuario resuelto y token (posiblemente
/// renovado).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthnUser {
    pub user: JsonValue,
    pub token: String,
}

/// Contexto `{tokens, users}` indexado por nombre de proveedor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthnCtx {
    #[serde(default)]
    pub tokens: IndexMap<String, String>,
    #[serde(default)]
    pub users: IndexMap<String, JsonValue>,
}

impl AuthnCtx {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.users.is_empty()
    }

    /// `true` si el proveedor tiene un usuario resuelto.
    pub fn has_user(&self, provider: &str) -> bool {
        self.users.get(provider).is_some_and(|u| !u.is_null())
    }

    /// Mezcla `other` sobre `self`; las entradas de `other` ganan.
    pub fn merge(&mut self, other: &AuthnCtx) {
        for (k, v) in &other.tokens {
            self.tokens.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.users {
            self.users.insert(k.clone(), v.clone());
        }
    }
}

/// Petición de autenticación: proveedores a satisfacer y token opcional
/// para cada uno. El orden de inserción se conserva.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthnRequest {
    entries: IndexMap<String, Option<String>>,
}

impl AuthnRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Solicita `provider` con el token dado.
    pub fn token(mut self, provider: impl Into<String>, token: impl Into<String>) -> Self {
        self.entries.insert(provider.into(), Some(token.into()));
        self
    }

    /// Solicita `provider` sin token (el proveedor decide de dónde leerlo).
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.entries.insert(provider.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.entries.contains_key(provider)
    }

    /// `None` si el proveedor no fue solicitado; `Some(None)` si fue
    /// solicitado sin token.
    pub fn get(&self, provider: &str) -> Option<Option<&str>> {
        self.entries.get(provider).map(|t| t.as_deref())
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}

/// Contrato de un proveedor de autenticación.
///
/// `eager` indica que el motor debe intentarlo siempre, aunque la petición
/// no lo nombre.
#[async_trait]
pub trait AuthnProvider: Send + Sync {
    fn eager(&self) -> bool {
        false
    }

    async fn authenticate(&self, node: &TrxNode, token: Option<&str>) -> Result<AuthnUser>;
}
