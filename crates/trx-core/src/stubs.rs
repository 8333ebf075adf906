// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un adaptador genérico en memoria (`MemoryBucketAdapter`), útil
// tanto como ledger de transacciones como bucket de objetos JSON, y un
// proveedor de autenticación estático. No son durables.
use crate::authn::{AuthnProvider, AuthnUser};
use crate::errors::{Result, TrxError};
use crate::node::TrxNode;
use crate::repository::{BucketAdapter, Record};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Adaptador mínimo en memoria (no durable). La última escritura gana.
pub struct MemoryBucketAdapter<T> {
    records: Mutex<IndexMap<String, T>>,
    /// Con `Some`, los ids generados son 1, 2, 3...; con `None`, UUID v4.
    sequence: Option<AtomicU64>,
}

impl<T> MemoryBucketAdapter<T> where T: Record
{
    /// Adaptador que genera ids UUID v4.
    pub fn new() -> Self {
        Self { records: Mutex::new(IndexMap::new()),
               sequence: None }
    }

    /// Adaptador que genera ids secuenciales.
    pub fn sequential() -> Self {
        Self { records: Mutex::new(IndexMap::new()),
               sequence: Some(AtomicU64::new(0)) }
    }

    /// Precarga registros (deben traer id).
    pub fn with_records(self, records: impl IntoIterator<Item = T>) -> Self {
        {
            let mut map = self.lock();
            for r in records {
                if let Some(id) = r.record_id() {
                    map.insert(id, r);
                }
            }
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, T>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> String {
        match &self.sequence {
            Some(seq) => (seq.fetch_add(1, Ordering::SeqCst) + 1).to_string(),
            None => Uuid::new_v4().to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Lectura directa, sin nodo de contexto.
    pub fn peek(&self, id: &str) -> Option<T> {
        self.lock().get(id).cloned()
    }

    /// Copia de todos los registros en orden de inserción.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().values().cloned().collect()
    }
}

impl<T> Default for MemoryBucketAdapter<T> where T: Record
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> BucketAdapter<T> for MemoryBucketAdapter<T> where T: Record
{
    async fn create(&self, _ctx: &TrxNode, mut value: T) -> Result<T> {
        let id = match value.record_id() {
            Some(id) => id,
            None => {
                let id = self.next_id();
                value.assign_id(id.clone());
                id
            }
        };
        self.lock().insert(id, value.clone());
        Ok(value)
    }

    async fn get(&self, _ctx: &TrxNode, id: &str) -> Result<Option<T>> {
        Ok(self.lock().get(id).cloned())
    }

    async fn put(&self, _ctx: &TrxNode, value: T) -> Result<T> {
        let id = value.record_id()
                      .ok_or_else(|| TrxError::storage("put requiere un registro con id"))?;
        self.lock().insert(id, value.clone());
        Ok(value)
    }

    async fn index(&self, _ctx: &TrxNode) -> Result<Vec<T>> {
        Ok(self.snapshot())
    }

    async fn delete(&self, _ctx: &TrxNode, id: &str) -> Result<bool> {
        Ok(self.lock().shift_remove(id).is_some())
    }
}

/// Proveedor de autenticación con una tabla fija token → usuario.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthnProvider {
    users: HashMap<String, JsonValue>,
    eager: bool,
}

impl StaticAuthnProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un token válido.
    pub fn user(mut self, token: impl Into<String>, user: JsonValue) -> Self {
        self.users.insert(token.into(), user);
        self
    }

    /// Marca el proveedor como `eager`.
    pub fn as_eager(mut self) -> Self {
        self.eager = true;
        self
    }
}

#[async_trait]
impl AuthnProvider for StaticAuthnProvider {
    fn eager(&self) -> bool {
        self.eager
    }

    async fn authenticate(&self, _node: &TrxNode, token: Option<&str>) -> Result<AuthnUser> {
        let token = token.ok_or_else(|| TrxError::new(TrxError::UNAUTHORIZED, 401, "Token ausente"))?;
        match self.users.get(token) {
            Some(user) => Ok(AuthnUser { user: user.clone(),
                                         token: token.to_string() }),
            None => Err(TrxError::new(TrxError::UNAUTHORIZED, 401, "Token inválido")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trx::Trx;
    use serde_json::json;

    #[test]
    fn last_write_wins_under_the_same_id() {
        tokio_test::block_on(async {
            let ctx = Trx::new("m", "test", None, None).root();
            let bucket = MemoryBucketAdapter::<JsonValue>::sequential();
            let created = bucket.create(&ctx, json!({"v": 1})).await.unwrap();
            assert_eq!(created["id"], 1);
            bucket.put(&ctx, json!({"id": 1, "v": 2})).await.unwrap();
            assert_eq!(bucket.len(), 1);
            assert_eq!(bucket.peek("1"), Some(json!({"id": 1, "v": 2})));
        });
    }
}
