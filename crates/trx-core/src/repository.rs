// Archivo: repository.rs
// Propósito: definir el contrato `BucketAdapter<T>` que debe cumplir un
// almacenamiento para servir de ledger de transacciones (y de bucket para
// los nodos tipados). El motor es agnóstico a si el almacenamiento es en
// memoria, relacional o cualquier otro.
use crate::errors::{Result, TrxError};
use crate::node::TrxNode;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Valor almacenable: expone y recibe su id.
pub trait Record: Clone + Send + Sync + 'static {
    fn record_id(&self) -> Option<String>;
    fn assign_id(&mut self, id: String);
}

/// Los objetos JSON usan su campo `id`; un id numérico se guarda como
/// número.
impl Record for JsonValue {
    fn record_id(&self) -> Option<String> {
        match self.get("id")? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn assign_id(&mut self, id: String) {
        if let Some(obj) = self.as_object_mut() {
            let value = id.parse::<i64>().map(JsonValue::from).unwrap_or(JsonValue::String(id));
            obj.insert("id".to_string(), value);
        }
    }
}

/// Contrato mínimo del adaptador de almacenamiento.
///
/// Todas las operaciones reciben el nodo de contexto que las origina. La
/// seguridad ante concurrencia entre transacciones (last-write-wins,
/// versionado optimista, ...) es responsabilidad del adaptador.
#[async_trait]
pub trait BucketAdapter<T>: Send + Sync
    where T: Record
{
    /// Inserta `value`; si no trae id, el adaptador lo genera. Devuelve el
    /// valor con id.
    async fn create(&self, ctx: &TrxNode, value: T) -> Result<T>;

    /// Lee por id; `None` si no existe.
    async fn get(&self, ctx: &TrxNode, id: &str) -> Result<Option<T>>;

    /// Reemplaza (o inserta) el valor bajo su id.
    async fn put(&self, ctx: &TrxNode, value: T) -> Result<T>;

    /// Lista todos los valores. Opcional.
    async fn index(&self, _ctx: &TrxNode) -> Result<Vec<T>> {
        Err(TrxError::not_supported("index"))
    }

    /// Elimina por id; `false` si no existía. Opcional.
    async fn delete(&self, _ctx: &TrxNode, _id: &str) -> Result<bool> {
        Err(TrxError::not_supported("delete"))
    }
}
