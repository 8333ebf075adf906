use super::{child_of, require, run_in_node, NodeKind};
use crate::module_node::ModuleNode;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use trx_core::{BucketAdapter, Result, TrxError};

/// Operaciones sobre un bucket del módulo.
pub struct BucketNode {
  parent: ModuleNode,
  name: String,
}

impl BucketNode {
  pub(crate) fn new(parent: ModuleNode, name: &str) -> Self {
    Self { parent, name: name.to_string() }
  }

  fn adapter(&self, node: &ModuleNode) -> Result<Arc<dyn BucketAdapter<JsonValue>>> {
    require(self.parent.module().bucket(&self.name), node, NodeKind::Bucket, &self.name)
  }

  /// Lee un objeto; `Bucket.ObjNotFound` si no existe.
  pub async fn read_one(&self, id: &str) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Bucket, &self.name);
    run_in_node(&node, "readOne", Some(json!({ "id": id })), async {
      let adapter = self.adapter(&node)?;
      match adapter.get(&node, id).await? {
        Some(obj) => Ok(obj),
        None => Err(TrxError::obj_not_found(&self.name, id).into()),
      }
    })
    .await
  }

  pub async fn read_all(&self) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Bucket, &self.name);
    run_in_node(&node, "readAll", None, async {
      let adapter = self.adapter(&node)?;
      Ok(JsonValue::Array(adapter.index(&node).await?))
    })
    .await
  }

  /// Inserta `obj`; el adaptador asigna id si no lo trae.
  pub async fn create(&self, obj: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Bucket, &self.name);
    run_in_node(&node, "create", Some(obj.clone()), async {
      let adapter = self.adapter(&node)?;
      Ok(adapter.create(&node, obj).await?)
    })
    .await
  }

  pub async fn put(&self, obj: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Bucket, &self.name);
    run_in_node(&node, "put", Some(obj.clone()), async {
      let adapter = self.adapter(&node)?;
      Ok(adapter.put(&node, obj).await?)
    })
    .await
  }

  /// Elimina por id; `Bucket.ObjNotFound` si no existía.
  pub async fn delete(&self, id: &str) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Bucket, &self.name);
    run_in_node(&node, "delete", Some(json!({ "id": id })), async {
      let adapter = self.adapter(&node)?;
      if adapter.delete(&node, id).await? {
        Ok(json!({ "id": id, "deleted": true }))
      } else {
        Err(TrxError::obj_not_found(&self.name, id).into())
      }
    })
    .await
  }
}
