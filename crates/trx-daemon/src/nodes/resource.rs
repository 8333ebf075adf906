use super::{child_of, require, run_in_node, NodeKind};
use crate::module::ResourceDef;
use crate::module_node::ModuleNode;
use serde_json::{json, Value as JsonValue};
use trx_core::Result;

/// Fachada CRUD sobre el bucket del recurso. Cada operación comprueba
/// primero la autenticación exigida; las lecturas y escrituras quedan
/// como hijos del nodo del recurso.
pub struct ResourceNode {
  parent: ModuleNode,
  name: String,
}

impl ResourceNode {
  pub(crate) fn new(parent: ModuleNode, name: &str) -> Self {
    Self { parent, name: name.to_string() }
  }

  fn guard(&self, node: &ModuleNode) -> Result<ResourceDef> {
    let def = require(self.parent.module().resource(&self.name), node, NodeKind::Resource, &self.name)?;
    node.check_authn(def.authn.as_slice())?;
    Ok(def)
  }

  pub async fn view(&self, id: &str) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Resource, &self.name);
    run_in_node(&node, "view", Some(json!({ "id": id })), async {
      let def = self.guard(&node)?;
      Ok(node.bucket(&def.bucket).read_one(id).await?)
    })
    .await
  }

  /// Lista los objetos cuyos campos coinciden con todos los de `filter`.
  pub async fn query(&self, filter: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Resource, &self.name);
    run_in_node(&node, "query", Some(filter.clone()), async {
      let def = self.guard(&node)?;
      let all = node.bucket(&def.bucket).read_all().await?;
      let found: Vec<JsonValue> = all.as_array()
                                     .map(|items| items.iter().filter(|obj| matches(obj, &filter)).cloned().collect())
                                     .unwrap_or_default();
      Ok(JsonValue::Array(found))
    })
    .await
  }

  pub async fn create(&self, obj: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Resource, &self.name);
    run_in_node(&node, "create", Some(obj.clone()), async {
      let def = self.guard(&node)?;
      Ok(node.bucket(&def.bucket).create(obj).await?)
    })
    .await
  }

  /// Lee el objeto, aplica los campos de `patch` (el id no cambia) y lo
  /// guarda.
  pub async fn update(&self, id: &str, patch: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Resource, &self.name);
    run_in_node(&node, "update", Some(json!({ "id": id, "patch": patch })), async {
      let def = self.guard(&node)?;
      let bucket = node.bucket(&def.bucket);
      let mut current = bucket.read_one(id).await?;
      if let (Some(obj), Some(fields)) = (current.as_object_mut(), patch.as_object()) {
        for (k, v) in fields {
          if k != "id" {
            obj.insert(k.clone(), v.clone());
          }
        }
      }
      Ok(bucket.put(current).await?)
    })
    .await
  }

  pub async fn delete(&self, id: &str) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Resource, &self.name);
    run_in_node(&node, "delete", Some(json!({ "id": id })), async {
      let def = self.guard(&node)?;
      Ok(node.bucket(&def.bucket).delete(id).await?)
    })
    .await
  }
}

fn matches(obj: &JsonValue, filter: &JsonValue) -> bool {
  match filter.as_object() {
    Some(fields) => fields.iter().all(|(k, v)| obj.get(k) == Some(v)),
    None => true,
  }
}
