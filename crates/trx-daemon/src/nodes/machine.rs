use super::{child_of, require, run_in_node, NodeKind};
use crate::module_node::ModuleNode;
use serde_json::{json, Value as JsonValue};
use trx_core::Result;

pub struct MachineNode {
  parent: ModuleNode,
  name: String,
}

impl MachineNode {
  pub(crate) fn new(parent: ModuleNode, name: &str) -> Self {
    Self { parent, name: name.to_string() }
  }

  /// Aplica `transition` al objeto `obj_id`. La acción del nodo es el
  /// nombre de la transición.
  pub async fn run(&self, obj_id: &str, transition: &str, input: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Machine, &self.name);
    let traced = json!({ "id": obj_id, "input": input });
    run_in_node(&node, transition, Some(traced), async {
      let handler = require(self.parent.module().machine(&self.name), &node, NodeKind::Machine, &self.name)?;
      handler.run(node.clone(), obj_id.to_string(), transition.to_string(), input).await
    })
    .await
  }
}
