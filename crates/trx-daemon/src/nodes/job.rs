use super::{child_of, require, run_in_node, NodeKind};
use crate::module_node::ModuleNode;
use serde_json::Value as JsonValue;
use trx_core::Result;

pub struct JobNode {
  parent: ModuleNode,
  name: String,
}

impl JobNode {
  pub(crate) fn new(parent: ModuleNode, name: &str) -> Self {
    Self { parent, name: name.to_string() }
  }

  /// Ejecuta el job con `input`. El manejador recibe el nodo del job, así
  /// que sus propias llamadas quedan como nietos.
  pub async fn run(&self, input: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Job, &self.name);
    run_in_node(&node, "run", Some(input.clone()), async {
      let handler = require(self.parent.module().job(&self.name), &node, NodeKind::Job, &self.name)?;
      handler.run(node.clone(), input).await
    })
    .await
  }
}
