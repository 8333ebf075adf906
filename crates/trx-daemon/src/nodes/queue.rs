use super::{child_of, require, run_in_node, NodeKind};
use crate::module_node::ModuleNode;
use serde_json::{json, Value as JsonValue};
use trx_core::Result;

pub struct QueueNode {
  parent: ModuleNode,
  name: String,
}

impl QueueNode {
  pub(crate) fn new(parent: ModuleNode, name: &str) -> Self {
    Self { parent, name: name.to_string() }
  }

  pub async fn push(&self, message: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Queue, &self.name);
    run_in_node(&node, "push", Some(message.clone()), async {
      let sink = require(self.parent.module().queue(&self.name), &node, NodeKind::Queue, &self.name)?;
      sink.push(&node, message).await?;
      Ok(json!({ "queue": self.name }))
    })
    .await
  }
}
