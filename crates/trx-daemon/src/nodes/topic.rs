use super::{child_of, require, run_in_node, NodeKind};
use crate::module_node::ModuleNode;
use serde_json::{json, Value as JsonValue};
use trx_core::Result;

pub struct TopicNode {
  parent: ModuleNode,
  name: String,
}

impl TopicNode {
  pub(crate) fn new(parent: ModuleNode, name: &str) -> Self {
    Self { parent, name: name.to_string() }
  }

  /// Publica `message`; la salida informa cuántos suscriptores lo
  /// recibieron.
  pub async fn publish(&self, message: JsonValue) -> Result<JsonValue> {
    let node = child_of(&self.parent, NodeKind::Topic, &self.name);
    run_in_node(&node, "publish", Some(message.clone()), async {
      let sink = require(self.parent.module().topic(&self.name), &node, NodeKind::Topic, &self.name)?;
      let delivered = sink.publish(&node, message).await?;
      Ok(json!({ "topic": self.name, "delivered": delivered }))
    })
    .await
  }
}
