//! Envoltorios tipados por tipo de bloque.
//!
//! Todos comparten el mismo ciclo de vida (`run_in_node`): crear el hijo
//! `<module>::<kind>:<name>`, `open(action, input)`, ejecutar la operación
//! y cerrar con `ok(output)` o con `error(err)`, devolviendo el error para
//! que el llamador lo relance.
mod bucket;
mod job;
mod machine;
mod queue;
mod resource;
mod topic;

pub use bucket::BucketNode;
pub use job::JobNode;
pub use machine::MachineNode;
pub use queue::QueueNode;
pub use resource::ResourceNode;
pub use topic::TopicNode;

use crate::module_node::ModuleNode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use trx_core::{Result, TrxError, TrxNode, TrxOutput};

/// Conjunto cerrado de tipos de nodo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
  Bucket,
  Job,
  Machine,
  Resource,
  Queue,
  Topic,
  #[serde(rename = "externals")]
  External,
}

impl NodeKind {
  /// Segmento usado en el scope del nodo.
  pub fn as_str(self) -> &'static str {
    match self {
      NodeKind::Bucket => "bucket",
      NodeKind::Job => "job",
      NodeKind::Machine => "machine",
      NodeKind::Resource => "resource",
      NodeKind::Queue => "queue",
      NodeKind::Topic => "topic",
      NodeKind::External => "externals",
    }
  }
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for NodeKind {
  type Err = TrxError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "bucket" => Ok(NodeKind::Bucket),
      "job" => Ok(NodeKind::Job),
      "machine" => Ok(NodeKind::Machine),
      "resource" => Ok(NodeKind::Resource),
      "queue" => Ok(NodeKind::Queue),
      "topic" => Ok(NodeKind::Topic),
      "externals" => Ok(NodeKind::External),
      other => Err(TrxError::invalid_tag(other)),
    }
  }
}

/// Crea el hijo `<module>::<kind>:<name>` bajo `parent`.
pub(crate) fn child_of(parent: &ModuleNode, kind: NodeKind, name: &str) -> ModuleNode {
  parent.at(parent.make_child_node(parent.module().name(), kind.as_str(), name))
}

/// Ciclo de vida común de un nodo tipado.
pub(crate) async fn run_in_node<Fut>(node: &TrxNode, action: &str, input: Option<JsonValue>, op: Fut) -> Result<JsonValue>
where
  Fut: Future<Output = TrxOutput>,
{
  node.open(action, input);
  match op.await {
    Ok(output) => {
      node.ok(Some(output.clone()));
      Ok(output)
    }
    Err(err) => Err(node.error(err)),
  }
}

/// Bloque declarado en el módulo o `Module.BlockNotFound`.
pub(crate) fn require<T>(block: Option<T>, node: &ModuleNode, kind: NodeKind, name: &str) -> Result<T> {
  block.ok_or_else(|| TrxError::block_not_found(node.module().name(), kind.as_str(), name))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_round_trip_through_their_scope_segment() {
    for kind in [NodeKind::Bucket, NodeKind::Job, NodeKind::Machine, NodeKind::Queue, NodeKind::Topic, NodeKind::External] {
      assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
    }
    assert_eq!("controller".parse::<NodeKind>().unwrap_err().name, TrxError::INVALID_TAG);
  }
}
