// Archivo: module_node.rs
// Propósito: `ModuleNode`, un `TrxNode` ligado al módulo que lo ejecuta.
// Es el punto de entrada a los envoltorios tipados: cada bloque invocado a
// través de él se registra como hijo de este nodo.
use crate::external::{ExternalInvoker, ExternalNode};
use crate::module::Module;
use crate::nodes::{BucketNode, JobNode, MachineNode, QueueNode, ResourceNode, TopicNode};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use trx_core::{Result, TrxNode, TrxOutput};

#[derive(Clone)]
pub struct ModuleNode {
  node: TrxNode,
  module: Arc<Module>,
  invoker: Arc<dyn ExternalInvoker>,
}

impl fmt::Debug for ModuleNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ModuleNode").field("module", &self.module.name()).field("node", &self.node).finish()
  }
}

impl Deref for ModuleNode {
  type Target = TrxNode;

  fn deref(&self) -> &TrxNode {
    &self.node
  }
}

impl ModuleNode {
  pub fn new(node: TrxNode, module: Arc<Module>, invoker: Arc<dyn ExternalInvoker>) -> Self {
    Self { node, module, invoker }
  }

  pub fn node(&self) -> &TrxNode {
    &self.node
  }

  pub fn module(&self) -> &Arc<Module> {
    &self.module
  }

  /// Mismo módulo, otro nodo (típicamente un hijo recién creado).
  pub(crate) fn at(&self, node: TrxNode) -> ModuleNode {
    Self { node, module: Arc::clone(&self.module), invoker: Arc::clone(&self.invoker) }
  }

  pub fn bucket(&self, name: &str) -> BucketNode {
    BucketNode::new(self.clone(), name)
  }

  pub fn job(&self, name: &str) -> JobNode {
    JobNode::new(self.clone(), name)
  }

  pub fn machine(&self, name: &str) -> MachineNode {
    MachineNode::new(self.clone(), name)
  }

  pub fn resource(&self, name: &str) -> ResourceNode {
    ResourceNode::new(self.clone(), name)
  }

  pub fn queue(&self, name: &str) -> QueueNode {
    QueueNode::new(self.clone(), name)
  }

  pub fn topic(&self, name: &str) -> TopicNode {
    TopicNode::new(self.clone(), name)
  }

  /// Elemento de otro módulo, `tag = "<module>::<kind>:<name>"`.
  pub fn external(&self, tag: &str) -> ExternalNode {
    ExternalNode::new(self.clone(), Arc::clone(&self.invoker), tag)
  }

  /// Ejecuta `f` bajo un hijo `<module>::virtual`, para lógica que no
  /// corresponde a un bloque declarado.
  pub async fn virtual_node<F, Fut>(&self, action: &str, input: Option<JsonValue>, f: F) -> Result<JsonValue>
  where
    F: FnOnce(ModuleNode) -> Fut,
    Fut: Future<Output = TrxOutput>,
  {
    let child = self.at(self.node.make_virtual_child_node(self.module.name()));
    let node = child.node.clone();
    crate::nodes::run_in_node(&node, action, input, f(child)).await
  }
}
