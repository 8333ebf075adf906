// Archivo: external.rs
// Propósito: delegación entre módulos. Un nodo de A invoca un elemento de
// B a través de `ExternalInvoker`; B corre en su propia transacción (con
// su motor y su ledger) y su árbol se injerta bajo el nodo externo de A.
//
// El invocador es una interfaz estrecha tipo RPC: hoy la implementa el
// `Daemon` en proceso, pero nada de lo que cruza la frontera depende de
// compartir memoria salvo el `Trx` devuelto para el injerto.
use crate::module_node::ModuleNode;
use crate::nodes::NodeKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;
use std::sync::Arc;
use trx_core::{derive_idempotency_key, AuthnCtx, Finished, HeldTrx, Result, TrxError, TrxNode};

/// Destino de una llamada externa: `<module>::<kind>:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTag {
  pub module: String,
  pub kind: NodeKind,
  pub name: String,
}

impl ExternalTag {
  pub fn parse(tag: &str) -> Result<Self> {
    let invalid = || TrxError::invalid_tag(tag);
    let (module, rest) = tag.split_once("::").ok_or_else(invalid)?;
    let (kind, name) = rest.split_once(':').ok_or_else(invalid)?;
    if module.is_empty() || name.is_empty() {
      return Err(invalid());
    }
    let kind = match kind.parse::<NodeKind>() {
      Ok(k @ (NodeKind::Job | NodeKind::Bucket | NodeKind::Machine | NodeKind::Queue | NodeKind::Topic)) => k,
      _ => return Err(invalid()),
    };
    Ok(Self { module: module.to_string(), kind, name: name.to_string() })
  }
}

impl fmt::Display for ExternalTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}::{}:{}", self.module, self.kind, self.name)
  }
}

/// Contexto que viaja con la llamada.
#[derive(Debug, Clone, Default)]
pub struct ExternalCall {
  /// `ext:<id de la trx llamadora>`.
  pub origin: String,
  pub idempotency_key: Option<String>,
  pub authn: Option<AuthnCtx>,
  /// La transacción llamadora está retenida: la llamada debe retenerse
  /// también.
  pub hold: bool,
}

/// Resultado de la transacción remota.
#[derive(Debug)]
pub enum ExternalOutcome {
  Committed(Finished),
  Held(HeldTrx),
}

#[async_trait]
pub trait ExternalInvoker: Send + Sync {
  /// Ejecuta `action` sobre `tag` con `payload`. Un error aquí significa
  /// que la transacción remota ni siquiera pudo ejecutarse; los fallos de
  /// la lógica remota llegan dentro del resultado.
  async fn invoke(&self, tag: &ExternalTag, action: &str, payload: JsonValue, call: ExternalCall) -> Result<ExternalOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idempotency {
  None,
  Inherit,
  Fresh,
}

/// Nodo `<module>::externals:<tag>`. Se configura con los modificadores
/// y se consume con una de las operaciones.
pub struct ExternalNode {
  parent: ModuleNode,
  invoker: Arc<dyn ExternalInvoker>,
  tag: String,
  idempotency: Idempotency,
  auth_inherit: bool,
}

impl ExternalNode {
  pub(crate) fn new(parent: ModuleNode, invoker: Arc<dyn ExternalInvoker>, tag: &str) -> Self {
    Self { parent, invoker, tag: tag.to_string(), idempotency: Idempotency::None, auth_inherit: false }
  }

  /// Reutiliza la clave de idempotencia de la transacción llamadora
  /// (o su id) combinada con el tag, la acción, la posición de la llamada
  /// y el payload: solo la repetición de la misma llamada se omite.
  pub fn idempotent_inherit(mut self) -> Self {
    self.idempotency = Idempotency::Inherit;
    self
  }

  /// Clave nueva derivada del nodo llamador, el tag y el payload.
  pub fn idempotent(mut self) -> Self {
    self.idempotency = Idempotency::Fresh;
    self
  }

  /// Propaga la autenticación resuelta del llamador.
  pub fn auth_inherit(mut self) -> Self {
    self.auth_inherit = true;
    self
  }

  pub async fn run(self, input: JsonValue) -> Result<JsonValue> {
    self.call("run", input).await
  }

  pub async fn read_one(self, id: &str) -> Result<JsonValue> {
    self.call("readOne", json!({ "id": id })).await
  }

  pub async fn create(self, obj: JsonValue) -> Result<JsonValue> {
    self.call("create", obj).await
  }

  pub async fn run_machine(self, obj_id: &str, transition: &str, input: JsonValue) -> Result<JsonValue> {
    self.call("run", json!({ "id": obj_id, "transition": transition, "input": input })).await
  }

  pub async fn push(self, message: JsonValue) -> Result<JsonValue> {
    self.call("push", message).await
  }

  pub async fn publish(self, message: JsonValue) -> Result<JsonValue> {
    self.call("publish", message).await
  }

  async fn call(self, action: &str, payload: JsonValue) -> Result<JsonValue> {
    let node = self.parent.make_child_node(self.parent.module().name(), NodeKind::External.as_str(), &self.tag);
    node.open(action, Some(payload.clone()));
    match self.delegate(&node, action, payload).await {
      Ok(output) => {
        node.ok(Some(output.clone()));
        Ok(output)
      }
      Err(err) => Err(node.error(err)),
    }
  }

  /// Posición del nodo externo entre los hijos de su padre. Es estable
  /// entre reintentos de la misma lógica llamadora.
  fn ordinal(&self, node: &TrxNode) -> usize {
    self.parent.children().iter().position(|c| c.id() == node.id()).unwrap_or_default()
  }

  async fn delegate(&self, node: &TrxNode, action: &str, payload: JsonValue) -> Result<JsonValue> {
    let tag = ExternalTag::parse(&self.tag)?;
    let caller = node.trx().clone();
    let idempotency_key = match self.idempotency {
      Idempotency::None => None,
      Idempotency::Inherit => {
        let base = caller.idempotency_key().unwrap_or_else(|| caller.id());
        let ordinal = self.ordinal(node).to_string();
        Some(derive_idempotency_key(&[base.as_str(), self.tag.as_str(), action, ordinal.as_str(), payload.to_string().as_str()]))
      }
      Idempotency::Fresh => Some(derive_idempotency_key(&[node.global_id().as_str(), self.tag.as_str(), action, payload.to_string().as_str()])),
    };
    let call = ExternalCall { origin: format!("ext:{}", caller.id()),
                              idempotency_key,
                              authn: self.auth_inherit.then(|| node.authn()),
                              hold: caller.is_held() };
    log::debug!("llamada externa {} {} desde {}", tag, action, node.global_id());

    match self.invoker.invoke(&tag, action, payload, call).await? {
      ExternalOutcome::Committed(finished) => {
        node.merge(&finished.trx)?;
        match finished.status.error {
          Some(err) => Err(err),
          None => Ok(finished.status.output.unwrap_or(JsonValue::Null)),
        }
      }
      ExternalOutcome::Held(held) => {
        node.merge(held.trx())?;
        let outcome = held.outcome().map(JsonValue::clone).map_err(TrxError::clone);
        caller.hold_node(held);
        outcome
      }
    }
  }
}
