// Archivo: handlers.rs
// Propósito: contratos de los colaboradores que ejecutan los bloques de un
// módulo (jobs, máquinas, colas y tópicos) más implementaciones simples
// basadas en closures y en canales de tokio.
use crate::module_node::ModuleNode;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use trx_core::{Result, TrxError, TrxNode, TrxOutput};

/// Lógica de un job. Recibe el nodo del job: lo que invoque a través de él
/// queda registrado como nietos de la transacción.
#[async_trait]
pub trait JobHandler: Send + Sync {
  async fn run(&self, node: ModuleNode, input: JsonValue) -> TrxOutput;
}

/// Ejecutor de transiciones de una máquina de estados.
#[async_trait]
pub trait MachineHandler: Send + Sync {
  async fn run(&self, node: ModuleNode, obj_id: String, transition: String, input: JsonValue) -> TrxOutput;
}

#[async_trait]
pub trait QueueSink: Send + Sync {
  async fn push(&self, node: &TrxNode, message: JsonValue) -> Result<()>;
}

/// Publica un mensaje; devuelve el número de suscriptores que lo reciben.
#[async_trait]
pub trait TopicSink: Send + Sync {
  async fn publish(&self, node: &TrxNode, message: JsonValue) -> Result<usize>;
}

struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnJob<F>
where
  F: Fn(ModuleNode, JsonValue) -> Fut + Send + Sync,
  Fut: Future<Output = TrxOutput> + Send + 'static,
{
  async fn run(&self, node: ModuleNode, input: JsonValue) -> TrxOutput {
    (self.0)(node, input).await
  }
}

/// Job a partir de un closure async.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
  F: Fn(ModuleNode, JsonValue) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = TrxOutput> + Send + 'static,
{
  Arc::new(FnJob(f))
}

struct FnMachine<F>(F);

#[async_trait]
impl<F, Fut> MachineHandler for FnMachine<F>
where
  F: Fn(ModuleNode, String, String, JsonValue) -> Fut + Send + Sync,
  Fut: Future<Output = TrxOutput> + Send + 'static,
{
  async fn run(&self, node: ModuleNode, obj_id: String, transition: String, input: JsonValue) -> TrxOutput {
    (self.0)(node, obj_id, transition, input).await
  }
}

/// Máquina a partir de un closure async `(node, obj_id, transition, input)`.
pub fn machine_fn<F, Fut>(f: F) -> Arc<dyn MachineHandler>
where
  F: Fn(ModuleNode, String, String, JsonValue) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = TrxOutput> + Send + 'static,
{
  Arc::new(FnMachine(f))
}

/// Cola en memoria sobre un canal `mpsc` acotado.
pub struct ChannelQueue {
  tx: mpsc::Sender<JsonValue>,
}

impl ChannelQueue {
  pub fn new(capacity: usize) -> (Self, mpsc::Receiver<JsonValue>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Self { tx }, rx)
  }
}

#[async_trait]
impl QueueSink for ChannelQueue {
  async fn push(&self, _node: &TrxNode, message: JsonValue) -> Result<()> {
    self.tx.send(message).await.map_err(|_| TrxError::storage("la cola está cerrada"))
  }
}

/// Tópico en memoria sobre un canal `broadcast`. Publicar sin suscriptores
/// no es un error.
pub struct BroadcastTopic {
  tx: broadcast::Sender<JsonValue>,
}

impl BroadcastTopic {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<JsonValue> {
    self.tx.subscribe()
  }
}

#[async_trait]
impl TopicSink for BroadcastTopic {
  async fn publish(&self, _node: &TrxNode, message: JsonValue) -> Result<usize> {
    Ok(self.tx.send(message).unwrap_or(0))
  }
}
