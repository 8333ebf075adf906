//! trx-daemon: módulos, fachada de entrada y nodos tipados
//!
//! Un `Daemon` agrupa módulos; cada módulo tiene su `TrxEngine` y sus
//! bloques (buckets, jobs, máquinas, recursos, colas y tópicos). La lógica
//! de negocio recibe un `ModuleNode` y desde él invoca los bloques, que
//! quedan registrados como nodos hijos de la transacción. Las llamadas a
//! otros módulos pasan por `ExternalNode`.

pub mod config;
pub mod daemon;
pub mod external;
pub mod handlers;
pub mod module;
pub mod module_node;
pub mod nodes;

pub use config::DaemonConfig;
pub use daemon::{Daemon, DaemonTrx};
pub use external::{ExternalCall, ExternalInvoker, ExternalNode, ExternalOutcome, ExternalTag};
pub use handlers::{job_fn, machine_fn, BroadcastTopic, ChannelQueue, JobHandler, MachineHandler, QueueSink, TopicSink};
pub use module::{Module, ModuleBuilder, ResourceDef};
pub use module_node::ModuleNode;
pub use nodes::NodeKind;
