//! Crate `trx-core` — motor de transacciones y árbol de nodos de ejecución
//!
//! Este crate define la unidad de trabajo (`Trx`), el nodo del árbol de
//! ejecución (`TrxNode`), el modelo de reporte (`TrxStatus`), el contrato de
//! persistencia `BucketAdapter<T>` y el motor `TrxEngine`, que abre,
//! autentica, ejecuta, confirma o revierte y persiste transacciones.
//!
//! Diseño resumido:
//! - Cada operación observable se registra como nodo hijo
//!   (`make_child_node` + `open`/`ok`/`error`), de modo que la ejecución
//!   completa puede reconstruirse a partir del árbol persistido.
//! - Dentro de la transacción los errores se propagan con `Result` y `?`;
//!   en la frontera (`TrxEngine::trx`) se materializan en un `TrxStatus`.
//! - Transacciones retenidas (`trx_held`): el commit lo decide un llamador
//!   externo que injerta el árbol en el suyo.
//!
//! Ejemplo rápido:
//! ```rust
//! use std::sync::Arc;
//! use trx_core::{MemoryBucketAdapter, TrxEngine, TrxEngineConfig, TrxRecord};
//! let ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
//! let engine = TrxEngine::new("mod", ledger, TrxEngineConfig::default());
//! assert_eq!(engine.module(), "mod");
//! ```
pub mod authn;
pub mod config;
pub mod engine;
pub mod errors;
pub mod i18n;
pub mod node;
pub mod repository;
pub mod status;
pub mod stubs;
pub mod trx;

pub use authn::*;
pub use config::*;
pub use engine::*;
pub use errors::*;
pub use i18n::*;
pub use node::*;
pub use repository::*;
pub use status::*;
pub use stubs::*;
pub use trx::*;
