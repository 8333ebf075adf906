//! trxflow: daemon de demostración
//!
//! Ensambla dos módulos sobre `trx-daemon`: `shop` (pedidos) y `billing`
//! (cobros). Colocar un pedido ejecuta el job `shop::job:place`, que
//! guarda el pedido, delega el cobro en `billing::job:charge` y publica un
//! evento; el árbol completo queda en el `TrxStatus`.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use trx_core::{AuthnProvider, AuthnUser, MemoryBucketAdapter, TrxError, TrxNode, TrxRecord};
use trx_daemon::{job_fn, BroadcastTopic, ChannelQueue, Daemon, DaemonConfig, Module, ResourceDef};

/// Capacidad de la cola de recibos y del tópico de eventos.
pub const RECEIPTS_CAPACITY: usize = 64;

/// Token aceptado por el proveedor `user` de la demo.
pub const DEMO_TOKEN: &str = "demo";

#[derive(Error, Debug, PartialEq)]
pub enum DemoError {
    #[error("Entrada vacía")]
    Empty,
    #[error("Cantidad inválida: '{0}'")]
    Quantity(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub item: String,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Interpreta `"<item> [cantidad]"`; la cantidad por defecto es 1.
    pub fn parse(line: &str) -> Result<Self, DemoError> {
        let mut parts = line.split_whitespace();
        let item = parts.next().ok_or(DemoError::Empty)?.to_string();
        let quantity = match parts.next() {
            Some(q) => q.parse().map_err(|_| DemoError::Quantity(q.to_string()))?,
            None => 1,
        };
        Ok(Self { item,
                  quantity,
                  created_at: Utc::now() })
    }
}

/// Proveedor `user`: acepta `DEMO_TOKEN` y resuelve un usuario fijo.
pub struct DemoAuthn;

#[async_trait]
impl AuthnProvider for DemoAuthn {
    async fn authenticate(&self, _node: &TrxNode, token: Option<&str>) -> trx_core::Result<AuthnUser> {
        match token {
            Some(DEMO_TOKEN) => Ok(AuthnUser { user: json!({ "name": "demo", "roles": ["buyer"] }),
                                               token: DEMO_TOKEN.to_string() }),
            _ => Err(TrxError::unauthorized(&["user"])),
        }
    }
}

/// Lo que la demo necesita observar además del daemon.
pub struct DemoHandles {
    pub shop_ledger: Arc<MemoryBucketAdapter<TrxRecord>>,
    pub billing_ledger: Arc<MemoryBucketAdapter<TrxRecord>>,
    pub receipts: mpsc::Receiver<JsonValue>,
    pub events: broadcast::Receiver<JsonValue>,
}

impl DemoHandles {
    /// Vacía la cola de recibos y los eventos pendientes. La cola es
    /// acotada y `push` espera mientras está llena.
    pub fn drain(&mut self) -> (Vec<JsonValue>, Vec<JsonValue>) {
        let mut receipts = Vec::new();
        while let Ok(receipt) = self.receipts.try_recv() {
            receipts.push(receipt);
        }
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => log::warn!("{} eventos perdidos", n),
                Err(_) => break,
            }
        }
        (receipts, events)
    }
}

pub fn build_daemon(config: DaemonConfig) -> (Arc<Daemon>, DemoHandles) {
    let daemon = Daemon::new(config);
    let shop_ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
    let billing_ledger = Arc::new(MemoryBucketAdapter::<TrxRecord>::new());
    let (receipts_queue, receipts) = ChannelQueue::new(RECEIPTS_CAPACITY);
    let events_topic = Arc::new(BroadcastTopic::new(RECEIPTS_CAPACITY));
    let events = events_topic.subscribe();

    daemon.register(Module::builder("billing")
                        .ledger(billing_ledger.clone())
                        .bucket("charges", Arc::new(MemoryBucketAdapter::<JsonValue>::sequential()))
                        .queue("receipts", Arc::new(receipts_queue))
                        .job("charge",
                             job_fn(|node, order| async move {
                                 let charge = node.bucket("charges")
                                                  .create(json!({ "order": order["id"], "amount": order["quantity"], "buyer": node.user("user") }))
                                                  .await?;
                                 node.queue("receipts").push(charge.clone()).await?;
                                 Ok(charge)
                             })));

    daemon.register(Module::builder("shop")
                        .ledger(shop_ledger.clone())
                        .provider("user", Arc::new(DemoAuthn))
                        .bucket("orders", Arc::new(MemoryBucketAdapter::<JsonValue>::new()))
                        .resource("orders", ResourceDef::new("orders").authn(&["user"]))
                        .topic("events", events_topic)
                        .job("place",
                             job_fn(|node, order| async move {
                                 let order = node.resource("orders").create(order).await?;
                                 let charge = node.external("billing::job:charge")
                                                  .idempotent_inherit()
                                                  .auth_inherit()
                                                  .run(order.clone())
                                                  .await?;
                                 node.topic("events").publish(json!({ "kind": "order.placed", "order": order["id"] })).await?;
                                 Ok(json!({ "order": order, "charge": charge }))
                             })));

    (daemon,
     DemoHandles { shop_ledger,
                   billing_ledger,
                   receipts,
                   events })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trx_core::{AuthnRequest, NodeState};

    fn place(item: &str) -> JsonValue {
        serde_json::to_value(Order::parse(item).unwrap()).unwrap()
    }

    #[test]
    fn parses_item_and_quantity() {
        let order = Order::parse("libro 3").unwrap();
        assert_eq!(order.item, "libro");
        assert_eq!(order.quantity, 3);
        assert_eq!(Order::parse("lápiz").unwrap().quantity, 1);
        assert_eq!(Order::parse("  ").unwrap_err(), DemoError::Empty);
        assert_eq!(Order::parse("libro tres").unwrap_err(), DemoError::Quantity("tres".into()));
    }

    #[tokio::test]
    async fn placing_an_order_traces_every_module() {
        let (daemon, mut handles) = build_daemon(DaemonConfig::new("demo"));
        let payload = place("libro 2");

        let status = daemon.trx("shop")
                           .idempotency_key("pedido-1")
                           .authn(AuthnRequest::new().token("user", DEMO_TOKEN))
                           .run(|node| async move { Ok(node.job("place").run(payload).await?) })
                           .await;

        assert!(status.is_ok(), "{}", status.summary());
        for scope in ["shop::job:place",
                      "shop::resource:orders",
                      "shop::bucket:orders",
                      "shop::externals:billing::job:charge",
                      "billing::job:charge",
                      "billing::bucket:charges",
                      "billing::queue:receipts",
                      "shop::topic:events"]
        {
            let node = status.find(scope).unwrap_or_else(|| panic!("falta {}", scope));
            assert_eq!(node.state, NodeState::Ok, "{}", scope);
        }

        let output = status.output.unwrap();
        assert_eq!(output["order"]["item"], "libro");
        assert_eq!(output["charge"]["amount"], 2);
        assert_eq!(output["charge"]["buyer"]["name"], "demo");

        let (receipts, events) = handles.drain();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0]["order"], output["order"]["id"]);
        assert_eq!(events[0]["kind"], "order.placed");
        assert_eq!(handles.billing_ledger.len(), 1);
    }

    #[tokio::test]
    async fn wrong_token_stops_before_running() {
        let (daemon, handles) = build_daemon(DaemonConfig::new("demo"));
        let status = daemon.trx("shop")
                           .authn(AuthnRequest::new().token("user", "otro"))
                           .run(|node| async move { Ok(node.job("place").run(json!({"item": "x", "quantity": 1})).await?) })
                           .await;
        assert_eq!(status.state, NodeState::Error);
        assert_eq!(status.error.unwrap().name, "Unauthorized");
        assert!(status.nodes.is_empty());
        assert!(handles.billing_ledger.is_empty());
    }

    #[test]
    fn cancelled_held_order_rolls_back_the_charge() {
        tokio_test::block_on(async {
            let (daemon, handles) = build_daemon(DaemonConfig::new("demo"));
            let held = daemon.trx("shop")
                             .authn(AuthnRequest::new().token("user", DEMO_TOKEN))
                             .run_and_hold(|node| async move { Ok(node.job("place").run(json!({"item": "x", "quantity": 1})).await?) })
                             .await
                             .unwrap();
            let status = held.rollback(TrxError::new("Demo.Cancelled", 409, "cancelado")).await.unwrap();
            assert_eq!(status.state, NodeState::Error);

            let charges = handles.billing_ledger.snapshot();
            assert_eq!(charges.len(), 1);
            assert_eq!(charges[0].state(), NodeState::Error);
            assert_eq!(handles.shop_ledger.snapshot()[0].state(), NodeState::Error);
        });
    }

    #[tokio::test]
    async fn held_orders_past_queue_capacity_do_not_block_when_drained() {
        let (daemon, mut handles) = build_daemon(DaemonConfig::new("demo"));
        for i in 0..(RECEIPTS_CAPACITY + 2) {
            let payload = place(&format!("item-{} 1", i));
            let held = daemon.trx("shop")
                             .authn(AuthnRequest::new().token("user", DEMO_TOKEN))
                             .run_and_hold(|node| async move { Ok(node.job("place").run(payload).await?) })
                             .await
                             .unwrap();
            held.commit().await.unwrap();
            let (receipts, events) = handles.drain();
            assert_eq!(receipts.len(), 1);
            assert_eq!(events.len(), 1);
        }
        assert_eq!(handles.billing_ledger.len(), RECEIPTS_CAPACITY + 2);
        assert_eq!(handles.drain(), (Vec::new(), Vec::new()));
    }
}
