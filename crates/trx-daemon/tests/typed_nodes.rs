use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use trx_core::{AuthnRequest, MemoryBucketAdapter, NodeState, StaticAuthnProvider};
use trx_daemon::{job_fn, machine_fn, BroadcastTopic, ChannelQueue, Daemon, DaemonConfig, Module, ResourceDef};

fn users_bucket() -> Arc<MemoryBucketAdapter<JsonValue>> {
  Arc::new(MemoryBucketAdapter::<JsonValue>::new().with_records([json!({"id": 1, "name": "ana", "role": "admin"}),
                                                                  json!({"id": 2, "name": "luis", "role": "user"})]))
}

#[tokio::test]
async fn bucket_operations_are_child_nodes() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("shop").bucket("orders", Arc::new(MemoryBucketAdapter::<JsonValue>::sequential())));

  let status = daemon.trx("shop")
                     .run(|node| async move {
                       let created = node.bucket("orders").create(json!({"item": "libro"})).await?;
                       let read = node.bucket("orders").read_one("1").await?;
                       assert_eq!(created, read);
                       let all = node.bucket("orders").read_all().await?;
                       node.bucket("orders").delete("1").await?;
                       Ok(all)
                     })
                     .await;

  assert!(status.is_ok(), "{}", status.summary());
  let actions: Vec<_> = status.nodes.iter().map(|n| n.action.clone().unwrap_or_default()).collect();
  assert_eq!(actions, vec!["create", "readOne", "readAll", "delete"]);
  assert!(status.nodes.iter().all(|n| n.scope == "shop::bucket:orders" && n.state == NodeState::Ok));
  assert_eq!(status.nodes[0].output, Some(json!({"id": 1, "item": "libro"})));
  assert_eq!(status.output, Some(json!([{"id": 1, "item": "libro"}])));
}

#[tokio::test]
async fn missing_object_fails_the_node_and_the_trx() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("shop").bucket("orders", Arc::new(MemoryBucketAdapter::<JsonValue>::new())));

  let status = daemon.trx("shop").run(|node| async move { Ok(node.bucket("orders").read_one("99").await?) }).await;
  assert_eq!(status.state, NodeState::Error);
  let err = status.nodes[0].error.as_ref().unwrap();
  assert_eq!(err.name, "Bucket.ObjNotFound");
  assert_eq!(err.status, 404);
  assert_eq!(status.error.unwrap().name, "Bucket.ObjNotFound");

  let status = daemon.trx("shop").run(|node| async move { Ok(node.bucket("orders").delete("99").await?) }).await;
  assert_eq!(status.error.unwrap().name, "Bucket.ObjNotFound");
}

#[tokio::test]
async fn unknown_block_is_attributed_to_its_node() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("shop"));

  let status = daemon.trx("shop").run(|node| async move { Ok(node.job("ghost").run(json!(null)).await?) }).await;
  let n = &status.nodes[0];
  assert_eq!(n.scope, "shop::job:ghost");
  assert_eq!(n.state, NodeState::Error);
  let err = n.error.as_ref().unwrap();
  assert_eq!(err.name, "Module.BlockNotFound");
  assert_eq!(err.data.as_ref().unwrap()["kind"], "job");
}

#[tokio::test]
async fn unknown_module_reports_an_error_status() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  let status = daemon.trx("ghost").origin("cli").run(|_node| async move { Ok(json!("nunca")) }).await;
  assert_eq!(status.state, NodeState::Error);
  assert_eq!(status.origin, "cli");
  assert_eq!(status.error.unwrap().name, "Module.NotFound");

  let held = daemon.trx("ghost").run_and_hold(|_node| async move { Ok(json!("nunca")) }).await;
  assert_eq!(held.unwrap_err().name, "Module.NotFound");
}

#[tokio::test]
async fn job_calls_become_grandchildren() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("shop")
                    .bucket("orders", Arc::new(MemoryBucketAdapter::<JsonValue>::sequential()))
                    .job("place", job_fn(|node, input| async move { Ok(node.bucket("orders").create(input).await?) }))
                    .job("checkout", job_fn(|node, input| async move { Ok(node.job("place").run(input).await?) })));

  let status = daemon.trx("shop")
                     .run(|node| async move { Ok(node.job("checkout").run(json!({"item": "lápiz"})).await?) })
                     .await;

  assert!(status.is_ok(), "{}", status.summary());
  let checkout = &status.nodes[0];
  assert_eq!(checkout.scope, "shop::job:checkout");
  let place = &checkout.nodes[0];
  assert_eq!(place.scope, "shop::job:place");
  let bucket = &place.nodes[0];
  assert_eq!(bucket.scope, "shop::bucket:orders");
  assert_eq!(bucket.action.as_deref(), Some("create"));
  assert_eq!(status.output, Some(json!({"id": 1, "item": "lápiz"})));
}

#[tokio::test]
async fn machine_transition_is_the_node_action() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("docs")
                    .bucket("docs", Arc::new(MemoryBucketAdapter::<JsonValue>::new().with_records([json!({"id": "d1", "state": "draft"})])))
                    .machine("lifecycle",
                             machine_fn(|node, id, transition, _input| async move {
                               let mut doc = node.bucket("docs").read_one(&id).await?;
                               doc["state"] = json!(transition);
                               Ok(node.bucket("docs").put(doc).await?)
                             })));

  let status = daemon.trx("docs")
                     .run(|node| async move { Ok(node.machine("lifecycle").run("d1", "publish", json!({"by": "ana"})).await?) })
                     .await;
  assert!(status.is_ok(), "{}", status.summary());
  let machine = &status.nodes[0];
  assert_eq!(machine.scope, "docs::machine:lifecycle");
  assert_eq!(machine.action.as_deref(), Some("publish"));
  assert_eq!(machine.input, Some(json!({"id": "d1", "input": {"by": "ana"}})));
  assert_eq!(machine.nodes.len(), 2);
  assert_eq!(status.output, Some(json!({"id": "d1", "state": "publish"})));
}

fn secured_daemon() -> Arc<Daemon> {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("crm")
                    .provider("user", Arc::new(StaticAuthnProvider::new().user("t-ana", json!({"name": "ana"}))))
                    .bucket("users", users_bucket())
                    .resource("people", ResourceDef::new("users").authn(&["user"])));
  daemon
}

#[tokio::test]
async fn resource_denies_without_required_provider() {
  let daemon = secured_daemon();
  let status = daemon.trx("crm").run(|node| async move { Ok(node.resource("people").view("1").await?) }).await;

  assert_eq!(status.state, NodeState::Error);
  let people = &status.nodes[0];
  assert_eq!(people.scope, "crm::resource:people");
  assert_eq!(people.error.as_ref().unwrap().name, "Unauthorized");
  // the bucket is never reached
  assert!(people.nodes.is_empty());
}

#[tokio::test]
async fn resource_crud_with_authenticated_user() {
  let daemon = secured_daemon();
  let status = daemon.trx("crm")
                     .authn(AuthnRequest::new().token("user", "t-ana"))
                     .run(|node| async move {
                       let people = node.resource("people");
                       let admins = people.query(json!({"role": "admin"})).await?;
                       assert_eq!(admins, json!([{"id": 1, "name": "ana", "role": "admin"}]));
                       people.create(json!({"name": "eva", "role": "user"})).await?;
                       let updated = people.update("2", json!({"role": "admin", "id": 7})).await?;
                       people.delete("1").await?;
                       Ok(updated)
                     })
                     .await;

  assert!(status.is_ok(), "{}", status.summary());
  assert_eq!(status.output, Some(json!({"id": 2, "name": "luis", "role": "admin"})));
  let update = &status.nodes[2];
  assert_eq!(update.action.as_deref(), Some("update"));
  let inner: Vec<_> = update.nodes.iter().map(|n| n.action.clone().unwrap_or_default()).collect();
  assert_eq!(inner, vec!["readOne", "put"]);
}

#[tokio::test]
async fn queue_and_topic_deliver_messages() {
  let (queue, mut inbox) = ChannelQueue::new(4);
  let topic = Arc::new(BroadcastTopic::new(4));
  let mut listener = topic.subscribe();

  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("notify").queue("mails", Arc::new(queue)).topic("events", topic.clone()));

  let status = daemon.trx("notify")
                     .run(|node| async move {
                       node.queue("mails").push(json!({"to": "ana"})).await?;
                       Ok(node.topic("events").publish(json!({"kind": "sent"})).await?)
                     })
                     .await;

  assert!(status.is_ok(), "{}", status.summary());
  assert_eq!(status.output, Some(json!({"topic": "events", "delivered": 1})));
  assert_eq!(status.nodes[0].scope, "notify::queue:mails");
  assert_eq!(inbox.recv().await, Some(json!({"to": "ana"})));
  assert_eq!(listener.recv().await.unwrap(), json!({"kind": "sent"}));
}

#[tokio::test]
async fn virtual_node_runs_under_module_scope() {
  let daemon = Daemon::new(DaemonConfig::new("api"));
  daemon.register(Module::builder("calc"));
  let status = daemon.trx("calc")
                     .run(|node| async move {
                       let doubled = node.virtual_node("double", Some(json!(21)), |_v| async move { Ok(json!(42)) }).await?;
                       Ok(doubled)
                     })
                     .await;
  assert_eq!(status.nodes[0].scope, "calc::virtual");
  assert_eq!(status.nodes[0].action.as_deref(), Some("double"));
  assert_eq!(status.output, Some(json!(42)));
}
