use serde_json::json;
use std::error::Error;
use std::io::{self, Write};
use trx_core::{AuthnRequest, TrxError};
use trx_daemon::DaemonConfig;
use trxflow::{build_daemon, DemoHandles, Order, DEMO_TOKEN};
use uuid::Uuid;

/// Pequeño menú interactivo sobre el daemon de demostración.
///
/// Opciones soportadas:
/// 1) Colocar pedido (job `shop::job:place`, con cobro delegado)
/// 2) Ver pedido (recurso protegido)
/// 3) Colocar pedido retenido y decidir commit/rollback
/// 4) Listar transacciones persistidas
/// 5) Salir
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Configuración desde entorno (.env soportado)
    let config = DaemonConfig::from_env()?;
    let (daemon, mut handles) = build_daemon(config);

    loop {
        println!("\n== trx demo ({}) ==", daemon.name());
        println!("1) Colocar pedido");
        println!("2) Ver pedido");
        println!("3) Colocar pedido retenido");
        println!("4) Listar transacciones");
        println!("5) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                let line = prompt("Pedido (<item> [cantidad]): ")?;
                let order = match Order::parse(&line) {
                    Ok(o) => o,
                    Err(e) => { eprintln!("{}", e); continue; }
                };
                let token = prompt(&format!("Token (enter para '{}'): ", DEMO_TOKEN))?;
                let token = if token.trim().is_empty() { DEMO_TOKEN.to_string() } else { token.trim().to_string() };
                let payload = serde_json::to_value(&order)?;
                let status = daemon.trx("shop")
                                   .origin("cli:demo")
                                   .idempotency_key(Uuid::new_v4().to_string())
                                   .authn(AuthnRequest::new().token("user", token))
                                   .run(|node| async move { Ok(node.job("place").run(payload).await?) })
                                   .await;
                println!("{}", status.summary());
                drain(&mut handles);
            }
            "2" => {
                let id = prompt("Id del pedido: ")?;
                let id = id.trim().to_string();
                let status = daemon.trx("shop")
                                   .origin("cli:demo")
                                   .authn(AuthnRequest::new().token("user", DEMO_TOKEN))
                                   .run(|node| async move { Ok(node.resource("orders").view(&id).await?) })
                                   .await;
                match (&status.output, &status.error) {
                    (_, Some(e)) => eprintln!("Error: {}", e),
                    (Some(out), None) => println!("{}", serde_json::to_string_pretty(out)?),
                    (None, None) => println!("(sin salida)"),
                }
            }
            "3" => {
                let line = prompt("Pedido (<item> [cantidad]): ")?;
                let order = match Order::parse(&line) {
                    Ok(o) => o,
                    Err(e) => { eprintln!("{}", e); continue; }
                };
                let payload = serde_json::to_value(&order)?;
                let held = daemon.trx("shop")
                                 .origin("cli:demo")
                                 .authn(AuthnRequest::new().token("user", DEMO_TOKEN))
                                 .run_and_hold(|node| async move { Ok(node.job("place").run(payload).await?) })
                                 .await;
                let held = match held {
                    Ok(h) => h,
                    Err(e) => { eprintln!("No se pudo ejecutar: {}", e); drain(&mut handles); continue; }
                };
                println!("{}", held.status().summary());
                let confirm = prompt("Confirmar? escribir 'yes' para commit: ")?;
                let finished = if confirm.trim().eq_ignore_ascii_case("yes") {
                    held.commit().await
                } else {
                    held.rollback(TrxError::new("Demo.Cancelled", 409, "Cancelado desde la CLI")
                                      .with_data(json!({ "origin": "cli:demo" })))
                        .await
                };
                match finished {
                    Ok(status) => println!("{}", status.summary()),
                    Err(e) => eprintln!("Error al finalizar: {}", e),
                }
                drain(&mut handles);
            }
            "4" => {
                println!("\nID                                   | MODULE  | ORIGIN       | STATE");
                println!("---------------------------------------------------------------------------");
                for rec in handles.shop_ledger.snapshot().into_iter().chain(handles.billing_ledger.snapshot()) {
                    println!("{} | {:<7} | {:<12} | {}", rec.id, rec.module, rec.origin, rec.state());
                }
            }
            "5" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

fn drain(handles: &mut DemoHandles) {
    let (receipts, events) = handles.drain();
    for receipt in receipts {
        println!("recibo en cola: {}", receipt);
    }
    for event in events {
        println!("evento: {}", event);
    }
}
