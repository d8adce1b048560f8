//! A caller logs a request while nobody implements the method, restarts, and
//! picks the response up by id once a replica shows up.

use kappa_rpc_api::{self as kappa, json, MemoryLogs, MethodShape, Peer, PeerIdentity, PeerOptions, Registry, Shape};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

fn registry() -> Result<Registry, kappa::Error> {
    Registry::builder()
        .with_type("Greeting", Shape::object([("name", Shape::String)]))
        .declare("greet", MethodShape::new(["Greeting"], ["string"]))
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "restart=debug,kappa_rpc=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_filter(kappa::logger::ReplayFilter::new()))
        .init();

    let logs = MemoryLogs::new();
    let caller_identity = PeerIdentity::generate();
    let start_caller = |registry: Registry| {
        Peer::start(
            logs.aggregate(caller_identity.peer_id()),
            caller_identity.clone(),
            registry,
            PeerOptions::default(),
        )
    };

    let caller = start_caller(registry()?).await?;
    let mut handle = caller.api().call("greet", json!({"name": "kappa"}))?;
    let accepted = handle.accepted().await?;
    info!("Logged {} before anyone can answer it", accepted.id);
    caller.shutdown().await;
    drop(caller);

    let caller = start_caller(registry()?).await?;
    let pending = caller.api().pending_requests();
    info!("{} request(s) pending after restart", pending.len());
    let responses: Vec<_> = pending
        .iter()
        .map(|request| caller.api().subscribe(request.id))
        .collect();

    let replica_identity = PeerIdentity::generate();
    let replica_registry = Registry::builder()
        .with_type("Greeting", Shape::object([("name", Shape::String)]))
        .implement(
            "greet",
            MethodShape::new(["Greeting"], ["string"]),
            |_ctx: kappa::Context, greeting: kappa::Value| async move {
                Ok::<_, anyhow::Error>(format!("hello {}", greeting["name"].as_str().unwrap_or("stranger")))
            },
        )
        .build()?;
    let replica = Peer::start(
        logs.aggregate(replica_identity.peer_id()),
        replica_identity,
        replica_registry,
        PeerOptions::default(),
    )
    .await?;

    for response in responses {
        info!("Response: {}", response.await?);
    }

    caller.shutdown().await;
    replica.shutdown().await;
    Ok(())
}
