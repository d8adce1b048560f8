//! Two peers on one in-memory aggregate. `replica` implements
//! `createReplicate` and signs the replica address, `caller` only declares the
//! method and calls it.

use kappa_rpc_api::{self as kappa, MemoryLogs, MethodShape, Peer, PeerIdentity, PeerOptions, Registry, Shape};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReplicateRequest {
    #[serde(rename = "peerId")]
    peer_id: String,
    address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Signature {
    signature: String,
}

fn registry(implement: bool) -> Result<Registry, kappa::Error> {
    let builder = Registry::builder()
        .with_type(
            "ReplicateRequest",
            Shape::object([("peerId", Shape::String), ("address", Shape::String)]),
        )
        .with_type("Signature", Shape::object([("signature", Shape::String)]));
    let shape = MethodShape::new(["ReplicateRequest"], ["Signature"]);
    if !implement {
        return builder.declare("createReplicate", shape).build();
    }
    builder
        .implement(
            "createReplicate",
            shape,
            |ctx: kappa::Context, request: ReplicateRequest| async move {
                info!("Signing replica {} for {}", request.address, ctx.caller().short());
                let signed = format!("{}{}", request.peer_id, request.address);
                Ok::<_, anyhow::Error>(Signature {
                    signature: ctx.sign_hex(signed.as_bytes()),
                })
            },
        )
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "replicate=debug,kappa_rpc=info".into());
    let replay_filter = kappa::logger::ReplayFilter::new();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_filter(replay_filter))
        .init();

    let logs = MemoryLogs::new();
    let replica_identity = PeerIdentity::generate();
    let caller_identity = PeerIdentity::generate();

    let replica = Peer::start(
        logs.aggregate(replica_identity.peer_id()),
        replica_identity.clone(),
        registry(true)?,
        PeerOptions::default(),
    )
    .await?;
    let caller = Peer::start(
        logs.aggregate(caller_identity.peer_id()),
        caller_identity,
        registry(false)?,
        PeerOptions::default(),
    )
    .await?;

    let request = ReplicateRequest {
        peer_id: "4eeb77c9".to_string(),
        address: "b03d6e7f".to_string(),
    };
    let mut handle = caller.api().method("createReplicate")?.call(request.clone())?;
    let accepted = handle.accepted().await?;
    info!("Request {} logged at {}", accepted.id, accepted.sequence);

    let signature: Signature = serde_json::from_value(handle.await?)?;
    let bytes = hex::decode(&signature.signature)?;
    let signed = format!("{}{}", request.peer_id, request.address);
    info!(
        "Signature {} valid: {}",
        signature.signature,
        kappa::verify_signature(&replica_identity.peer_id(), signed.as_bytes(), &bytes)
    );

    caller.shutdown().await;
    replica.shutdown().await;
    Ok(())
}
