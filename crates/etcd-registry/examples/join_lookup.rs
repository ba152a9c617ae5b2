//! Register a service, look it up and deregister it.
//!
//! Run against a local etcd with the v2 API enabled:
//!
//! ```text
//! RUST_LOG=etcd_registry=debug cargo run --example join_lookup -- 127.0.0.1:2379
//! ```

use etcd_registry::{Registry, ServiceDescriptor};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let connection_string = std::env::args().nth(1).unwrap_or_default();
    let registry = Registry::connect(&connection_string)?;

    let record = registry
        .join(
            "example",
            ServiceDescriptor::from(8080).with_field("version", "1.0.0"),
        )
        .await?;
    println!("joined: {}", serde_json::to_string(&record)?);

    match registry.lookup(Some("example")).await? {
        Some(found) => println!("lookup: {} ({})", found.url, found.host),
        None => println!("lookup: nothing registered"),
    }

    let all = registry.list(None).await?;
    println!("{} instance(s) registered across all services", all.len());

    registry.destroy().await?;
    Ok(())
}
