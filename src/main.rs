use forge::prelude::*;

mod config;
mod error;
mod functions;
mod schema;
mod services;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ForgeConfig::from_file("forge.toml")?;
    let mut builder = Forge::builder();

    let daemons = builder.daemon_registry_mut();
    daemons.register::<functions::DispatchDaemon>();
    daemons.register::<functions::IngressDaemon>();

    builder.config(config).build()?.run().await
}
