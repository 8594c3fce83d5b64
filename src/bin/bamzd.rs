//! bamz daemon: prepares the platform database and runs the job workers.

use bamz::graphql::async_graphql::{self, Context, EmptyMutation, EmptySubscription, Object, Schema};
use bamz::graphql::{AsyncGraphQLFactory, AsyncGraphQLService, ServiceSpec};
use bamz::log::{error, info};
use bamz::plugins::PluginRegistry;
use bamz::{Platform, PlatformConfig};
use std::process::ExitCode;
use std::sync::Arc;

/// Introspection-free service describing what a tenant exposes.
struct StatusQuery;

#[Object]
impl StatusQuery {
    async fn app(&self, ctx: &Context<'_>) -> String {
        ctx.data_unchecked::<ServiceSpec>().code.clone()
    }

    async fn schemas(&self, ctx: &Context<'_>) -> Vec<String> {
        ctx.data_unchecked::<ServiceSpec>().schemas.clone()
    }
}

async fn run() -> bamz::Result<()> {
    let config = PlatformConfig::from_env()?;
    let factory = AsyncGraphQLFactory::new(|spec| {
        let schema = Schema::build(StatusQuery, EmptyMutation, EmptySubscription)
            .data(spec.clone())
            .finish();
        Ok(Arc::new(AsyncGraphQLService::new(schema)))
    });

    let platform = Platform::new(config, PluginRegistry::new(), Arc::new(factory));
    platform.prepare().await?;
    let workers = platform.start_workers().await?;
    info!(target: "bamz::daemon", "Started {} workers", workers);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(target: "bamz::daemon", "Cannot listen for shutdown signal: {}", e);
    }
    platform.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    bamz::log::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "bamz::daemon", kv: [("fatal", e.is_fatal())], "bamzd failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
