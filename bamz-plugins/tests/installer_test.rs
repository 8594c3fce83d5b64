//! Installer behavior against a simulated cluster.

use async_trait::async_trait;
use bamz_db::DbError;
use bamz_plugins::{
    CleanContext, MembershipCache, Plugin, PluginError, PluginInstaller, PluginRegistry,
    PluginResult, PrepareContext,
};
use bamz_tenancy::{
    GrantLevel, InvalidationHub, ProvisioningEngine, SchemaCatalog, TenantCacheInvalidator,
    TenantFiles,
};
use bamz_testing::{
    CallRecorder, ObjectKind, SimulatedCluster, TestDataDir, platform_cluster,
    platform_credentials,
};
use std::sync::Arc;

/// Creates a schema named after itself.
struct SchemaPlugin {
    id: &'static str,
    deps: Vec<&'static str>,
    calls: CallRecorder,
}

#[async_trait]
impl Plugin for SchemaPlugin {
    fn id(&self) -> &str {
        self.id
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.iter().map(|d| d.to_string()).collect()
    }

    async fn prepare_database(&self, ctx: &mut PrepareContext<'_>) -> PluginResult<()> {
        self.calls.record(format!("prepare:{}", self.id));
        ctx.connection
            .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {};", self.id))
            .await?;
        ctx.grant_schema_access(self.id, GrantLevel::Default).await
    }

    async fn clean_database(&self, ctx: &mut CleanContext<'_>) -> PluginResult<()> {
        self.calls.record(format!("clean:{}", self.id));
        ctx.connection
            .execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.id), &[])
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct Invalidations {
    calls: CallRecorder,
}

#[async_trait]
impl TenantCacheInvalidator for Invalidations {
    async fn invalidate_tenant(&self, code: &str) {
        self.calls.record(code);
    }
}

struct Fixture {
    cluster: SimulatedCluster,
    installer: PluginInstaller,
    calls: CallRecorder,
    invalidations: Arc<Invalidations>,
    _data: TestDataDir,
}

impl Fixture {
    async fn new() -> Self {
        let cluster = platform_cluster();
        let data = TestDataDir::new().unwrap();
        let engine = ProvisioningEngine::new(
            Arc::new(cluster.clone()),
            platform_credentials(),
            SchemaCatalog::builtin(),
        );
        engine.provision_tenant("shop1").await.unwrap();

        let calls = CallRecorder::new();
        let plugin = |id, deps| SchemaPlugin {
            id,
            deps,
            calls: calls.clone(),
        };
        let plugins = PluginRegistry::new()
            .with_plugin(plugin("accounts", vec![]))
            .with_plugin(plugin("billing", vec!["accounts"]))
            .with_plugin(plugin("reports", vec!["billing", "accounts"]))
            .with_plugin(plugin("ping", vec!["pong"]))
            .with_plugin(plugin("pong", vec!["ping"]));

        let hub = Arc::new(InvalidationHub::new());
        let invalidations = Arc::new(Invalidations::default());
        hub.subscribe(invalidations.clone());

        let installer = PluginInstaller::new(
            engine,
            Arc::new(plugins),
            Arc::new(MembershipCache::new(
                Arc::new(cluster.clone()),
                platform_credentials(),
            )),
            TenantFiles::new(data.apps_dir()),
            hub,
        );

        Self {
            cluster,
            installer,
            calls,
            invalidations,
            _data: data,
        }
    }
}

#[tokio::test]
async fn test_install_pulls_in_missing_dependencies() {
    let fx = Fixture::new().await;
    let membership = fx.installer.membership().clone();

    assert!(!membership.has_plugin("shop1", "billing").await);
    fx.installer.install("shop1", "billing").await.unwrap();

    assert_eq!(fx.cluster.plugins("shop1"), vec!["accounts", "billing"]);
    assert_eq!(fx.calls.calls(), vec!["prepare:accounts", "prepare:billing"]);
    assert!(membership.has_plugin("shop1", "accounts").await);
    assert!(membership.has_plugin("shop1", "billing").await);
    assert_eq!(fx.invalidations.calls.calls(), vec!["shop1"]);

    // Plugin schemas get the full grant bundle
    let inherited = fx.cluster.inherited_privileges(
        "shop1",
        "shop1_admin",
        "billing",
        ObjectKind::Tables,
        "shop1_user",
    );
    assert!(inherited.contains("INSERT"));
}

#[tokio::test]
async fn test_installed_dependencies_are_not_prepared_again() {
    let fx = Fixture::new().await;

    fx.installer.install("shop1", "accounts").await.unwrap();
    fx.calls.clear();
    fx.installer.install("shop1", "reports").await.unwrap();

    assert_eq!(fx.calls.calls(), vec!["prepare:billing", "prepare:reports"]);
    assert_eq!(
        fx.installer.installed("shop1").await.unwrap(),
        vec!["accounts", "billing", "reports"]
    );
}

#[tokio::test]
async fn test_unknown_plugin_is_ignored() {
    let fx = Fixture::new().await;

    fx.installer.install("shop1", "nope").await.unwrap();

    assert!(fx.cluster.plugins("shop1").is_empty());
    assert_eq!(fx.invalidations.calls.call_count(), 0);
}

#[tokio::test]
async fn test_cycle_is_reported() {
    let fx = Fixture::new().await;

    let err = fx.installer.install("shop1", "ping").await.unwrap_err();

    match err {
        PluginError::DependencyCycle(path) => assert_eq!(path, vec!["ping", "pong", "ping"]),
        other => panic!("unexpected error: {}", other),
    }
    assert!(fx.cluster.plugins("shop1").is_empty());
    assert_eq!(fx.calls.call_count(), 0);
}

#[tokio::test]
async fn test_failed_install_still_invalidates() {
    let fx = Fixture::new().await;
    let membership = fx.installer.membership().clone();
    fx.cluster.fail_on(
        "CREATE SCHEMA IF NOT EXISTS billing",
        DbError::query(Some("XX000"), "disk full"),
    );

    assert!(!membership.has_plugin("shop1", "accounts").await);
    let err = fx.installer.install("shop1", "billing").await.unwrap_err();

    assert!(err.to_string().contains("disk full"));
    assert_eq!(fx.cluster.plugins("shop1"), vec!["accounts"]);
    assert_eq!(fx.invalidations.calls.calls(), vec!["shop1"]);
    assert!(membership.has_plugin("shop1", "accounts").await);
}

#[tokio::test]
async fn test_failed_uninstall_still_invalidates() {
    let fx = Fixture::new().await;
    fx.installer.install("shop1", "billing").await.unwrap();
    fx.cluster.fail_on(
        "DROP SCHEMA IF EXISTS billing",
        DbError::query(Some("2BP01"), "dependent objects still exist"),
    );

    assert!(fx.installer.uninstall("shop1", "billing").await.is_err());

    assert_eq!(fx.cluster.plugins("shop1"), vec!["accounts", "billing"]);
    assert_eq!(fx.invalidations.calls.count_of("shop1"), 2);
}

#[tokio::test]
async fn test_uninstall_cleans_and_invalidates() {
    let fx = Fixture::new().await;
    let membership = fx.installer.membership().clone();

    fx.installer.install("shop1", "billing").await.unwrap();
    assert!(membership.has_plugin("shop1", "billing").await);

    fx.installer.uninstall("shop1", "billing").await.unwrap();

    assert_eq!(fx.cluster.plugins("shop1"), vec!["accounts"]);
    assert!(!fx.cluster.schemata("shop1").contains(&"billing".to_string()));
    assert!(fx.calls.was_called("clean:billing"));
    assert!(!membership.has_plugin("shop1", "billing").await);
    assert_eq!(fx.invalidations.calls.count_of("shop1"), 2);
}

#[tokio::test]
async fn test_prepare_all_orders_by_dependency() {
    let fx = Fixture::new().await;
    fx.cluster.add_plugin_row("shop1", "billing");
    fx.cluster.add_plugin_row("shop1", "retired");
    fx.cluster.add_plugin_row("shop1", "ping");
    fx.cluster.add_plugin_row("shop1", "pong");
    fx.cluster.add_plugin_row("shop1", "accounts");

    let prepared = fx.installer.prepare_all("shop1").await.unwrap();

    assert_eq!(prepared, vec!["accounts", "billing"]);
    assert_eq!(fx.calls.calls(), vec!["prepare:accounts", "prepare:billing"]);
    assert_eq!(fx.invalidations.calls.call_count(), 0);
}
