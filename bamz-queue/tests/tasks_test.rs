//! Built-in tasks run through a worker against a simulated cluster.

use async_trait::async_trait;
use bamz_db::ConnectionProvider;
use bamz_plugins::{
    CleanContext, MembershipCache, Plugin, PluginError, PluginInstaller, PluginRegistry,
    PluginResult, PluginTask, PrepareContext, TaskContext as PluginTaskContext,
};
use bamz_queue::{
    JobOutcome, JobQueue, NewJob, PgJobQueue, TaskContext, TaskRegistry, TaskServices, Worker,
    WorkerConfig, WorkerSupervisor, register_builtin_tasks,
};
use bamz_tenancy::{
    GrantLevel, HostnameCache, InvalidationHub, ProvisioningEngine, SchemaCatalog,
    TenantCacheInvalidator, TenantDirectory, TenantFiles,
};
use bamz_testing::{
    CallRecorder, PLATFORM_DB, SimulatedCluster, TestDataDir, platform_cluster,
    platform_credentials,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct ReportTask {
    calls: CallRecorder,
}

#[async_trait]
impl PluginTask for ReportTask {
    async fn run(&self, ctx: &mut PluginTaskContext<'_>, params: Value) -> PluginResult<()> {
        if params["fail"] == true {
            return Err(PluginError::failed("billing", "report generation failed"));
        }
        self.calls
            .record(format!("report:{}:{}", ctx.app_name, params["month"]));
        Ok(())
    }
}

struct Billing {
    calls: CallRecorder,
}

#[async_trait]
impl Plugin for Billing {
    fn id(&self) -> &str {
        "billing"
    }

    async fn prepare_database(&self, ctx: &mut PrepareContext<'_>) -> PluginResult<()> {
        self.calls.record("prepare:billing");
        ctx.connection
            .batch_execute("CREATE SCHEMA IF NOT EXISTS billing;")
            .await?;
        ctx.grant_schema_access("billing", GrantLevel::Default).await
    }

    async fn clean_database(&self, ctx: &mut CleanContext<'_>) -> PluginResult<()> {
        self.calls.record("clean:billing");
        ctx.connection
            .execute("DROP SCHEMA IF EXISTS billing CASCADE", &[])
            .await?;
        Ok(())
    }

    fn task(&self, path: &str) -> Option<Arc<dyn PluginTask>> {
        (path == "tasks/report").then(|| {
            Arc::new(ReportTask {
                calls: self.calls.clone(),
            }) as Arc<dyn PluginTask>
        })
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
    services: Arc<TaskServices>,
    tasks: Arc<TaskRegistry>,
    supervisor: WorkerSupervisor,
    calls: CallRecorder,
    invalidations: Arc<Invalidations>,
    data: TestDataDir,
}

impl Fixture {
    fn new(cluster: SimulatedCluster) -> Self {
        let connections: Arc<dyn ConnectionProvider> = Arc::new(cluster.clone());
        let data = TestDataDir::new().unwrap();
        let engine = ProvisioningEngine::new(
            connections.clone(),
            platform_credentials(),
            SchemaCatalog::builtin(),
        );
        let files = TenantFiles::new(data.apps_dir());
        let calls = CallRecorder::new();

        let hub = Arc::new(InvalidationHub::new());
        let invalidations = Arc::new(Invalidations::default());
        hub.subscribe(invalidations.clone());

        let installer = Arc::new(PluginInstaller::new(
            engine.clone(),
            Arc::new(PluginRegistry::new().with_plugin(Billing {
                calls: calls.clone(),
            })),
            Arc::new(MembershipCache::new(
                connections.clone(),
                platform_credentials(),
            )),
            files.clone(),
            hub.clone(),
        ));

        let services = Arc::new(TaskServices {
            engine,
            installer,
            directory: TenantDirectory::new(connections.clone(), platform_credentials()),
            files,
            hostnames: Arc::new(HostnameCache::new()),
            hub,
        });

        let tasks = Arc::new(TaskRegistry::new());
        register_builtin_tasks(&tasks, services.clone());
        let supervisor = WorkerSupervisor::new(
            connections,
            platform_credentials(),
            tasks.clone(),
            WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
        );

        Self {
            cluster,
            services,
            tasks,
            supervisor,
            calls,
            invalidations,
            data,
        }
    }

    /// Queue `task` in `database` and let a worker run it once.
    async fn run(&self, database: &str, task: &str, payload: Value) -> JobOutcome {
        let credentials = SimulatedCluster::superuser(database);
        let queue = Arc::new(PgJobQueue::new(
            Arc::new(self.cluster.clone()),
            credentials.clone(),
        ));
        queue.enqueue(NewJob::new(task, payload)).await.unwrap();

        let context = TaskContext::new(
            Arc::new(self.cluster.clone()),
            credentials,
            self.supervisor.control(),
        );
        let worker = Worker::new(
            queue,
            self.tasks.clone(),
            context,
            WorkerConfig::default(),
        );
        worker.run_once().await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_builtin_tasks_are_registered() {
    let fixture = Fixture::new(platform_cluster());
    assert_eq!(
        fixture.tasks.names(),
        vec![
            "add-plugin",
            "create-database",
            "drop-database",
            "remove-plugin",
            "run-plugin-task",
            "update-hostname-cache",
        ]
    );
    assert!(fixture.tasks.get("createDatabase").is_some());
}

#[tokio::test]
async fn test_create_database_brings_up_tenant() {
    let fixture = Fixture::new(platform_cluster().with_app("shop1", "acc1"));

    let outcome = fixture
        .run(PLATFORM_DB, "createDatabase", json!({"database": "shop1"}))
        .await;
    assert_eq!(outcome, JobOutcome::Completed);

    let cluster = &fixture.cluster;
    assert!(cluster.has_database("shop1"));
    for role in ["shop1_admin", "shop1_user", "shop1_readonly"] {
        assert!(cluster.has_role(role), "missing {}", role);
    }
    assert_eq!(cluster.members_of("shop1_admin"), vec!["acc1".to_string()]);
    assert!(cluster.schemata("shop1").contains(&"openbamz".to_string()));
    assert!(fixture
        .data
        .tenant_dir("shop1")
        .join("public")
        .join("index.html")
        .exists());
    assert!(fixture.supervisor.is_running("shop1"));

    fixture.supervisor.stop_all().await;
}

#[tokio::test]
async fn test_create_database_for_unknown_app_is_ignored() {
    let fixture = Fixture::new(platform_cluster());

    let outcome = fixture
        .run(PLATFORM_DB, "create-database", json!({"database": "ghost"}))
        .await;

    assert_eq!(outcome, JobOutcome::Completed);
    assert!(!fixture.cluster.has_database("ghost"));
    assert!(fixture.cluster.jobs(PLATFORM_DB).is_empty());
}

#[tokio::test]
async fn test_drop_database_forgets_tenant_everywhere() {
    let fixture = Fixture::new(platform_cluster().with_app("shop1", "acc1"));
    fixture
        .run(PLATFORM_DB, "create-database", json!({"database": "shop1"}))
        .await;
    fixture.services.hostnames.set("shop.example.com", "shop1");
    fixture.services.hostnames.set("other.example.com", "shop2");

    let outcome = fixture
        .run(PLATFORM_DB, "drop-database", json!({"database": "shop1"}))
        .await;
    assert_eq!(outcome, JobOutcome::Completed);

    let cluster = &fixture.cluster;
    assert!(!cluster.has_database("shop1"));
    assert!(!cluster.has_role("shop1_admin"));
    assert!(!cluster.has_role("shop1_user"));
    assert!(!fixture.data.tenant_dir("shop1").exists());
    assert!(fixture.invalidations.calls.was_called("shop1"));
    assert_eq!(fixture.services.hostnames.resolve("shop.example.com"), None);
    assert_eq!(
        fixture.services.hostnames.resolve("other.example.com").as_deref(),
        Some("shop2")
    );
    assert!(!fixture.supervisor.is_running("shop1"));
}

#[tokio::test]
async fn test_add_and_remove_plugin_in_tenant_queue() {
    let fixture = Fixture::new(platform_cluster().with_app("shop1", "acc1"));
    fixture.services.engine.provision_tenant("shop1").await.unwrap();

    let outcome = fixture
        .run("shop1", "addPlugin", json!({"plugin": "billing"}))
        .await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(fixture.cluster.plugins("shop1"), vec!["billing".to_string()]);
    assert!(fixture.cluster.schemata("shop1").contains(&"billing".to_string()));
    assert_eq!(fixture.invalidations.calls.count_of("shop1"), 1);

    let outcome = fixture
        .run("shop1", "remove-plugin", json!({"plugin": "billing"}))
        .await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert!(fixture.cluster.plugins("shop1").is_empty());
    assert_eq!(
        fixture.calls.calls(),
        vec!["prepare:billing".to_string(), "clean:billing".to_string()]
    );
    assert_eq!(fixture.invalidations.calls.count_of("shop1"), 2);
}

#[tokio::test]
async fn test_update_hostname_cache() {
    let fixture = Fixture::new(platform_cluster());
    let hostnames = &fixture.services.hostnames;
    hostnames.set("old.example.com", "shop1");

    let outcome = fixture
        .run(
            PLATFORM_DB,
            "updateHostnameCache",
            json!({
                "database": "shop1",
                "previousHosts": [{"hostname": "old.example.com"}],
                "newHosts": [{"hostname": "new.example.com"}, "www.example.com"],
            }),
        )
        .await;

    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(hostnames.resolve("old.example.com"), None);
    assert_eq!(hostnames.resolve("new.example.com").as_deref(), Some("shop1"));
    assert_eq!(hostnames.resolve("www.example.com").as_deref(), Some("shop1"));
}

#[tokio::test]
async fn test_run_plugin_task() {
    let fixture = Fixture::new(platform_cluster());
    fixture.services.engine.provision_tenant("shop1").await.unwrap();

    let outcome = fixture
        .run(
            "shop1",
            "run-plugin-task",
            json!({"plugin": "billing", "task": "tasks/report", "params": {"month": 5}}),
        )
        .await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert!(fixture.calls.was_called("report:shop1:5"));
}

#[tokio::test]
async fn test_malformed_plugin_task_is_dropped() {
    let fixture = Fixture::new(platform_cluster());
    fixture.services.engine.provision_tenant("shop1").await.unwrap();

    for payload in [
        json!({"task": "tasks/report", "params": {}}),
        json!({"plugin": "billing", "params": {}}),
        json!({"plugin": "billing", "task": "tasks/report"}),
        json!({"plugin": "billing", "task": "tasks/missing", "params": {}}),
        json!({"plugin": "nope", "task_path": "tasks/report", "params": {}}),
    ] {
        let outcome = fixture.run("shop1", "run-plugin-task", payload).await;
        assert_eq!(outcome, JobOutcome::Completed);
    }
    assert!(fixture.cluster.jobs("shop1").is_empty());
    assert_eq!(fixture.calls.call_count(), 0);
}

#[tokio::test]
async fn test_failing_plugin_task_keeps_job() {
    let fixture = Fixture::new(platform_cluster());
    fixture.services.engine.provision_tenant("shop1").await.unwrap();

    let outcome = fixture
        .run(
            "shop1",
            "run-plugin-task",
            json!({"plugin": "billing", "task_path": "tasks/report", "params": {"fail": true}}),
        )
        .await;

    assert_eq!(outcome, JobOutcome::Failed);
    let jobs = fixture.cluster.jobs("shop1");
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("report generation failed"));
}
