//! An in-memory stand-in for a Postgres cluster.
//!
//! Understands the statements the orchestrator issues (database and role
//! DDL, grants, default privileges, the plugin table, the job queue and the
//! platform lookups) and keeps enough state to assert on their effect. Anything it
//! does not recognise is recorded and treated as a successful no-op.

use async_trait::async_trait;
use bamz_db::{ConnectionProvider, CredentialSet, DbError, DbResult, SqlExecutor, SqlRow};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DUPLICATE_DATABASE: &str = "42P04";
const DUPLICATE_OBJECT: &str = "42710";
const UNDEFINED_OBJECT: &str = "42704";
const UNDEFINED_TABLE: &str = "42P01";

static CREATE_DATABASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CREATE DATABASE (\w+)$").expect("regex"));
static DROP_DATABASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DROP DATABASE IF EXISTS (\w+)").expect("regex"));
static CREATE_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CREATE ROLE (\w+)\s*(.*)$").expect("regex"));
static DROP_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DROP ROLE IF EXISTS (\w+)$").expect("regex"));
static DROP_OWNED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DROP OWNED BY (\w+) CASCADE$").expect("regex"));
static GRANT_MEMBERSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^GRANT (\w+) TO "?([^"]+)"?$"#).expect("regex"));
static GRANT_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^GRANT .+ TO (\w+)$").expect("regex"));
static DEFAULT_PRIVILEGES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ALTER DEFAULT PRIVILEGES (?:FOR ROLE (\w+) )?IN SCHEMA (\w+) GRANT (.+) ON (TABLES|SEQUENCES|FUNCTIONS) TO (\w+)$",
    )
    .expect("regex")
});
static CREATE_SCHEMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)CREATE SCHEMA IF NOT EXISTS "?([A-Za-z0-9_\-]+)"?"#).expect("regex")
});
static DROP_SCHEMA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^DROP SCHEMA IF EXISTS "?([A-Za-z0-9_\-]+)"?"#).expect("regex")
});

/// Object class a default-privilege rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectKind {
    Tables,
    Sequences,
    Functions,
}

impl ObjectKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "TABLES" => Some(ObjectKind::Tables),
            "SEQUENCES" => Some(ObjectKind::Sequences),
            "FUNCTIONS" => Some(ObjectKind::Functions),
            _ => None,
        }
    }

    fn all_privileges(&self) -> &'static [&'static str] {
        match self {
            ObjectKind::Tables => &[
                "SELECT",
                "INSERT",
                "UPDATE",
                "DELETE",
                "TRUNCATE",
                "REFERENCES",
                "TRIGGER",
            ],
            ObjectKind::Sequences => &["USAGE", "SELECT", "UPDATE"],
            ObjectKind::Functions => &["EXECUTE"],
        }
    }
}

/// One `ALTER DEFAULT PRIVILEGES` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultPrivilege {
    pub database: String,
    /// Role whose future objects the rule applies to
    pub owner: String,
    pub schema: String,
    pub kind: ObjectKind,
    pub privileges: BTreeSet<String>,
    pub grantee: String,
}

/// A row of `bamz_worker.jobs`.
#[derive(Debug, Clone)]
pub struct SimulatedJob {
    pub id: i64,
    pub task: String,
    pub payload: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    run_at: Instant,
    locked_at: Option<Instant>,
}

impl SimulatedJob {
    /// Whether a worker may claim the job right now.
    pub fn is_ready(&self) -> bool {
        self.locked_by.is_none()
            && self.attempts < self.max_attempts
            && self.run_at <= Instant::now()
    }

    /// Like [`is_ready`](Self::is_ready), but a lock older than
    /// `stale_after` no longer holds the job.
    fn is_claimable(&self, stale_after: Option<Duration>) -> bool {
        let stale = match (self.locked_at, stale_after) {
            (Some(at), Some(limit)) => at + limit < Instant::now(),
            _ => false,
        };
        (self.locked_by.is_none() || stale)
            && self.attempts < self.max_attempts
            && self.run_at <= Instant::now()
    }
}

#[derive(Debug, Clone, Default)]
struct RoleState {
    options: String,
    members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    schemata: Vec<String>,
    plugins: Vec<String>,
    jobs: Vec<SimulatedJob>,
    statements: Vec<String>,
}

#[derive(Debug, Default)]
struct AppState {
    owner: Option<String>,
    viewers: BTreeSet<String>,
}

#[derive(Debug)]
struct ClusterState {
    databases: BTreeMap<String, DatabaseState>,
    roles: BTreeMap<String, RoleState>,
    default_privileges: Vec<DefaultPrivilege>,
    apps: BTreeMap<String, AppState>,
    hostnames: Vec<(String, String)>,
    failures: Vec<(String, DbError)>,
    reachable: bool,
    latency: Duration,
    probes: usize,
    next_job_id: i64,
}

impl Default for ClusterState {
    fn default() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert("postgres".to_string(), DatabaseState::new());
        let mut roles = BTreeMap::new();
        roles.insert(
            "postgres".to_string(),
            RoleState {
                options: "SUPERUSER".to_string(),
                members: BTreeSet::new(),
            },
        );

        Self {
            databases,
            roles,
            default_privileges: Vec::new(),
            apps: BTreeMap::new(),
            hostnames: Vec::new(),
            failures: Vec::new(),
            reachable: true,
            latency: Duration::ZERO,
            probes: 0,
            next_job_id: 1,
        }
    }
}

impl DatabaseState {
    fn new() -> Self {
        Self {
            schemata: vec!["public".to_string()],
            ..Self::default()
        }
    }
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn query_error(code: &str, message: impl Into<String>) -> DbError {
    DbError::query(Some(code), message)
}

fn single(column: &str, value: &str) -> Vec<SqlRow> {
    vec![SqlRow::new().with(column, Some(value))]
}

/// Shared handle to the simulated cluster. Clones see the same state.
#[derive(Clone, Default)]
pub struct SimulatedCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl SimulatedCluster {
    /// A reachable cluster holding only the `postgres` database and role.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials of the bootstrap superuser against `database`.
    pub fn superuser(database: &str) -> CredentialSet {
        CredentialSet::new("postgres", "postgres", "sim.local", 5432, database)
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Create a database directly, bypassing SQL.
    pub fn with_database(self, name: &str) -> Self {
        self.state
            .lock()
            .databases
            .entry(name.to_string())
            .or_insert_with(DatabaseState::new);
        self
    }

    /// Register an app row owned by `account` in the platform tables.
    pub fn with_app(self, code: &str, account: &str) -> Self {
        let mut state = self.state.lock();
        state.apps.entry(code.to_string()).or_default().owner = Some(account.to_string());
        state.roles.entry(account.to_string()).or_default();
        drop(state);
        self
    }

    /// Register an app row with no owning account.
    pub fn with_orphan_app(self, code: &str) -> Self {
        self.state.lock().apps.entry(code.to_string()).or_default();
        self
    }

    /// Map a custom hostname to an app.
    pub fn with_hostname(self, hostname: &str, code: &str) -> Self {
        self.state
            .lock()
            .hostnames
            .push((hostname.to_string(), code.to_string()));
        self
    }

    /// Let `role` see the app row of `code`.
    pub fn allow_app_access(&self, code: &str, role: &str) {
        self.state
            .lock()
            .apps
            .entry(code.to_string())
            .or_default()
            .viewers
            .insert(role.to_string());
    }

    /// Add a schema to a database, as a plugin script would.
    pub fn add_schema(&self, database: &str, schema: &str) {
        let mut state = self.state.lock();
        if let Some(db) = state.databases.get_mut(database)
            && !db.schemata.iter().any(|s| s == schema)
        {
            db.schemata.push(schema.to_string());
        }
    }

    /// Mark a plugin as installed without running its installer.
    pub fn add_plugin_row(&self, database: &str, plugin: &str) {
        let mut state = self.state.lock();
        if let Some(db) = state.databases.get_mut(database)
            && !db.plugins.iter().any(|p| p == plugin)
        {
            db.plugins.push(plugin.to_string());
        }
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Fail every statement containing `pattern` with `error`.
    pub fn fail_on(&self, pattern: &str, error: DbError) {
        self.state
            .lock()
            .failures
            .push((normalize(pattern), error));
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Simulate the whole cluster going away.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Delay every statement by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn has_database(&self, name: &str) -> bool {
        self.state.lock().databases.contains_key(name)
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.state.lock().roles.contains_key(name)
    }

    /// Options the role was created with, e.g. `NOSUPERUSER NOCREATEDB ...`.
    pub fn role_options(&self, name: &str) -> Option<String> {
        self.state.lock().roles.get(name).map(|r| r.options.clone())
    }

    /// Roles granted membership in `role`.
    pub fn members_of(&self, role: &str) -> Vec<String> {
        self.state
            .lock()
            .roles
            .get(role)
            .map(|r| r.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn schemata(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.schemata.clone())
            .unwrap_or_default()
    }

    /// Rows of `openbamz.plugins` in insertion order.
    pub fn plugins(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.plugins.clone())
            .unwrap_or_default()
    }

    /// Every statement run against `database`, normalized.
    pub fn statements(&self, database: &str) -> Vec<String> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.statements.clone())
            .unwrap_or_default()
    }

    /// Statements across all databases that start with `prefix`.
    pub fn count_statements(&self, prefix: &str) -> usize {
        let prefix = normalize(prefix);
        self.state
            .lock()
            .databases
            .values()
            .flat_map(|db| db.statements.iter())
            .filter(|s| s.starts_with(&prefix))
            .count()
    }

    /// Rows of `bamz_worker.jobs` in `database`, oldest first.
    pub fn jobs(&self, database: &str) -> Vec<SimulatedJob> {
        self.state
            .lock()
            .databases
            .get(database)
            .map(|db| db.jobs.clone())
            .unwrap_or_default()
    }

    pub fn probe_count(&self) -> usize {
        self.state.lock().probes
    }

    pub fn default_privileges(&self) -> Vec<DefaultPrivilege> {
        self.state.lock().default_privileges.clone()
    }

    /// Privileges `grantee` would hold on an object of `kind` that `creator`
    /// creates later in `schema` of `database`.
    pub fn inherited_privileges(
        &self,
        database: &str,
        creator: &str,
        schema: &str,
        kind: ObjectKind,
        grantee: &str,
    ) -> BTreeSet<String> {
        self.state
            .lock()
            .default_privileges
            .iter()
            .filter(|rule| {
                rule.database == database
                    && rule.owner == creator
                    && rule.schema == schema
                    && rule.kind == kind
                    && rule.grantee == grantee
            })
            .flat_map(|rule| rule.privileges.iter().cloned())
            .collect()
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn pause(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn refused(credentials: &CredentialSet) -> DbError {
        DbError::ConnectionRefused {
            host: credentials.host().to_string(),
            port: credentials.port(),
        }
    }

    fn check_connect(&self, credentials: &CredentialSet) -> DbResult<()> {
        let state = self.state.lock();
        if !state.reachable {
            return Err(Self::refused(credentials));
        }
        if !state.databases.contains_key(credentials.database()) {
            return Err(DbError::DatabaseMissing(credentials.database().to_string()));
        }
        Ok(())
    }

    fn run(
        &self,
        credentials: &CredentialSet,
        session_role: &mut Option<String>,
        sql: &str,
        params: &[&str],
    ) -> DbResult<(u64, Vec<SqlRow>)> {
        let sql = normalize(sql);
        let database = credentials.database().to_string();
        let mut state = self.state.lock();

        if !state.reachable {
            return Err(Self::refused(credentials));
        }
        if let Some((_, error)) = state
            .failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(error.clone());
        }

        let result = state.apply(&database, credentials.user(), session_role, &sql, params)?;
        if let Some(db) = state.databases.get_mut(&database) {
            db.statements.push(sql);
        }
        Ok(result)
    }
}

impl ClusterState {
    fn require_role(&self, role: &str) -> DbResult<()> {
        if self.roles.contains_key(role) {
            Ok(())
        } else {
            Err(query_error(
                UNDEFINED_OBJECT,
                format!("role \"{}\" does not exist", role),
            ))
        }
    }

    fn database_mut(&mut self, database: &str) -> DbResult<&mut DatabaseState> {
        self.databases
            .get_mut(database)
            .ok_or_else(|| DbError::DatabaseMissing(database.to_string()))
    }

    fn plugin_table(&mut self, database: &str) -> DbResult<&mut Vec<String>> {
        let db = self
            .databases
            .get_mut(database)
            .ok_or_else(|| DbError::DatabaseMissing(database.to_string()))?;
        if !db.schemata.iter().any(|s| s == "openbamz") {
            return Err(query_error(
                UNDEFINED_TABLE,
                "relation \"openbamz.plugins\" does not exist",
            ));
        }
        Ok(&mut db.plugins)
    }

    fn apply(
        &mut self,
        database: &str,
        user: &str,
        session_role: &mut Option<String>,
        sql: &str,
        params: &[&str],
    ) -> DbResult<(u64, Vec<SqlRow>)> {
        let param = |index: usize| params.get(index).copied().unwrap_or_default();

        if let Some(caps) = CREATE_DATABASE.captures(sql) {
            let name = &caps[1];
            if self.databases.contains_key(name) {
                return Err(query_error(
                    DUPLICATE_DATABASE,
                    format!("database \"{}\" already exists", name),
                ));
            }
            self.databases.insert(name.to_string(), DatabaseState::new());
            return Ok((1, Vec::new()));
        }

        if let Some(caps) = DROP_DATABASE.captures(sql) {
            let name = caps[1].to_string();
            let existed = self.databases.remove(&name).is_some();
            self.default_privileges.retain(|rule| rule.database != name);
            return Ok((u64::from(existed), Vec::new()));
        }

        if let Some(caps) = CREATE_ROLE.captures(sql) {
            let name = &caps[1];
            if self.roles.contains_key(name) {
                return Err(query_error(
                    DUPLICATE_OBJECT,
                    format!("role \"{}\" already exists", name),
                ));
            }
            self.roles.insert(
                name.to_string(),
                RoleState {
                    options: caps[2].to_string(),
                    members: BTreeSet::new(),
                },
            );
            return Ok((1, Vec::new()));
        }

        if let Some(caps) = DROP_ROLE.captures(sql) {
            let name = caps[1].to_string();
            let existed = self.roles.remove(&name).is_some();
            for role in self.roles.values_mut() {
                role.members.remove(&name);
            }
            return Ok((u64::from(existed), Vec::new()));
        }

        if let Some(caps) = DROP_OWNED.captures(sql) {
            let role = caps[1].to_string();
            self.require_role(&role)?;
            self.default_privileges.retain(|rule| {
                rule.database != database || (rule.owner != role && rule.grantee != role)
            });
            return Ok((0, Vec::new()));
        }

        if let Some(caps) = DEFAULT_PRIVILEGES.captures(sql) {
            let owner = caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .or_else(|| session_role.clone())
                .unwrap_or_else(|| user.to_string());
            let grantee = caps[5].to_string();
            self.require_role(&owner)?;
            self.require_role(&grantee)?;

            let kind = ObjectKind::parse(&caps[4])
                .ok_or_else(|| query_error("42601", "unsupported object kind"))?;
            let listed = caps[3].trim();
            let privileges = if listed == "ALL" || listed == "ALL PRIVILEGES" {
                kind.all_privileges().iter().map(|p| p.to_string()).collect()
            } else {
                listed.split(',').map(|p| p.trim().to_string()).collect()
            };

            self.default_privileges.push(DefaultPrivilege {
                database: database.to_string(),
                owner,
                schema: caps[2].to_string(),
                kind,
                privileges,
                grantee,
            });
            return Ok((0, Vec::new()));
        }

        if let Some(caps) = GRANT_MEMBERSHIP.captures(sql) {
            let role = caps[1].to_string();
            let member = caps[2].to_string();
            self.require_role(&role)?;
            self.require_role(&member)?;
            if let Some(state) = self.roles.get_mut(&role) {
                state.members.insert(member);
            }
            return Ok((0, Vec::new()));
        }

        if let Some(caps) = GRANT_OBJECT.captures(sql) {
            self.require_role(&caps[1])?;
            return Ok((0, Vec::new()));
        }

        if let Some(caps) = CREATE_SCHEMA.captures(sql) {
            let schema = caps[1].to_string();
            if let Some(db) = self.databases.get_mut(database)
                && !db.schemata.contains(&schema)
            {
                db.schemata.push(schema);
            }
            return Ok((0, Vec::new()));
        }

        if let Some(caps) = DROP_SCHEMA.captures(sql) {
            let schema = caps[1].to_string();
            if let Some(db) = self.databases.get_mut(database) {
                db.schemata.retain(|s| *s != schema);
            }
            return Ok((0, Vec::new()));
        }

        if sql.starts_with("INSERT INTO openbamz.plugins") {
            let plugin = param(0).to_string();
            let plugins = self.plugin_table(database)?;
            if plugins.contains(&plugin) {
                return Ok((0, Vec::new()));
            }
            plugins.push(plugin);
            return Ok((1, Vec::new()));
        }

        if sql.starts_with("DELETE FROM openbamz.plugins") {
            let plugin = param(0);
            let plugins = self.plugin_table(database)?;
            let before = plugins.len();
            plugins.retain(|p| p != plugin);
            return Ok(((before - plugins.len()) as u64, Vec::new()));
        }

        if sql.contains("FROM openbamz.plugins") {
            let filter = sql.contains("WHERE plugin_id = $1").then(|| param(0).to_string());
            let rows = self
                .plugin_table(database)?
                .iter()
                .filter(|p| filter.as_ref().is_none_or(|f| f == *p))
                .map(|p| SqlRow::new().with("plugin_id", Some(p.as_str())))
                .collect();
            return Ok((0, rows));
        }

        if sql.starts_with("INSERT INTO bamz_worker.jobs") {
            let id = self.next_job_id;
            self.next_job_id += 1;
            let db = self.database_mut(database)?;
            db.jobs.push(SimulatedJob {
                id,
                task: param(0).to_string(),
                payload: param(1).to_string(),
                attempts: 0,
                max_attempts: param(2).parse().unwrap_or(25),
                locked_by: None,
                last_error: None,
                run_at: Instant::now(),
                locked_at: None,
            });
            return Ok((1, single("id", &id.to_string())));
        }

        if sql.starts_with("UPDATE bamz_worker.jobs SET attempts = attempts + 1") {
            let stale_after = param(1)
                .parse::<f64>()
                .ok()
                .map(|secs| Duration::from_secs_f64(secs.max(0.0)));
            let db = self.database_mut(database)?;
            let rows = match db.jobs.iter_mut().find(|job| job.is_claimable(stale_after)) {
                Some(job) => {
                    job.attempts += 1;
                    job.locked_by = Some(param(0).to_string());
                    job.locked_at = Some(Instant::now());
                    vec![
                        SqlRow::new()
                            .with("id", Some(job.id.to_string()))
                            .with("task_identifier", Some(job.task.as_str()))
                            .with("payload", Some(job.payload.as_str()))
                            .with("attempts", Some(job.attempts.to_string()))
                            .with("max_attempts", Some(job.max_attempts.to_string())),
                    ]
                }
                None => Vec::new(),
            };
            return Ok((rows.len() as u64, rows));
        }

        if sql.starts_with("UPDATE bamz_worker.jobs SET locked_at = NULL") {
            let id: i64 = param(0).parse().unwrap_or_default();
            let delay: f64 = param(2).parse().unwrap_or_default();
            let db = self.database_mut(database)?;
            let Some(job) = db.jobs.iter_mut().find(|job| job.id == id) else {
                return Ok((0, Vec::new()));
            };
            job.locked_by = None;
            job.locked_at = None;
            job.last_error = Some(param(1).to_string());
            job.run_at = Instant::now() + Duration::from_secs_f64(delay.max(0.0));
            return Ok((1, Vec::new()));
        }

        if sql.starts_with("UPDATE bamz_worker.jobs SET locked_by = NULL") {
            let holder = param(0);
            let db = self.database_mut(database)?;
            let mut released = 0;
            for job in db.jobs.iter_mut() {
                if job.locked_by.as_deref().is_some_and(|by| by.starts_with(holder)) {
                    job.locked_by = None;
                    job.locked_at = None;
                    released += 1;
                }
            }
            return Ok((released, Vec::new()));
        }

        if sql.starts_with("DELETE FROM bamz_worker.jobs") {
            let id: i64 = param(0).parse().unwrap_or_default();
            let db = self.database_mut(database)?;
            let before = db.jobs.len();
            db.jobs.retain(|job| job.id != id);
            return Ok(((before - db.jobs.len()) as u64, Vec::new()));
        }

        if sql.contains("FROM pg_catalog.pg_roles") {
            let name = param(0);
            let rows = if self.roles.contains_key(name) {
                single("rolname", name)
            } else {
                Vec::new()
            };
            return Ok((0, rows));
        }

        if sql.contains("FROM information_schema.schemata") {
            let rows = self
                .databases
                .get(database)
                .map(|db| {
                    db.schemata
                        .iter()
                        .map(|s| SqlRow::new().with("schema_name", Some(s.as_str())))
                        .collect()
                })
                .unwrap_or_default();
            return Ok((0, rows));
        }

        if sql.contains("current_database()") {
            return Ok((0, single("dbname", database)));
        }

        if sql.contains("set_config('role'") {
            *session_role = Some(param(0).to_string());
            return Ok((0, single("set_config", param(0))));
        }

        if matches!(sql, "BEGIN" | "COMMIT" | "ROLLBACK") {
            if sql != "BEGIN" {
                *session_role = None;
            }
            return Ok((0, Vec::new()));
        }

        if sql.contains("JOIN private.account") {
            let rows = self
                .apps
                .get(param(0))
                .and_then(|app| app.owner.as_deref())
                .map(|owner| single("account_id", owner))
                .unwrap_or_default();
            return Ok((0, rows));
        }

        if sql.contains("FROM app_hostname") {
            let rows = self
                .hostnames
                .iter()
                .map(|(host, app)| {
                    SqlRow::new()
                        .with("hostname", Some(host.as_str()))
                        .with("app", Some(app.as_str()))
                })
                .collect();
            return Ok((0, rows));
        }

        if sql.contains("FROM app WHERE code = $1") {
            let code = param(0);
            let visible = self.apps.get(code).is_some_and(|app| match session_role {
                None => true,
                Some(role) => role == user || app.viewers.contains(role.as_str()),
            });
            let rows = if visible { single("code", code) } else { Vec::new() };
            return Ok((0, rows));
        }

        if sql.contains("FROM app") {
            let rows = self
                .apps
                .keys()
                .map(|code| SqlRow::new().with("code", Some(code.as_str())))
                .collect();
            return Ok((0, rows));
        }

        Ok((0, Vec::new()))
    }
}

#[async_trait]
impl ConnectionProvider for SimulatedCluster {
    async fn acquire(&self, credentials: &CredentialSet) -> DbResult<Box<dyn SqlExecutor>> {
        self.check_connect(credentials)?;
        Ok(Box::new(SimulatedConnection {
            cluster: self.clone(),
            credentials: credentials.clone(),
            session_role: None,
        }))
    }

    async fn probe(&self, credentials: &CredentialSet) -> DbResult<()> {
        self.pause().await;
        self.state.lock().probes += 1;
        self.check_connect(credentials)
    }
}

/// A connection to the simulated cluster.
pub struct SimulatedConnection {
    cluster: SimulatedCluster,
    credentials: CredentialSet,
    session_role: Option<String>,
}

#[async_trait]
impl SqlExecutor for SimulatedConnection {
    async fn execute(&mut self, sql: &str, params: &[&str]) -> DbResult<u64> {
        self.cluster.pause().await;
        let (affected, _) = self
            .cluster
            .run(&self.credentials, &mut self.session_role, sql, params)?;
        Ok(affected)
    }

    async fn fetch_rows(&mut self, sql: &str, params: &[&str]) -> DbResult<Vec<SqlRow>> {
        self.cluster.pause().await;
        let (_, rows) = self
            .cluster
            .run(&self.credentials, &mut self.session_role, sql, params)?;
        Ok(rows)
    }

    async fn batch_execute(&mut self, sql: &str) -> DbResult<()> {
        self.cluster.pause().await;
        let schemas: Vec<String> = CREATE_SCHEMA
            .captures_iter(sql)
            .map(|caps| caps[1].to_string())
            .collect();

        // Record the whole script as one statement, then apply its schemas.
        let script = normalize(sql);
        {
            let mut state = self.cluster.state.lock();
            if !state.reachable {
                return Err(SimulatedCluster::refused(&self.credentials));
            }
            if let Some((_, error)) = state
                .failures
                .iter()
                .find(|(pattern, _)| script.contains(pattern.as_str()))
            {
                return Err(error.clone());
            }
            let db = state
                .databases
                .get_mut(self.credentials.database())
                .ok_or_else(|| DbError::DatabaseMissing(self.credentials.database().to_string()))?;
            db.statements.push(script);
            for schema in schemas {
                if !db.schemata.contains(&schema) {
                    db.schemata.push(schema);
                }
            }
        }
        Ok(())
    }

    fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_database_and_refused_cluster() {
        let cluster = SimulatedCluster::new();
        let shop1 = SimulatedCluster::superuser("shop1");

        assert!(matches!(
            cluster.probe(&shop1).await,
            Err(DbError::DatabaseMissing(_))
        ));

        cluster.set_reachable(false);
        let err = cluster.probe(&shop1).await.unwrap_err();
        assert!(err.is_connection_refused());
    }

    #[tokio::test]
    async fn test_role_ddl_is_not_idempotent_by_itself() {
        let cluster = SimulatedCluster::new();
        let mut conn = cluster
            .acquire(&SimulatedCluster::superuser("postgres"))
            .await
            .unwrap();

        conn.execute("CREATE ROLE shop1_user NOSUPERUSER", &[]).await.unwrap();
        let err = conn
            .execute("CREATE ROLE shop1_user NOSUPERUSER", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(DUPLICATE_OBJECT));
    }

    #[tokio::test]
    async fn test_default_privileges_are_tracked() {
        let cluster = SimulatedCluster::new().with_database("shop1");
        let mut conn = cluster
            .acquire(&SimulatedCluster::superuser("shop1"))
            .await
            .unwrap();

        conn.execute("CREATE ROLE shop1_admin", &[]).await.unwrap();
        conn.execute("CREATE ROLE shop1_user", &[]).await.unwrap();
        conn.execute(
            "ALTER DEFAULT PRIVILEGES FOR ROLE shop1_admin IN SCHEMA public GRANT SELECT, INSERT ON TABLES TO shop1_user",
            &[],
        )
        .await
        .unwrap();

        let privileges = cluster.inherited_privileges(
            "shop1",
            "shop1_admin",
            "public",
            ObjectKind::Tables,
            "shop1_user",
        );
        assert!(privileges.contains("INSERT"));
        assert!(!privileges.contains("DELETE"));
    }

    #[tokio::test]
    async fn test_default_privileges_need_existing_roles() {
        let cluster = SimulatedCluster::new().with_database("shop1");
        let mut conn = cluster
            .acquire(&SimulatedCluster::superuser("shop1"))
            .await
            .unwrap();

        let err = conn
            .execute(
                "ALTER DEFAULT PRIVILEGES FOR ROLE shop1_admin IN SCHEMA public GRANT ALL ON TABLES TO shop1_admin",
                &[],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(UNDEFINED_OBJECT));
    }

    #[tokio::test]
    async fn test_batch_creates_schemas_and_plugin_table() {
        let cluster = SimulatedCluster::new().with_database("shop1");
        let mut conn = cluster
            .acquire(&SimulatedCluster::superuser("shop1"))
            .await
            .unwrap();

        let before = conn
            .execute("INSERT INTO openbamz.plugins(plugin_id) VALUES ($1)", &["x"])
            .await;
        assert!(before.is_err());

        conn.batch_execute("CREATE SCHEMA IF NOT EXISTS openbamz;\nCREATE TABLE IF NOT EXISTS openbamz.plugins(plugin_id text);")
            .await
            .unwrap();
        conn.execute("INSERT INTO openbamz.plugins(plugin_id) VALUES ($1) ON CONFLICT DO NOTHING", &["billing"])
            .await
            .unwrap();

        assert_eq!(cluster.plugins("shop1"), vec!["billing".to_string()]);
        assert!(cluster.schemata("shop1").contains(&"openbamz".to_string()));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let cluster = SimulatedCluster::new();
        cluster.fail_on("CREATE DATABASE", DbError::query(Some("XX000"), "boom"));
        let mut conn = cluster
            .acquire(&SimulatedCluster::superuser("postgres"))
            .await
            .unwrap();

        assert!(conn.execute("CREATE DATABASE shop1", &[]).await.is_err());
        cluster.clear_failures();
        assert!(conn.execute("CREATE DATABASE shop1", &[]).await.is_ok());
        assert_eq!(cluster.count_statements("CREATE DATABASE"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_queue_claim_and_backoff() {
        let cluster = SimulatedCluster::new().with_database("shop1");
        let mut conn = cluster
            .acquire(&SimulatedCluster::superuser("shop1"))
            .await
            .unwrap();

        conn.fetch_rows(
            "INSERT INTO bamz_worker.jobs (task_identifier, payload, max_attempts) VALUES ($1, $2::jsonb, $3::integer) RETURNING id::text AS id",
            &["add-plugin", "{}", "2"],
        )
        .await
        .unwrap();

        let claim = "UPDATE bamz_worker.jobs SET attempts = attempts + 1, locked_by = $1";
        let rows = conn.fetch_rows(claim, &["w1"]).await.unwrap();
        assert_eq!(rows[0].get("task_identifier"), Some("add-plugin"));
        assert!(conn.fetch_rows(claim, &["w2"]).await.unwrap().is_empty());

        conn.execute(
            "UPDATE bamz_worker.jobs SET locked_at = NULL, locked_by = NULL",
            &["1", "boom", "2"],
        )
        .await
        .unwrap();
        assert!(conn.fetch_rows(claim, &["w2"]).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(3)).await;
        let rows = conn.fetch_rows(claim, &["w2"]).await.unwrap();
        assert_eq!(rows[0].get("attempts"), Some("2"));

        let job = &cluster.jobs("shop1")[0];
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert_eq!(job.locked_by.as_deref(), Some("w2"));
    }
}
