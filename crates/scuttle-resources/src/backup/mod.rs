//! Backup schedule lifecycle.
//!
//! One declared schedule maps to up to two schedules on the cluster: the
//! full backup and, unless full backups run `always`, an incremental
//! schedule appending to the latest full. Both ids are tracked in state
//! because updates and deletes must address them.

mod command;

use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::validate;
use crate::Lifecycle;
use async_trait::async_trait;
use command::{parse_backup_command, BackupTargets};
use scuttle_session::{quote, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::sync::Arc;

const ID_KIND: &str = "backup_schedule";

/// What a schedule backs up. The three forms are mutually exclusive by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleTarget {
    FullCluster,
    Tables(Vec<String>),
    Databases(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOptions {
    pub revision_history: bool,
    /// `always` collapses the schedule to full backups only; a recurrence
    /// here makes the primary recurrence incremental.
    pub full_backup_frequency: String,
    pub incremental_backup_location: Option<String>,
    pub encryption_passphrase: Option<String>,
    pub kms: Option<String>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            revision_history: true,
            full_backup_frequency: "always".to_string(),
            incremental_backup_location: None,
            encryption_passphrase: None,
            kms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    pub first_run: Option<String>,
    pub on_execution_failure: String,
    pub on_previous_running: String,
    pub ignore_existing_backups: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            first_run: None,
            on_execution_failure: "reschedule".to_string(),
            on_previous_running: "wait".to_string(),
            ignore_existing_backups: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupScheduleConfig {
    pub cluster_id: String,
    pub label: String,
    pub location: String,
    pub recurring: String,
    pub target: ScheduleTarget,
    pub backup_options: BackupOptions,
    pub schedule_options: ScheduleOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupScheduleState {
    pub id: String,
    pub cluster_id: String,
    pub label: String,
    pub location: String,
    pub recurring: String,
    pub target: ScheduleTarget,
    pub backup_options: BackupOptions,
    pub schedule_options: ScheduleOptions,
    pub full_schedule_id: i64,
    pub incremental_schedule_id: Option<i64>,
}

pub fn backup_schedule_id(cluster_id: &str, label: &str) -> String {
    id::compose(ID_KIND, &[cluster_id, label])
}

const ON_EXECUTION_FAILURE_VALUES: &[&str] = &["retry", "reschedule", "pause"];
const ON_PREVIOUS_RUNNING_VALUES: &[&str] = &["skip", "wait", "start"];

fn validate_config(config: &BackupScheduleConfig) -> ResourceResult<()> {
    validate::recurrence(&config.recurring)?;
    validate::full_backup_frequency(&config.backup_options.full_backup_frequency)?;
    match &config.target {
        ScheduleTarget::FullCluster => {}
        ScheduleTarget::Tables(tables) => {
            if tables.is_empty() {
                return Err(ResourceError::Validation(
                    "table target list is empty".to_string(),
                ));
            }
            for table in tables {
                validate::qualified_table_name(table)?;
            }
        }
        ScheduleTarget::Databases(databases) => {
            if databases.is_empty() {
                return Err(ResourceError::Validation(
                    "database target list is empty".to_string(),
                ));
            }
        }
    }
    if !ON_EXECUTION_FAILURE_VALUES.contains(&config.schedule_options.on_execution_failure.as_str())
    {
        return Err(ResourceError::Validation(format!(
            "on_execution_failure must be one of {ON_EXECUTION_FAILURE_VALUES:?}"
        )));
    }
    if !ON_PREVIOUS_RUNNING_VALUES.contains(&config.schedule_options.on_previous_running.as_str()) {
        return Err(ResourceError::Validation(format!(
            "on_previous_running must be one of {ON_PREVIOUS_RUNNING_VALUES:?}"
        )));
    }
    Ok(())
}

fn target_clause(target: &ScheduleTarget) -> String {
    match target {
        ScheduleTarget::FullCluster => String::new(),
        ScheduleTarget::Tables(tables) => format!("TABLE {}", tables.join(",")),
        ScheduleTarget::Databases(databases) => format!("DATABASE {}", databases.join(",")),
    }
}

fn build_create_statement(config: &BackupScheduleConfig) -> String {
    let mut pieces = vec![format!(
        "CREATE SCHEDULE IF NOT EXISTS {} FOR BACKUP",
        quote::literal(&config.label)
    )];

    let target = target_clause(&config.target);
    if !target.is_empty() {
        pieces.push(target);
    }

    pieces.push(format!("INTO {}", quote::literal(&config.location)));

    let mut backup_options = Vec::new();
    if config.backup_options.revision_history {
        backup_options.push("revision_history".to_string());
    }
    if let Some(passphrase) = &config.backup_options.encryption_passphrase {
        backup_options.push(format!(
            "encryption_passphrase={}",
            quote::literal(passphrase)
        ));
    }
    if let Some(kms) = &config.backup_options.kms {
        backup_options.push(format!("kms={}", quote::literal(kms)));
    }
    if let Some(location) = &config.backup_options.incremental_backup_location {
        backup_options.push(format!("incremental_location={}", quote::literal(location)));
    }
    if !backup_options.is_empty() {
        pieces.push(format!("WITH {}", backup_options.join(", ")));
    }

    pieces.push(format!("RECURRING {}", quote::literal(&config.recurring)));

    if config.backup_options.full_backup_frequency == "always" {
        pieces.push("FULL BACKUP ALWAYS".to_string());
    } else {
        pieces.push(format!(
            "FULL BACKUP {}",
            quote::literal(&config.backup_options.full_backup_frequency)
        ));
    }

    let mut schedule_options = Vec::new();
    if let Some(first_run) = &config.schedule_options.first_run {
        schedule_options.push(format!("first_run={}", quote::literal(first_run)));
    }
    schedule_options.push(format!(
        "on_execution_failure={}",
        quote::literal(&config.schedule_options.on_execution_failure)
    ));
    schedule_options.push(format!(
        "on_previous_running={}",
        quote::literal(&config.schedule_options.on_previous_running)
    ));
    if config.schedule_options.ignore_existing_backups {
        schedule_options.push("ignore_existing_backups".to_string());
    }
    pieces.push(format!(
        "WITH SCHEDULE OPTIONS {}",
        schedule_options.join(", ")
    ));

    pieces.join(" ")
}

/// Wrap a schedule statement so it also returns which schedules it
/// touched and which of them is the incremental one.
fn wrap_returning_ids(statement: &str) -> String {
    format!(
        "WITH x AS ({statement}) \
         SELECT schedule_id, strpos(backup_stmt, 'BACKUP INTO LATEST') = 1 AS is_incremental FROM x"
    )
}

/// Engine values for on_execution_failure, mapped back to the declared
/// vocabulary.
fn map_on_execution_failure(engine_value: &str) -> &'static str {
    match engine_value {
        "PAUSE_SCHED" => "pause",
        "RETRY_SOON" => "retry",
        "RETRY_SCHED" => "reschedule",
        _ => "retry",
    }
}

/// Clauses for `ALTER BACKUP SCHEDULE`, one per changed field.
/// `revision_history` is always re-asserted: the engine requires it in
/// every ALTER WITH clause.
fn build_alter_clauses(
    plan: &BackupScheduleConfig,
    state: &BackupScheduleState,
) -> Vec<String> {
    let mut clauses = Vec::new();

    if plan.label != state.label {
        clauses.push(format!("SET LABEL {}", quote::literal(&plan.label)));
    }
    if plan.location != state.location {
        clauses.push(format!("SET INTO {}", quote::literal(&plan.location)));
    }
    if plan.recurring != state.recurring {
        clauses.push(format!("SET RECURRING {}", quote::literal(&plan.recurring)));
    }
    if plan.backup_options.full_backup_frequency != state.backup_options.full_backup_frequency {
        if plan.backup_options.full_backup_frequency == "always" {
            clauses.push("SET FULL BACKUP ALWAYS".to_string());
        } else {
            clauses.push(format!(
                "SET FULL BACKUP {}",
                quote::literal(&plan.backup_options.full_backup_frequency)
            ));
        }
    }

    clauses.push(format!(
        "SET WITH revision_history={}",
        plan.backup_options.revision_history
    ));

    if plan.backup_options.encryption_passphrase != state.backup_options.encryption_passphrase {
        match &plan.backup_options.encryption_passphrase {
            Some(passphrase) => clauses.push(format!(
                "SET WITH encryption_passphrase={}",
                quote::literal(passphrase)
            )),
            None => clauses.push("UNSET WITH encryption_passphrase".to_string()),
        }
    }
    if plan.backup_options.kms != state.backup_options.kms {
        match &plan.backup_options.kms {
            Some(kms) => clauses.push(format!("SET WITH kms={}", quote::literal(kms))),
            None => clauses.push("UNSET WITH kms".to_string()),
        }
    }
    if plan.backup_options.incremental_backup_location
        != state.backup_options.incremental_backup_location
    {
        match &plan.backup_options.incremental_backup_location {
            Some(location) => clauses.push(format!(
                "SET WITH incremental_location={}",
                quote::literal(location)
            )),
            None => clauses.push("UNSET WITH incremental_location".to_string()),
        }
    }

    if plan.schedule_options.on_execution_failure != state.schedule_options.on_execution_failure {
        clauses.push(format!(
            "SET SCHEDULE OPTION on_execution_failure={}",
            quote::literal(&plan.schedule_options.on_execution_failure)
        ));
    }
    if plan.schedule_options.on_previous_running != state.schedule_options.on_previous_running {
        clauses.push(format!(
            "SET SCHEDULE OPTION on_previous_running={}",
            quote::literal(&plan.schedule_options.on_previous_running)
        ));
    }

    clauses
}

struct ObservedSchedule {
    id: i64,
    recurrence: String,
    on_previous_running: String,
    on_execution_failure: String,
    command: command::BackupCommand,
}

pub struct BackupScheduleResource {
    session: Arc<SessionManager>,
}

impl BackupScheduleResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    /// Run a wrapped schedule statement and split the returned ids into
    /// (full, incremental).
    async fn execute_returning_ids(
        &self,
        cluster_id: &str,
        statement: String,
    ) -> ResourceResult<(i64, Option<i64>)> {
        let rows = self
            .session
            .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
                let rows: Vec<(i64, bool)> = sqlx::query_as(&statement).fetch_all(&pool).await?;
                Ok::<_, ResourceError>(rows)
            })
            .await?;

        let mut full = None;
        let mut incremental = None;
        for (schedule_id, is_incremental) in rows {
            if is_incremental {
                incremental = Some(schedule_id);
            } else {
                full = Some(schedule_id);
            }
        }
        let full = full.ok_or_else(|| {
            anyhow::anyhow!("schedule statement returned no full backup schedule id")
        })?;
        Ok((full, incremental))
    }
}

#[async_trait]
impl Lifecycle for BackupScheduleResource {
    type Config = BackupScheduleConfig;
    type State = BackupScheduleState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        validate_config(&config)?;

        // IF NOT EXISTS already guards duplication; the explicit check
        // turns a silent no-op into a clear conflict for the operator.
        let label = config.label.clone();
        let exists = self
            .session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT * FROM [SHOW SCHEDULES FOR BACKUP] WHERE label = $1)",
                )
                .bind(&label)
                .fetch_one(&pool)
                .await?;
                Ok::<_, ResourceError>(exists)
            })
            .await?;
        if exists {
            return Err(ResourceError::Conflict(format!(
                "a backup schedule labeled {:?} already exists",
                config.label
            )));
        }

        let statement = wrap_returning_ids(&build_create_statement(&config));
        tracing::info!(cluster = %config.cluster_id, statement = %statement, "creating backup schedule");
        let (full_schedule_id, incremental_schedule_id) = self
            .execute_returning_ids(&config.cluster_id, statement)
            .await?;

        Ok(BackupScheduleState {
            id: backup_schedule_id(&config.cluster_id, &config.label),
            cluster_id: config.cluster_id,
            label: config.label,
            location: config.location,
            recurring: config.recurring,
            target: config.target,
            backup_options: config.backup_options,
            schedule_options: config.schedule_options,
            full_schedule_id,
            incremental_schedule_id,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let label = state.label.clone();
        let rows = self
            .session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let rows = sqlx::query(
                    "SELECT id, recurrence, on_previous_running, on_execution_failure, command \
                     FROM [SHOW SCHEDULES FOR BACKUP] WHERE label = $1",
                )
                .bind(&label)
                .fetch_all(&pool)
                .await?;
                let mut observed = Vec::with_capacity(rows.len());
                for row in rows {
                    observed.push((
                        row.try_get::<i64, _>("id")?,
                        row.try_get::<String, _>("recurrence")?,
                        row.try_get::<String, _>("on_previous_running")?,
                        row.try_get::<String, _>("on_execution_failure")?,
                        row.try_get::<String, _>("command")?,
                    ))
                }
                Ok::<_, ResourceError>(observed)
            })
            .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(err) if err.is_cluster_unavailable() => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut full = None;
        let mut incremental = None;
        for (id, recurrence, on_previous_running, on_execution_failure, command) in rows {
            let observed = ObservedSchedule {
                id,
                recurrence,
                on_previous_running,
                on_execution_failure,
                command: parse_backup_command(&command)?,
            };
            // The incremental schedule appends to the latest full backup;
            // the parsed INTO LATEST marker tells the two apart.
            if observed.command.appends_to_latest {
                incremental = Some(observed);
            } else {
                full = Some(observed);
            }
        }

        let Some(full) = full else {
            return Ok(None);
        };

        let mut next = state.clone();
        next.full_schedule_id = full.id;
        next.recurring = incremental
            .as_ref()
            .map(|schedule| schedule.recurrence.clone())
            .unwrap_or_else(|| full.recurrence.clone());
        next.schedule_options.on_previous_running = full.on_previous_running.to_lowercase();
        next.schedule_options.on_execution_failure =
            map_on_execution_failure(&full.on_execution_failure).to_string();
        next.backup_options.full_backup_frequency = if incremental.is_some() {
            full.recurrence.clone()
        } else {
            "always".to_string()
        };

        if let Some(destination) = full.command.destination() {
            if !validate::urls_equivalent(&state.location, destination) {
                next.location = destination.to_string();
            }
        }

        next.target = match &full.command.targets {
            None => ScheduleTarget::FullCluster,
            Some(BackupTargets::Tables(tables)) => ScheduleTarget::Tables(tables.clone()),
            Some(BackupTargets::Databases(databases)) => {
                ScheduleTarget::Databases(databases.clone())
            }
        };

        if let Some(kms) = &full.command.options.kms {
            next.backup_options.kms = Some(kms.clone());
        }
        // The engine redacts the passphrase; only a presence mismatch is
        // drift, otherwise the declared secret stands.
        if full.command.options.encryption_passphrase.is_some()
            != state.backup_options.encryption_passphrase.is_some()
        {
            next.backup_options.encryption_passphrase =
                full.command.options.encryption_passphrase.clone();
        }
        if let Some(revision_history) = full.command.options.revision_history {
            next.backup_options.revision_history = revision_history;
        }

        match &incremental {
            Some(schedule) => {
                next.incremental_schedule_id = Some(schedule.id);
                next.backup_options.incremental_backup_location =
                    schedule.command.options.incremental_location.clone();
            }
            None => {
                next.incremental_schedule_id = None;
                next.backup_options.incremental_backup_location = None;
            }
        }

        Ok(Some(next))
    }

    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State> {
        validate_config(&plan)?;

        let clauses = build_alter_clauses(&plan, &state);
        let statement = wrap_returning_ids(&format!(
            "ALTER BACKUP SCHEDULE {} {}",
            state.full_schedule_id,
            clauses.join(", ")
        ));
        tracing::info!(cluster = %state.cluster_id, statement = %statement, "updating backup schedule");
        let (full_schedule_id, incremental_schedule_id) = self
            .execute_returning_ids(&state.cluster_id, statement)
            .await?;

        Ok(BackupScheduleState {
            id: backup_schedule_id(&plan.cluster_id, &plan.label),
            cluster_id: plan.cluster_id,
            label: plan.label,
            location: plan.location,
            recurring: plan.recurring,
            target: plan.target,
            backup_options: plan.backup_options,
            schedule_options: plan.schedule_options,
            full_schedule_id,
            incremental_schedule_id,
        })
    }

    /// Drop every schedule carrying the label. Zero matches is a no-op
    /// success: the id set under the label filter is empty and nothing
    /// drops, which makes deletion idempotent.
    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        let label = state.label.clone();
        self.session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                sqlx::query(
                    "DROP SCHEDULES WITH x AS (SHOW SCHEDULES FOR BACKUP) \
                     SELECT id FROM x WHERE label = $1",
                )
                .bind(&label)
                .execute(&pool)
                .await?;
                Ok::<_, ResourceError>(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BackupScheduleConfig {
        BackupScheduleConfig {
            cluster_id: "cluster-1".to_string(),
            label: "nightly".to_string(),
            location: "s3://bucket/backups?AUTH=implicit".to_string(),
            recurring: "@daily".to_string(),
            target: ScheduleTarget::FullCluster,
            backup_options: BackupOptions::default(),
            schedule_options: ScheduleOptions::default(),
        }
    }

    fn base_state() -> BackupScheduleState {
        let config = base_config();
        BackupScheduleState {
            id: backup_schedule_id(&config.cluster_id, &config.label),
            cluster_id: config.cluster_id,
            label: config.label,
            location: config.location,
            recurring: config.recurring,
            target: config.target,
            backup_options: config.backup_options,
            schedule_options: config.schedule_options,
            full_schedule_id: 1001,
            incremental_schedule_id: None,
        }
    }

    #[test]
    fn target_clause_is_empty_for_full_cluster() {
        assert_eq!(target_clause(&ScheduleTarget::FullCluster), "");
    }

    #[test]
    fn target_clause_lists_tables() {
        let target =
            ScheduleTarget::Tables(vec!["a.public.x".to_string(), "b.public.y".to_string()]);
        assert_eq!(target_clause(&target), "TABLE a.public.x,b.public.y");
    }

    #[test]
    fn target_clause_lists_databases() {
        let target = ScheduleTarget::Databases(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(target_clause(&target), "DATABASE a,b");
    }

    #[test]
    fn create_statement_for_full_cluster_defaults() {
        assert_eq!(
            build_create_statement(&base_config()),
            "CREATE SCHEDULE IF NOT EXISTS 'nightly' FOR BACKUP \
             INTO 's3://bucket/backups?AUTH=implicit' WITH revision_history \
             RECURRING '@daily' FULL BACKUP ALWAYS \
             WITH SCHEDULE OPTIONS on_execution_failure='reschedule', on_previous_running='wait'"
        );
    }

    #[test]
    fn create_statement_with_incremental_and_encryption() {
        let mut config = base_config();
        config.target = ScheduleTarget::Databases(vec!["movr".to_string()]);
        config.backup_options.full_backup_frequency = "@weekly".to_string();
        config.backup_options.encryption_passphrase = Some("hunter2".to_string());
        config.backup_options.incremental_backup_location =
            Some("s3://bucket/incr".to_string());
        config.schedule_options.first_run = Some("now".to_string());
        config.schedule_options.ignore_existing_backups = true;

        assert_eq!(
            build_create_statement(&config),
            "CREATE SCHEDULE IF NOT EXISTS 'nightly' FOR BACKUP DATABASE movr \
             INTO 's3://bucket/backups?AUTH=implicit' \
             WITH revision_history, encryption_passphrase='hunter2', incremental_location='s3://bucket/incr' \
             RECURRING '@daily' FULL BACKUP '@weekly' \
             WITH SCHEDULE OPTIONS first_run='now', on_execution_failure='reschedule', \
             on_previous_running='wait', ignore_existing_backups"
        );
    }

    #[test]
    fn wrapped_statement_recovers_schedule_ids() {
        let wrapped = wrap_returning_ids("CREATE SCHEDULE 'x' FOR BACKUP INTO 'y'");
        assert!(wrapped.starts_with("WITH x AS (CREATE SCHEDULE 'x' FOR BACKUP INTO 'y')"));
        assert!(wrapped.contains("strpos(backup_stmt, 'BACKUP INTO LATEST') = 1"));
    }

    #[test]
    fn validate_rejects_bad_enum_values() {
        let mut config = base_config();
        config.schedule_options.on_execution_failure = "explode".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = base_config();
        config.schedule_options.on_previous_running = "panic".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validate_rejects_empty_and_unqualified_targets() {
        let mut config = base_config();
        config.target = ScheduleTarget::Tables(Vec::new());
        assert!(validate_config(&config).is_err());

        let mut config = base_config();
        config.target = ScheduleTarget::Tables(vec!["unqualified".to_string()]);
        assert!(validate_config(&config).is_err());

        let mut config = base_config();
        config.target = ScheduleTarget::Databases(Vec::new());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn alter_clauses_always_reassert_revision_history() {
        let clauses = build_alter_clauses(&base_config(), &base_state());
        assert_eq!(clauses, vec!["SET WITH revision_history=true"]);
    }

    #[test]
    fn alter_clauses_cover_changed_fields() {
        let mut plan = base_config();
        plan.label = "nightly-v2".to_string();
        plan.location = "s3://bucket/new".to_string();
        plan.recurring = "@hourly".to_string();
        plan.backup_options.full_backup_frequency = "@daily".to_string();
        plan.backup_options.kms = Some("aws:///key".to_string());
        plan.schedule_options.on_execution_failure = "pause".to_string();

        let clauses = build_alter_clauses(&plan, &base_state());
        assert_eq!(
            clauses,
            vec![
                "SET LABEL 'nightly-v2'",
                "SET INTO 's3://bucket/new'",
                "SET RECURRING '@hourly'",
                "SET FULL BACKUP '@daily'",
                "SET WITH revision_history=true",
                "SET WITH kms='aws:///key'",
                "SET SCHEDULE OPTION on_execution_failure='pause'",
            ]
        );
    }

    #[test]
    fn alter_clauses_unset_cleared_options() {
        let mut state = base_state();
        state.backup_options.encryption_passphrase = Some("hunter2".to_string());
        state.backup_options.incremental_backup_location = Some("s3://incr".to_string());
        let plan = base_config();

        let clauses = build_alter_clauses(&plan, &state);
        assert!(clauses.contains(&"UNSET WITH encryption_passphrase".to_string()));
        assert!(clauses.contains(&"UNSET WITH incremental_location".to_string()));
    }

    #[test]
    fn engine_failure_actions_map_to_declared_vocabulary() {
        assert_eq!(map_on_execution_failure("PAUSE_SCHED"), "pause");
        assert_eq!(map_on_execution_failure("RETRY_SOON"), "retry");
        assert_eq!(map_on_execution_failure("RETRY_SCHED"), "reschedule");
        assert_eq!(map_on_execution_failure("SOMETHING_NEW"), "retry");
    }

    #[test]
    fn schedule_ids_compose_with_label() {
        assert_eq!(
            backup_schedule_id("cluster-1", "nightly"),
            "backup_schedule|cluster-1|nightly"
        );
    }
}
