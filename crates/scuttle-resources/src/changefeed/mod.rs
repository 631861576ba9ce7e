//! Changefeed lifecycle and option reconciliation.
//!
//! A changefeed is a long-running cluster job. Its declared shape is
//! either a list of watched tables (updatable) or a select query (frozen
//! at creation). Updates never recreate the job: the reconciler diffs the
//! declared option set against the observed one and applies the result
//! inside a PAUSE → ALTER → RESUME sequence, waiting out each job-state
//! transition. The pause/alter/resume steps are not atomic; a failure
//! can leave the job paused, which the next reconciliation surfaces.

mod observed;
mod options;

pub use options::ChangefeedOptions;

use crate::cursor;
use crate::error::{ResourceError, ResourceResult};
use crate::id;
use crate::saga::Saga;
use crate::validate;
use crate::Lifecycle;
use async_trait::async_trait;
use observed::{parse_observed_definition, ObservedForm};
use options::OptionDelta;
use scuttle_session::{wait_for_status, JobStatus, SessionManager, DEFAULT_DATABASE};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

const ID_KIND: &str = "changefeed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangefeedConfig {
    pub cluster_id: String,
    /// Fully qualified tables to watch. Exactly one of `target` and
    /// `select` must be set.
    pub target: Option<Vec<String>>,
    /// Select query the feed evaluates. Feeds created this way cannot be
    /// updated.
    pub select: Option<String>,
    pub sink_uri: String,
    /// Whether tables added on update backfill (`initial_scan`) or start
    /// from now (`no_initial_scan`).
    pub initial_scan_on_update: bool,
    /// Id of a persistent cursor resource to resume from and to claim.
    pub persistent_cursor: Option<String>,
    pub options: ChangefeedOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangefeedState {
    pub id: String,
    pub cluster_id: String,
    pub job_id: i64,
    pub status: String,
    pub target: Option<Vec<String>>,
    pub select: Option<String>,
    pub sink_uri: String,
    pub initial_scan_on_update: bool,
    pub persistent_cursor: Option<String>,
    pub options: ChangefeedOptions,
}

pub fn changefeed_id(cluster_id: &str, job_id: i64) -> String {
    id::compose(ID_KIND, &[cluster_id, &job_id.to_string()])
}

pub struct ChangefeedResource {
    session: Arc<SessionManager>,
}

impl ChangefeedResource {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }
}

/// Cancel a job and wait until the cluster confirms it.
async fn cancel_job(
    session: &SessionManager,
    cluster_id: &str,
    job_id: i64,
) -> ResourceResult<()> {
    session
        .with_conn(cluster_id, DEFAULT_DATABASE, |pool| async move {
            sqlx::query(&format!("CANCEL JOB {job_id}"))
                .execute(&pool)
                .await?;
            wait_for_status(&pool, job_id, JobStatus::Canceled).await?;
            Ok::<_, ResourceError>(())
        })
        .await
}

fn validate_config(config: &ChangefeedConfig) -> ResourceResult<()> {
    let has_target = config
        .target
        .as_ref()
        .map(|targets| !targets.is_empty())
        .unwrap_or(false);
    let has_select = config.select.is_some();
    if has_target == has_select {
        return Err(ResourceError::Validation(
            "exactly one of target and select must be set".to_string(),
        ));
    }
    if let Some(targets) = &config.target {
        for target in targets {
            validate::qualified_table_name(target)?;
        }
    }
    if config.persistent_cursor.is_some() && config.options.cursor.is_some() {
        return Err(ResourceError::Validation(
            "persistent_cursor conflicts with an explicit cursor option".to_string(),
        ));
    }
    Ok(())
}

/// Resolve the cursor reference in a config: validates it, checks it is
/// free, and returns `(cursor key, cursor option value)`.
async fn resolve_cursor(
    session: &SessionManager,
    config: &ChangefeedConfig,
    cursor_ref: &str,
) -> ResourceResult<(String, Option<String>)> {
    let (cursor_cluster, key) = cursor::parse_cursor_id(cursor_ref)?;
    if cursor_cluster != config.cluster_id {
        return Err(ResourceError::Validation(format!(
            "persistent cursor {cursor_ref:?} belongs to cluster {cursor_cluster:?}, not {:?}",
            config.cluster_id
        )));
    }
    let value = cursor::read_value(session, &config.cluster_id, &key)
        .await?
        .ok_or_else(|| ResourceError::NotFound(format!("persistent cursor {key:?}")))?;
    if value.in_use() {
        return Err(ResourceError::Conflict(
            "persistent cursor is currently in use by another job".to_string(),
        ));
    }
    Ok((key, value.offset_high_water))
}

fn build_create_statement(config: &ChangefeedConfig, options: &ChangefeedOptions) -> String {
    let mut pieces = vec!["CREATE CHANGEFEED".to_string()];
    if let Some(targets) = &config.target {
        pieces.push(format!("FOR {}", targets.join(", ")));
    }
    pieces.push(format!(
        "INTO {}",
        scuttle_session::quote::literal(&config.sink_uri)
    ));
    if let Some(rendered) = options::render_option_list(options) {
        pieces.push(format!("WITH {rendered}"));
    }
    if let Some(select) = &config.select {
        pieces.push(format!("AS {select}"));
    }
    pieces.join(" ")
}

/// Set difference in both directions between current and planned targets.
fn target_delta(current: &[String], planned: &[String]) -> (Vec<String>, Vec<String>) {
    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
    let planned_set: HashSet<&str> = planned.iter().map(String::as_str).collect();
    let added = planned
        .iter()
        .filter(|target| !current_set.contains(target.as_str()))
        .cloned()
        .collect();
    let removed = current
        .iter()
        .filter(|target| !planned_set.contains(target.as_str()))
        .cloned()
        .collect();
    (added, removed)
}

fn build_alter_statement(
    job_id: i64,
    added: &[String],
    removed: &[String],
    delta: &OptionDelta,
    initial_scan_on_update: bool,
) -> Option<String> {
    let mut clauses = Vec::new();
    if !added.is_empty() {
        let scan = if initial_scan_on_update {
            "initial_scan"
        } else {
            "no_initial_scan"
        };
        clauses.push(format!("ADD {} WITH {}", added.join(", "), scan));
    }
    if !removed.is_empty() {
        clauses.push(format!("DROP {}", removed.join(", ")));
    }
    if !delta.set.is_empty() {
        clauses.push(format!("SET {}", delta.set.join(", ")));
    }
    if !delta.unset.is_empty() {
        clauses.push(format!("UNSET {}", delta.unset.join(", ")));
    }
    if clauses.is_empty() {
        return None;
    }
    Some(format!("ALTER CHANGEFEED {job_id} {}", clauses.join(" ")))
}

#[async_trait]
impl Lifecycle for ChangefeedResource {
    type Config = ChangefeedConfig;
    type State = ChangefeedState;

    async fn create(&self, config: Self::Config) -> ResourceResult<Self::State> {
        validate_config(&config)?;

        let mut options = config.options.clone();
        let mut cursor_key = None;
        if let Some(cursor_ref) = &config.persistent_cursor {
            let (key, offset_high_water) =
                resolve_cursor(&self.session, &config, cursor_ref).await?;
            if offset_high_water.is_some() {
                options.cursor = offset_high_water;
            }
            cursor_key = Some(key);
        }

        let statement = build_create_statement(&config, &options);
        tracing::info!(cluster = %config.cluster_id, statement = %statement, "creating changefeed");

        let create_statement = statement.clone();
        let created = self
            .session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let job_id: i64 = sqlx::query_scalar(&create_statement)
                    .fetch_one(&pool)
                    .await?;
                Ok::<_, ResourceError>(job_id)
            })
            .await;

        let job_id = match created {
            Ok(job_id) => job_id,
            Err(err) => {
                // A cursor that has fallen behind the GC window can never
                // be resumed from; name that case for the operator.
                let text = err.to_string();
                if text.contains("after replica GC threshold") {
                    return Err(ResourceError::ExpiredCursor(text));
                }
                return Err(err);
            }
        };

        // The job now exists; anything that fails before the state is
        // handed back must cancel it, or an unreferenced job keeps running.
        let mut saga = Saga::new();
        {
            let session = Arc::clone(&self.session);
            let cluster_id = config.cluster_id.clone();
            saga.on_abort("cancel fresh changefeed job", move || async move {
                cancel_job(&session, &cluster_id, job_id).await
            });
        }

        let running = self
            .session
            .with_conn(&config.cluster_id, DEFAULT_DATABASE, |pool| async move {
                wait_for_status(&pool, job_id, JobStatus::Running).await?;
                Ok::<_, ResourceError>(())
            })
            .await;
        if let Err(err) = running {
            return Err(saga.abort(err).await);
        }

        if let Some(key) = &cursor_key {
            if let Err(claim_err) =
                cursor::assign_job(&self.session, &config.cluster_id, key, Some(job_id)).await
            {
                tracing::warn!(
                    cluster = %config.cluster_id,
                    job_id,
                    error = %claim_err,
                    "cursor claim failed; unwinding changefeed creation"
                );
                return Err(saga.abort(claim_err).await);
            }
        }
        saga.commit();

        Ok(ChangefeedState {
            id: changefeed_id(&config.cluster_id, job_id),
            cluster_id: config.cluster_id,
            job_id,
            status: JobStatus::Running.as_str().to_string(),
            target: config.target,
            select: config.select,
            sink_uri: config.sink_uri,
            initial_scan_on_update: config.initial_scan_on_update,
            persistent_cursor: config.persistent_cursor,
            options,
        })
    }

    async fn read(&self, state: &Self::State) -> ResourceResult<Option<Self::State>> {
        let job_id = state.job_id;
        let observed = self
            .session
            .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                let query = format!(
                    "SELECT description, status, sink_uri, full_table_names \
                     FROM [SHOW CHANGEFEED JOB {job_id}]"
                );
                let row = sqlx::query(&query).fetch_optional(&pool).await?;
                let Some(row) = row else {
                    return Ok(None);
                };
                Ok::<_, ResourceError>(Some((
                    row.try_get::<String, _>("description")?,
                    row.try_get::<String, _>("status")?,
                    row.try_get::<Option<String>, _>("sink_uri")?,
                    row.try_get::<Option<Vec<String>>, _>("full_table_names")?,
                )))
            })
            .await;

        let observed = match observed {
            Ok(observed) => observed,
            Err(err) if err.is_cluster_unavailable() => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some((description, status, sink_uri, full_table_names)) = observed else {
            return Ok(None);
        };

        let parsed_status = JobStatus::from_str(&status).map_err(ResourceError::Session)?;
        if parsed_status.is_terminal() && parsed_status != JobStatus::Succeeded {
            return Err(ResourceError::JobState { job_id, status });
        }

        let definition = parse_observed_definition(&description)?;

        let mut next = state.clone();
        next.status = status;
        next.options = definition.options;
        match definition.form {
            ObservedForm::Targets => {
                next.target = full_table_names;
                next.select = None;
            }
            ObservedForm::Select => {
                // The select text is not recovered from the description;
                // the declared query is authoritative.
                next.target = None;
            }
        }
        if let Some(observed_sink) = sink_uri {
            if !validate::urls_equivalent(&state.sink_uri, &observed_sink) {
                next.sink_uri = observed_sink;
            }
        }

        Ok(Some(next))
    }

    async fn update(&self, plan: Self::Config, state: Self::State) -> ResourceResult<Self::State> {
        validate_config(&plan)?;

        let status = JobStatus::from_str(&state.status).map_err(ResourceError::Session)?;
        if status.is_terminal() {
            return Err(ResourceError::Conflict(format!(
                "changefeed job {} is {} and cannot be updated",
                state.job_id, state.status
            )));
        }
        if state.select.is_some() {
            return Err(ResourceError::Conflict(
                "changefeeds defined with a select query cannot be updated".to_string(),
            ));
        }

        // Cursor ownership moves before the job is touched; a conflict here
        // must abort the whole update.
        if plan.persistent_cursor != state.persistent_cursor {
            match (&plan.persistent_cursor, &state.persistent_cursor) {
                (None, Some(previous)) => {
                    let (_, key) = cursor::parse_cursor_id(previous)?;
                    cursor::assign_job(&self.session, &state.cluster_id, &key, None).await?;
                }
                (Some(next_ref), _) => {
                    let (_, key) = cursor::parse_cursor_id(next_ref)?;
                    cursor::assign_job(&self.session, &state.cluster_id, &key, Some(state.job_id))
                        .await?;
                }
                (None, None) => {}
            }
        }

        let mut delta = options::diff(&plan.options, &state.options)?;
        if !validate::urls_equivalent(&plan.sink_uri, &state.sink_uri) {
            delta.set.push(format!(
                "sink={}",
                scuttle_session::quote::literal(&plan.sink_uri)
            ));
        }

        let empty = Vec::new();
        let current_targets = state.target.as_deref().unwrap_or(&empty);
        let planned_targets = plan.target.as_deref().unwrap_or(&empty);
        let (added, removed) = target_delta(current_targets, planned_targets);

        let alter = build_alter_statement(
            state.job_id,
            &added,
            &removed,
            &delta,
            plan.initial_scan_on_update,
        );

        if let Some(alter) = alter {
            tracing::info!(
                cluster = %state.cluster_id,
                job_id = state.job_id,
                statement = %alter,
                "updating changefeed"
            );
            let job_id = state.job_id;
            self.session
                .with_conn(&state.cluster_id, DEFAULT_DATABASE, |pool| async move {
                    sqlx::query(&format!(
                        "PAUSE JOB {job_id} WITH REASON='configuration update'"
                    ))
                    .execute(&pool)
                    .await?;
                    wait_for_status(&pool, job_id, JobStatus::Paused).await?;

                    sqlx::query(&alter).execute(&pool).await?;

                    sqlx::query(&format!("RESUME JOB {job_id}")).execute(&pool).await?;
                    wait_for_status(&pool, job_id, JobStatus::Running).await?;
                    Ok::<_, ResourceError>(())
                })
                .await?;
        }

        let mut options = plan.options;
        options.cursor = state.options.cursor.clone();
        Ok(ChangefeedState {
            id: state.id,
            cluster_id: state.cluster_id,
            job_id: state.job_id,
            status: JobStatus::Running.as_str().to_string(),
            target: plan.target,
            select: state.select,
            sink_uri: plan.sink_uri,
            initial_scan_on_update: plan.initial_scan_on_update,
            persistent_cursor: plan.persistent_cursor,
            options,
        })
    }

    async fn delete(&self, state: Self::State) -> ResourceResult<()> {
        match JobStatus::from_str(&state.status) {
            Ok(JobStatus::Running) | Ok(JobStatus::Paused) => {
                cancel_job(&self.session, &state.cluster_id, state.job_id).await
            }
            // Already terminal (or unknown to this version): nothing to stop.
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_config() -> ChangefeedConfig {
        ChangefeedConfig {
            cluster_id: "cluster-1".to_string(),
            target: Some(vec!["db.public.t1".to_string()]),
            select: None,
            sink_uri: "kafka://x".to_string(),
            initial_scan_on_update: false,
            persistent_cursor: None,
            options: ChangefeedOptions {
                format: Some("json".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn create_statement_for_targets() {
        let config = target_config();
        assert_eq!(
            build_create_statement(&config, &config.options),
            "CREATE CHANGEFEED FOR db.public.t1 INTO 'kafka://x' WITH format='json'"
        );
    }

    #[test]
    fn create_statement_for_multiple_targets_without_options() {
        let mut config = target_config();
        config.target = Some(vec![
            "db.public.t1".to_string(),
            "db.public.t2".to_string(),
        ]);
        config.options = ChangefeedOptions::default();
        assert_eq!(
            build_create_statement(&config, &config.options),
            "CREATE CHANGEFEED FOR db.public.t1, db.public.t2 INTO 'kafka://x'"
        );
    }

    #[test]
    fn create_statement_for_select_form() {
        let config = ChangefeedConfig {
            cluster_id: "cluster-1".to_string(),
            target: None,
            select: Some("SELECT id FROM db.public.t1 WHERE deleted = false".to_string()),
            sink_uri: "kafka://x".to_string(),
            initial_scan_on_update: false,
            persistent_cursor: None,
            options: ChangefeedOptions {
                format: Some("json".to_string()),
                ..Default::default()
            },
        };
        assert_eq!(
            build_create_statement(&config, &config.options),
            "CREATE CHANGEFEED INTO 'kafka://x' WITH format='json' \
             AS SELECT id FROM db.public.t1 WHERE deleted = false"
        );
    }

    #[test]
    fn config_requires_exactly_one_of_target_and_select() {
        let mut both = target_config();
        both.select = Some("SELECT 1".to_string());
        assert!(validate_config(&both).is_err());

        let mut neither = target_config();
        neither.target = None;
        assert!(validate_config(&neither).is_err());

        let mut empty_targets = target_config();
        empty_targets.target = Some(Vec::new());
        assert!(validate_config(&empty_targets).is_err());

        assert!(validate_config(&target_config()).is_ok());
    }

    #[test]
    fn config_rejects_unqualified_targets() {
        let mut config = target_config();
        config.target = Some(vec!["just_a_table".to_string()]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn target_delta_finds_additions_and_removals() {
        let current = vec!["db.public.t1".to_string(), "db.public.t2".to_string()];
        let planned = vec!["db.public.t2".to_string(), "db.public.t3".to_string()];
        let (added, removed) = target_delta(&current, &planned);
        assert_eq!(added, vec!["db.public.t3"]);
        assert_eq!(removed, vec!["db.public.t1"]);
    }

    #[test]
    fn alter_statement_adds_target_without_initial_scan() {
        let alter = build_alter_statement(
            42,
            &["db.public.t2".to_string()],
            &[],
            &OptionDelta::default(),
            false,
        )
        .unwrap();
        assert_eq!(alter, "ALTER CHANGEFEED 42 ADD db.public.t2 WITH no_initial_scan");
    }

    #[test]
    fn alter_statement_adds_target_with_initial_scan() {
        let alter = build_alter_statement(
            42,
            &["db.public.t2".to_string()],
            &[],
            &OptionDelta::default(),
            true,
        )
        .unwrap();
        assert_eq!(alter, "ALTER CHANGEFEED 42 ADD db.public.t2 WITH initial_scan");
    }

    #[test]
    fn alter_statement_combines_all_clause_kinds() {
        let delta = OptionDelta {
            set: vec!["format='avro'".to_string()],
            unset: vec!["diff".to_string()],
        };
        let alter = build_alter_statement(
            7,
            &["db.public.added".to_string()],
            &["db.public.removed".to_string()],
            &delta,
            false,
        )
        .unwrap();
        assert_eq!(
            alter,
            "ALTER CHANGEFEED 7 ADD db.public.added WITH no_initial_scan \
             DROP db.public.removed SET format='avro' UNSET diff"
        );
    }

    #[test]
    fn alter_statement_with_no_changes_is_none() {
        assert_eq!(
            build_alter_statement(42, &[], &[], &OptionDelta::default(), false),
            None
        );
    }

    #[test]
    fn changefeed_ids_compose_with_job_id() {
        assert_eq!(changefeed_id("cluster-1", 99), "changefeed|cluster-1|99");
    }
}
