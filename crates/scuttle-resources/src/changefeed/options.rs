//! The changefeed option set and the table that drives it.
//!
//! Every recognized option appears exactly once in [`OPTIONS`], which
//! records its kind (bare flag vs key=value), how it behaves on update,
//! and how to read/write the typed field. Rendering the WITH clause,
//! recovering options from observed statement text, and diffing plan
//! against state all iterate this one table, so an option added here is
//! automatically handled everywhere.

use crate::error::{ResourceError, ResourceResult};
use scuttle_session::quote;
use serde::{Deserialize, Serialize};

/// Options accepted by `CREATE CHANGEFEED ... WITH`.
///
/// Flags are plain booleans (false means "not set"); valued options are
/// `Option<String>` since the engine treats every value as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedOptions {
    pub avro_schema_prefix: Option<String>,
    pub compression: Option<String>,
    pub confluent_schema_registry: Option<String>,
    pub cursor: Option<String>,
    pub diff: bool,
    pub end_time: Option<String>,
    pub envelope: Option<String>,
    pub execution_locality: Option<String>,
    pub format: Option<String>,
    pub full_table_name: bool,
    pub gc_protect_expires_after: Option<String>,
    pub initial_scan: Option<String>,
    pub kafka_sink_config: Option<String>,
    pub key_column: Option<String>,
    pub key_in_value: bool,
    pub lagging_ranges_threshold: Option<String>,
    pub lagging_ranges_polling_interval: Option<String>,
    pub metrics_label: Option<String>,
    pub min_checkpoint_frequency: Option<String>,
    pub mvcc_timestamp: bool,
    pub on_error: Option<String>,
    pub protect_data_from_gc_on_pause: bool,
    pub resolved: Option<String>,
    pub schema_change_events: Option<String>,
    pub schema_change_policy: Option<String>,
    pub split_column_families: bool,
    pub topic_in_value: bool,
    pub unordered: bool,
    pub updated: bool,
    pub virtual_columns: Option<String>,
    pub webhook_auth_header: Option<String>,
    pub webhook_sink_config: Option<String>,
}

/// Whether an option is a bare flag or carries a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OptionKind {
    Flag,
    Value,
}

/// How an option participates in updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateBehavior {
    /// Diffed; changes become SET/UNSET clauses.
    Diff,
    /// Any change between plan and state is a hard conflict.
    Immutable,
    /// Never diffed; the value in state is carried forward verbatim.
    PreserveState,
}

/// The observed presence of one option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OptionState {
    Unset,
    Flag,
    Value(String),
}

pub(crate) struct OptionSpec {
    pub key: &'static str,
    pub kind: OptionKind,
    pub behavior: UpdateBehavior,
    pub get: fn(&ChangefeedOptions) -> OptionState,
    pub set: fn(&mut ChangefeedOptions, Option<String>),
}

fn flag(set: bool) -> OptionState {
    if set {
        OptionState::Flag
    } else {
        OptionState::Unset
    }
}

fn value(field: &Option<String>) -> OptionState {
    match field {
        Some(value) => OptionState::Value(value.clone()),
        None => OptionState::Unset,
    }
}

/// One row per recognized option, in the order options render.
pub(crate) static OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        key: "avro_schema_prefix",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.avro_schema_prefix),
        set: |o, v| o.avro_schema_prefix = v,
    },
    OptionSpec {
        key: "compression",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.compression),
        set: |o, v| o.compression = v,
    },
    OptionSpec {
        key: "confluent_schema_registry",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.confluent_schema_registry),
        set: |o, v| o.confluent_schema_registry = v,
    },
    OptionSpec {
        key: "cursor",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::PreserveState,
        get: |o| value(&o.cursor),
        set: |o, v| o.cursor = v,
    },
    OptionSpec {
        key: "diff",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.diff),
        set: |o, _| o.diff = true,
    },
    OptionSpec {
        key: "end_time",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Immutable,
        get: |o| value(&o.end_time),
        set: |o, v| o.end_time = v,
    },
    OptionSpec {
        key: "envelope",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.envelope),
        set: |o, v| o.envelope = v,
    },
    OptionSpec {
        key: "execution_locality",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.execution_locality),
        set: |o, v| o.execution_locality = v,
    },
    OptionSpec {
        key: "format",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.format),
        set: |o, v| o.format = v,
    },
    OptionSpec {
        key: "full_table_name",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Immutable,
        get: |o| flag(o.full_table_name),
        set: |o, _| o.full_table_name = true,
    },
    OptionSpec {
        key: "gc_protect_expires_after",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.gc_protect_expires_after),
        set: |o, v| o.gc_protect_expires_after = v,
    },
    OptionSpec {
        key: "initial_scan",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Immutable,
        get: |o| value(&o.initial_scan),
        set: |o, v| o.initial_scan = v,
    },
    OptionSpec {
        key: "kafka_sink_config",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.kafka_sink_config),
        set: |o, v| o.kafka_sink_config = v,
    },
    OptionSpec {
        key: "key_column",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.key_column),
        set: |o, v| o.key_column = v,
    },
    OptionSpec {
        key: "key_in_value",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.key_in_value),
        set: |o, _| o.key_in_value = true,
    },
    OptionSpec {
        key: "lagging_ranges_threshold",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.lagging_ranges_threshold),
        set: |o, v| o.lagging_ranges_threshold = v,
    },
    OptionSpec {
        key: "lagging_ranges_polling_interval",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.lagging_ranges_polling_interval),
        set: |o, v| o.lagging_ranges_polling_interval = v,
    },
    OptionSpec {
        key: "metrics_label",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.metrics_label),
        set: |o, v| o.metrics_label = v,
    },
    OptionSpec {
        key: "min_checkpoint_frequency",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.min_checkpoint_frequency),
        set: |o, v| o.min_checkpoint_frequency = v,
    },
    OptionSpec {
        key: "mvcc_timestamp",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.mvcc_timestamp),
        set: |o, _| o.mvcc_timestamp = true,
    },
    OptionSpec {
        key: "on_error",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.on_error),
        set: |o, v| o.on_error = v,
    },
    OptionSpec {
        key: "protect_data_from_gc_on_pause",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.protect_data_from_gc_on_pause),
        set: |o, _| o.protect_data_from_gc_on_pause = true,
    },
    OptionSpec {
        key: "resolved",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.resolved),
        set: |o, v| o.resolved = v,
    },
    OptionSpec {
        key: "schema_change_events",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.schema_change_events),
        set: |o, v| o.schema_change_events = v,
    },
    OptionSpec {
        key: "schema_change_policy",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.schema_change_policy),
        set: |o, v| o.schema_change_policy = v,
    },
    OptionSpec {
        key: "split_column_families",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.split_column_families),
        set: |o, _| o.split_column_families = true,
    },
    OptionSpec {
        key: "topic_in_value",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.topic_in_value),
        set: |o, _| o.topic_in_value = true,
    },
    OptionSpec {
        key: "unordered",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.unordered),
        set: |o, _| o.unordered = true,
    },
    OptionSpec {
        key: "updated",
        kind: OptionKind::Flag,
        behavior: UpdateBehavior::Diff,
        get: |o| flag(o.updated),
        set: |o, _| o.updated = true,
    },
    OptionSpec {
        key: "virtual_columns",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.virtual_columns),
        set: |o, v| o.virtual_columns = v,
    },
    OptionSpec {
        key: "webhook_auth_header",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.webhook_auth_header),
        set: |o, v| o.webhook_auth_header = v,
    },
    OptionSpec {
        key: "webhook_sink_config",
        kind: OptionKind::Value,
        behavior: UpdateBehavior::Diff,
        get: |o| value(&o.webhook_sink_config),
        set: |o, v| o.webhook_sink_config = v,
    },
];

/// Render the option list for a CREATE statement, without the leading
/// `WITH`. Returns `None` when no option is set.
pub(crate) fn render_option_list(options: &ChangefeedOptions) -> Option<String> {
    let mut parts = Vec::new();
    for spec in OPTIONS {
        match (spec.get)(options) {
            OptionState::Unset => {}
            OptionState::Flag => parts.push(spec.key.to_string()),
            OptionState::Value(raw) => {
                parts.push(format!("{}={}", spec.key, quote::literal(&raw)))
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Decompose an observed option list (the text between WITH and the end
/// of the statement, or WITH and AS) into a typed option set.
///
/// Splits on commas and the first `=`, unquotes values, and maps bare
/// keys to flags. Unrecognized keys are ignored: the engine may grow
/// options this version does not manage.
pub(crate) fn parse_option_list(raw: &str) -> ChangefeedOptions {
    let mut options = ChangefeedOptions::default();
    let trimmed = raw.trim().trim_start_matches('(').trim_end_matches(')');
    if trimmed.is_empty() {
        return options;
    }
    for item in trimmed.split(',') {
        let (key, value) = match item.split_once('=') {
            Some((key, value)) => (key.trim(), Some(unquote(value.trim()))),
            None => (item.trim(), None),
        };
        if key.is_empty() {
            continue;
        }
        let Some(spec) = OPTIONS.iter().find(|spec| spec.key == key) else {
            continue;
        };
        match spec.kind {
            // A flag is present or it is not; any stray value is noise.
            OptionKind::Flag => (spec.set)(&mut options, None),
            OptionKind::Value => (spec.set)(&mut options, value),
        }
    }
    options
}

fn unquote(value: &str) -> String {
    let stripped = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| {
            value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
        });
    match stripped {
        Some(inner) => inner.replace("''", "'"),
        None => value.to_string(),
    }
}

/// SET/UNSET clauses produced by diffing plan against state.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct OptionDelta {
    pub set: Vec<String>,
    pub unset: Vec<String>,
}

impl OptionDelta {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

/// Diff the planned option set against the observed state.
///
/// An attempted change to an immutable option fails here, before any
/// ALTER statement is issued. Options marked preserve-state never
/// contribute clauses.
pub(crate) fn diff(
    plan: &ChangefeedOptions,
    state: &ChangefeedOptions,
) -> ResourceResult<OptionDelta> {
    let mut delta = OptionDelta::default();
    for spec in OPTIONS {
        let planned = (spec.get)(plan);
        let current = (spec.get)(state);
        match spec.behavior {
            UpdateBehavior::Immutable => {
                if planned != current {
                    return Err(ResourceError::ImmutableOption {
                        name: spec.key,
                        current: describe(&current),
                        requested: describe(&planned),
                    });
                }
            }
            UpdateBehavior::PreserveState => {}
            UpdateBehavior::Diff => {
                if planned == current {
                    continue;
                }
                match planned {
                    OptionState::Unset => delta.unset.push(spec.key.to_string()),
                    OptionState::Flag => delta.set.push(spec.key.to_string()),
                    OptionState::Value(raw) => delta
                        .set
                        .push(format!("{}={}", spec.key, quote::literal(&raw))),
                }
            }
        }
    }
    Ok(delta)
}

fn describe(state: &OptionState) -> String {
    match state {
        OptionState::Unset => "unset".to_string(),
        OptionState::Flag => "set".to_string(),
        OptionState::Value(value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChangefeedOptions {
        ChangefeedOptions {
            format: Some("json".to_string()),
            envelope: Some("wrapped".to_string()),
            resolved: Some("10s".to_string()),
            diff: true,
            updated: true,
            min_checkpoint_frequency: Some("30s".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn render_produces_sorted_table_order() {
        let rendered = render_option_list(&sample()).unwrap();
        assert_eq!(
            rendered,
            "diff, envelope='wrapped', format='json', min_checkpoint_frequency='30s', resolved='10s', updated"
        );
    }

    #[test]
    fn render_empty_options_is_none() {
        assert_eq!(render_option_list(&ChangefeedOptions::default()), None);
    }

    #[test]
    fn parse_inverts_render_for_every_option() {
        // Exercise every table row: flags on, values populated.
        let mut options = ChangefeedOptions::default();
        for spec in OPTIONS {
            match spec.kind {
                OptionKind::Flag => (spec.set)(&mut options, None),
                OptionKind::Value => {
                    (spec.set)(&mut options, Some(format!("v_{}", spec.key)))
                }
            }
        }
        let rendered = render_option_list(&options).unwrap();
        assert_eq!(parse_option_list(&rendered), options);
    }

    #[test]
    fn parse_round_trips_typical_sets() {
        let rendered = render_option_list(&sample()).unwrap();
        assert_eq!(parse_option_list(&rendered), sample());
    }

    #[test]
    fn parse_handles_quote_styles_and_whitespace() {
        let parsed = parse_option_list(" format = 'json' , diff , envelope = \"bare\" ");
        assert_eq!(parsed.format.as_deref(), Some("json"));
        assert!(parsed.diff);
        assert_eq!(parsed.envelope.as_deref(), Some("bare"));
    }

    #[test]
    fn parse_unescapes_doubled_quotes() {
        let parsed = parse_option_list("webhook_auth_header='Basic o''clock'");
        assert_eq!(parsed.webhook_auth_header.as_deref(), Some("Basic o'clock"));
    }

    #[test]
    fn parse_ignores_unknown_options() {
        let parsed = parse_option_list("format='json', brand_new_option='x'");
        assert_eq!(parsed.format.as_deref(), Some("json"));
    }

    #[test]
    fn diff_emits_set_and_unset() {
        let state = sample();
        let mut plan = sample();
        plan.format = Some("avro".to_string());
        plan.resolved = None;
        plan.topic_in_value = true;
        plan.diff = false;

        let delta = diff(&plan, &state).unwrap();
        assert_eq!(delta.set, vec!["format='avro'", "topic_in_value"]);
        assert_eq!(delta.unset, vec!["diff", "resolved"]);
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let delta = diff(&sample(), &sample()).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn immutable_options_reject_changes() {
        for (mutate, name) in [
            (
                (|plan: &mut ChangefeedOptions| plan.end_time = Some("later".into()))
                    as fn(&mut ChangefeedOptions),
                "end_time",
            ),
            (|plan| plan.full_table_name = true, "full_table_name"),
            (|plan| plan.initial_scan = Some("only".into()), "initial_scan"),
        ] {
            let state = sample();
            let mut plan = sample();
            mutate(&mut plan);
            match diff(&plan, &state) {
                Err(ResourceError::ImmutableOption { name: got, .. }) => {
                    assert_eq!(got, name)
                }
                other => panic!("expected immutable-option error for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn cursor_is_never_diffed() {
        let mut state = sample();
        state.cursor = Some("1700000000000000000.0".to_string());
        let mut plan = sample();
        plan.cursor = None;
        let delta = diff(&plan, &state).unwrap();
        assert!(delta.is_empty());
    }
}
