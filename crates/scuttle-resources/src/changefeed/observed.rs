//! Recovery of structured changefeed state from observed statement text.
//!
//! The cluster does not expose a changefeed's options as columns; the
//! only source is the `description` column of `SHOW CHANGEFEED JOB`,
//! which holds the original CREATE statement as rendered by the engine.
//! That external format dependency is contained here: this module is the
//! single place that knows the two statement shapes, and everything else
//! consumes the structured [`ObservedDefinition`].

use crate::changefeed::options::{parse_option_list, ChangefeedOptions};
use crate::error::{ResourceError, ResourceResult};
use regex::Regex;
use std::sync::LazyLock;

/// `CREATE CHANGEFEED FOR <targets> INTO <sink> [WITH <options>]`
static FOR_TARGETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^create changefeed for[\s\S]+?into[\s\S]+?(?:with([\s\S]+?))?$")
        .expect("static pattern")
});

/// `CREATE CHANGEFEED INTO <sink> [WITH <options>] AS <select>`
static INTO_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^create changefeed into[\s\S]+?(?:with([\s\S]+?))?as([\s\S]+?)$")
        .expect("static pattern")
});

/// Which of the two creation forms the statement used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObservedForm {
    /// `FOR <targets>`. The watched tables come from the job row's
    /// `full_table_names` column, not from the statement text.
    Targets,
    /// `AS <select>`. The feed watches a query and can never be updated.
    Select,
}

#[derive(Debug)]
pub(crate) struct ObservedDefinition {
    pub form: ObservedForm,
    pub options: ChangefeedOptions,
}

/// Parse the engine-rendered CREATE CHANGEFEED statement.
///
/// A statement matching neither form means the engine changed its
/// rendering; that is a hard error, never silently swallowed.
pub(crate) fn parse_observed_definition(statement: &str) -> ResourceResult<ObservedDefinition> {
    let head = statement.trim_start();
    let upper = head.to_uppercase();

    if upper.starts_with("CREATE CHANGEFEED FOR") {
        let captures = FOR_TARGETS.captures(head).ok_or_else(|| ResourceError::Parse {
            context: "changefeed statement",
            detail: format!("unrecognized FOR-targets form: {statement:?}"),
        })?;
        let raw = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        return Ok(ObservedDefinition {
            form: ObservedForm::Targets,
            options: parse_option_list(raw),
        });
    }

    if upper.starts_with("CREATE CHANGEFEED INTO") {
        let captures = INTO_SELECT.captures(head).ok_or_else(|| ResourceError::Parse {
            context: "changefeed statement",
            detail: format!("unrecognized AS-select form: {statement:?}"),
        })?;
        let raw = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        return Ok(ObservedDefinition {
            form: ObservedForm::Select,
            options: parse_option_list(raw),
        });
    }

    Err(ResourceError::Parse {
        context: "changefeed statement",
        detail: format!("statement is not a CREATE CHANGEFEED: {statement:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_for_targets_with_options() {
        let observed = parse_observed_definition(
            "CREATE CHANGEFEED FOR TABLE movr.public.rides, movr.public.users \
             INTO 'kafka://broker:9092' WITH format='json', diff, resolved='10s'",
        )
        .unwrap();
        assert_eq!(observed.form, ObservedForm::Targets);
        assert_eq!(observed.options.format.as_deref(), Some("json"));
        assert!(observed.options.diff);
        assert_eq!(observed.options.resolved.as_deref(), Some("10s"));
    }

    #[test]
    fn parses_for_targets_without_options() {
        let observed = parse_observed_definition(
            "CREATE CHANGEFEED FOR TABLE movr.public.rides INTO 'kafka://broker:9092'",
        )
        .unwrap();
        assert_eq!(observed.form, ObservedForm::Targets);
        assert_eq!(observed.options, ChangefeedOptions::default());
    }

    #[test]
    fn parses_select_form_with_options() {
        let observed = parse_observed_definition(
            "CREATE CHANGEFEED INTO 'webhook-https://sink.example' \
             WITH format='json', updated AS SELECT ride_id FROM movr.public.rides",
        )
        .unwrap();
        assert_eq!(observed.form, ObservedForm::Select);
        assert_eq!(observed.options.format.as_deref(), Some("json"));
        assert!(observed.options.updated);
    }

    #[test]
    fn parses_select_form_without_options() {
        let observed = parse_observed_definition(
            "CREATE CHANGEFEED INTO 'kafka://broker:9092' AS SELECT * FROM movr.public.rides",
        )
        .unwrap();
        assert_eq!(observed.form, ObservedForm::Select);
        assert_eq!(observed.options, ChangefeedOptions::default());
    }

    #[test]
    fn case_insensitive_prefix_detection() {
        let observed = parse_observed_definition(
            "create changefeed for table movr.public.rides into 'kafka://b' with diff",
        )
        .unwrap();
        assert_eq!(observed.form, ObservedForm::Targets);
        assert!(observed.options.diff);
    }

    #[test]
    fn rejects_non_changefeed_statements() {
        let err = parse_observed_definition("SELECT 1").unwrap_err();
        assert!(matches!(err, ResourceError::Parse { .. }));
    }
}
