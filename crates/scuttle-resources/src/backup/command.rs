//! Parser for engine-rendered `BACKUP` statements.
//!
//! `SHOW SCHEDULES FOR BACKUP` exposes each schedule's backup command
//! only as statement text; the structured target and option fields have
//! no columns of their own. This module recovers them by driving
//! `sqlparser`'s tokenizer and parser primitives over the text; the
//! statement itself is engine-specific syntax the generic parser does not
//! model, but its building blocks (object names, keywords, literals) are
//! standard.
//!
//! Shapes handled:
//!
//! ```sql
//! BACKUP INTO 'dest' WITH revision_history = true, detached
//! BACKUP TABLE db.public.a, db.public.b INTO LATEST IN 'dest' WITH ...
//! BACKUP DATABASE a, b INTO 'dest' WITH ...
//! ```

use crate::error::{ResourceError, ResourceResult};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// What a backup statement covers. `None` at the call site means the
/// whole cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BackupTargets {
    Tables(Vec<String>),
    Databases(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BackupCommandOptions {
    pub revision_history: Option<bool>,
    pub encryption_passphrase: Option<String>,
    pub kms: Option<String>,
    pub incremental_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackupCommand {
    /// `None` is a full-cluster backup.
    pub targets: Option<BackupTargets>,
    /// Destination URIs; locality-aware backups carry several.
    pub to: Vec<String>,
    /// True for `BACKUP ... INTO LATEST IN`, the incremental form.
    pub appends_to_latest: bool,
    pub options: BackupCommandOptions,
}

impl BackupCommand {
    pub fn destination(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }
}

fn parse_error(detail: impl Into<String>) -> ResourceError {
    ResourceError::Parse {
        context: "backup command",
        detail: detail.into(),
    }
}

/// Consume a keyword sqlparser has no `Keyword` entry for.
fn parse_custom_keyword(parser: &mut Parser, keyword: &str) -> bool {
    let token = parser.peek_token();
    if let Token::Word(word) = &token.token {
        if word.value.eq_ignore_ascii_case(keyword) {
            parser.next_token();
            return true;
        }
    }
    false
}

pub(crate) fn parse_backup_command(sql: &str) -> ResourceResult<BackupCommand> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|err| parse_error(err.to_string()))?;

    if !parse_custom_keyword(&mut parser, "BACKUP") {
        return Err(parse_error(format!("not a BACKUP statement: {sql:?}")));
    }

    let targets = if parser.parse_keyword(Keyword::TABLE) {
        Some(BackupTargets::Tables(parse_name_list(&mut parser)?))
    } else if parser.parse_keyword(Keyword::DATABASE) {
        Some(BackupTargets::Databases(parse_name_list(&mut parser)?))
    } else {
        None
    };

    if !parser.parse_keyword(Keyword::INTO) {
        return Err(parse_error(format!("expected INTO in {sql:?}")));
    }

    let appends_to_latest = if parse_custom_keyword(&mut parser, "LATEST") {
        if !parser.parse_keyword(Keyword::IN) {
            return Err(parse_error(format!("expected IN after LATEST in {sql:?}")));
        }
        true
    } else {
        false
    };

    let to = parse_destination_list(&mut parser)?;

    let mut options = BackupCommandOptions::default();
    if parser.parse_keyword(Keyword::WITH) {
        parse_options(&mut parser, &mut options)?;
    }

    Ok(BackupCommand {
        targets,
        to,
        appends_to_latest,
        options,
    })
}

/// Comma-separated object names (`db.public.t`, quoted parts included).
fn parse_name_list(parser: &mut Parser) -> ResourceResult<Vec<String>> {
    let mut names = Vec::new();
    loop {
        let name = parser
            .parse_object_name(false)
            .map_err(|err| parse_error(err.to_string()))?;
        names.push(name.to_string());
        if !parser.consume_token(&Token::Comma) {
            break;
        }
    }
    Ok(names)
}

/// One quoted destination, or a parenthesized list for locality-aware
/// backups.
fn parse_destination_list(parser: &mut Parser) -> ResourceResult<Vec<String>> {
    if parser.consume_token(&Token::LParen) {
        let mut destinations = Vec::new();
        loop {
            destinations.push(parse_string(parser)?);
            if !parser.consume_token(&Token::Comma) {
                break;
            }
        }
        if !parser.consume_token(&Token::RParen) {
            return Err(parse_error("unterminated destination list"));
        }
        Ok(destinations)
    } else {
        Ok(vec![parse_string(parser)?])
    }
}

fn parse_string(parser: &mut Parser) -> ResourceResult<String> {
    let token = parser.next_token();
    match token.token {
        Token::SingleQuotedString(value) | Token::DoubleQuotedString(value) => Ok(value),
        other => Err(parse_error(format!("expected string literal, found {other}"))),
    }
}

/// `key [= value]` pairs after WITH, comma separated and unparenthesized.
fn parse_options(
    parser: &mut Parser,
    options: &mut BackupCommandOptions,
) -> ResourceResult<()> {
    loop {
        let key = match parser.next_token().token {
            Token::Word(word) => word.value.to_lowercase(),
            Token::EOF => break,
            other => return Err(parse_error(format!("expected option name, found {other}"))),
        };

        let value = if parser.consume_token(&Token::Eq) {
            Some(parse_option_value(parser)?)
        } else {
            None
        };

        match key.as_str() {
            "revision_history" => {
                options.revision_history = Some(match value.as_deref() {
                    None | Some("true") => true,
                    Some("false") => false,
                    Some(other) => {
                        return Err(parse_error(format!(
                            "unexpected revision_history value {other:?}"
                        )))
                    }
                });
            }
            "encryption_passphrase" => options.encryption_passphrase = value,
            "kms" => options.kms = value,
            "incremental_location" => options.incremental_location = value,
            // detached and anything the engine adds later are not managed
            // here; leave them to the engine.
            _ => {}
        }

        if !parser.consume_token(&Token::Comma) {
            break;
        }
    }
    Ok(())
}

fn parse_option_value(parser: &mut Parser) -> ResourceResult<String> {
    let token = parser.next_token();
    match token.token {
        Token::SingleQuotedString(value) | Token::DoubleQuotedString(value) => Ok(value),
        Token::Word(word) => Ok(word.value.to_lowercase()),
        Token::Number(value, _) => Ok(value),
        other => Err(parse_error(format!("expected option value, found {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_cluster_backup() {
        let command = parse_backup_command(
            "BACKUP INTO 's3://bucket/backups?AUTH=implicit' WITH revision_history = true, detached",
        )
        .unwrap();
        assert_eq!(command.targets, None);
        assert_eq!(
            command.destination(),
            Some("s3://bucket/backups?AUTH=implicit")
        );
        assert!(!command.appends_to_latest);
        assert_eq!(command.options.revision_history, Some(true));
    }

    #[test]
    fn parses_table_targets() {
        let command = parse_backup_command(
            "BACKUP TABLE movr.public.rides, movr.public.users INTO 'gs://bucket/x' WITH detached",
        )
        .unwrap();
        assert_eq!(
            command.targets,
            Some(BackupTargets::Tables(vec![
                "movr.public.rides".to_string(),
                "movr.public.users".to_string(),
            ]))
        );
    }

    #[test]
    fn parses_database_targets() {
        let command =
            parse_backup_command("BACKUP DATABASE movr, cadence INTO 'nodelocal://1/backups'")
                .unwrap();
        assert_eq!(
            command.targets,
            Some(BackupTargets::Databases(vec![
                "movr".to_string(),
                "cadence".to_string(),
            ]))
        );
        assert_eq!(command.options, BackupCommandOptions::default());
    }

    #[test]
    fn parses_incremental_form() {
        let command = parse_backup_command(
            "BACKUP DATABASE movr INTO LATEST IN 's3://bucket/x' \
             WITH revision_history = true, incremental_location = 's3://bucket/incr', detached",
        )
        .unwrap();
        assert!(command.appends_to_latest);
        assert_eq!(
            command.options.incremental_location.as_deref(),
            Some("s3://bucket/incr")
        );
    }

    #[test]
    fn parses_encryption_options() {
        let command = parse_backup_command(
            "BACKUP INTO 's3://bucket/x' \
             WITH encryption_passphrase = 'hunter2', kms = 'aws:///key?AUTH=implicit'",
        )
        .unwrap();
        assert_eq!(
            command.options.encryption_passphrase.as_deref(),
            Some("hunter2")
        );
        assert_eq!(
            command.options.kms.as_deref(),
            Some("aws:///key?AUTH=implicit")
        );
    }

    #[test]
    fn parses_locality_aware_destination_list() {
        let command = parse_backup_command(
            "BACKUP INTO ('s3://east?COCKROACH_LOCALITY=default', 's3://west?COCKROACH_LOCALITY=region%3Dwest')",
        )
        .unwrap();
        assert_eq!(command.to.len(), 2);
        assert_eq!(
            command.destination(),
            Some("s3://east?COCKROACH_LOCALITY=default")
        );
    }

    #[test]
    fn ignores_unmanaged_options() {
        let command = parse_backup_command(
            "BACKUP INTO 's3://bucket/x' WITH revision_history = true, include_all_virtual_clusters = true",
        )
        .unwrap();
        assert_eq!(command.options.revision_history, Some(true));
    }

    #[test]
    fn rejects_non_backup_statements() {
        assert!(parse_backup_command("RESTORE FROM LATEST IN 's3://x'").is_err());
        assert!(parse_backup_command("SELECT 1").is_err());
    }

    #[test]
    fn rejects_missing_into() {
        assert!(parse_backup_command("BACKUP TABLE movr.public.rides TO 'x'").is_err());
    }
}
