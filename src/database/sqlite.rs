use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use indoc::indoc;
use miette::{miette, Context, IntoDiagnostic, Result};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef},
    Connection, OptionalExtension, ToSql,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::debug;

use super::{CacheDb, MeetingState};
use crate::{
    types::{FailureKind, FailureRecord},
    utils::MutexUtils,
};

#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl CacheDb for Sqlite {
    fn read_or_create(p: &Path) -> Result<Self> {
        let cache = Self {
            conn: Mutex::new(
                Connection::open(p)
                    .into_diagnostic()
                    .wrap_err("Could not open sqlite file")?,
            ),
        };

        cache.create_tables().wrap_err("Could not create tables")?;

        Ok(cache)
    }

    fn check_meeting(&self, key: &str) -> Result<MeetingState> {
        let row = self.conn.with_lock(|conn| {
            conn.query_row(
                "SELECT status, failure_kind, reason, output FROM meetings WHERE key = ?",
                [key],
                |row| {
                    Ok((
                        row.get::<_, Status>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .into_diagnostic()
            .wrap_err("Could not query meeting row")
        })?;

        let Some((status, kind, reason, output)) = row else {
            return Ok(MeetingState::NotProcessed);
        };
        Ok(match status {
            Status::NotProcessed => MeetingState::NotProcessed,
            Status::Completed => MeetingState::Completed {
                output: PathBuf::from(output.unwrap_or_default()),
            },
            Status::Failed => MeetingState::Failed {
                kind: kind
                    .as_deref()
                    .and_then(FailureKind::parse)
                    .ok_or_else(|| miette!("Unknown failure kind {kind:?} for meeting {key}"))?,
                reason: reason.unwrap_or_default(),
            },
        })
    }

    fn set_completed(&self, key: &str, title: &str, output: &Path) -> Result<()> {
        debug!("Set meeting {key} as completed");
        self.conn.with_lock(|conn| {
            conn.execute(
                indoc! {"
                    INSERT INTO meetings (key, title, status, failure_kind, reason, output, updated)
                    VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?5)
                    ON CONFLICT (key) DO UPDATE SET
                        title = excluded.title,
                        status = excluded.status,
                        failure_kind = NULL,
                        reason = NULL,
                        output = excluded.output,
                        updated = excluded.updated
                "},
                params![
                    key,
                    title,
                    Status::Completed,
                    output.to_string_lossy().into_owned(),
                    now()?
                ],
            )
            .into_diagnostic()
            .wrap_err("Could not set meeting as completed")
        })?;
        Ok(())
    }

    fn set_failed(&self, key: &str, failure: &FailureRecord) -> Result<()> {
        debug!("Set meeting {key} as failed ({})", failure.kind);
        self.conn.with_lock(|conn| {
            conn.execute(
                indoc! {"
                    INSERT INTO meetings (key, title, status, failure_kind, reason, output, updated)
                    VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
                    ON CONFLICT (key) DO UPDATE SET
                        title = excluded.title,
                        status = excluded.status,
                        failure_kind = excluded.failure_kind,
                        reason = excluded.reason,
                        output = NULL,
                        updated = excluded.updated
                "},
                params![
                    key,
                    failure.title,
                    Status::Failed,
                    failure.kind.as_str(),
                    failure.reason,
                    now()?
                ],
            )
            .into_diagnostic()
            .wrap_err("Could not set meeting as failed")
        })?;
        Ok(())
    }

    fn failures(&self) -> Result<Vec<FailureRecord>> {
        self.conn.with_lock(|conn| {
            let mut stmt = conn
                .prepare(indoc! {"
                    SELECT key, title, failure_kind, reason FROM meetings
                    WHERE status = ?
                    ORDER BY key
                "})
                .into_diagnostic()?;

            let rows = stmt
                .query_map([Status::Failed], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .into_diagnostic()
                .wrap_err("Could not query failed meetings")?;

            let mut failures = vec![];
            for row in rows {
                let (key, title, kind, reason) = row.into_diagnostic()?;
                let kind = FailureKind::parse(&kind)
                    .ok_or_else(|| miette!("Unknown failure kind '{kind}' for meeting {key}"))?;
                failures.push(FailureRecord {
                    manifest_id: key,
                    title,
                    kind,
                    reason: reason.unwrap_or_default(),
                });
            }
            Ok(failures)
        })
    }

    fn count_meetings(&self, completed: Option<bool>) -> Result<usize> {
        self.conn.with_lock(|conn| {
            Ok(match completed {
                Some(true) => conn.query_row(
                    "SELECT COUNT(key) FROM meetings WHERE status = ?",
                    [Status::Completed],
                    |row| row.get(0),
                ),
                Some(false) => conn.query_row(
                    "SELECT COUNT(key) FROM meetings WHERE status != ?",
                    [Status::Completed],
                    |row| row.get(0),
                ),
                None => conn.query_row("SELECT COUNT(key) FROM meetings", [], |row| row.get(0)),
            }
            .into_diagnostic()?)
        })
    }
}

impl Sqlite {
    /// Create the tables if they do not already exist
    fn create_tables(&self) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute_batch(indoc! {"
                BEGIN;
                CREATE TABLE IF NOT EXISTS meetings (
                    key             TEXT PRIMARY KEY,
                    title           TEXT NOT NULL,
                    status          INTEGER NOT NULL,
                    failure_kind    TEXT,
                    reason          TEXT,
                    output          TEXT,
                    updated         TEXT NOT NULL
                );
                COMMIT;
            "})
            .into_diagnostic()
        })
    }
}

fn now() -> Result<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).into_diagnostic()
}

/// Meeting status as stored in sqlite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    NotProcessed,
    Completed,
    Failed,
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(Status::NotProcessed),
            1 => Ok(Status::Completed),
            2 => Ok(Status::Failed),
            n => Err(FromSqlError::OutOfRange(n)),
        }
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let val = match self {
            Status::NotProcessed => 0,
            Status::Completed => 1,
            Status::Failed => 2,
        };
        Ok(ToSqlOutput::Owned(Value::Integer(val)))
    }
}
