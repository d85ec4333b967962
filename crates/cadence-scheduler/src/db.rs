use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Idempotent. Schedules and executions are stored as JSON documents next to
/// the handful of columns that queries filter on.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schedules (
            id              TEXT    NOT NULL PRIMARY KEY,
            tenant_id       TEXT    NOT NULL,
            schedule_type   TEXT    NOT NULL,
            is_active       INTEGER NOT NULL,
            next_execution  TEXT,               -- ISO-8601 or NULL
            body            TEXT    NOT NULL,   -- JSON-encoded ReportSchedule
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_tenant ON schedules (tenant_id);

        CREATE TABLE IF NOT EXISTS executions (
            id              TEXT    NOT NULL PRIMARY KEY,
            schedule_id     TEXT    NOT NULL,
            status          TEXT    NOT NULL,
            retry_attempt   INTEGER NOT NULL,
            created_at      TEXT    NOT NULL,
            body            TEXT    NOT NULL    -- JSON-encoded ScheduleExecution
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_schedule
            ON executions (schedule_id, created_at);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('schedules', 'executions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
