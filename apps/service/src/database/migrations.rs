use anyhow::Result;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 4;

/// Run database migrations
///
/// Each migration runs once and is recorded in `schema_migrations`.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Resources, probe results and transition outbox").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Incidents and counters").await?;
    }

    if current_version < 3 {
        run_migration_v3(conn).await?;
        record_migration(conn, 3, "Notification rules, channels, dispatches and agent commands").await?;
    }

    if current_version < 4 {
        run_migration_v4(conn).await?;
        record_migration(conn, 4, "Dispatch source transition").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitored resources, append-only probe results and the
/// status transition outbox
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            host_id TEXT,
            api_key_hash TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS probe_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            success INTEGER NOT NULL,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_transitions (
            id TEXT PRIMARY KEY,
            resource_id TEXT NOT NULL,
            at INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_resources_kind ON resources(kind, enabled)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_resources_host ON resources(host_id)", ()).await?;
    conn.execute("CREATE UNIQUE INDEX IF NOT EXISTS idx_resources_api_key ON resources(api_key_hash)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_probe_results_resource_timestamp ON probe_results(resource_id, timestamp DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_transitions_pending ON status_transitions(processed, at)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_transitions_resource ON status_transitions(resource_id, at)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: incidents and the incident number counter
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            number INTEGER NOT NULL UNIQUE,
            resource_id TEXT NOT NULL,
            status TEXT NOT NULL,
            open INTEGER NOT NULL,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute("INSERT OR IGNORE INTO counters (name, value) VALUES ('incident_number', 0)", ()).await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_incidents_open ON incidents(open, resource_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_incidents_resource ON incidents(resource_id, number)", ()).await?;

    Ok(())
}

/// Migration v3: notification configuration, the dispatch log and queued
/// agent commands
async fn run_migration_v3(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_rules (
            id TEXT PRIMARY KEY,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_channels (
            id TEXT PRIMARY KEY,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_dispatches (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS agent_commands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host_id TEXT NOT NULL,
            issued_at INTEGER NOT NULL,
            document TEXT NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_dispatches_status ON notification_dispatches(status, created_at)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_agent_commands_host ON agent_commands(host_id, id)", ()).await?;

    Ok(())
}

/// Migration v4: link dispatches to the transition that produced them
async fn run_migration_v4(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE notification_dispatches ADD COLUMN source_id TEXT", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notification_dispatches_source ON notification_dispatches(source_id)",
        (),
    )
    .await?;

    Ok(())
}
