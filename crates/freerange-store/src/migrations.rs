//! Versioned schema runner.
//!
//! Migrations are embedded SQL applied in order, tracked in a
//! `schema_migrations` table with content checksums so a drifted migration
//! is detected rather than silently re-run. The `freerange-migrate` binary
//! is a thin wrapper around [`run_pending`].

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::postgres::PgPool;
use crate::schema::schema_migrations;

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001",
        name: "create_notifications",
        sql: r#"
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    app_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    template_id TEXT,
    channel TEXT NOT NULL,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    category TEXT,
    scheduled_at TIMESTAMPTZ,
    sent_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    doc JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_app_created
    ON notifications (app_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_notifications_app_user_status
    ON notifications (app_id, user_id, status);
CREATE INDEX IF NOT EXISTS idx_notifications_status_scheduled
    ON notifications (status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_notifications_channel
    ON notifications (channel);
"#,
    },
    Migration {
        version: "0002",
        name: "create_users",
        sql: r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    app_id TEXT NOT NULL,
    external_user_id TEXT,
    email TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    doc JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_app
    ON users (app_id);
CREATE INDEX IF NOT EXISTS idx_users_app_external
    ON users (app_id, external_user_id);
CREATE INDEX IF NOT EXISTS idx_users_doc
    ON users USING GIN (doc jsonb_path_ops);
"#,
    },
    Migration {
        version: "0003",
        name: "create_applications",
        sql: r#"
CREATE TABLE IF NOT EXISTS applications (
    id TEXT PRIMARY KEY,
    api_key TEXT NOT NULL UNIQUE,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    doc JSONB NOT NULL
);
"#,
    },
    Migration {
        version: "0004",
        name: "create_templates",
        sql: r#"
CREATE TABLE IF NOT EXISTS templates (
    id TEXT PRIMARY KEY,
    app_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    locale TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    doc JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_templates_app
    ON templates (app_id, name);
"#,
    },
];

fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Apply every migration not yet recorded. Returns the versions applied.
pub fn run_pending(pool: &PgPool) -> StoreResult<Vec<String>> {
    let mut conn = pool.get().map_err(|e| StoreError::Unavailable {
        message: format!("failed to get database connection: {}", e),
    })?;

    conn.batch_execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL
);
"#,
    )?;

    let applied: Vec<(String, String)> = schema_migrations::table
        .select((schema_migrations::version, schema_migrations::checksum))
        .load(&mut conn)?;

    let mut newly_applied = Vec::new();
    for migration in MIGRATIONS {
        let sum = checksum(migration.sql);
        if let Some((_, recorded)) = applied.iter().find(|(v, _)| v == migration.version) {
            if recorded != &sum {
                return Err(StoreError::backend(format!(
                    "migration {} ({}) changed after being applied",
                    migration.version, migration.name
                )));
            }
            continue;
        }

        conn.batch_execute(migration.sql)?;
        diesel::insert_into(schema_migrations::table)
            .values((
                schema_migrations::version.eq(migration.version),
                schema_migrations::name.eq(migration.name),
                schema_migrations::checksum.eq(&sum),
                schema_migrations::applied_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        info!(version = migration.version, name = migration.name, "applied migration");
        newly_applied.push(migration.version.to_string());
    }

    Ok(newly_applied)
}
