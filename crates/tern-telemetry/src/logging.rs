use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::TelemetryError;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining structured fields as a JSON object.
    pub fields: Option<serde_json::Value>,
    pub session_id: Option<String>,
    pub call_id: Option<String>,
}

/// Filter for [`SqliteLogSink::query`]. Results are newest first.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Exact level, e.g. `"ERROR"`.
    pub level: Option<String>,
    /// Substring of the target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Defaults to 100.
    pub limit: Option<u32>,
}

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        target TEXT NOT NULL,
        message TEXT NOT NULL,
        fields TEXT,
        session_id TEXT,
        call_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
    CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
    CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
";

/// SQLite sink for warn+ log records.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
    dropped: AtomicU64,
}

impl SqliteLogSink {
    pub fn open(db_path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, TelemetryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, TelemetryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dropped: AtomicU64::new(0),
        })
    }

    /// Records that failed to write. Logging the failure would recurse into
    /// this sink, so it is only counted.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, session_id, call_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.session_id,
                record.call_id,
            ],
        );
        if result.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, TelemetryError> {
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, session_id, call_id FROM logs WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(level) = &q.level {
            args.push(level.to_uppercase());
            sql.push_str(&format!(" AND level = ?{}", args.len()));
        }
        if let Some(target) = &q.target {
            args.push(format!("%{target}%"));
            sql.push_str(&format!(" AND target LIKE ?{}", args.len()));
        }
        if let Some(session_id) = &q.session_id {
            args.push(session_id.clone());
            sql.push_str(&format!(" AND session_id = ?{}", args.len()));
        }
        if let Some(since) = &q.since {
            args.push(timestamp(since));
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len()));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let fields: Option<String> = row.get(5)?;
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: fields.and_then(|f| serde_json::from_str(&f).ok()),
                session_id: row.get(6)?,
                call_id: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count(&self) -> Result<i64, TelemetryError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?)
    }
}

/// Fixed-width UTC timestamps so text comparison orders correctly.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
    call_id: Option<String>,
}

/// tracing layer that writes events at or above a level to a [`SqliteLogSink`].
///
/// `session_id` and `call_id` are taken from the event, or else from the
/// nearest enclosing span that recorded them.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
    min_level: Level,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self {
            sink,
            min_level: Level::WARN,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
    call_id: Option<String>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "session_id" => self.session_id = Some(value),
            "call_id" => self.call_id = Some(value),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}").trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

/// Correlation ids recorded on a span, inherited by events inside it.
struct SpanIds {
    session_id: Option<String>,
    call_id: Option<String>,
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > self.min_level {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if visitor.session_id.is_none() || visitor.call_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(ids) = span.extensions().get::<SpanIds>() {
                        if visitor.session_id.is_none() {
                            visitor.session_id.clone_from(&ids.session_id);
                        }
                        if visitor.call_id.is_none() {
                            visitor.call_id.clone_from(&ids.call_id);
                        }
                    }
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&LogInsert {
            timestamp: timestamp(&Utc::now()),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            session_id: visitor.session_id,
            call_id: visitor.call_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if visitor.session_id.is_none() && visitor.call_id.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanIds {
                session_id: visitor.session_id,
                call_id: visitor.call_id,
            });
        }
    }
}
