//! SQLite storage backend.
//!
//! One `Mutex<Connection>` guards all access; the supersede-then-insert and
//! the expiry sweep each run inside a single transaction. Tagged enum columns
//! (request status, grant state) are stored as JSON alongside a plain label
//! column used for SQL filtering. Timestamps are stored as nanoseconds since
//! the epoch so comparisons stay exact in SQL.

use std::collections::BTreeSet;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use consentry_core::{
    AuditEntry, AuditEntryId, AuditStore, ConsentGrant, ConsentRequest, EngineError, EngineResult,
    GrantId, GrantState, GrantStore, HistoryFilter, PageRequest, RequestId, RequestStatus,
    RequestStore, Service, ServiceId, ServiceStore, StudentId, Timestamp,
};

fn storage_err(e: rusqlite::Error) -> EngineError {
    EngineError::Storage(format!("sqlite: {}", e))
}

fn lock_err<T>(e: std::sync::PoisonError<T>) -> EngineError {
    EngineError::Storage(format!("lock poisoned: {}", e))
}

fn ts_to_ns(t: Timestamp) -> i64 {
    t.seconds_since_epoch as i64 * 1_000_000_000 + i64::from(t.nanoseconds)
}

fn ns_to_ts(ns: i64) -> Timestamp {
    Timestamp {
        seconds_since_epoch: (ns / 1_000_000_000) as u64,
        nanoseconds: (ns % 1_000_000_000) as u32,
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                risk_category TEXT NOT NULL,
                active INTEGER NOT NULL,
                created_at_ns INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY NOT NULL,
                student_id TEXT NOT NULL,
                service_id TEXT NOT NULL,
                requested_fields TEXT NOT NULL,
                purpose TEXT NOT NULL,
                requested_duration_days INTEGER NOT NULL,
                risk_score INTEGER NOT NULL,
                status TEXT NOT NULL,
                status_label TEXT NOT NULL,
                created_at_ns INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_requests_student
                ON requests (student_id, created_at_ns);
            CREATE TABLE IF NOT EXISTS grants (
                id TEXT PRIMARY KEY NOT NULL,
                student_id TEXT NOT NULL,
                service_id TEXT NOT NULL,
                request_id TEXT NOT NULL,
                approved_fields TEXT NOT NULL,
                issued_at_ns INTEGER NOT NULL,
                expires_at_ns INTEGER NOT NULL,
                state TEXT NOT NULL,
                state_label TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_grants_pair
                ON grants (student_id, service_id, state_label);
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY NOT NULL,
                action TEXT NOT NULL,
                student_id TEXT NOT NULL,
                service_id TEXT,
                request_id TEXT,
                grant_id TEXT,
                ip_address TEXT,
                user_agent TEXT,
                metadata TEXT NOT NULL,
                timestamp_ns INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_student
                ON audit_log (student_id, timestamp_ns);",
        )
        .map_err(|e| EngineError::Storage(format!("failed to create tables: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> EngineResult<Self> {
        Self::open(":memory:")
    }
}

// ---------------------------------------------------------------------------
// Row mapping — raw columns out of rusqlite, JSON decoding outside the closure
// ---------------------------------------------------------------------------

struct RawRequest {
    id: String,
    student_id: String,
    service_id: String,
    requested_fields: String,
    purpose: String,
    requested_duration_days: u32,
    risk_score: u8,
    status: String,
    created_at_ns: i64,
}

fn row_to_raw_request(row: &Row<'_>) -> rusqlite::Result<RawRequest> {
    Ok(RawRequest {
        id: row.get(0)?,
        student_id: row.get(1)?,
        service_id: row.get(2)?,
        requested_fields: row.get(3)?,
        purpose: row.get(4)?,
        requested_duration_days: row.get(5)?,
        risk_score: row.get(6)?,
        status: row.get(7)?,
        created_at_ns: row.get(8)?,
    })
}

impl RawRequest {
    fn into_request(self) -> EngineResult<ConsentRequest> {
        let requested_fields: BTreeSet<String> = serde_json::from_str(&self.requested_fields)?;
        let status: RequestStatus = serde_json::from_str(&self.status)?;
        Ok(ConsentRequest {
            id: RequestId::new(self.id),
            student_id: StudentId::new(self.student_id),
            service_id: ServiceId::new(self.service_id),
            requested_fields,
            purpose: self.purpose,
            requested_duration_days: self.requested_duration_days,
            risk_score: self.risk_score,
            status,
            created_at: ns_to_ts(self.created_at_ns),
        })
    }
}

const REQUEST_COLUMNS: &str = "id, student_id, service_id, requested_fields, purpose, \
     requested_duration_days, risk_score, status, created_at_ns";

struct RawGrant {
    id: String,
    student_id: String,
    service_id: String,
    request_id: String,
    approved_fields: String,
    issued_at_ns: i64,
    expires_at_ns: i64,
    state: String,
}

fn row_to_raw_grant(row: &Row<'_>) -> rusqlite::Result<RawGrant> {
    Ok(RawGrant {
        id: row.get(0)?,
        student_id: row.get(1)?,
        service_id: row.get(2)?,
        request_id: row.get(3)?,
        approved_fields: row.get(4)?,
        issued_at_ns: row.get(5)?,
        expires_at_ns: row.get(6)?,
        state: row.get(7)?,
    })
}

impl RawGrant {
    fn into_grant(self) -> EngineResult<ConsentGrant> {
        let approved_fields: BTreeSet<String> = serde_json::from_str(&self.approved_fields)?;
        let state: GrantState = serde_json::from_str(&self.state)?;
        Ok(ConsentGrant {
            id: GrantId::new(self.id),
            student_id: StudentId::new(self.student_id),
            service_id: ServiceId::new(self.service_id),
            request_id: RequestId::new(self.request_id),
            approved_fields,
            issued_at: ns_to_ts(self.issued_at_ns),
            expires_at: ns_to_ts(self.expires_at_ns),
            state,
        })
    }
}

const GRANT_COLUMNS: &str = "id, student_id, service_id, request_id, approved_fields, \
     issued_at_ns, expires_at_ns, state";

fn row_to_service(row: &Row<'_>) -> rusqlite::Result<(Service, String)> {
    let risk_category: String = row.get(3)?;
    let service = Service {
        id: ServiceId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        // Placeholder; replaced from the parsed label by the caller.
        risk_category: consentry_core::RiskCategory::Low,
        active: row.get::<_, i64>(4)? != 0,
        created_at: ns_to_ts(row.get(5)?),
    };
    Ok((service, risk_category))
}

fn finish_service((mut service, category): (Service, String)) -> EngineResult<Service> {
    service.risk_category = category
        .parse()
        .map_err(|e: String| EngineError::Storage(e))?;
    Ok(service)
}

struct RawAuditEntry {
    id: String,
    action: String,
    student_id: String,
    service_id: Option<String>,
    request_id: Option<String>,
    grant_id: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    metadata: String,
    timestamp_ns: i64,
}

fn row_to_raw_audit(row: &Row<'_>) -> rusqlite::Result<RawAuditEntry> {
    Ok(RawAuditEntry {
        id: row.get(0)?,
        action: row.get(1)?,
        student_id: row.get(2)?,
        service_id: row.get(3)?,
        request_id: row.get(4)?,
        grant_id: row.get(5)?,
        ip_address: row.get(6)?,
        user_agent: row.get(7)?,
        metadata: row.get(8)?,
        timestamp_ns: row.get(9)?,
    })
}

impl RawAuditEntry {
    fn into_entry(self) -> EngineResult<AuditEntry> {
        let action = serde_json::from_value(serde_json::Value::String(self.action))?;
        Ok(AuditEntry {
            id: AuditEntryId::new(self.id),
            action,
            student_id: StudentId::new(self.student_id),
            service_id: self.service_id.map(ServiceId::new),
            request_id: self.request_id.map(RequestId::new),
            grant_id: self.grant_id.map(GrantId::new),
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            metadata: serde_json::from_str(&self.metadata)?,
            timestamp: ns_to_ts(self.timestamp_ns),
        })
    }
}

fn insert_grant_tx(tx: &rusqlite::Transaction<'_>, grant: &ConsentGrant) -> EngineResult<()> {
    tx.execute(
        "INSERT INTO grants (id, student_id, service_id, request_id, approved_fields, \
         issued_at_ns, expires_at_ns, state, state_label) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            grant.id.as_str(),
            grant.student_id.as_str(),
            grant.service_id.as_str(),
            grant.request_id.as_str(),
            serde_json::to_string(&grant.approved_fields)?,
            ts_to_ns(grant.issued_at),
            ts_to_ns(grant.expires_at),
            serde_json::to_string(&grant.state)?,
            grant.state.label(),
        ],
    )
    .map_err(storage_err)?;
    Ok(())
}

fn update_grant_state_tx(
    tx: &rusqlite::Transaction<'_>,
    id: &GrantId,
    state: &GrantState,
) -> EngineResult<usize> {
    tx.execute(
        "UPDATE grants SET state = ?2, state_label = ?3 WHERE id = ?1",
        params![
            id.as_str(),
            serde_json::to_string(state)?,
            state.label()
        ],
    )
    .map_err(storage_err)
}

// ---------------------------------------------------------------------------
// Store trait implementations
// ---------------------------------------------------------------------------

impl ServiceStore for SqliteStore {
    fn insert(&self, service: &Service) -> EngineResult<()> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let result = conn.execute(
            "INSERT INTO services (id, name, description, risk_category, active, created_at_ns) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                service.id.as_str(),
                service.name,
                service.description,
                service.risk_category.to_string(),
                service.active as i64,
                ts_to_ns(service.created_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(EngineError::Conflict(format!(
                    "service already registered: {}",
                    service.id
                )))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    fn get(&self, id: &ServiceId) -> EngineResult<Option<Service>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let raw = conn
            .query_row(
                "SELECT id, name, description, risk_category, active, created_at_ns \
                 FROM services WHERE id = ?1",
                params![id.as_str()],
                row_to_service,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(finish_service).transpose()
    }

    fn list(&self) -> EngineResult<Vec<Service>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, risk_category, active, created_at_ns \
                 FROM services ORDER BY name",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map([], row_to_service)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        rows.into_iter().map(finish_service).collect()
    }

    fn set_active(&self, id: &ServiceId, active: bool) -> EngineResult<bool> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let rows = conn
            .execute(
                "UPDATE services SET active = ?2 WHERE id = ?1",
                params![id.as_str(), active as i64],
            )
            .map_err(storage_err)?;
        Ok(rows > 0)
    }
}

impl RequestStore for SqliteStore {
    fn insert(&self, request: &ConsentRequest) -> EngineResult<()> {
        let conn = self.conn.lock().map_err(lock_err)?;
        conn.execute(
            "INSERT INTO requests (id, student_id, service_id, requested_fields, purpose, \
             requested_duration_days, risk_score, status, status_label, created_at_ns) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                request.id.as_str(),
                request.student_id.as_str(),
                request.service_id.as_str(),
                serde_json::to_string(&request.requested_fields)?,
                request.purpose,
                request.requested_duration_days,
                request.risk_score,
                serde_json::to_string(&request.status)?,
                request.status.label(),
                ts_to_ns(request.created_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn get(&self, id: &RequestId) -> EngineResult<Option<ConsentRequest>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM requests WHERE id = ?1", REQUEST_COLUMNS),
                params![id.as_str()],
                row_to_raw_request,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawRequest::into_request).transpose()
    }

    fn update_status(&self, id: &RequestId, status: &RequestStatus) -> EngineResult<bool> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let rows = conn
            .execute(
                "UPDATE requests SET status = ?2, status_label = ?3 WHERE id = ?1",
                params![
                    id.as_str(),
                    serde_json::to_string(status)?,
                    status.label()
                ],
            )
            .map_err(storage_err)?;
        Ok(rows > 0)
    }

    fn list_pending(&self, student: &StudentId) -> EngineResult<Vec<ConsentRequest>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM requests \
                 WHERE student_id = ?1 AND status_label = 'PENDING' \
                 ORDER BY created_at_ns DESC",
                REQUEST_COLUMNS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![student.as_str()], row_to_raw_request)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        rows.into_iter().map(RawRequest::into_request).collect()
    }

    fn list_history(
        &self,
        student: &StudentId,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> EngineResult<(Vec<ConsentRequest>, u64)> {
        let mut clauses = vec!["student_id = ?".to_string()];
        let mut bind: Vec<rusqlite::types::Value> = vec![student.as_str().to_owned().into()];

        if let Some(status) = &filter.status {
            clauses.push("status_label = ?".to_string());
            bind.push(status.to_ascii_uppercase().into());
        }
        if let Some(service) = &filter.service_id {
            clauses.push("service_id = ?".to_string());
            bind.push(service.as_str().to_owned().into());
        }
        if let Some(from) = filter.from {
            clauses.push("created_at_ns >= ?".to_string());
            bind.push(ts_to_ns(from).into());
        }
        if let Some(until) = filter.until {
            clauses.push("created_at_ns <= ?".to_string());
            bind.push(ts_to_ns(until).into());
        }
        let where_clause = clauses.join(" AND ");

        let conn = self.conn.lock().map_err(lock_err)?;

        let total: u64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM requests WHERE {}", where_clause),
                rusqlite::params_from_iter(bind.iter()),
                |row| row.get::<_, i64>(0),
            )
            .map_err(storage_err)? as u64;

        bind.push((page.limit as i64).into());
        bind.push((page.offset() as i64).into());
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM requests WHERE {} \
                 ORDER BY created_at_ns DESC LIMIT ? OFFSET ?",
                REQUEST_COLUMNS, where_clause
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind.iter()), row_to_raw_request)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        let items = rows
            .into_iter()
            .map(RawRequest::into_request)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok((items, total))
    }
}

impl GrantStore for SqliteStore {
    fn issue_superseding(
        &self,
        grant: &ConsentGrant,
        now: Timestamp,
    ) -> EngineResult<Option<ConsentGrant>> {
        let mut conn = self.conn.lock().map_err(lock_err)?;
        let tx = conn.transaction().map_err(storage_err)?;

        let prior = tx
            .query_row(
                &format!(
                    "SELECT {} FROM grants \
                     WHERE student_id = ?1 AND service_id = ?2 AND state_label = 'ACTIVE' \
                     ORDER BY issued_at_ns DESC LIMIT 1",
                    GRANT_COLUMNS
                ),
                params![grant.student_id.as_str(), grant.service_id.as_str()],
                row_to_raw_grant,
            )
            .optional()
            .map_err(storage_err)?
            .map(RawGrant::into_grant)
            .transpose()?;

        let superseded = match prior {
            Some(mut prior) => {
                let state = GrantState::Superseded { at: now };
                update_grant_state_tx(&tx, &prior.id, &state)?;
                prior.state = state;
                Some(prior)
            }
            None => None,
        };

        insert_grant_tx(&tx, grant)?;
        tx.commit().map_err(storage_err)?;
        Ok(superseded)
    }

    fn get(&self, id: &GrantId) -> EngineResult<Option<ConsentGrant>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM grants WHERE id = ?1", GRANT_COLUMNS),
                params![id.as_str()],
                row_to_raw_grant,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawGrant::into_grant).transpose()
    }

    fn update_state(&self, id: &GrantId, state: &GrantState) -> EngineResult<bool> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let rows = conn
            .execute(
                "UPDATE grants SET state = ?2, state_label = ?3 WHERE id = ?1",
                params![
                    id.as_str(),
                    serde_json::to_string(state)?,
                    state.label()
                ],
            )
            .map_err(storage_err)?;
        Ok(rows > 0)
    }

    fn find_active(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Option<ConsentGrant>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM grants \
                     WHERE student_id = ?1 AND service_id = ?2 \
                       AND state_label != 'SUPERSEDED' \
                     ORDER BY issued_at_ns DESC LIMIT 1",
                    GRANT_COLUMNS
                ),
                params![student.as_str(), service.as_str()],
                row_to_raw_grant,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawGrant::into_grant).transpose()
    }

    fn list_active_by_student(&self, student: &StudentId) -> EngineResult<Vec<ConsentGrant>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM grants \
                 WHERE student_id = ?1 AND state_label = 'ACTIVE' \
                 ORDER BY issued_at_ns DESC",
                GRANT_COLUMNS
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![student.as_str()], row_to_raw_grant)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        rows.into_iter().map(RawGrant::into_grant).collect()
    }

    fn count_active_by_student(&self, student: &StudentId) -> EngineResult<u64> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM grants \
                 WHERE student_id = ?1 AND state_label = 'ACTIVE'",
                params![student.as_str()],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    fn sweep_expired(&self, now: Timestamp) -> EngineResult<Vec<ConsentGrant>> {
        let mut conn = self.conn.lock().map_err(lock_err)?;
        let tx = conn.transaction().map_err(storage_err)?;

        let due = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM grants \
                     WHERE state_label = 'ACTIVE' AND expires_at_ns <= ?1",
                    GRANT_COLUMNS
                ))
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![ts_to_ns(now)], row_to_raw_grant)
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;
            rows
        };

        let mut flipped = Vec::with_capacity(due.len());
        for raw in due {
            let mut grant = raw.into_grant()?;
            let state = GrantState::Expired { noted_at: now };
            update_grant_state_tx(&tx, &grant.id, &state)?;
            grant.state = state;
            flipped.push(grant);
        }

        tx.commit().map_err(storage_err)?;
        Ok(flipped)
    }
}

impl AuditStore for SqliteStore {
    fn append_batch(&self, entries: &[AuditEntry]) -> EngineResult<()> {
        let mut conn = self.conn.lock().map_err(lock_err)?;
        let tx = conn.transaction().map_err(storage_err)?;
        for entry in entries {
            tx.execute(
                "INSERT INTO audit_log (id, action, student_id, service_id, request_id, \
                 grant_id, ip_address, user_agent, metadata, timestamp_ns) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.id.as_str(),
                    entry.action.to_string(),
                    entry.student_id.as_str(),
                    entry.service_id.as_ref().map(|s| s.as_str()),
                    entry.request_id.as_ref().map(|r| r.as_str()),
                    entry.grant_id.as_ref().map(|g| g.as_str()),
                    entry.ip_address,
                    entry.user_agent,
                    serde_json::to_string(&entry.metadata)?,
                    ts_to_ns(entry.timestamp),
                ],
            )
            .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    fn list_by_student(&self, student: &StudentId, limit: u32) -> EngineResult<Vec<AuditEntry>> {
        let conn = self.conn.lock().map_err(lock_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, action, student_id, service_id, request_id, grant_id, \
                 ip_address, user_agent, metadata, timestamp_ns \
                 FROM audit_log WHERE student_id = ?1 \
                 ORDER BY timestamp_ns DESC LIMIT ?2",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![student.as_str(), limit], row_to_raw_audit)
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?;
        rows.into_iter().map(RawAuditEntry::into_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consentry_core::{AuditAction, RiskCategory};

    fn test_store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn make_service(id: &str) -> Service {
        Service {
            id: ServiceId::new(id),
            name: format!("Service {}", id),
            description: Some("test service".into()),
            risk_category: RiskCategory::Medium,
            active: true,
            created_at: Timestamp::from_seconds(100),
        }
    }

    fn make_request(id: &str, student: &str, status: RequestStatus) -> ConsentRequest {
        ConsentRequest {
            id: RequestId::new(id),
            student_id: StudentId::new(student),
            service_id: ServiceId::new("svc-1"),
            requested_fields: ["email".to_string(), "gpa".to_string()].into_iter().collect(),
            purpose: "testing".into(),
            requested_duration_days: 30,
            risk_score: 42,
            status,
            created_at: Timestamp::from_seconds(100),
        }
    }

    fn make_grant(id: &str, student: &str, service: &str, issued: u64) -> ConsentGrant {
        ConsentGrant {
            id: GrantId::new(id),
            student_id: StudentId::new(student),
            service_id: ServiceId::new(service),
            request_id: RequestId::new("r-1"),
            approved_fields: ["email".to_string()].into_iter().collect(),
            issued_at: Timestamp::from_seconds(issued),
            expires_at: Timestamp::from_seconds(issued).plus_days(30),
            state: GrantState::Active,
        }
    }

    fn make_audit(id: &str, student: &str, secs: u64) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(id),
            action: AuditAction::RequestCreated,
            student_id: StudentId::new(student),
            service_id: Some(ServiceId::new("svc-1")),
            request_id: None,
            grant_id: None,
            ip_address: Some("10.0.0.1".into()),
            user_agent: None,
            metadata: serde_json::json!({ "k": "v" }),
            timestamp: Timestamp::from_seconds(secs),
        }
    }

    #[test]
    fn test_service_roundtrip_and_duplicate() {
        let store = test_store();
        let service = make_service("svc-1");
        ServiceStore::insert(&store, &service).unwrap();

        let loaded = ServiceStore::get(&store, &service.id).unwrap().unwrap();
        assert_eq!(loaded.name, service.name);
        assert_eq!(loaded.risk_category, RiskCategory::Medium);
        assert!(loaded.active);
        assert_eq!(loaded.created_at, service.created_at);

        let err = ServiceStore::insert(&store, &service).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn test_service_set_active() {
        let store = test_store();
        ServiceStore::insert(&store, &make_service("svc-1")).unwrap();
        assert!(store.set_active(&ServiceId::new("svc-1"), false).unwrap());
        assert!(!ServiceStore::get(&store, &ServiceId::new("svc-1")).unwrap().unwrap().active);
        assert!(!store.set_active(&ServiceId::new("missing"), false).unwrap());
    }

    #[test]
    fn test_request_roundtrip_and_status_update() {
        let store = test_store();
        let request = make_request("r-1", "s-1", RequestStatus::Pending);
        RequestStore::insert(&store, &request).unwrap();

        let loaded = RequestStore::get(&store, &request.id).unwrap().unwrap();
        assert_eq!(loaded.requested_fields, request.requested_fields);
        assert_eq!(loaded.risk_score, 42);
        assert!(loaded.status.is_pending());

        let status = RequestStatus::Approved {
            approved_duration_days: 30,
            responded_at: Timestamp::from_seconds(200),
        };
        assert!(store.update_status(&request.id, &status).unwrap());
        let loaded = RequestStore::get(&store, &request.id).unwrap().unwrap();
        assert_eq!(loaded.status, status);

        assert!(!store
            .update_status(&RequestId::new("missing"), &RequestStatus::Pending)
            .unwrap());
    }

    #[test]
    fn test_list_pending_excludes_answered() {
        let store = test_store();
        RequestStore::insert(&store, &make_request("r-1", "s-1", RequestStatus::Pending)).unwrap();
        RequestStore::insert(
            &store,
            &make_request(
                "r-2",
                "s-1",
                RequestStatus::Denied {
                    denied_fields: vec!["email".into()],
                    responded_at: Timestamp::from_seconds(150),
                },
            ),
        )
        .unwrap();

        let pending = store.list_pending(&StudentId::new("s-1")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, RequestId::new("r-1"));
    }

    #[test]
    fn test_list_history_filters_and_pagination() {
        let store = test_store();
        for i in 0..5 {
            let mut request = make_request(&format!("r-{}", i), "s-1", RequestStatus::Pending);
            request.created_at = Timestamp::from_seconds(100 + i);
            RequestStore::insert(&store, &request).unwrap();
        }

        let (items, total) = store
            .list_history(
                &StudentId::new("s-1"),
                &HistoryFilter::default(),
                &PageRequest::new(1, 2),
            )
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(items.len(), 2);
        // Newest first.
        assert_eq!(items[0].id, RequestId::new("r-4"));

        let (items, total) = store
            .list_history(
                &StudentId::new("s-1"),
                &HistoryFilter {
                    status: Some("approved".into()),
                    ..Default::default()
                },
                &PageRequest::default(),
            )
            .unwrap();
        assert_eq!(total, 0);
        assert!(items.is_empty());

        let (items, _) = store
            .list_history(
                &StudentId::new("s-1"),
                &HistoryFilter {
                    from: Some(Timestamp::from_seconds(103)),
                    ..Default::default()
                },
                &PageRequest::default(),
            )
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_issue_superseding_flips_prior() {
        let store = test_store();
        let first = make_grant("g-1", "s-1", "svc-1", 100);
        assert!(store
            .issue_superseding(&first, Timestamp::from_seconds(100))
            .unwrap()
            .is_none());

        let second = make_grant("g-2", "s-1", "svc-1", 200);
        let superseded = store
            .issue_superseding(&second, Timestamp::from_seconds(200))
            .unwrap()
            .unwrap();
        assert_eq!(superseded.id, first.id);
        assert!(matches!(superseded.state, GrantState::Superseded { .. }));

        let stored = GrantStore::get(&store, &first.id).unwrap().unwrap();
        assert!(matches!(stored.state, GrantState::Superseded { .. }));
        assert_eq!(store.count_active_by_student(&StudentId::new("s-1")).unwrap(), 1);
    }

    #[test]
    fn test_find_active_returns_latest_non_superseded() {
        let store = test_store();
        store
            .issue_superseding(&make_grant("g-1", "s-1", "svc-1", 100), Timestamp::from_seconds(100))
            .unwrap();

        let found = store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, GrantId::new("g-1"));

        // Sweep flips it to Expired; find_active still returns it so the
        // guard can report expiry rather than absence.
        let sweep_at = Timestamp::from_seconds(100).plus_days(31);
        let flipped = store.sweep_expired(sweep_at).unwrap();
        assert_eq!(flipped.len(), 1);

        let found = store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .unwrap();
        assert!(matches!(found.state, GrantState::Expired { .. }));

        // A revoked grant is still returned so the guard can report
        // revocation; only superseded grants are invisible.
        store
            .update_state(
                &GrantId::new("g-1"),
                &GrantState::Revoked {
                    at: sweep_at,
                    reason: None,
                },
            )
            .unwrap();
        let found = store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .unwrap();
        assert!(found.state.is_revoked());

        store
            .update_state(&GrantId::new("g-1"), &GrantState::Superseded { at: sweep_at })
            .unwrap();
        assert!(store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sweep_expired_is_idempotent() {
        let store = test_store();
        store
            .issue_superseding(&make_grant("g-1", "s-1", "svc-1", 100), Timestamp::from_seconds(100))
            .unwrap();
        store
            .issue_superseding(&make_grant("g-2", "s-1", "svc-2", 100), Timestamp::from_seconds(100))
            .unwrap();

        let sweep_at = Timestamp::from_seconds(100).plus_days(31);
        assert_eq!(store.sweep_expired(sweep_at).unwrap().len(), 2);
        assert!(store.sweep_expired(sweep_at).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_boundary_inclusive() {
        let store = test_store();
        let grant = make_grant("g-1", "s-1", "svc-1", 100);
        let expires = grant.expires_at;
        store.issue_superseding(&grant, grant.issued_at).unwrap();

        // expires_at == now is swept; one nanosecond earlier is not. The
        // fixture expiry is on a whole second, so the preceding nanosecond
        // sits at the end of the prior second.
        assert!(store
            .sweep_expired(Timestamp {
                seconds_since_epoch: expires.seconds_since_epoch - 1,
                nanoseconds: 999_999_999,
            })
            .unwrap()
            .is_empty());
        assert_eq!(store.sweep_expired(expires).unwrap().len(), 1);
    }

    #[test]
    fn test_audit_append_and_list() {
        let store = test_store();
        store
            .append_batch(&[
                make_audit("a-1", "s-1", 100),
                make_audit("a-2", "s-1", 200),
                make_audit("a-3", "s-2", 150),
            ])
            .unwrap();

        let entries = store.list_by_student(&StudentId::new("s-1"), 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, AuditEntryId::new("a-2"));
        assert_eq!(entries[0].action, AuditAction::RequestCreated);
        assert_eq!(entries[0].metadata["k"], "v");
        assert_eq!(entries[0].ip_address.as_deref(), Some("10.0.0.1"));

        let limited = store.list_by_student(&StudentId::new("s-1"), 1).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
