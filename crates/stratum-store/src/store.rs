//! The SQLite store

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use sha2::{Digest as _, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use stratum_core::{
    Distribution, EnrichmentRecord, Fingerprint, IndexRecord, MatchConstraint, Package,
    PackageKind, Repository, Severity, UpdateDiff, UpdateKind, UpdateOperation, Vulnerability,
};

use crate::{Result, StoreError};

/// Update operations deleted per GC transaction
const GC_CHUNK: usize = 50;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS update_operation (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ref         TEXT NOT NULL UNIQUE,
    updater     TEXT NOT NULL,
    fingerprint TEXT NOT NULL DEFAULT '',
    kind        TEXT NOT NULL,
    date        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS uo_updater_idx ON update_operation (updater, kind);

CREATE TABLE IF NOT EXISTS vuln (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    hash                   TEXT NOT NULL UNIQUE,
    updater                TEXT NOT NULL,
    name                   TEXT NOT NULL,
    description            TEXT NOT NULL DEFAULT '',
    issued                 TEXT,
    links                  TEXT NOT NULL DEFAULT '',
    severity               TEXT NOT NULL DEFAULT '',
    normalized_severity    TEXT NOT NULL DEFAULT 'Unknown',
    package_name           TEXT NOT NULL DEFAULT '',
    package_version        TEXT NOT NULL DEFAULT '',
    package_module         TEXT NOT NULL DEFAULT '',
    package_arch           TEXT NOT NULL DEFAULT '',
    package_kind           TEXT NOT NULL DEFAULT '',
    dist_id                TEXT NOT NULL DEFAULT '',
    dist_name              TEXT NOT NULL DEFAULT '',
    dist_version           TEXT NOT NULL DEFAULT '',
    dist_version_code_name TEXT NOT NULL DEFAULT '',
    dist_version_id        TEXT NOT NULL DEFAULT '',
    dist_arch              TEXT NOT NULL DEFAULT '',
    dist_cpe               TEXT NOT NULL DEFAULT '',
    dist_pretty_name       TEXT NOT NULL DEFAULT '',
    repo_name              TEXT NOT NULL DEFAULT '',
    repo_key               TEXT NOT NULL DEFAULT '',
    repo_uri               TEXT NOT NULL DEFAULT '',
    fixed_in_version       TEXT NOT NULL DEFAULT '',
    arch_operation         TEXT NOT NULL DEFAULT 'ignore'
);
CREATE INDEX IF NOT EXISTS vuln_lookup_idx ON vuln (package_name, package_kind);
CREATE INDEX IF NOT EXISTS vuln_dist_idx ON vuln (dist_version_id, dist_version_code_name, dist_id);
CREATE INDEX IF NOT EXISTS vuln_repo_idx ON vuln (repo_name);

CREATE TABLE IF NOT EXISTS uo_vuln (
    uo   INTEGER NOT NULL REFERENCES update_operation (id) ON DELETE CASCADE,
    vuln INTEGER NOT NULL REFERENCES vuln (id),
    PRIMARY KEY (uo, vuln)
);

CREATE TABLE IF NOT EXISTS enrichment (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    hash    TEXT NOT NULL UNIQUE,
    updater TEXT NOT NULL,
    tags    TEXT NOT NULL DEFAULT '[]',
    data    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS uo_enrich (
    uo     INTEGER NOT NULL REFERENCES update_operation (id) ON DELETE CASCADE,
    enrich INTEGER NOT NULL REFERENCES enrichment (id),
    PRIMARY KEY (uo, enrich)
);

CREATE TABLE IF NOT EXISTS enrichment_tag (
    enrich INTEGER NOT NULL REFERENCES enrichment (id) ON DELETE CASCADE,
    tag    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS enrichment_tag_idx ON enrichment_tag (tag);

CREATE TABLE IF NOT EXISTS updater_status (
    updater_name             TEXT PRIMARY KEY,
    last_attempt             TEXT,
    last_success             TEXT,
    last_run_succeeded       INTEGER NOT NULL DEFAULT 0,
    last_attempt_fingerprint TEXT,
    last_error               TEXT
);
";

const VULN_COLS: &str = "v.id, v.updater, v.name, v.description, v.issued, v.links, \
    v.severity, v.normalized_severity, v.package_name, v.package_version, \
    v.package_module, v.package_arch, v.package_kind, v.dist_id, v.dist_name, \
    v.dist_version, v.dist_version_code_name, v.dist_version_id, v.dist_arch, \
    v.dist_cpe, v.dist_pretty_name, v.repo_name, v.repo_key, v.repo_uri, \
    v.fixed_in_version, v.arch_operation";

/// Bookkeeping row for one updater
#[derive(Debug, Clone, PartialEq)]
pub struct UpdaterStatus {
    pub updater_name: String,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_run_succeeded: bool,
    pub fingerprint: Option<Fingerprint>,
    pub last_error: Option<String>,
}

/// SQLite-backed vulnerability store
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and if needed create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection poisoned")
    }

    // ---- update operations ------------------------------------------------

    /// Append one vulnerability update operation in a single transaction
    ///
    /// Vulnerability rows are deduplicated by content hash, so a record
    /// shared between operations is stored once.
    pub fn update_vulnerabilities(
        &self,
        updater: &str,
        fingerprint: &Fingerprint,
        vulns: &[Vulnerability],
    ) -> Result<Uuid> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let reference = Uuid::new_v4();
        tx.execute(
            "INSERT INTO update_operation (ref, updater, fingerprint, kind, date) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reference.to_string(),
                updater,
                fingerprint.as_str(),
                UpdateKind::Vulnerability.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let uo = tx.last_insert_rowid();
        {
            let mut insert = tx.prepare(
                "INSERT INTO vuln (hash, updater, name, description, issued, links, severity, \
                 normalized_severity, package_name, package_version, package_module, \
                 package_arch, package_kind, dist_id, dist_name, dist_version, \
                 dist_version_code_name, dist_version_id, dist_arch, dist_cpe, \
                 dist_pretty_name, repo_name, repo_key, repo_uri, fixed_in_version, \
                 arch_operation) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,\
                 ?20,?21,?22,?23,?24,?25,?26) \
                 ON CONFLICT (hash) DO NOTHING",
            )?;
            let mut lookup = tx.prepare("SELECT id FROM vuln WHERE hash = ?1")?;
            let mut assoc =
                tx.prepare("INSERT OR IGNORE INTO uo_vuln (uo, vuln) VALUES (?1, ?2)")?;
            for v in vulns {
                let pkg = v.package.as_ref();
                let dist = v.dist.as_ref();
                let repo = v.repo.as_ref();
                insert.execute(params![
                    v.content_hash(),
                    v.updater,
                    v.name,
                    v.description,
                    v.issued.map(|t| t.to_rfc3339()),
                    v.links,
                    v.severity,
                    v.normalized_severity.as_str(),
                    pkg.map(|p| p.name.as_str()).unwrap_or(""),
                    pkg.map(|p| p.version.as_str()).unwrap_or(""),
                    pkg.and_then(|p| p.module.as_deref()).unwrap_or(""),
                    pkg.map(|p| p.arch.as_str()).unwrap_or(""),
                    pkg.map(|p| p.kind.as_str()).unwrap_or(""),
                    dist.map(|d| d.did.as_str()).unwrap_or(""),
                    dist.map(|d| d.name.as_str()).unwrap_or(""),
                    dist.map(|d| d.version.as_str()).unwrap_or(""),
                    dist.map(|d| d.version_code_name.as_str()).unwrap_or(""),
                    dist.map(|d| d.version_id.as_str()).unwrap_or(""),
                    dist.map(|d| d.arch.as_str()).unwrap_or(""),
                    dist.and_then(|d| d.cpe.as_deref()).unwrap_or(""),
                    dist.map(|d| d.pretty_name.as_str()).unwrap_or(""),
                    repo.map(|r| r.name.as_str()).unwrap_or(""),
                    repo.map(|r| r.key.as_str()).unwrap_or(""),
                    repo.map(|r| r.uri.as_str()).unwrap_or(""),
                    v.fixed_in_version,
                    arch_op_str(v.arch_operation),
                ])?;
                let id: i64 = lookup.query_row([v.content_hash()], |r| r.get(0))?;
                assoc.execute(params![uo, id])?;
            }
        }
        tx.commit()?;
        info!(updater, vulns = vulns.len(), %reference, "update operation recorded");
        Ok(reference)
    }

    /// Append one enrichment update operation
    pub fn update_enrichments(
        &self,
        updater: &str,
        fingerprint: &Fingerprint,
        records: &[EnrichmentRecord],
    ) -> Result<Uuid> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let reference = Uuid::new_v4();
        tx.execute(
            "INSERT INTO update_operation (ref, updater, fingerprint, kind, date) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reference.to_string(),
                updater,
                fingerprint.as_str(),
                UpdateKind::Enrichment.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let uo = tx.last_insert_rowid();
        {
            let mut insert = tx.prepare(
                "INSERT INTO enrichment (hash, updater, tags, data) VALUES (?1,?2,?3,?4) \
                 ON CONFLICT (hash) DO NOTHING",
            )?;
            let mut lookup = tx.prepare("SELECT id FROM enrichment WHERE hash = ?1")?;
            let mut assoc =
                tx.prepare("INSERT OR IGNORE INTO uo_enrich (uo, enrich) VALUES (?1, ?2)")?;
            let mut tag = tx.prepare(
                "INSERT INTO enrichment_tag (enrich, tag) \
                 SELECT ?1, ?2 WHERE NOT EXISTS \
                 (SELECT 1 FROM enrichment_tag WHERE enrich = ?1 AND tag = ?2)",
            )?;
            for rec in records {
                let data = rec.enrichment.to_string();
                let tags = serde_json::to_string(&rec.tags)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                let mut h = Sha256::new();
                h.update(updater.as_bytes());
                h.update(tags.as_bytes());
                h.update(data.as_bytes());
                let hash = hex::encode(h.finalize());
                insert.execute(params![hash, updater, tags, data])?;
                let id: i64 = lookup.query_row([&hash], |r| r.get(0))?;
                assoc.execute(params![uo, id])?;
                for t in &rec.tags {
                    tag.execute(params![id, t])?;
                }
            }
        }
        tx.commit()?;
        info!(updater, records = records.len(), %reference, "enrichment operation recorded");
        Ok(reference)
    }

    /// All update operations of a kind, newest first, grouped by updater
    pub fn get_update_operations(
        &self,
        kind: UpdateKind,
    ) -> Result<BTreeMap<String, Vec<UpdateOperation>>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ref, updater, fingerprint, kind, date FROM update_operation \
             WHERE kind = ?1 ORDER BY updater, id DESC",
        )?;
        let mut out: BTreeMap<String, Vec<UpdateOperation>> = BTreeMap::new();
        let rows = stmt.query_map([kind.as_str()], row_to_op)?;
        for row in rows {
            let op = row?.map_err(StoreError::Corrupt)?;
            out.entry(op.updater.clone()).or_default().push(op);
        }
        Ok(out)
    }

    /// The latest operation per updater: the live snapshot
    pub fn latest_update_operations(
        &self,
        kind: UpdateKind,
    ) -> Result<BTreeMap<String, UpdateOperation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT u.ref, u.updater, u.fingerprint, u.kind, u.date FROM update_operation u \
             JOIN (SELECT updater, MAX(id) AS mid FROM update_operation WHERE kind = ?1 \
                   GROUP BY updater) latest ON u.id = latest.mid",
        )?;
        let mut out = BTreeMap::new();
        let rows = stmt.query_map([kind.as_str()], row_to_op)?;
        for row in rows {
            let op = row?.map_err(StoreError::Corrupt)?;
            out.insert(op.updater.clone(), op);
        }
        Ok(out)
    }

    fn op_row_id(&self, reference: Uuid) -> Result<(i64, UpdateOperation)> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, ref, updater, fingerprint, kind, date FROM update_operation \
             WHERE ref = ?1",
            [reference.to_string()],
            |r| {
                let id: i64 = r.get(0)?;
                let op = op_from_parts(
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                );
                Ok((id, op))
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound(reference))
        .and_then(|(id, op)| Ok((id, op.map_err(StoreError::Corrupt)?)))
    }

    /// Set difference between two operations of one updater
    ///
    /// A missing `prev` diffs against the empty set.
    pub fn get_update_diff(&self, prev: Option<Uuid>, cur: Uuid) -> Result<UpdateDiff> {
        let (cur_id, cur_op) = self.op_row_id(cur)?;
        let prev_resolved = match prev {
            Some(p) => Some(self.op_row_id(p)?),
            None => None,
        };
        let prev_id = prev_resolved.as_ref().map(|(id, _)| *id);

        let conn = self.conn();
        let mut added_stmt = conn.prepare(&format!(
            "SELECT {} FROM vuln v JOIN uo_vuln uv ON uv.vuln = v.id \
             WHERE uv.uo = ?1 AND (?2 IS NULL OR v.id NOT IN \
             (SELECT vuln FROM uo_vuln WHERE uo = ?2))",
            VULN_COLS
        ))?;
        let added = added_stmt
            .query_map(params![cur_id, prev_id], row_to_vuln)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let removed = match prev_id {
            None => Vec::new(),
            Some(pid) => {
                let mut removed_stmt = conn.prepare(&format!(
                    "SELECT {} FROM vuln v JOIN uo_vuln uv ON uv.vuln = v.id \
                     WHERE uv.uo = ?1 AND v.id NOT IN \
                     (SELECT vuln FROM uo_vuln WHERE uo = ?2)",
                    VULN_COLS
                ))?;
                let removed_rows = removed_stmt
                    .query_map(params![pid, cur_id], row_to_vuln)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                removed_rows
            }
        };

        Ok(UpdateDiff {
            prev: prev_resolved.map(|(_, op)| op),
            cur: cur_op,
            added,
            removed,
        })
    }

    /// Delete operations by reference; cascades the association rows and
    /// sweeps orphaned vulnerability and enrichment rows
    pub fn delete_update_operations(&self, refs: &[Uuid]) -> Result<usize> {
        if refs.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM update_operation WHERE ref = ?1")?;
            for r in refs {
                deleted += stmt.execute([r.to_string()])?;
            }
        }
        tx.execute("DELETE FROM vuln WHERE id NOT IN (SELECT vuln FROM uo_vuln)", [])?;
        tx.execute(
            "DELETE FROM enrichment WHERE id NOT IN (SELECT enrich FROM uo_enrich)",
            [],
        )?;
        tx.commit()?;
        debug!(deleted, "update operations deleted");
        Ok(deleted)
    }

    /// One bounded GC pass
    ///
    /// Deletes up to a chunk of operations that have at least `retention`
    /// newer siblings for the same updater. Returns (deleted, remaining).
    pub fn gc(&self, retention: usize) -> Result<(usize, usize)> {
        let candidates: Vec<Uuid> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT ref FROM update_operation o WHERE \
                 (SELECT COUNT(*) FROM update_operation n \
                  WHERE n.updater = o.updater AND n.kind = o.kind AND n.id > o.id) >= ?1 \
                 ORDER BY o.id ASC",
            )?;
            let refs = stmt
                .query_map([retention as i64], |r| r.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            refs.into_iter()
                .map(|s| {
                    s.parse()
                        .map_err(|_| StoreError::Corrupt(format!("bad operation ref {:?}", s)))
                })
                .collect::<Result<Vec<_>>>()?
        };
        let total = candidates.len();
        let chunk: Vec<Uuid> = candidates.into_iter().take(GC_CHUNK).collect();
        let deleted = self.delete_update_operations(&chunk)?;
        Ok((deleted, total - chunk.len()))
    }

    /// GC until no work remains; returns total operations deleted
    pub fn gc_full(&self, retention: usize) -> Result<usize> {
        let mut total = 0;
        loop {
            let (deleted, remaining) = self.gc(retention)?;
            total += deleted;
            if remaining == 0 {
                break;
            }
        }
        Ok(total)
    }

    // ---- matching ---------------------------------------------------------

    /// Bulk candidate lookup for the matching engine
    ///
    /// For each record, finds vulnerabilities in the live snapshot whose
    /// package name matches the record's binary or source package and whose
    /// columns named by `constraints` equal the record's fields. Keys of
    /// the result map are the records' package ids.
    pub fn get(
        &self,
        records: &[IndexRecord],
        constraints: &[MatchConstraint],
    ) -> Result<HashMap<String, Vec<Vulnerability>>> {
        let mut sql = format!(
            "SELECT {} FROM vuln v \
             JOIN uo_vuln uv ON uv.vuln = v.id \
             JOIN (SELECT updater, MAX(id) AS mid FROM update_operation \
                   WHERE kind = 'vulnerability' GROUP BY updater) latest \
               ON uv.uo = latest.mid \
             WHERE v.package_name IN (?1, ?2)",
            VULN_COLS
        );
        for (i, c) in constraints.iter().enumerate() {
            sql.push_str(&format!(" AND v.{} = ?{}", constraint_column(*c), i + 3));
        }
        sql.push_str(" GROUP BY v.id");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut out: HashMap<String, Vec<Vulnerability>> = HashMap::new();
        for record in records {
            let mut params_vec: Vec<String> = Vec::with_capacity(constraints.len() + 2);
            params_vec.push(record.package.name.clone());
            params_vec.push(
                record
                    .package
                    .source
                    .as_ref()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| record.package.name.clone()),
            );
            for c in constraints {
                params_vec.push(constraint_value(*c, record));
            }
            let vulns = stmt
                .query_map(params_from_iter(params_vec.iter()), row_to_vuln)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if !vulns.is_empty() {
                out.entry(record.package.id.clone()).or_default().extend(vulns);
            }
        }
        Ok(out)
    }

    // ---- enrichment -------------------------------------------------------

    /// Enrichment blobs from the updater's latest operation matching any tag
    pub fn get_enrichment(
        &self,
        updater: &str,
        tags: &[String],
    ) -> Result<Vec<serde_json::Value>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..tags.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT DISTINCT e.data FROM enrichment e \
             JOIN uo_enrich ue ON ue.enrich = e.id \
             JOIN (SELECT MAX(id) AS mid FROM update_operation \
                   WHERE updater = ?1 AND kind = 'enrichment') latest ON ue.uo = latest.mid \
             JOIN enrichment_tag t ON t.enrich = e.id \
             WHERE t.tag IN ({})",
            placeholders
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut params_vec: Vec<&str> = Vec::with_capacity(tags.len() + 1);
        params_vec.push(updater);
        params_vec.extend(tags.iter().map(|s| s.as_str()));
        let rows = stmt
            .query_map(params_from_iter(params_vec.iter()), |r| {
                r.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|s| {
                serde_json::from_str(&s).map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    // ---- updater status ---------------------------------------------------

    /// Fingerprint recorded by the updater's last successful run
    pub fn get_fingerprint(&self, updater: &str) -> Result<Option<Fingerprint>> {
        let conn = self.conn();
        let fp: Option<Option<String>> = conn
            .query_row(
                "SELECT last_attempt_fingerprint FROM updater_status WHERE updater_name = ?1",
                [updater],
                |r| r.get(0),
            )
            .optional()?;
        Ok(fp.flatten().map(Fingerprint::from))
    }

    /// Record a successful pass
    ///
    /// `fingerprint` is `None` for an unchanged (304) pass: the success
    /// timestamp advances but the stored fingerprint is left alone.
    pub fn record_success(&self, updater: &str, fingerprint: Option<&Fingerprint>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO updater_status \
             (updater_name, last_attempt, last_success, last_run_succeeded, \
              last_attempt_fingerprint, last_error) \
             VALUES (?1, ?2, ?2, 1, ?3, NULL) \
             ON CONFLICT (updater_name) DO UPDATE SET \
               last_attempt = excluded.last_attempt, \
               last_success = excluded.last_success, \
               last_run_succeeded = 1, \
               last_attempt_fingerprint = \
                 COALESCE(excluded.last_attempt_fingerprint, \
                          updater_status.last_attempt_fingerprint), \
               last_error = NULL",
            params![
                updater,
                Utc::now().to_rfc3339(),
                fingerprint.map(|f| f.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Record a failed attempt; the last success and fingerprint survive
    pub fn record_attempt(&self, updater: &str, error: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO updater_status \
             (updater_name, last_attempt, last_run_succeeded, last_error) \
             VALUES (?1, ?2, 0, ?3) \
             ON CONFLICT (updater_name) DO UPDATE SET \
               last_attempt = excluded.last_attempt, \
               last_run_succeeded = 0, \
               last_error = excluded.last_error",
            params![updater, Utc::now().to_rfc3339(), error],
        )?;
        Ok(())
    }

    /// Full status row for one updater
    pub fn updater_status(&self, updater: &str) -> Result<Option<UpdaterStatus>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT updater_name, last_attempt, last_success, last_run_succeeded, \
             last_attempt_fingerprint, last_error FROM updater_status \
             WHERE updater_name = ?1",
            [updater],
            |r| {
                Ok(UpdaterStatus {
                    updater_name: r.get(0)?,
                    last_attempt: parse_ts(r.get::<_, Option<String>>(1)?),
                    last_success: parse_ts(r.get::<_, Option<String>>(2)?),
                    last_run_succeeded: r.get::<_, i64>(3)? != 0,
                    fingerprint: r.get::<_, Option<String>>(4)?.map(Fingerprint::from),
                    last_error: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::Db)
    }
}

fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    })
}

fn arch_op_str(op: stratum_core::ArchOp) -> &'static str {
    use stratum_core::ArchOp::*;
    match op {
        Ignore => "ignore",
        Equals => "equals",
        NotEquals => "not_equals",
        PatternMatch => "pattern_match",
    }
}

fn arch_op_parse(s: &str) -> stratum_core::ArchOp {
    use stratum_core::ArchOp::*;
    match s {
        "equals" => Equals,
        "not_equals" => NotEquals,
        "pattern_match" => PatternMatch,
        _ => Ignore,
    }
}

fn constraint_column(c: MatchConstraint) -> &'static str {
    use MatchConstraint::*;
    match c {
        DistributionDID => "dist_id",
        DistributionName => "dist_name",
        DistributionVersion => "dist_version",
        DistributionVersionID => "dist_version_id",
        DistributionVersionCodeName => "dist_version_code_name",
        DistributionPrettyName => "dist_pretty_name",
        DistributionArch => "dist_arch",
        DistributionCPE => "dist_cpe",
        PackageModule => "package_module",
        RepositoryName => "repo_name",
    }
}

fn constraint_value(c: MatchConstraint, record: &IndexRecord) -> String {
    use MatchConstraint::*;
    let dist = record.distribution.as_ref();
    let repo = record.repository.as_ref();
    match c {
        DistributionDID => dist.map(|d| d.did.clone()),
        DistributionName => dist.map(|d| d.name.clone()),
        DistributionVersion => dist.map(|d| d.version.clone()),
        DistributionVersionID => dist.map(|d| d.version_id.clone()),
        DistributionVersionCodeName => dist.map(|d| d.version_code_name.clone()),
        DistributionPrettyName => dist.map(|d| d.pretty_name.clone()),
        DistributionArch => dist.map(|d| d.arch.clone()),
        DistributionCPE => dist.and_then(|d| d.cpe.clone()),
        PackageModule => record.package.module.clone(),
        RepositoryName => repo.map(|r| r.name.clone()),
    }
    .unwrap_or_default()
}

type OpParts = std::result::Result<UpdateOperation, String>;

fn op_from_parts(
    reference: String,
    updater: String,
    fingerprint: String,
    kind: String,
    date: String,
) -> OpParts {
    let reference: Uuid = reference
        .parse()
        .map_err(|_| format!("bad operation ref {:?}", reference))?;
    let kind = match kind.as_str() {
        "vulnerability" => UpdateKind::Vulnerability,
        "enrichment" => UpdateKind::Enrichment,
        other => return Err(format!("bad operation kind {:?}", other)),
    };
    let date = DateTime::parse_from_rfc3339(&date)
        .map_err(|_| format!("bad operation date {:?}", date))?
        .with_timezone(&Utc);
    Ok(UpdateOperation {
        reference,
        updater,
        fingerprint: Fingerprint::from(fingerprint),
        date,
        kind,
    })
}

fn row_to_op(row: &Row<'_>) -> rusqlite::Result<OpParts> {
    Ok(op_from_parts(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn row_to_vuln(row: &Row<'_>) -> rusqlite::Result<Vulnerability> {
    let package_name: String = row.get(8)?;
    let package = (!package_name.is_empty()).then(|| Package {
        name: package_name,
        version: row.get(9).unwrap_or_default(),
        module: row
            .get::<_, String>(10)
            .ok()
            .filter(|s| !s.is_empty()),
        arch: row.get(11).unwrap_or_default(),
        kind: match row.get::<_, String>(12).unwrap_or_default().as_str() {
            "source" => PackageKind::Source,
            _ => PackageKind::Binary,
        },
        ..Default::default()
    });

    let dist = {
        let did: String = row.get(13)?;
        let name: String = row.get(14)?;
        let version: String = row.get(15)?;
        let version_code_name: String = row.get(16)?;
        let version_id: String = row.get(17)?;
        let arch: String = row.get(18)?;
        let cpe: String = row.get(19)?;
        let pretty_name: String = row.get(20)?;
        let any = [
            &did,
            &name,
            &version,
            &version_code_name,
            &version_id,
            &arch,
            &cpe,
            &pretty_name,
        ]
        .iter()
        .any(|s| !s.is_empty());
        any.then(|| Distribution {
            did,
            name,
            version,
            version_code_name,
            version_id,
            arch,
            cpe: (!cpe.is_empty()).then(|| cpe.clone()),
            pretty_name,
        })
    };

    let repo = {
        let name: String = row.get(21)?;
        let key: String = row.get(22)?;
        let uri: String = row.get(23)?;
        (!name.is_empty() || !key.is_empty() || !uri.is_empty()).then(|| Repository {
            name,
            key,
            uri,
            cpe: None,
        })
    };

    Ok(Vulnerability {
        id: row.get::<_, i64>(0)?.to_string(),
        updater: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        issued: parse_ts(row.get(4)?),
        links: row.get(5)?,
        severity: row.get(6)?,
        normalized_severity: row
            .get::<_, String>(7)?
            .parse::<Severity>()
            .unwrap_or_default(),
        package,
        dist,
        repo,
        fixed_in_version: row.get(24)?,
        arch_operation: arch_op_parse(&row.get::<_, String>(25)?),
    })
}
