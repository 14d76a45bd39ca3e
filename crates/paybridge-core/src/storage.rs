//! [AMBIENT-STORAGE] (§1, §4.H): memory-first, Postgres-optional persistence
//! for the audit ledger. The in-memory `AppendOnlyLedger` is always
//! authoritative; Postgres, when configured, mirrors each entry before it
//! is committed in-memory and rehydrates the chain on startup.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::PayBridgeError;
use crate::ledger::{AppendOnlyLedger, AuditEntry};

/// Ledger persistence backend configuration (§3.1 `ServiceConfig`).
#[derive(Debug, Clone)]
pub enum LedgerStorageConfig {
    /// Keep all audit entries in process memory only.
    Memory,
    /// Persist all entries in PostgreSQL and hydrate ledger state on startup.
    Postgres { database_url: String, max_connections: u32 },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres { database_url: database_url.into(), max_connections }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for LedgerStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Clone)]
enum LedgerStorageBackend {
    Memory,
    Postgres(PostgresLedgerStore),
}

/// Runtime ledger wrapper that keeps an in-memory authoritative chain while
/// optionally mirroring each entry to PostgreSQL.
///
/// Invariant handling:
/// - Entry hash/index is computed against the in-memory chain first.
/// - Entry is persisted before it is committed in-memory.
/// - On startup, PostgreSQL entries are hydrated and hash-verified.
#[derive(Clone)]
pub struct PersistentLedger {
    ledger: AppendOnlyLedger,
    backend: LedgerStorageBackend,
}

impl PersistentLedger {
    pub fn from_entries(entries: Vec<AuditEntry>) -> Result<Self, PayBridgeError> {
        Ok(Self { ledger: AppendOnlyLedger::from_entries(entries)?, backend: LedgerStorageBackend::Memory })
    }

    pub async fn bootstrap(config: LedgerStorageConfig) -> Result<Self, PayBridgeError> {
        match config {
            LedgerStorageConfig::Memory => {
                Ok(Self { ledger: AppendOnlyLedger::new(), backend: LedgerStorageBackend::Memory })
            }
            LedgerStorageConfig::Postgres { database_url, max_connections } => {
                let store = PostgresLedgerStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let entries = store.load_entries().await?;
                let ledger = AppendOnlyLedger::from_entries(entries)?;
                Ok(Self { ledger, backend: LedgerStorageBackend::Postgres(store) })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            LedgerStorageBackend::Memory => "memory",
            LedgerStorageBackend::Postgres(_) => "postgres",
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        self.ledger.entries()
    }

    pub fn entries_for_correlation(&self, correlation_id: &str) -> Vec<&AuditEntry> {
        self.ledger.entries_for_correlation(correlation_id)
    }

    pub fn as_append_only(&self) -> &AppendOnlyLedger {
        &self.ledger
    }

    pub fn verify_chain(&self) -> bool {
        self.ledger.verify_chain()
    }

    /// Appends one audit entry (§3.1 `AuditEntry`), mirroring to Postgres
    /// before committing the in-memory chain when a backend is configured.
    pub async fn append(
        &mut self,
        correlation_id: &str,
        tenant_id: &str,
        message_id: &str,
        stage: &str,
        status: &str,
        detail: serde_json::Value,
    ) -> Result<AuditEntry, PayBridgeError> {
        let entry = self.ledger.build_entry(correlation_id, tenant_id, message_id, stage, status, detail);

        if let LedgerStorageBackend::Postgres(store) = &self.backend {
            store.insert_entry(&entry).await?;
        }

        self.ledger.commit_entry(entry.clone())?;
        Ok(entry)
    }
}

#[derive(Clone)]
struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PayBridgeError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| PayBridgeError::Internal(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), PayBridgeError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paybridge_audit_entries (
                ledger_index BIGINT PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE,
                correlation_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_timestamp TIMESTAMPTZ NOT NULL,
                detail JSONB NOT NULL,
                previous_hash TEXT NULL,
                entry_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PayBridgeError::Internal(format!("postgres schema create failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_paybridge_audit_correlation_id ON paybridge_audit_entries (correlation_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| PayBridgeError::Internal(format!("postgres index create failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_paybridge_audit_tenant_id ON paybridge_audit_entries (tenant_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| PayBridgeError::Internal(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<AuditEntry>, PayBridgeError> {
        let rows = sqlx::query(
            r#"
            SELECT
                ledger_index, entry_id, correlation_id, tenant_id, message_id,
                stage, status, entry_timestamp, detail, previous_hash, entry_hash
            FROM paybridge_audit_entries
            ORDER BY ledger_index ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PayBridgeError::Internal(format!("postgres load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row
                .try_get("ledger_index")
                .map_err(|e| PayBridgeError::Internal(format!("postgres decode ledger_index failed: {e}")))?;

            entries.push(AuditEntry {
                entry_id: row.try_get("entry_id").map_err(|e| PayBridgeError::Internal(format!("postgres decode entry_id failed: {e}")))?,
                index: index
                    .try_into()
                    .map_err(|_| PayBridgeError::Internal("negative ledger index in storage".to_string()))?,
                correlation_id: row
                    .try_get("correlation_id")
                    .map_err(|e| PayBridgeError::Internal(format!("postgres decode correlation_id failed: {e}")))?,
                tenant_id: row.try_get("tenant_id").map_err(|e| PayBridgeError::Internal(format!("postgres decode tenant_id failed: {e}")))?,
                message_id: row
                    .try_get("message_id")
                    .map_err(|e| PayBridgeError::Internal(format!("postgres decode message_id failed: {e}")))?,
                stage: row.try_get("stage").map_err(|e| PayBridgeError::Internal(format!("postgres decode stage failed: {e}")))?,
                status: row.try_get("status").map_err(|e| PayBridgeError::Internal(format!("postgres decode status failed: {e}")))?,
                timestamp: row
                    .try_get("entry_timestamp")
                    .map_err(|e| PayBridgeError::Internal(format!("postgres decode entry_timestamp failed: {e}")))?,
                detail: row.try_get("detail").map_err(|e| PayBridgeError::Internal(format!("postgres decode detail failed: {e}")))?,
                previous_hash: row
                    .try_get("previous_hash")
                    .map_err(|e| PayBridgeError::Internal(format!("postgres decode previous_hash failed: {e}")))?,
                entry_hash: row.try_get("entry_hash").map_err(|e| PayBridgeError::Internal(format!("postgres decode entry_hash failed: {e}")))?,
            });
        }

        Ok(entries)
    }

    async fn insert_entry(&self, entry: &AuditEntry) -> Result<(), PayBridgeError> {
        let index: i64 = entry
            .index
            .try_into()
            .map_err(|_| PayBridgeError::Internal("ledger index exceeds postgres BIGINT range".to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO paybridge_audit_entries (
                ledger_index, entry_id, correlation_id, tenant_id, message_id,
                stage, status, entry_timestamp, detail, previous_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(index)
        .bind(&entry.entry_id)
        .bind(&entry.correlation_id)
        .bind(&entry.tenant_id)
        .bind(&entry.message_id)
        .bind(&entry.stage)
        .bind(&entry.status)
        .bind(entry.timestamp)
        .bind(&entry.detail)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| PayBridgeError::Internal(format!("postgres insert failed: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_backend_appends_and_verifies_hash_chain() {
        let mut ledger = PersistentLedger::bootstrap(LedgerStorageConfig::memory()).await.unwrap();

        ledger.append("corr-a", "T1", "M1", "INGRESS", "OK", json!({})).await.unwrap();
        ledger.append("corr-a", "T1", "M1", "PARSED", "OK", json!({})).await.unwrap();

        assert_eq!(ledger.entries().len(), 2);
        assert!(ledger.verify_chain());
    }

    #[test]
    fn from_entries_rehydrates_verified_chain() {
        let mut base = AppendOnlyLedger::new();
        let first = base.append("corr-a", "T1", "M1", "INGRESS", "OK", json!({})).unwrap();
        base.append("corr-a", "T1", "M1", "PARSED", "OK", json!({})).unwrap();

        let rehydrated = PersistentLedger::from_entries(base.entries().to_vec()).unwrap();
        assert_eq!(rehydrated.entries().len(), 2);
        assert_eq!(rehydrated.entries()[0].entry_id, first.entry_id);
        assert!(rehydrated.verify_chain());
    }
}
