//! Precedence resolution across the four configuration levels (§4.A).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::PayBridgeError;
use crate::types::{AuthConfigRecord, ConfigLevel, Direction, MappingDocument, PolicyCoordinate};

/// Read-mostly, shared configuration snapshot. Records are published by the
/// out-of-scope CRUD subsystem (§6); this resolver only ever reads and
/// memoizes. Every publish bumps `version` and clears both caches atomically
/// with the insert, so a reader never observes a resolution memoized against
/// a configuration snapshot older than the one it's about to read (§5).
#[derive(Debug, Default)]
pub struct ConfigResolver {
    auth_records: DashMap<String, AuthConfigRecord>,
    mapping_documents: DashMap<String, MappingDocument>,
    auth_cache: DashMap<String, Option<AuthConfigRecord>>,
    mapping_cache: DashMap<String, Option<MappingDocument>>,
    version: AtomicU64,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn bump_version_and_invalidate(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        self.auth_cache.clear();
        self.mapping_cache.clear();
    }

    pub fn publish_auth_config(&self, record: AuthConfigRecord) {
        self.auth_records.insert(record.name.clone(), record);
        self.bump_version_and_invalidate();
    }

    pub fn publish_mapping_document(&self, document: MappingDocument) -> Result<(), PayBridgeError> {
        document
            .validate()
            .map_err(|reason| PayBridgeError::MappingFailed { document: document.name.clone(), reason })?;
        self.mapping_documents.insert(document.name.clone(), document);
        self.bump_version_and_invalidate();
        Ok(())
    }

    /// `resolve(coordinate, kind) → Policy or NOT_FOUND` specialized to auth.
    /// The Tenant level is always walked even when it contributes nothing —
    /// it is never skipped as a level (§4.A decided, §9).
    pub fn resolve_auth(&self, coordinate: &PolicyCoordinate) -> Result<AuthConfigRecord, PayBridgeError> {
        let cache_key = coordinate.label();
        if let Some(cached) = self.auth_cache.get(&cache_key) {
            return cached
                .clone()
                .ok_or_else(|| Self::configuration_missing(coordinate, "auth"));
        }

        let mut winner: Option<AuthConfigRecord> = None;
        for level in ConfigLevel::precedence_order() {
            let mut candidates: Vec<AuthConfigRecord> = self
                .auth_records
                .iter()
                .map(|entry| entry.value().clone())
                .filter(|record| record.level == level && record.active && record.coordinate.matches(coordinate))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
            debug!(level = ?level, coordinate = %coordinate.label(), "auth config resolved at level");
            winner = candidates.into_iter().next();
            break;
        }

        self.auth_cache.insert(cache_key.clone(), winner.clone());
        winner.ok_or_else(|| Self::configuration_missing(coordinate, "auth"))
    }

    /// `effectiveMapping(coordinate, direction) → MappingDocument or NONE`.
    /// Mapping documents carry no precedence level of their own (§3): within
    /// the set of active, coordinate-and-direction-matching documents, the
    /// highest-priority one wins, ties breaking on lexicographic name.
    pub fn effective_mapping(&self, coordinate: &PolicyCoordinate, direction: Direction) -> Option<MappingDocument> {
        let cache_key = format!("{}/{:?}", coordinate.label(), direction);
        if let Some(cached) = self.mapping_cache.get(&cache_key) {
            return cached.clone();
        }

        let mut candidates: Vec<MappingDocument> = self
            .mapping_documents
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|document| {
                document.active && document.direction.matches(direction) && document.coordinate.matches(coordinate)
            })
            .collect();

        if candidates.is_empty() {
            warn!(coordinate = %coordinate.label(), "no effective mapping document, falling back to built-in transform");
        }

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        let winner = candidates.into_iter().next();
        self.mapping_cache.insert(cache_key, winner.clone());
        winner
    }

    fn configuration_missing(coordinate: &PolicyCoordinate, kind: &str) -> PayBridgeError {
        PayBridgeError::ConfigurationMissing { coordinate: coordinate.label(), kind: kind.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthConfig, CoordinateMatch, MappingClause, TenantId};
    use serde_json::json;

    fn jwt(name: &str, level: ConfigLevel, priority: u8, coordinate: CoordinateMatch) -> AuthConfigRecord {
        AuthConfigRecord {
            name: name.to_string(),
            level,
            coordinate,
            priority,
            active: true,
            config: AuthConfig::Jwt {
                secret: "s".into(),
                issuer: "i".into(),
                audience: "a".into(),
                expiration_seconds: 60,
            },
            client_headers: None,
        }
    }

    #[test]
    fn downstream_call_level_wins_over_tenant_level() {
        let resolver = ConfigResolver::new();
        let coordinate = PolicyCoordinate::new(TenantId::from("T1"), Direction::Request);

        resolver.publish_auth_config(jwt(
            "tenant-default",
            ConfigLevel::Tenant,
            50,
            CoordinateMatch { tenant_id: Some(TenantId::from("T1")), ..Default::default() },
        ));
        resolver.publish_auth_config(jwt(
            "call-override",
            ConfigLevel::DownstreamCall,
            10,
            CoordinateMatch { tenant_id: Some(TenantId::from("T1")), ..Default::default() },
        ));

        let resolved = resolver.resolve_auth(&coordinate).unwrap();
        assert_eq!(resolved.name, "call-override");
    }

    #[test]
    fn empty_tenant_level_falls_through_to_clearing_system_level() {
        let resolver = ConfigResolver::new();
        let coordinate = PolicyCoordinate::new(TenantId::from("T1"), Direction::Request);
        resolver.publish_auth_config(jwt("global", ConfigLevel::ClearingSystem, 50, CoordinateMatch::default()));

        let resolved = resolver.resolve_auth(&coordinate).unwrap();
        assert_eq!(resolved.name, "global");
    }

    #[test]
    fn unresolvable_coordinate_is_configuration_missing() {
        let resolver = ConfigResolver::new();
        let coordinate = PolicyCoordinate::new(TenantId::from("T9"), Direction::Request);
        let err = resolver.resolve_auth(&coordinate).unwrap_err();
        assert!(matches!(err, PayBridgeError::ConfigurationMissing { .. }));
    }

    #[test]
    fn publishing_a_record_invalidates_the_cache() {
        let resolver = ConfigResolver::new();
        let coordinate = PolicyCoordinate::new(TenantId::from("T1"), Direction::Request);
        assert!(resolver.resolve_auth(&coordinate).is_err());

        resolver.publish_auth_config(jwt(
            "added-later",
            ConfigLevel::ClearingSystem,
            50,
            CoordinateMatch::default(),
        ));
        let resolved = resolver.resolve_auth(&coordinate).unwrap();
        assert_eq!(resolved.name, "added-later");
    }

    #[test]
    fn higher_priority_mapping_document_wins_ties_break_on_name() {
        let resolver = ConfigResolver::new();
        let coordinate = PolicyCoordinate::new(TenantId::from("T1"), Direction::Request);
        let doc = |name: &str, priority: u8| MappingDocument {
            name: name.to_string(),
            coordinate: CoordinateMatch { tenant_id: Some(TenantId::from("T1")), ..Default::default() },
            direction: Direction::Request,
            priority,
            active: true,
            version: 1,
            clauses: vec![MappingClause::DefaultValue { target_path: "x".into(), value: json!(1) }],
        };
        resolver.publish_mapping_document(doc("b-doc", 50)).unwrap();
        resolver.publish_mapping_document(doc("a-doc", 90)).unwrap();
        resolver.publish_mapping_document(doc("z-doc", 90)).unwrap();

        let winner = resolver.effective_mapping(&coordinate, Direction::Request).unwrap();
        assert_eq!(winner.name, "a-doc");
    }

    #[test]
    fn no_matching_mapping_document_returns_none() {
        let resolver = ConfigResolver::new();
        let coordinate = PolicyCoordinate::new(TenantId::from("T7"), Direction::Request);
        assert!(resolver.effective_mapping(&coordinate, Direction::Request).is_none());
    }
}
