//! Upsert reconciliation of registry records into site establishments.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::establishment::CLOSURE_LABEL;
use crate::models::{EstablishmentDraft, SireneEtablissement};
use crate::services::store::{ImportStore, StoreError};

/// Errors local to a single record. The import counts them and moves on.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("SIRET missing from registry record")]
    MissingSiret,

    #[error("Malformed registry record: {0}")]
    Malformed(String),

    #[error("Failed to store establishment {siret}: {source}")]
    Store {
        siret: String,
        #[source]
        source: StoreError,
    },
}

/// What one reconciled record contributed to the job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// 1 when the establishment was created by this sighting.
    pub created: u32,
    /// 1 when the establishment is closed after this sighting.
    pub closed: u32,
}

/// Decode a raw registry record into the fields stored for an establishment.
pub fn derive_establishment(record: &Value) -> Result<EstablishmentDraft, RecordError> {
    let has_siret = match record.get("siret") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    if !has_siret {
        return Err(RecordError::MissingSiret);
    }

    let parsed: SireneEtablissement = serde_json::from_value(record.clone())
        .map_err(|e| RecordError::Malformed(e.to_string()))?;

    let siret = parsed
        .siret()
        .ok_or(RecordError::MissingSiret)?
        .to_string();
    shared::validation::validate_siret(&siret)
        .map_err(|_| RecordError::Malformed(format!("invalid SIRET '{}'", siret)))?;

    let siren = parsed
        .siren
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&siret[..9])
        .to_string();
    let nic = parsed
        .nic
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&siret[9..])
        .to_string();

    let is_active = parsed.is_active();
    let period = parsed.current_period();

    Ok(EstablishmentDraft {
        siren,
        nic,
        business_name: parsed.business_name().map(str::to_string),
        naf_code: parsed.activite_principale_etablissement.clone(),
        naf_label: parsed.nomenclature_activite_principale_etablissement.clone(),
        address: period.and_then(|p| p.address()),
        postal_code: period.and_then(|p| p.code_postal_etablissement.clone()),
        city: period.and_then(|p| p.libelle_commune_etablissement.clone()),
        department: period.and_then(|p| p.code_departement_etablissement.clone()),
        is_active,
        closure_label: (!is_active).then(|| CLOSURE_LABEL.to_string()),
        extra_metadata: json!({
            "trancheEffectifs": parsed.tranche_effectifs_etablissement,
            "dateCreation": parsed.date_creation_etablissement,
        }),
        siret,
    })
}

/// Insert or update the establishment described by `record` for a site.
///
/// Running it twice on the same payload leaves one row with the same field
/// values; only `last_seen_at` moves.
pub async fn reconcile_record<S: ImportStore + ?Sized>(
    store: &S,
    site_id: i64,
    record: &Value,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, RecordError> {
    let draft = derive_establishment(record)?;
    let store_error = |source| RecordError::Store {
        siret: draft.siret.clone(),
        source,
    };

    let existing = store
        .find_establishment(site_id, &draft.siret)
        .await
        .map_err(store_error)?;

    let created = match existing {
        Some(establishment) => {
            store
                .update_establishment(establishment.id, &draft, now)
                .await
                .map_err(store_error)?;
            0
        }
        None => {
            store
                .insert_establishment(site_id, &draft, now)
                .await
                .map_err(store_error)?;
            1
        }
    };

    Ok(ReconcileOutcome {
        created,
        closed: u32::from(!draft.is_active),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InMemoryImportStore;

    fn record(siret: &str, state: &str) -> Value {
        json!({
            "siret": siret,
            "siren": &siret[..9],
            "nic": &siret[9..],
            "etatAdministratifEtablissement": state,
            "activitePrincipaleEtablissement": "62.01Z",
            "nomenclatureActivitePrincipaleEtablissement": "NAFRev2",
            "trancheEffectifsEtablissement": "11",
            "dateCreationEtablissement": "2012-03-01",
            "uniteLegale": {"denominationUniteLegale": "ACME CONSEIL"},
            "periodesEtablissement": [{
                "dateDebut": "2012-03-01",
                "numeroVoieEtablissement": "12",
                "typeVoieEtablissement": "RUE",
                "libelleVoieEtablissement": "DE LA PAIX",
                "codePostalEtablissement": "75002",
                "libelleCommuneEtablissement": "PARIS 2",
                "codeDepartementEtablissement": "75"
            }]
        })
    }

    #[test]
    fn test_derive_fields() {
        let draft = derive_establishment(&record("73282932000074", "A")).unwrap();

        assert_eq!(draft.siret, "73282932000074");
        assert_eq!(draft.siren, "732829320");
        assert_eq!(draft.nic, "00074");
        assert_eq!(draft.business_name.as_deref(), Some("ACME CONSEIL"));
        assert_eq!(draft.naf_code.as_deref(), Some("62.01Z"));
        assert_eq!(draft.address.as_deref(), Some("12 RUE DE LA PAIX"));
        assert_eq!(draft.postal_code.as_deref(), Some("75002"));
        assert_eq!(draft.city.as_deref(), Some("PARIS 2"));
        assert_eq!(draft.department.as_deref(), Some("75"));
        assert!(draft.is_active);
        assert_eq!(draft.closure_label, None);
        assert_eq!(
            draft.extra_metadata,
            json!({"trancheEffectifs": "11", "dateCreation": "2012-03-01"})
        );
    }

    #[test]
    fn test_siren_and_nic_derived_from_siret() {
        let draft = derive_establishment(&json!({"siret": "73282932000074"})).unwrap();
        assert_eq!(draft.siren, "732829320");
        assert_eq!(draft.nic, "00074");
        assert_eq!(draft.address, None);
        assert!(draft.is_active);
    }

    #[test]
    fn test_missing_siret() {
        for payload in [json!({}), json!({"siret": null}), json!({"siret": "  "})] {
            assert!(matches!(
                derive_establishment(&payload),
                Err(RecordError::MissingSiret)
            ));
        }
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            derive_establishment(&json!({"siret": "123"})),
            Err(RecordError::Malformed(_))
        ));
        assert!(matches!(
            derive_establishment(&json!({"siret": "73282932000074", "periodesEtablissement": "x"})),
            Err(RecordError::Malformed(_))
        ));
        assert!(matches!(
            derive_establishment(&json!("not an object")),
            Err(RecordError::MissingSiret)
        ));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = InMemoryImportStore::new();
        let payload = record("73282932000074", "A");

        let first = reconcile_record(&store, 1, &payload, Utc::now()).await.unwrap();
        let row_after_first = store.establishments(1).unwrap();
        let second = reconcile_record(&store, 1, &payload, Utc::now()).await.unwrap();
        let rows = store.establishments(1).unwrap();

        assert_eq!(first, ReconcileOutcome { created: 1, closed: 0 });
        assert_eq!(second, ReconcileOutcome { created: 0, closed: 0 });
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, row_after_first[0].id);
        assert_eq!(rows[0].business_name, row_after_first[0].business_name);
        assert_eq!(rows[0].imported_at, row_after_first[0].imported_at);
    }

    #[tokio::test]
    async fn test_closed_record() {
        let store = InMemoryImportStore::new();

        let outcome = reconcile_record(&store, 1, &record("73282932000074", "F"), Utc::now())
            .await
            .unwrap();
        let rows = store.establishments(1).unwrap();

        assert_eq!(outcome, ReconcileOutcome { created: 1, closed: 1 });
        assert!(!rows[0].is_active);
        assert_eq!(rows[0].closure_label.as_deref(), Some("Définitivement fermé"));
    }

    #[tokio::test]
    async fn test_update_overwrites_fields_and_bumps_last_seen() {
        let store = InMemoryImportStore::new();
        let first_seen = Utc::now();
        reconcile_record(&store, 1, &record("73282932000074", "A"), first_seen)
            .await
            .unwrap();

        let mut changed = record("73282932000074", "F");
        changed["uniteLegale"]["denominationUniteLegale"] = json!("ACME HOLDING");
        let later = first_seen + chrono::Duration::days(30);
        let outcome = reconcile_record(&store, 1, &changed, later).await.unwrap();

        let row = &store.establishments(1).unwrap()[0];
        assert_eq!(outcome, ReconcileOutcome { created: 0, closed: 1 });
        assert_eq!(row.business_name.as_deref(), Some("ACME HOLDING"));
        assert!(!row.is_active);
        assert_eq!(row.imported_at, first_seen);
        assert_eq!(row.last_seen_at, later);
    }

    #[tokio::test]
    async fn test_same_siret_on_two_sites() {
        let store = InMemoryImportStore::new();
        let payload = record("73282932000074", "A");

        reconcile_record(&store, 1, &payload, Utc::now()).await.unwrap();
        let outcome = reconcile_record(&store, 2, &payload, Utc::now()).await.unwrap();

        assert_eq!(outcome.created, 1);
        assert_eq!(store.establishments(1).unwrap().len(), 1);
        assert_eq!(store.establishments(2).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_a_record_error() {
        let store = InMemoryImportStore::new();
        store.reject_siret("73282932000074").unwrap();

        let result =
            reconcile_record(&store, 1, &record("73282932000074", "A"), Utc::now()).await;

        assert!(matches!(
            result,
            Err(RecordError::Store { source: StoreError::Conflict(_), .. })
        ));
    }
}
