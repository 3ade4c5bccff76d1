//! SIRENE registry payloads.
//!
//! Records are kept as raw JSON on the wire and decoded per record by the
//! reconciler, so one malformed entry cannot poison a whole page.

use serde::{Deserialize, Deserializer};

/// Cursor that asks the registry for the first page.
pub const START_CURSOR: &str = "*";

/// Base filter restricting results to publicly diffusible records.
pub const FILTER_DIFFUSION_STATUS: &str = "statutDiffusion";
/// Base filter restricting the administrative states returned.
pub const FILTER_ADMINISTRATIVE_STATE: &str = "etatAdministratifEtablissement";

/// Administrative state code of an active establishment.
pub const ACTIVE_STATE: &str = "A";

/// One page of the `/etablissements` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegistryPage {
    #[serde(rename = "etablissements", default)]
    pub records: Vec<serde_json::Value>,
    #[serde(rename = "curseurSuivant", default)]
    pub next_cursor: Option<String>,
}

/// An establishment as returned by the registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SireneEtablissement {
    #[serde(default, deserialize_with = "lenient_string")]
    pub siret: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub siren: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nic: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub etat_administratif_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub activite_principale_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nomenclature_activite_principale_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tranche_effectifs_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_creation_etablissement: Option<String>,
    #[serde(default)]
    pub unite_legale: Option<SireneUniteLegale>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub periodes_etablissement: Vec<SirenePeriode>,
}

/// Legal unit the establishment belongs to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SireneUniteLegale {
    #[serde(default, deserialize_with = "lenient_string")]
    pub denomination_unite_legale: Option<String>,
}

/// One entry of an establishment's status history.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SirenePeriode {
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_debut: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub numero_voie_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub indice_repetition_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub type_voie_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub libelle_voie_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code_postal_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub libelle_commune_etablissement: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub code_departement_etablissement: Option<String>,
}

impl SireneEtablissement {
    /// Trimmed, non-blank SIRET.
    pub fn siret(&self) -> Option<&str> {
        non_blank(self.siret.as_deref())
    }

    /// Active unless the registry says otherwise; an absent state counts as active.
    pub fn is_active(&self) -> bool {
        self.etat_administratif_etablissement
            .as_deref()
            .map(str::trim)
            .map_or(true, |state| state == ACTIVE_STATE)
    }

    pub fn business_name(&self) -> Option<&str> {
        self.unite_legale
            .as_ref()
            .and_then(|u| non_blank(u.denomination_unite_legale.as_deref()))
    }

    /// The most recent period: greatest `dateDebut`, otherwise the last entry.
    ///
    /// ISO dates compare correctly as strings. A period without a start date
    /// is the open-ended current one in registry payloads, so it wins.
    pub fn current_period(&self) -> Option<&SirenePeriode> {
        let mut current: Option<&SirenePeriode> = None;
        for period in &self.periodes_etablissement {
            current = match current {
                None => Some(period),
                Some(best) => match (best.date_debut.as_deref(), period.date_debut.as_deref()) {
                    (Some(b), Some(p)) if p < b => Some(best),
                    (None, Some(_)) => Some(best),
                    _ => Some(period),
                },
            };
        }
        current
    }
}

impl SirenePeriode {
    /// Street address joined from its parts, `None` when every part is blank.
    pub fn address(&self) -> Option<String> {
        let parts: Vec<&str> = [
            self.numero_voie_etablissement.as_deref(),
            self.indice_repetition_etablissement.as_deref(),
            self.type_voie_etablissement.as_deref(),
            self.libelle_voie_etablissement.as_deref(),
        ]
        .into_iter()
        .filter_map(non_blank)
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts strings and numbers (street numbers are sometimes numeric).
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
