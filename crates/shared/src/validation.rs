//! Validators for SIRENE registry codes used in filters and requests.

use validator::ValidationError;

lazy_static::lazy_static! {
    /// NAF rev.2 activity code, e.g. `62.01Z`.
    static ref NAF_CODE_REGEX: regex::Regex = regex::Regex::new(r"^\d{2}\.\d{2}[A-Z]$").unwrap();
    /// Metropolitan (`01`..`95`, `2A`, `2B`) or overseas (`971`..`976`) department.
    static ref DEPARTMENT_REGEX: regex::Regex =
        regex::Regex::new(r"^(0[1-9]|1\d|2[1-9]|[3-8]\d|9[0-5]|2[AB]|97[1-6])$").unwrap();
    /// INSEE commune code: department prefix followed by a 3-digit suffix.
    static ref COMMUNE_CODE_REGEX: regex::Regex =
        regex::Regex::new(r"^(\d{5}|2[AB]\d{3})$").unwrap();
    static ref POSTAL_CODE_REGEX: regex::Regex = regex::Regex::new(r"^\d{5}$").unwrap();
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates a 14-digit SIRET (SIREN + NIC).
pub fn validate_siret(siret: &str) -> Result<(), ValidationError> {
    if siret.len() == 14 && siret.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(invalid("siret_format", "SIRET must be exactly 14 digits"))
    }
}

/// Validates a NAF activity code (`NN.NNX`).
pub fn validate_naf_code(code: &str) -> Result<(), ValidationError> {
    if NAF_CODE_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(invalid(
            "naf_code_format",
            "NAF code must look like 62.01Z",
        ))
    }
}

/// Validates a French department code.
pub fn validate_department_code(code: &str) -> Result<(), ValidationError> {
    if DEPARTMENT_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(invalid(
            "department_format",
            "Department must be a valid code (01-95, 2A, 2B, 971-976)",
        ))
    }
}

/// Validates an INSEE commune code.
pub fn validate_commune_code(code: &str) -> Result<(), ValidationError> {
    if COMMUNE_CODE_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(invalid(
            "commune_code_format",
            "Commune code must be 5 characters (e.g. 75056 or 2A004)",
        ))
    }
}

/// Validates a 5-digit postal code.
pub fn validate_postal_code(code: &str) -> Result<(), ValidationError> {
    if POSTAL_CODE_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(invalid("postal_code_format", "Postal code must be 5 digits"))
    }
}
