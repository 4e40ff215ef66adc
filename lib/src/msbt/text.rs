use super::Msbt;
use crate::{Error, Result};

pub fn to_text(msbt: &Msbt) -> Result<String> {
    Ok(serde_yaml::to_string(msbt)?)
}

/// Parses the YAML form. Shape errors (missing fields, wrong types, bad hex) are
/// reported as schema mismatches, malformed YAML as a syntax error.
pub fn from_text(text: &str) -> Result<Msbt> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)?;
    let msbt: Msbt =
        serde_yaml::from_value(value).map_err(|e| Error::schema("MSBT", e.to_string()))?;
    msbt.validate()?;
    Ok(msbt)
}
