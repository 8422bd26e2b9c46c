//! DeviceProperties and SystemProperties bindings.

use super::services::SonosService;
use super::soap::{SoapError, SoapResult, SoapTarget};

/// System property holding the trial serial used as SMAPI device id.
pub const TRIAL_SERIAL_VARIABLE: &str = "R_TrialZPSerial";

/// Gets the household id. An empty id is an error.
pub async fn get_household_id(target: SoapTarget<'_>) -> SoapResult<String> {
    let response = target
        .request(SonosService::DeviceProperties, "GetHouseholdID")
        .send()
        .await?;

    let id = response.get_or_empty("CurrentHouseholdID").trim();
    if id.is_empty() {
        return Err(SoapError::Parse("empty household id".into()));
    }
    Ok(id.to_string())
}

/// Reads a system property string. The result may be empty.
pub async fn get_string(target: SoapTarget<'_>, variable_name: &str) -> SoapResult<String> {
    if variable_name.trim().is_empty() {
        return Err(SoapError::InvalidArgument("variable name is empty".into()));
    }
    let response = target
        .request(SonosService::SystemProperties, "GetString")
        .arg("VariableName", variable_name)
        .send()
        .await?;

    Ok(response.get_or_empty("StringValue").trim().to_string())
}
