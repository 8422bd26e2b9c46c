//! SMAPI envelope and `<credentials>` header construction.

use crate::protocol_constants::{SMAPI_DEVICE_PROVIDER, SMAPI_NS, SOAP_ENVELOPE_NS};
use crate::sonos::utils::escape_xml;

use super::types::TokenPair;

/// Who is calling, as reported in every SMAPI request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmapiIdentity {
    pub household_id: String,
    pub device_id: String,
}

/// Builds the SOAP header.
///
/// `login` adds the `<context/>` and `<loginToken>` blocks used by
/// DeviceLink and AppLink services once they are linked.
#[must_use]
pub fn credentials_header(identity: &SmapiIdentity, login: Option<&TokenPair>) -> String {
    let mut header = format!(
        r#"<s:Header><credentials xmlns="{}"><deviceId>{}</deviceId><deviceProvider>{}</deviceProvider>"#,
        SMAPI_NS,
        escape_xml(&identity.device_id),
        SMAPI_DEVICE_PROVIDER
    );
    if let Some(pair) = login {
        header.push_str(&format!(
            "<context/><loginToken><token>{}</token><key>{}</key><householdId>{}</householdId></loginToken>",
            escape_xml(&pair.auth_token),
            escape_xml(&pair.private_key),
            escape_xml(&identity.household_id)
        ));
    }
    header.push_str("</credentials></s:Header>");
    header
}

/// Quoted `SOAPACTION` value for a SMAPI method.
#[must_use]
pub fn soap_action(method: &str) -> String {
    format!("\"{}#{}\"", SMAPI_NS, method)
}

/// Builds a SMAPI request envelope. Arguments keep their order.
#[must_use]
pub fn build_envelope(header: &str, method: &str, args: &[(&str, String)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{}">{}<s:Body><{} xmlns="{}">"#,
        SOAP_ENVELOPE_NS, header, method, SMAPI_NS
    );
    for (name, value) in args {
        body.push_str(&format!("<{name}>{}</{name}>", escape_xml(value)));
    }
    body.push_str(&format!("</{}></s:Body></s:Envelope>", method));
    body
}
