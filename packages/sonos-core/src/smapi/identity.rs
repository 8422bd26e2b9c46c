//! Household and device identity for SMAPI credentials.

use super::credentials::SmapiIdentity;
use super::SmapiResult;
use crate::sonos::discovery::{description_url, fetch_device_description};
use crate::sonos::properties::{get_household_id, get_string, TRIAL_SERIAL_VARIABLE};
use crate::sonos::soap::SoapTarget;

/// Reads the household id and derives the device id from `target`.
///
/// The device id is the speaker's trial serial; speakers without one (or
/// that reject the lookup with a UPnP error) fall back to their UDN.
pub async fn resolve_identity(target: SoapTarget<'_>) -> SmapiResult<SmapiIdentity> {
    let household_id = get_household_id(target).await?;

    let serial = match get_string(target, TRIAL_SERIAL_VARIABLE).await {
        Ok(serial) => serial,
        Err(e) if e.upnp_code().is_some() => {
            log::debug!("[SMAPI] {} lookup failed on {}: {}", TRIAL_SERIAL_VARIABLE, target.addr, e);
            String::new()
        }
        Err(e) => return Err(e.into()),
    };

    let device_id = if serial.is_empty() {
        let location = description_url(&target.ip().to_string(), target.addr.port());
        fetch_device_description(target.http, &location, target.deadline)
            .await?
            .udn
    } else {
        serial
    };

    Ok(SmapiIdentity {
        household_id,
        device_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{device_description, soap_ok, upnp_fault, FakeTransport};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1400)
    }

    #[tokio::test]
    async fn uses_trial_serial() {
        let fake = FakeTransport::new();
        fake.respond_to("GetHouseholdID", soap_ok("GetHouseholdID", &[("CurrentHouseholdID", "Sonos_HH")]));
        fake.respond_to("GetString", soap_ok("GetString", &[("StringValue", "00-0E-58-AA:1")]));

        let id = resolve_identity(SoapTarget::new(&fake, addr())).await.unwrap();
        assert_eq!(id.household_id, "Sonos_HH");
        assert_eq!(id.device_id, "00-0E-58-AA:1");
        assert_eq!(fake.requests().len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_udn_when_serial_empty() {
        let fake = FakeTransport::new();
        fake.respond_to("GetHouseholdID", soap_ok("GetHouseholdID", &[("CurrentHouseholdID", "Sonos_HH")]));
        fake.respond_to("GetString", soap_ok("GetString", &[("StringValue", "")]));
        fake.respond_to("/xml/device_description.xml", device_description("Bar", "RINCON_BAR1400"));

        let id = resolve_identity(SoapTarget::new(&fake, addr())).await.unwrap();
        assert_eq!(id.device_id, "RINCON_BAR1400");
    }

    #[tokio::test]
    async fn falls_back_to_udn_on_upnp_error() {
        let fake = FakeTransport::new();
        fake.respond_to("GetHouseholdID", soap_ok("GetHouseholdID", &[("CurrentHouseholdID", "Sonos_HH")]));
        fake.respond_to("GetString", upnp_fault("800"));
        fake.respond_to("/xml/device_description.xml", device_description("Bar", "RINCON_BAR1400"));

        let id = resolve_identity(SoapTarget::new(&fake, addr())).await.unwrap();
        assert_eq!(id.device_id, "RINCON_BAR1400");
    }
}
