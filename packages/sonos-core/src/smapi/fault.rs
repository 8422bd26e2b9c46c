//! SMAPI fault classification.
//!
//! Music services signal link progress and credential expiry through SOAP
//! faults. The fault is decoded once into [`SmapiFault`]; callers match the
//! variant instead of the fault text.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

use crate::sonos::utils::{extract_xml_text, local_name, unescape_xml};

/// Credentials carried inside a `TokenRefreshRequired` fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedCredentials {
    pub auth_token: String,
    pub private_key: String,
}

/// A decoded SMAPI SOAP fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmapiFault {
    /// The user has not completed the link yet.
    #[error("account not linked yet ({0})")]
    Pending(String),

    /// The service rotated credentials and sent the new pair.
    #[error("token refresh required")]
    TokenRefreshRequired(RefreshedCredentials),

    #[error("invalid or expired link code")]
    InvalidLinkCode,

    #[error("SMAPI fault {code}: {message}")]
    Other { code: String, message: String },
}

impl SmapiFault {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Classifies a raw fault.
    ///
    /// `detail` is the whole response body, searched for `authToken` and
    /// `privateKey` when the fault asks for a refresh.
    #[must_use]
    pub fn classify(code: &str, message: &str, detail: &str) -> Self {
        if code.contains("TokenRefreshRequired") || message.contains("TokenRefreshRequired") {
            let auth_token = extract_xml_text(detail, "authToken").unwrap_or_default();
            let private_key = extract_xml_text(detail, "privateKey").unwrap_or_default();
            if !auth_token.trim().is_empty() && !private_key.trim().is_empty() {
                return Self::TokenRefreshRequired(RefreshedCredentials {
                    auth_token: auth_token.trim().to_string(),
                    private_key: private_key.trim().to_string(),
                });
            }
            log::warn!("[SMAPI] TokenRefreshRequired fault without a usable token pair");
        }

        // NOT_LINKED_RETRY contains NOT_LINKED.
        if code.contains("NOT_LINKED") || message.contains("NOT_LINKED") {
            let marker = if code.contains("NOT_LINKED_RETRY") || message.contains("NOT_LINKED_RETRY") {
                "NOT_LINKED_RETRY"
            } else {
                "NOT_LINKED"
            };
            return Self::Pending(marker.to_string());
        }

        if message.to_ascii_lowercase().contains("invalid linkcode") {
            return Self::InvalidLinkCode;
        }

        Self::Other {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// Extracts `(faultcode, faultstring)` from a SOAP `<Fault>`.
#[must_use]
pub fn decode_fault(body: &str) -> Option<(String, String)> {
    let mut reader = Reader::from_str(body);
    let mut buf = Vec::new();
    let mut in_fault = false;
    let mut code = None;
    let mut message = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name(e).as_str() {
                "Fault" => in_fault = true,
                "faultcode" if in_fault => {
                    let text = reader.read_text(e.name()).ok()?;
                    code = Some(unescape_xml(&text).trim().to_string());
                }
                "faultstring" if in_fault => {
                    let text = reader.read_text(e.name()).ok()?;
                    message = unescape_xml(&text).trim().to_string();
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.local_name().as_ref() == b"Fault" => break,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    code.map(|c| (c, message))
}

/// Decodes and classifies a fault response body.
#[must_use]
pub fn parse_fault(body: &str) -> Option<SmapiFault> {
    let (code, message) = decode_fault(body)?;
    Some(SmapiFault::classify(&code, &message, body))
}
