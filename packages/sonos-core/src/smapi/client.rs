//! SMAPI request execution with transparent token refresh.

use std::sync::Arc;

use tokio::time::Instant;

use super::credentials::{build_envelope, credentials_header, soap_action, SmapiIdentity};
use super::fault::{parse_fault, RefreshedCredentials, SmapiFault};
use super::presentation::{fetch_search_categories, SearchCategories};
use super::types::{parse_media_list, MediaList, TokenPair};
use super::{SmapiError, SmapiResult};
use crate::sonos::music_services::MusicService;
use crate::sonos::transport::{HttpRequest, HttpTransport};
use crate::store::SmapiTokenStore;
use crate::utils::now_millis;

/// Client for one music service on behalf of one household.
///
/// Not meant to be shared for concurrent refreshes: two clients for the
/// same (service, household) must serialize token writes themselves.
pub struct SmapiClient {
    http: Arc<dyn HttpTransport>,
    service: MusicService,
    identity: SmapiIdentity,
    tokens: Arc<dyn SmapiTokenStore>,
    deadline: Option<Instant>,
}

impl SmapiClient {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        service: MusicService,
        identity: SmapiIdentity,
        tokens: Arc<dyn SmapiTokenStore>,
    ) -> Self {
        Self {
            http,
            service,
            identity,
            tokens,
            deadline: None,
        }
    }

    /// Applies `deadline` to every request this client sends.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn service(&self) -> &MusicService {
        &self.service
    }

    #[must_use]
    pub fn identity(&self) -> &SmapiIdentity {
        &self.identity
    }

    pub(crate) fn tokens(&self) -> &dyn SmapiTokenStore {
        self.tokens.as_ref()
    }

    /// Returns true if a linked service has usable stored credentials.
    /// Services without login always count as linked.
    pub fn is_linked(&self) -> SmapiResult<bool> {
        if !self.service.auth.needs_login_token() {
            return Ok(true);
        }
        Ok(self.tokens.has(&self.service.id, &self.identity.household_id)?)
    }

    fn login_pair(&self) -> SmapiResult<Option<TokenPair>> {
        if !self.service.auth.needs_login_token() {
            return Ok(None);
        }
        match self.tokens.load(&self.service.id, &self.identity.household_id)? {
            Some(pair) if pair.is_valid() => Ok(Some(pair)),
            _ => Err(SmapiError::NotLinked {
                service: self.service.name.clone(),
            }),
        }
    }

    /// Sends one request and returns the response body.
    ///
    /// A fault in the body wins over the HTTP status; some services fault
    /// with 200.
    pub(crate) async fn post(
        &self,
        method: &str,
        args: &[(&str, String)],
        login: Option<&TokenPair>,
    ) -> SmapiResult<String> {
        let header = credentials_header(&self.identity, login);
        let envelope = build_envelope(&header, method, args);
        let request = HttpRequest::post(self.service.secure_uri.clone(), envelope)
            .with_header("Content-Type", "text/xml; charset=\"utf-8\"")
            .with_header("SOAPACTION", soap_action(method))
            .with_deadline(self.deadline);

        log::debug!("[SMAPI] {} -> {}", method, self.service.name);
        let response = self.http.execute(request).await?;
        let body = response.text();

        if let Some(fault) = parse_fault(&body) {
            log::debug!("[SMAPI] {} fault from {}: {}", method, self.service.name, fault);
            return Err(fault.into());
        }
        if response.status != 200 {
            return Err(SmapiError::HttpStatus(response.status));
        }
        Ok(body)
    }

    /// Persists rotated credentials and returns the pair as stored.
    fn persist_refresh(
        &self,
        previous: Option<TokenPair>,
        fresh: RefreshedCredentials,
    ) -> SmapiResult<TokenPair> {
        let household_id = &self.identity.household_id;
        let mut pair = previous.unwrap_or_default();
        pair.auth_token = fresh.auth_token;
        pair.private_key = fresh.private_key;
        pair.household_id = household_id.clone();
        if pair.device_id.is_empty() {
            pair.device_id = self.identity.device_id.clone();
        }
        pair.updated_at = now_millis();

        self.tokens.save(&self.service.id, household_id, &pair)?;
        log::info!("[SMAPI] Refreshed credentials for {}", self.service.name);

        Ok(self
            .tokens
            .load(&self.service.id, household_id)?
            .filter(TokenPair::is_valid)
            .unwrap_or(pair))
    }

    /// Calls `method`, refreshing credentials and retrying once when the
    /// service asks for it. A second failure is returned as-is.
    ///
    /// Services that do not log in never store credentials, so a refresh
    /// request from them is returned as the fault it is.
    pub async fn call(&self, method: &str, args: &[(&str, String)]) -> SmapiResult<String> {
        let login = self.login_pair()?;
        match self.post(method, args, login.as_ref()).await {
            Err(SmapiError::Fault(SmapiFault::TokenRefreshRequired(fresh))) if login.is_some() => {
                let refreshed = self.persist_refresh(login, fresh)?;
                self.post(method, args, Some(&refreshed)).await
            }
            other => other,
        }
    }

    /// Searches `id`, the mapped id of a search category.
    pub async fn search(&self, id: &str, term: &str, index: u32, count: u32) -> SmapiResult<MediaList> {
        let body = self
            .call(
                "search",
                &[
                    ("id", id.to_string()),
                    ("term", term.to_string()),
                    ("index", index.to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;
        parse_media_list(&body, "searchResult")
    }

    /// Lists the children of container `id` (`root` for the top level).
    pub async fn get_metadata(
        &self,
        id: &str,
        index: u32,
        count: u32,
        recursive: bool,
    ) -> SmapiResult<MediaList> {
        let body = self
            .call(
                "getMetadata",
                &[
                    ("id", id.to_string()),
                    ("index", index.to_string()),
                    ("count", count.to_string()),
                    ("recursive", recursive.to_string()),
                ],
            )
            .await?;
        parse_media_list(&body, "getMetadataResult")
    }

    /// Fetches the search categories this service offers.
    pub async fn search_categories(&self) -> SmapiResult<SearchCategories> {
        fetch_search_categories(self.http.as_ref(), &self.service, self.deadline).await
    }

    /// Searches by category name (e.g. `artists`), resolving the mapped id
    /// through the presentation map.
    pub async fn search_category(
        &self,
        category: &str,
        term: &str,
        index: u32,
        count: u32,
    ) -> SmapiResult<MediaList> {
        let categories = self.search_categories().await?;
        let id = categories
            .get(category)
            .ok_or_else(|| SmapiError::UnknownCategory(category.to_string()))?;
        self.search(id, term, index, count).await
    }
}
