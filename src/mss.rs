//! Session orchestration: entering PubHubs, the user object store and entering hubs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auths::{
    self, AttrKeyReq, AttrKeyResp, AttrKeysReq, AttrKeysResp, LoginMethod, SignedIdentifyingAttrs,
};
use crate::crypto;
use crate::error::Error;
use crate::hub::{EnterCompleteReq, EnterCompleteResp, HubAccess};
use crate::phc::{
    Attr, AttrAddStatus, Constellation, EnterMode, EnterReq, EnterResp, GetObjectResp, HhppReq,
    HhppResp, HubInformation, PppResp, RefreshResp, StateResp, StoreObjectResp, UserObjectDetails,
    UserState, WelcomeResp,
};
use crate::secret_store::{SecretStore, StoredUserSecret};
use crate::single_flight::{FlowKey, SingleFlight};
use crate::traits::{AuthServerApi, DisclosureSession, HubApi, PhcApi, TranscryptorApi};
use crate::transcryptor::{EhppReq, EhppResp};
use crate::types::{AuthToken, AuthTokenPackage, HubId, NonceStatePair, SealedEhpp, SealedPpp, SignedHhpp};
use crate::user_secret::{
    USER_SECRET_BACKUP_HANDLE, USER_SECRET_HANDLE, UserSecretObject, compute_new_user_secret_object,
};

/// Rounds of ppp -> ehpp -> hhpp before [`Mss::enter_hub`] gives up.
pub const MAX_ENTER_HUB_ATTEMPTS: usize = 3;
/// Hub enter-start/enter-complete rounds before [`Mss::login_to_hub`] gives up.
pub const MAX_HUB_LOGIN_ATTEMPTS: usize = 3;
const MAX_OBJECT_ATTEMPTS: usize = 3;

/// Why PHC did not let the user in. These are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnterRefusal {
    AccountDoesNotExist,
    Banned,
    NoBannableAttribute,
    RetryWithNewIdentifyingAttr,
    AttributeBanned(Attr),
    AttributeAlreadyTaken(Attr),
    RetryWithNewAddAttr { index: usize },
    /// Auths no longer accepts one of the disclosed attributes; disclose again.
    RetryWithNewAttr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnterOutcome {
    Entered {
        new_account: bool,
        attr_status: Vec<(Attr, AttrAddStatus)>,
    },
    Refused(EnterRefusal),
}

/// An object from the PHC object store, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserObject {
    pub data: Vec<u8>,
    pub details: UserObjectDetails,
}

#[derive(Debug, Clone)]
struct ExistingUserSecret {
    object: UserSecretObject,
    details: UserObjectDetails,
    backup: Option<UserObjectDetails>,
}

/// Per-login state. Replaced on enter, cleared on logout.
#[derive(Default)]
struct Session {
    auth_token: Option<AuthTokenPackage>,
    stored_objects: Option<BTreeMap<String, UserObjectDetails>>,
    user_secret: Option<StoredUserSecret>,
}

/// A client session against one PubHubs constellation.
///
/// Owns the Authentication Server, PHC and Transcryptor handles. Build one
/// with [`MssConfig::connect`](crate::MssConfig::connect) or, for custom
/// transports, with [`Mss::new`].
pub struct Mss<A, P, T> {
    auths: A,
    phc: P,
    transcryptor: T,
    constellation: Constellation,
    hubs: BTreeMap<String, HubInformation>,
    session: Mutex<Session>,
    secret_store: Arc<dyn SecretStore>,
    flights: SingleFlight,
}

impl<A, P, T> std::fmt::Debug for Mss<A, P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mss")
            .field("constellation", &self.constellation.id)
            .field("hubs", &self.hubs.len())
            .finish_non_exhaustive()
    }
}

impl<A, P, T> Mss<A, P, T>
where
    A: AuthServerApi,
    P: PhcApi,
    T: TranscryptorApi,
{
    /// `welcome` is PHC's welcome response, which `auths` and `transcryptor`
    /// were built from.
    pub fn new(
        auths: A,
        phc: P,
        transcryptor: T,
        welcome: WelcomeResp,
        secret_store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            auths,
            phc,
            transcryptor,
            constellation: welcome.constellation,
            hubs: welcome.hubs,
            session: Mutex::new(Session::default()),
            secret_store,
            flights: SingleFlight::new(),
        }
    }

    #[must_use]
    pub fn constellation(&self) -> &Constellation {
        &self.constellation
    }

    pub fn hubs(&self) -> impl Iterator<Item = &HubInformation> {
        self.hubs.values()
    }

    /// Look up a hub by its id or one of its handles.
    #[must_use]
    pub fn hub(&self, id_or_handle: &str) -> Option<&HubInformation> {
        self.hubs.values().find(|hub| {
            hub.id.0 == id_or_handle || hub.handles.iter().any(|h| h == id_or_handle)
        })
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.session().auth_token.is_some()
    }

    /// The current auth token package, for callers that persist it.
    #[must_use]
    pub fn auth_token_package(&self) -> Option<AuthTokenPackage> {
        self.session().auth_token.clone()
    }

    /// Resume a session from a previously persisted auth token package.
    pub fn restore_session(&self, package: AuthTokenPackage) {
        *self.session() = Session {
            auth_token: Some(package),
            ..Session::default()
        };
    }

    /// Forget the session and the locally stored user secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SecretStore`] if the stored secret could not be removed.
    pub fn logout(&self) -> Result<(), Error> {
        *self.session() = Session::default();
        self.secret_store.clear()
    }

    /// End the session after PHC or Auths invalidated it.
    fn invalidate(&self, reason: &'static str) -> Error {
        tracing::warn!(reason, "Session invalidated, the user has to enter PubHubs again");
        if let Err(e) = self.logout() {
            tracing::error!(error = %e, "Failed to clear the stored user secret");
        }
        Error::LoggedOut
    }

    // Auth token

    async fn auth_token(&self) -> Result<AuthToken, Error> {
        let package = self.auth_token_package().ok_or(Error::LoggedOut)?;
        if !package.is_expired() {
            return Ok(package.auth_token);
        }
        tracing::debug!("Auth token expired, refreshing");
        self.refresh(&package.auth_token).await
    }

    async fn refresh(&self, expired: &AuthToken) -> Result<AuthToken, Error> {
        match self.phc.refresh(expired).await? {
            RefreshResp::Success(package) => {
                let token = package.auth_token.clone();
                self.session().auth_token = Some(package);
                Ok(token)
            }
            RefreshResp::ReobtainAuthToken => Err(self.invalidate("refresh: ReobtainAuthToken")),
            RefreshResp::Denied(reason) => {
                tracing::warn!(?reason, "Auth token refresh denied");
                Err(Error::AuthTokenDenied(reason))
            }
        }
    }

    /// Ask PHC for the user's state. Also refreshes the cached object details.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoggedOut`] if there is no valid session.
    pub async fn state(&self) -> Result<UserState, Error> {
        let auth = self.auth_token().await?;
        match self.phc.state(&auth).await? {
            StateResp::State(state) => {
                self.session().stored_objects = Some(state.stored_objects.clone());
                Ok(state)
            }
            StateResp::RetryWithNewAuthToken => Err(self.invalidate("state: RetryWithNewAuthToken")),
        }
    }

    /// Whether PHC still accepts the session.
    ///
    /// # Errors
    ///
    /// Transport errors are returned; check [`Error::is_offline`] to tell the
    /// user the system is unreachable.
    pub async fn has_valid_auth_token(&self) -> Result<bool, Error> {
        match self.state().await {
            Ok(_) => Ok(true),
            Err(Error::LoggedOut) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // Entering PubHubs

    /// Disclose attributes, enter PHC and set up the user secret.
    ///
    /// # Errors
    ///
    /// Fails on invalid login methods, transport errors, a denied auth token,
    /// or when the user secret cannot be recovered or stored. A failure to
    /// store the user secret also ends the session.
    pub async fn enter_pub_hubs<D: DisclosureSession>(
        &self,
        disclosure: &D,
        login_method: &LoginMethod,
        enter_mode: EnterMode,
    ) -> Result<EnterOutcome, Error> {
        let _flight = self.flights.acquire(FlowKey::EnterPubHubs)?;

        let authenticated =
            auths::start_authentication(&self.auths, disclosure, login_method, enter_mode).await?;

        let enter_req = EnterReq {
            identifying_attr: Some(authenticated.identifying_attr.clone()),
            mode: enter_mode,
            add_attrs: authenticated.signed_add_attrs.clone(),
        };
        let (new_account, attr_status) = match self.phc.enter(&enter_req, None).await? {
            EnterResp::Entered {
                new_account,
                auth_token_package,
                attr_status,
            } => {
                let package = auth_token_package.map_err(Error::AuthTokenDenied)?;
                self.restore_session(package);
                (new_account, attr_status)
            }
            EnterResp::AccountDoesNotExist => return Ok(refused(EnterRefusal::AccountDoesNotExist)),
            EnterResp::Banned => return Ok(refused(EnterRefusal::Banned)),
            EnterResp::NoBannableAttribute => return Ok(refused(EnterRefusal::NoBannableAttribute)),
            EnterResp::RetryWithNewIdentifyingAttr => {
                return Ok(refused(EnterRefusal::RetryWithNewIdentifyingAttr));
            }
            EnterResp::AttributeBanned(attr) => {
                return Ok(refused(EnterRefusal::AttributeBanned(attr)));
            }
            EnterResp::AttributeAlreadyTaken(attr) => {
                return Ok(refused(EnterRefusal::AttributeAlreadyTaken(attr)));
            }
            EnterResp::RetryWithNewAddAttr { index } => {
                return Ok(refused(EnterRefusal::RetryWithNewAddAttr { index }));
            }
        };
        tracing::info!(new_account, "Entered PubHubs");

        match self
            .set_up_user_secret(&authenticated.signed_identifying_attrs)
            .await?
        {
            Some(refusal) => Ok(EnterOutcome::Refused(refusal)),
            None => Ok(EnterOutcome::Entered {
                new_account,
                attr_status,
            }),
        }
    }

    /// Request attribute keys and (re-)encrypt the user secret under them.
    async fn set_up_user_secret(
        &self,
        identifying: &SignedIdentifyingAttrs,
    ) -> Result<Option<EnterRefusal>, Error> {
        let existing = self.get_user_secret_object().await?;
        let req = attr_keys_request(identifying, existing.as_ref().map(|e| &e.object));
        match self.auths.attr_keys(&req).await? {
            AttrKeysResp::Success(keys) => {
                if let Err(e) = self
                    .store_user_secret_object(&keys, identifying, existing)
                    .await
                {
                    tracing::error!(error = %e, "Could not store the user secret, logging out");
                    if let Err(clear_err) = self.logout() {
                        tracing::error!(error = %clear_err, "Failed to clear the stored user secret");
                    }
                    return Err(e);
                }
                Ok(None)
            }
            AttrKeysResp::RetryWithNewAttr(handle) => {
                tracing::warn!(handle = %handle, "Attribute key request refused, disclosure must be redone");
                self.logout()?;
                Ok(Some(EnterRefusal::RetryWithNewAttr))
            }
        }
    }

    async fn get_user_secret_object(&self) -> Result<Option<ExistingUserSecret>, Error> {
        let Some(primary) = self.get_user_object(USER_SECRET_HANDLE).await? else {
            return Ok(None);
        };
        let object = UserSecretObject::from_bytes(&primary.data)?;
        if let UserSecretObject::V0(_) = object {
            return Ok(Some(ExistingUserSecret {
                object,
                details: primary.details,
                backup: None,
            }));
        }

        let backup = self
            .get_user_object(USER_SECRET_BACKUP_HANDLE)
            .await?
            .ok_or_else(|| {
                Error::UserSecret("expected a backup of the user secret object, found none".into())
            })?;
        if UserSecretObject::from_bytes(&backup.data)? != object {
            return Err(Error::UserSecret(
                "the user secret object differs from its backup".into(),
            ));
        }
        Ok(Some(ExistingUserSecret {
            object,
            details: primary.details,
            backup: Some(backup.details),
        }))
    }

    async fn store_user_secret_object(
        &self,
        attr_keys: &BTreeMap<String, AttrKeyResp>,
        identifying: &SignedIdentifyingAttrs,
        existing: Option<ExistingUserSecret>,
    ) -> Result<(), Error> {
        let new = compute_new_user_secret_object(
            attr_keys,
            identifying,
            existing.as_ref().map(|e| &e.object),
        )?;
        let bytes = new.object.to_bytes()?;

        let (hash, backup_hash) = match existing {
            Some(e) => (Some(e.details.hash), e.backup.map(|b| b.hash)),
            None => (None, None),
        };
        self.store_object(USER_SECRET_HANDLE, &bytes, hash).await?;
        self.store_object(USER_SECRET_BACKUP_HANDLE, &bytes, backup_hash)
            .await?;

        let stored = StoredUserSecret::new(&new.secret, new.object.version());
        self.secret_store.save(&stored)?;
        self.session().user_secret = Some(stored);
        tracing::debug!(version = new.object.version(), "User secret stored");
        Ok(())
    }

    fn user_secret(&self) -> Result<StoredUserSecret, Error> {
        if !self.is_logged_in() {
            return Err(Error::LoggedOut);
        }
        let cached = self.session().user_secret.clone();
        let stored = match cached {
            Some(stored) => stored,
            None => {
                let Some(stored) = self.secret_store.load()? else {
                    return Err(self.invalidate("user secret missing from the secret store"));
                };
                self.session().user_secret = Some(stored.clone());
                stored
            }
        };
        Ok(stored)
    }

    // Object store

    async fn object_details(&self, handle: &str) -> Result<Option<UserObjectDetails>, Error> {
        let cached = self
            .session()
            .stored_objects
            .as_ref()
            .map(|objects| objects.get(handle).cloned());
        match cached {
            Some(details) => Ok(details),
            None => Ok(self.state().await?.stored_objects.get(handle).cloned()),
        }
    }

    /// Download the (encrypted) object stored under `handle`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectStore`] if PHC keeps refusing the download.
    pub async fn get_user_object(&self, handle: &str) -> Result<Option<UserObject>, Error> {
        let Some(mut details) = self.object_details(handle).await? else {
            return Ok(None);
        };
        for attempt in 1..=MAX_OBJECT_ATTEMPTS {
            match self.phc.get_object(&details).await? {
                GetObjectResp::Object(data) => return Ok(Some(UserObject { data, details })),
                GetObjectResp::Problem(problem) => {
                    tracing::debug!(handle, attempt, ?problem, "Object download refused, refreshing state");
                    self.state().await?;
                    match self.object_details(handle).await? {
                        Some(fresh) => details = fresh,
                        None => return Ok(None),
                    }
                }
            }
        }
        Err(Error::object_store(handle, "could not retrieve the object"))
    }

    /// Download and decrypt the JSON object stored under `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoggedOut`] without a session and [`Error::Crypto`] if
    /// the object was not encrypted with this user's secret.
    pub async fn get_decrypted_user_object<V: DeserializeOwned>(
        &self,
        handle: &str,
    ) -> Result<Option<V>, Error> {
        let Some(object) = self.get_user_object(handle).await? else {
            return Ok(None);
        };
        let secret = self.user_secret()?;
        let plaintext = crypto::decrypt(&object.data, &secret.secret)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    /// Encrypt `value` as JSON with the user secret and store it under `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotumReached`] if PHC's storage quota is exhausted and
    /// [`Error::ObjectStore`] if the write could not be completed or verified.
    pub async fn store_user_object<V: Serialize + ?Sized>(
        &self,
        handle: &str,
        value: &V,
    ) -> Result<(), Error> {
        let plaintext = serde_json::to_vec(value)?;
        let secret = STANDARD
            .decode(&self.user_secret()?.secret)
            .map_err(|e| Error::SecretStore(format!("stored user secret is not base64: {e}")))?;
        let ciphertext = crypto::encrypt(&plaintext, &secret)?;
        let overwrite_hash = self.object_details(handle).await?.map(|d| d.hash);
        self.store_object(handle, &ciphertext, overwrite_hash).await
    }

    /// Write `data` under `handle` and check it by reading it back.
    async fn store_object(
        &self,
        handle: &str,
        data: &[u8],
        overwrite_hash: Option<String>,
    ) -> Result<(), Error> {
        self.write_object(handle, data, overwrite_hash).await?;

        let stored = self.get_user_object(handle).await?.ok_or_else(|| {
            Error::object_store(handle, "object missing right after it was stored")
        })?;
        if stored.data != data {
            return Err(Error::object_store(handle, "stored object differs from what was written"));
        }
        Ok(())
    }

    async fn write_object(
        &self,
        handle: &str,
        data: &[u8],
        mut overwrite_hash: Option<String>,
    ) -> Result<(), Error> {
        for attempt in 1..=MAX_OBJECT_ATTEMPTS {
            let auth = self.auth_token().await?;
            let resp = match &overwrite_hash {
                None => self.phc.new_object(handle, data, &auth).await?,
                Some(hash) => self.phc.overwrite_object(handle, hash, data, &auth).await?,
            };
            let overwriting = overwrite_hash.is_some();

            match resp {
                StoreObjectResp::Stored { stored_objects } => {
                    self.session().stored_objects = Some(stored_objects);
                    return Ok(());
                }
                StoreObjectResp::NoChanges if overwriting => return Ok(()),
                StoreObjectResp::PleaseRetry => {
                    tracing::debug!(handle, attempt, "Object store asked to retry");
                }
                StoreObjectResp::RetryWithNewAuthToken => {
                    return Err(self.invalidate("object store: RetryWithNewAuthToken"));
                }
                StoreObjectResp::QuotumReached(quotum) => {
                    tracing::warn!(handle, ?quotum, "Object store quotum reached");
                    return Err(Error::QuotumReached {
                        handle: handle.to_string(),
                    });
                }
                StoreObjectResp::MissingHash if !overwriting => {
                    overwrite_hash = Some(self.current_hash(handle).await?);
                }
                StoreObjectResp::HashDidNotMatch if overwriting => {
                    tracing::debug!(handle, attempt, "Object changed underneath us, retrying with its current hash");
                    overwrite_hash = Some(self.current_hash(handle).await?);
                }
                StoreObjectResp::NotFound if overwriting => overwrite_hash = None,
                unexpected => {
                    return Err(Error::object_store(
                        handle,
                        format!("unexpected response {unexpected:?} (overwrite: {overwriting})"),
                    ));
                }
            }
        }
        Err(Error::object_store(
            handle,
            format!("gave up after {MAX_OBJECT_ATTEMPTS} attempts"),
        ))
    }

    async fn current_hash(&self, handle: &str) -> Result<String, Error> {
        self.state()
            .await?
            .stored_objects
            .get(handle)
            .map(|d| d.hash.clone())
            .ok_or_else(|| Error::object_store(handle, "could not find the object"))
    }

    // Entering hubs

    async fn ppp(&self) -> Result<SealedPpp, Error> {
        let auth = self.auth_token().await?;
        match self.phc.ppp(&auth).await? {
            PppResp::Success(ppp) => Ok(ppp),
            PppResp::RetryWithNewAuthToken => Err(self.invalidate("ppp: RetryWithNewAuthToken")),
        }
    }

    /// `None` when PHC asks for a new ppp.
    async fn hhpp(&self, ehpp: SealedEhpp) -> Result<Option<SignedHhpp>, Error> {
        let auth = self.auth_token().await?;
        match self.phc.hhpp(&HhppReq { ehpp }, &auth).await? {
            HhppResp::Success(hhpp) => Ok(Some(hhpp)),
            HhppResp::RetryWithNewPpp => Ok(None),
            HhppResp::RetryWithNewAuthToken => Err(self.invalidate("hhpp: RetryWithNewAuthToken")),
        }
    }

    /// Obtain a signed hashed hub pseudonym package for `hub_id`, bound to the
    /// hub's nonce.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PppRetriesExhausted`] or [`Error::HhppRetriesExhausted`]
    /// when the Transcryptor or PHC asked for a new ppp
    /// [`MAX_ENTER_HUB_ATTEMPTS`] times, and [`Error::FlowInProgress`] if this
    /// hub is already being entered.
    pub async fn enter_hub(
        &self,
        hub_id: &HubId,
        nonce_state: &NonceStatePair,
    ) -> Result<SignedHhpp, Error> {
        let _flight = self.flights.acquire(FlowKey::EnterHub(hub_id.clone()))?;
        self.obtain_hhpp(hub_id, nonce_state).await
    }

    async fn obtain_hhpp(
        &self,
        hub_id: &HubId,
        nonce_state: &NonceStatePair,
    ) -> Result<SignedHhpp, Error> {
        let mut exhausted = Error::PppRetriesExhausted;
        for attempt in 1..=MAX_ENTER_HUB_ATTEMPTS {
            let ehpp_req = EhppReq {
                hub_nonce: nonce_state.nonce.clone(),
                hub: hub_id.clone(),
                ppp: self.ppp().await?,
            };
            let ehpp = match self.transcryptor.ehpp(&ehpp_req).await? {
                EhppResp::Success(ehpp) => ehpp,
                EhppResp::RetryWithNewPpp => {
                    tracing::debug!(hub = %hub_id, attempt, "Transcryptor asked for a new ppp");
                    exhausted = Error::PppRetriesExhausted;
                    continue;
                }
            };
            if let Some(hhpp) = self.hhpp(ehpp).await? {
                return Ok(hhpp);
            }
            tracing::debug!(hub = %hub_id, attempt, "PubHubs Central asked for a new ppp");
            exhausted = Error::HhppRetriesExhausted;
        }
        tracing::warn!(hub = %hub_id, error = %exhausted, "Giving up on entering the hub");
        Err(exhausted)
    }

    /// Run a hub's enter flow and return the Matrix credentials it hands out.
    ///
    /// Use [`HubClient`](crate::HubClient) for `hub`, built from the hub's
    /// [`HubInformation::url`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubEnterRetriesExhausted`] if the hub keeps asking to
    /// restart, and the errors of [`Mss::enter_hub`].
    pub async fn login_to_hub<H: HubApi>(&self, hub: &H, hub_id: &HubId) -> Result<HubAccess, Error> {
        let _flight = self.flights.acquire(FlowKey::EnterHub(hub_id.clone()))?;

        for attempt in 1..=MAX_HUB_LOGIN_ATTEMPTS {
            let nonce_state = hub.enter_start().await?;
            let hhpp = self.obtain_hhpp(hub_id, &nonce_state).await?;
            let req = EnterCompleteReq {
                state: nonce_state.state,
                hhpp,
            };
            match hub.enter_complete(&req).await? {
                EnterCompleteResp::Entered(access) => {
                    tracing::info!(hub = %hub_id, new_user = access.new_user, "Entered hub");
                    return Ok(access);
                }
                EnterCompleteResp::RetryFromStart => {
                    tracing::debug!(hub = %hub_id, attempt, "Hub asked to restart its enter flow");
                }
            }
        }
        Err(Error::HubEnterRetriesExhausted)
    }
}

fn refused(refusal: EnterRefusal) -> EnterOutcome {
    tracing::info!(?refusal, "PubHubs Central refused to let the user in");
    EnterOutcome::Refused(refusal)
}

/// One request per disclosed identifying attribute, carrying the timestamp of
/// the key its stored copy is encrypted under so Auths can return the old key.
fn attr_keys_request(
    identifying: &SignedIdentifyingAttrs,
    existing: Option<&UserSecretObject>,
) -> AttrKeysReq {
    identifying
        .iter()
        .map(|(handle, attr)| {
            let timestamp =
                existing.and_then(|object| object.timestamp_for(&attr.id, &attr.value));
            (
                handle.clone(),
                AttrKeyReq {
                    attr: attr.signed_attr.clone(),
                    timestamp,
                },
            )
        })
        .collect()
}
