use std::future::Future;

use crate::auths::{
    AttrKeysReq, AttrKeysResp, AuthCompleteReq, AuthProof, AuthStartReq, AuthTask, CompleteResp,
    StartResp, WelcomeResp as AuthsWelcomeResp,
};
use crate::error::Error;
use crate::hub::{EnterCompleteReq, EnterCompleteResp, InfoResp};
use crate::phc::{
    EnterReq, EnterResp, GetObjectResp, HhppReq, HhppResp, PppResp, RefreshResp, StateResp,
    StoreObjectResp, UserObjectDetails, WelcomeResp as PhcWelcomeResp,
};
use crate::transcryptor::{EhppReq, EhppResp};
use crate::types::{AuthToken, NonceStatePair};

/// Authentication Server endpoints.
///
/// Implemented over HTTP by [`AuthServer`](crate::AuthServer); tests and
/// embedders may provide their own.
pub trait AuthServerApi: Send + Sync {
    /// Supported attribute types.
    fn welcome(&self) -> impl Future<Output = Result<AuthsWelcomeResp, Error>> + Send;

    fn auth_start(
        &self,
        req: &AuthStartReq,
    ) -> impl Future<Output = Result<StartResp, Error>> + Send;

    fn auth_complete(
        &self,
        req: &AuthCompleteReq,
    ) -> impl Future<Output = Result<CompleteResp, Error>> + Send;

    /// Attribute keys for the given signed identifying attributes.
    fn attr_keys(
        &self,
        req: &AttrKeysReq,
    ) -> impl Future<Output = Result<AttrKeysResp, Error>> + Send;
}

/// PubHubs Central endpoints.
///
/// Methods map one-to-one onto endpoints; token refresh and retry loops live
/// in [`Mss`](crate::Mss).
pub trait PhcApi: Send + Sync {
    fn welcome(&self) -> impl Future<Output = Result<PhcWelcomeResp, Error>> + Send;

    /// Register or log in. `auth` is sent when no identifying attribute is given.
    fn enter(
        &self,
        req: &EnterReq,
        auth: Option<&AuthToken>,
    ) -> impl Future<Output = Result<EnterResp, Error>> + Send;

    /// Exchange an expired auth token for a fresh one.
    fn refresh(&self, auth: &AuthToken) -> impl Future<Output = Result<RefreshResp, Error>> + Send;

    fn state(&self, auth: &AuthToken) -> impl Future<Output = Result<StateResp, Error>> + Send;

    /// Download an object. Authorized by the hmac in `details`, not by an auth token.
    fn get_object(
        &self,
        details: &UserObjectDetails,
    ) -> impl Future<Output = Result<GetObjectResp, Error>> + Send;

    fn new_object(
        &self,
        handle: &str,
        data: &[u8],
        auth: &AuthToken,
    ) -> impl Future<Output = Result<StoreObjectResp, Error>> + Send;

    fn overwrite_object(
        &self,
        handle: &str,
        overwrite_hash: &str,
        data: &[u8],
        auth: &AuthToken,
    ) -> impl Future<Output = Result<StoreObjectResp, Error>> + Send;

    /// Request a sealed polymorphic pseudonym package.
    fn ppp(&self, auth: &AuthToken) -> impl Future<Output = Result<PppResp, Error>> + Send;

    /// Have PHC sign the hashed hub pseudonym package for an ehpp.
    fn hhpp(
        &self,
        req: &HhppReq,
        auth: &AuthToken,
    ) -> impl Future<Output = Result<HhppResp, Error>> + Send;
}

pub trait TranscryptorApi: Send + Sync {
    /// Turn a ppp into an encrypted hub pseudonym package for one hub.
    fn ehpp(&self, req: &EhppReq) -> impl Future<Output = Result<EhppResp, Error>> + Send;
}

pub trait HubApi: Send + Sync {
    fn info(&self) -> impl Future<Output = Result<InfoResp, Error>> + Send;

    fn enter_start(&self) -> impl Future<Output = Result<NonceStatePair, Error>> + Send;

    fn enter_complete(
        &self,
        req: &EnterCompleteReq,
    ) -> impl Future<Output = Result<EnterCompleteResp, Error>> + Send;
}

/// Consumer-provided attribute disclosure (e.g. a Yivi session).
///
/// Given the task from `auth/start`, run the disclosure with the user and
/// return the proof to submit to `auth/complete`.
///
/// # Example
///
/// ```rust,ignore
/// impl DisclosureSession for YiviFrontend {
///     async fn disclose(&self, task: &AuthTask) -> Result<AuthProof, Error> {
///         let AuthTask::Yivi { disclosure_request, yivi_requestor_url } = task;
///         let disclosure = self.run_session(yivi_requestor_url, disclosure_request).await?;
///         Ok(AuthProof::Yivi { disclosure })
///     }
/// }
/// ```
pub trait DisclosureSession: Send + Sync {
    fn disclose(&self, task: &AuthTask) -> impl Future<Output = Result<AuthProof, Error>> + Send;
}
