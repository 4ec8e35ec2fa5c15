//! The individual identity-resolution strategies.

use std::collections::HashMap;

use tracing::debug;
use wharf_core::{error::FeedError, FeedResult};
use wharf_index::UserStore;

use crate::{
    principal::{Claim, Identity, Principal},
    request::FeedRequest,
};

/// One identity-resolution step.
///
/// Strategies run synchronously on the request thread and mutate the
/// principal in place: identity resolvers only claim an identity while the
/// principal is still anonymous, claim granters append regardless.
pub trait AuthStrategy: Send + Sync {
    fn apply(&self, request: &FeedRequest, principal: &mut Principal) -> FeedResult<()>;
}

/// Resolves the principal from a presented API key via the user store.
///
/// A presented but unknown key is an explicit error; an absent key simply
/// resolves nothing and lets the rest of the chain run.
pub struct ApiKeyStrategy {
    users: UserStore,
}

impl ApiKeyStrategy {
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

impl AuthStrategy for ApiKeyStrategy {
    fn apply(&self, request: &FeedRequest, principal: &mut Principal) -> FeedResult<()> {
        let key = match request.api_key() {
            Some(key) => key,
            None => return Ok(()),
        };
        if !principal.is_anonymous() {
            return Ok(());
        }

        let user = match self.users.authenticate(key) {
            Ok(user) => user,
            Err(FeedError::UserNotFound) => return Err(FeedError::InvalidApiKey),
            Err(err) => return Err(err),
        };

        let admin = self.users.is_administrator(&user);
        debug!("resolved API key to user '{}'", user.username);
        principal.resolve_as(Identity::User(user.username.clone()), admin);
        principal.grant(Claim::PushPackage);
        principal.grant(Claim::DeletePackage);
        for role in user.roles {
            if let Some(claim) = Claim::parse(&role) {
                principal.grant(claim);
            }
        }
        Ok(())
    }
}

/// Resolves loopback-origin requests as an administrator, independent of
/// any presented key.
pub struct LocalRequestStrategy;

impl AuthStrategy for LocalRequestStrategy {
    fn apply(&self, request: &FeedRequest, principal: &mut Principal) -> FeedResult<()> {
        if request.is_local() && principal.is_anonymous() {
            debug!("resolved loopback request as local administrator");
            principal.resolve_as(Identity::LocalAdministrator, true);
            principal.grant(Claim::Administrator);
        }
        Ok(())
    }
}

/// Grants package-modifying claims to otherwise-anonymous callers.
pub struct AnonymousPackageManagerStrategy;

impl AuthStrategy for AnonymousPackageManagerStrategy {
    fn apply(&self, _request: &FeedRequest, principal: &mut Principal) -> FeedResult<()> {
        if principal.is_anonymous() {
            principal.grant(Claim::PushPackage);
            principal.grant(Claim::DeletePackage);
        }
        Ok(())
    }
}

/// Translates the request's external role names into internal claims and
/// appends them to whatever principal stands, anonymous included. Never
/// resolves an identity.
pub struct RoleMappingStrategy {
    mappings: HashMap<String, Vec<Claim>>,
}

impl RoleMappingStrategy {
    pub fn new(raw: &HashMap<String, Vec<String>>) -> Self {
        let mappings = raw
            .iter()
            .map(|(role, claims)| {
                let claims = claims.iter().filter_map(|c| Claim::parse(c)).collect();
                (role.to_ascii_lowercase(), claims)
            })
            .collect();
        Self { mappings }
    }
}

impl AuthStrategy for RoleMappingStrategy {
    fn apply(&self, request: &FeedRequest, principal: &mut Principal) -> FeedResult<()> {
        for role in request.external_roles() {
            if let Some(claims) = self.mappings.get(&role.to_ascii_lowercase()) {
                for claim in claims {
                    principal.grant(claim.clone());
                }
            }
        }
        Ok(())
    }
}
