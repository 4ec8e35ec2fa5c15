//! Conditional assembly and evaluation of the authentication chain.

use wharf_config::FeedSettings;
use wharf_core::FeedResult;
use wharf_index::UserStore;

use crate::{
    principal::Principal,
    request::FeedRequest,
    strategies::{
        AnonymousPackageManagerStrategy, ApiKeyStrategy, AuthStrategy, LocalRequestStrategy,
        RoleMappingStrategy,
    },
};

/// Fixed-order, conditionally-populated sequence of strategies, assembled
/// once from the settings snapshot at startup.
///
/// Evaluation is top to bottom: the first strategy to resolve a
/// non-anonymous principal wins the identity, claim-granting strategies
/// still run afterwards, and role mapping always runs last. A request no
/// strategy claims proceeds as anonymous.
pub struct AuthenticationChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthenticationChain {
    pub fn assemble(settings: &FeedSettings, users: UserStore) -> Self {
        let mut strategies: Vec<Box<dyn AuthStrategy>> =
            vec![Box::new(ApiKeyStrategy::new(users))];

        if settings.handle_local_requests_as_admin {
            strategies.push(Box::new(LocalRequestStrategy));
        }
        if settings.allow_anonymous_package_changes {
            strategies.push(Box::new(AnonymousPackageManagerStrategy));
        }
        if settings.role_mappings_enabled() {
            strategies.push(Box::new(RoleMappingStrategy::new(&settings.role_mappings)));
        }

        Self { strategies }
    }

    /// Resolves the principal for one inbound request.
    pub fn authenticate(&self, request: &FeedRequest) -> FeedResult<Principal> {
        let mut principal = Principal::anonymous();
        for strategy in &self.strategies {
            strategy.apply(request, &mut principal)?;
        }
        Ok(principal)
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }
}
