//! Request-scoped identities and their claims.

use std::collections::BTreeSet;

/// Internal permission claims a principal can accumulate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Claim {
    PushPackage,
    DeletePackage,
    Administrator,
    Role(String),
}

impl Claim {
    /// Parses an internal claim name from a role-mapping table entry.
    /// Unrecognized names become plain role claims.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(match name.to_ascii_lowercase().as_str() {
            "push-package" | "package-manager" => Claim::PushPackage,
            "delete-package" => Claim::DeletePackage,
            "administrator" => Claim::Administrator,
            _ => Claim::Role(name.to_string()),
        })
    }
}

/// Who a request was resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(String),
    LocalAdministrator,
}

/// The resolved identity and claim set for one inbound request.
///
/// Produced by the authentication chain, owned by the request context,
/// never persisted.
#[derive(Debug, Clone)]
pub struct Principal {
    identity: Identity,
    claims: BTreeSet<Claim>,
    admin: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            identity: Identity::Anonymous,
            claims: BTreeSet::new(),
            admin: false,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity == Identity::Anonymous
    }

    pub fn is_administrator(&self) -> bool {
        self.admin
    }

    /// Display name for authenticated principals.
    pub fn name(&self) -> Option<&str> {
        match &self.identity {
            Identity::Anonymous => None,
            Identity::User(name) => Some(name),
            Identity::LocalAdministrator => Some("LocalAdministrator"),
        }
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    pub fn has_claim(&self, claim: &Claim) -> bool {
        self.claims.contains(claim)
    }

    /// Administrators may do anything; everyone else needs the explicit
    /// package-modifying claims.
    pub fn can_push(&self) -> bool {
        self.admin || self.claims.contains(&Claim::PushPackage)
    }

    pub fn can_delete(&self) -> bool {
        self.admin || self.claims.contains(&Claim::DeletePackage)
    }

    /// Sets the identity; only the first resolving strategy calls this.
    pub(crate) fn resolve_as(&mut self, identity: Identity, admin: bool) {
        self.identity = identity;
        self.admin = self.admin || admin;
    }

    /// Appends a claim. Granting `Administrator` also flips the admin
    /// flag, whatever identity stands.
    pub(crate) fn grant(&mut self, claim: Claim) {
        if claim == Claim::Administrator {
            self.admin = true;
        }
        self.claims.insert(claim);
    }
}
