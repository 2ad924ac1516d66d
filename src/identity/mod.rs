//! Identity collaborators: who published an event, and re-establishing that
//! identity when the event is received.
//!
//! Token validation itself is external; [`TokenValidator`] is the seam.

use std::fmt;
use std::sync::RwLock;

/// An authenticated user, parsed from a `DOMAIN\login` identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    login_name: String,
    domain: String,
}

impl User {
    /// Parse `DOMAIN\login`. Without a backslash the domain is empty.
    pub fn new(login_identity: &str) -> Self {
        match login_identity.split_once('\\') {
            Some((domain, login)) => Self {
                login_name: login.to_string(),
                domain: domain.to_string(),
            },
            None => Self {
                login_name: login_identity.to_string(),
                domain: String::new(),
            },
        }
    }

    pub fn login_name(&self) -> &str {
        &self.login_name
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            f.write_str(&self.login_name)
        } else {
            write!(f, "{}\\{}", self.domain, self.login_name)
        }
    }
}

/// Supplies the identity of the current caller.
pub trait UserProvider: Send + Sync {
    /// The authenticated user for the current request, if any.
    fn get_user(&self) -> Option<User>;

    /// The token used for the current request (not a newly minted one).
    fn get_token(&self) -> String;
}

/// A [`UserProvider`] whose identity can be (re)established from a token.
pub trait IdentityProvider: UserProvider {
    /// Validate `token` and make it the current identity. Returns whether it was valid.
    fn read_user_from_token(&self, token: &str) -> bool;
}

/// Validates a raw token and extracts its user.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Option<User>;
}

/// No user, empty token.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousUser;

impl UserProvider for AnonymousUser {
    fn get_user(&self) -> Option<User> {
        None
    }

    fn get_token(&self) -> String {
        String::new()
    }
}

/// A fixed user and token, for service accounts and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user: Option<User>,
    token: String,
}

impl StaticIdentity {
    pub fn new(user: &str, token: impl Into<String>) -> Self {
        Self {
            user: Some(User::new(user)),
            token: token.into(),
        }
    }
}

impl UserProvider for StaticIdentity {
    fn get_user(&self) -> Option<User> {
        self.user.clone()
    }

    fn get_token(&self) -> String {
        self.token.clone()
    }
}

#[derive(Default)]
struct CurrentIdentity {
    token: String,
    user: Option<User>,
}

/// Holds the identity read from the most recent token.
///
/// The token is kept even when it fails validation; only the user is cleared.
pub struct UserFromAuthenticationToken<V> {
    validator: V,
    current: RwLock<CurrentIdentity>,
}

impl<V: TokenValidator> UserFromAuthenticationToken<V> {
    pub fn new(validator: V) -> Self {
        Self {
            validator,
            current: RwLock::new(CurrentIdentity::default()),
        }
    }
}

impl<V: TokenValidator> UserProvider for UserFromAuthenticationToken<V> {
    fn get_user(&self) -> Option<User> {
        self.current
            .read()
            .ok()
            .and_then(|current| current.user.clone())
    }

    fn get_token(&self) -> String {
        self.current
            .read()
            .map(|current| current.token.clone())
            .unwrap_or_default()
    }
}

impl<V: TokenValidator> IdentityProvider for UserFromAuthenticationToken<V> {
    fn read_user_from_token(&self, token: &str) -> bool {
        let user = self.validator.validate(token);
        let valid = user.is_some();
        if let Ok(mut current) = self.current.write() {
            current.token = token.to_string();
            current.user = user;
        }
        valid
    }
}
