//! URIs with a fixed meaning for DataShare.

/// The default base IRI of all DataShare namespaces.
pub const DEFAULT_NAMESPACE_BASE: &str = "http://datashare.local/rdf/";

/// The datatype IRI of integer literals.
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

/// Builds and classifies the URIs of the DataShare namespaces.
///
/// All namespaces hang off a single base IRI:
/// - `<base>me` is the root of the local node, `<base>me/<device>` a local device.
/// - `<base>user/<account>[/<path>]` is the namespace of another account.
/// - `<base>feed/<feed>[/<path>]` is the namespace of a group feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespaces {
    base: String,
}

/// The classification of a URI by [Namespaces::classify].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceRef<'uri> {
    /// The root of the local node.
    SelfRoot,
    /// A device of the local node.
    SelfDevice(&'uri str),
    /// The namespace of an account, optionally with a sub-path.
    User {
        account: &'uri str,
        path: Option<&'uri str>,
    },
    /// The namespace of a feed, optionally with a sub-path.
    Feed {
        feed: &'uri str,
        path: Option<&'uri str>,
    },
    /// Not a DataShare namespace.
    Foreign,
}

impl Namespaces {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The base IRI. Also used as the protocol namespace on the wire.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn me(&self) -> String {
        format!("{}me", self.base)
    }

    pub fn device(&self, device: &str) -> String {
        format!("{}me/{device}", self.base)
    }

    pub fn user(&self, account: &str) -> String {
        format!("{}user/{account}", self.base)
    }

    pub fn feed(&self, feed: &str) -> String {
        format!("{}feed/{feed}", self.base)
    }

    /// The predicate of permission grants: `(subject, has-permission, grantee)`.
    pub fn has_permission(&self) -> String {
        format!("{}has-permission", self.base)
    }

    /// Classifies `uri`.
    ///
    /// ```
    /// use datashare_model::vocab::{NamespaceRef, Namespaces};
    ///
    /// let ns = Namespaces::default();
    /// assert_eq!(ns.classify(&ns.me()), NamespaceRef::SelfRoot);
    /// assert_eq!(
    ///     ns.classify("http://datashare.local/rdf/user/bob/phone"),
    ///     NamespaceRef::User { account: "bob", path: Some("phone") }
    /// );
    /// ```
    pub fn classify<'uri>(&self, uri: &'uri str) -> NamespaceRef<'uri> {
        let Some(rest) = uri.strip_prefix(self.base.as_str()) else {
            return NamespaceRef::Foreign;
        };

        if rest == "me" {
            return NamespaceRef::SelfRoot;
        }
        if let Some(device) = rest.strip_prefix("me/") {
            return match device {
                "" => NamespaceRef::SelfRoot,
                device => NamespaceRef::SelfDevice(device),
            };
        }
        if let Some((account, path)) = rest.strip_prefix("user/").and_then(split_owner) {
            return NamespaceRef::User { account, path };
        }
        if let Some((feed, path)) = rest.strip_prefix("feed/").and_then(split_owner) {
            return NamespaceRef::Feed { feed, path };
        }
        NamespaceRef::Foreign
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE_BASE)
    }
}

fn split_owner(rest: &str) -> Option<(&str, Option<&str>)> {
    let (owner, path) = match rest.split_once('/') {
        Some((owner, "")) => (owner, None),
        Some((owner, path)) => (owner, Some(path)),
        None => (rest, None),
    };
    (!owner.is_empty()).then_some((owner, path))
}
