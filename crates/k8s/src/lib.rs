//! Shared Kubernetes utilities: resource identity and kind to plural mapping.

mod identity;
mod plural;

pub use identity::{split_api_version, IdentityError, ResourceIdentity};
pub use plural::{plural_from_kind, well_known_plural};
