//! Catalog data and the storage collaborator interface.

mod local;
mod remote;
mod store;
mod types;

pub use local::LocalStore;
pub use remote::RemoteStore;
pub use store::CatalogStore;
pub use types::{Activity, CatalogSnapshot, Category, Download};
