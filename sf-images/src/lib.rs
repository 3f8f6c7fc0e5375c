pub mod cache;
pub mod derive;
pub mod resolver;
pub mod transcode;

pub use cache::ImageCache;
pub use derive::{derive_disk, DiskDerivation};
pub use resolver::{NameResolver, ResolverRegistry};
