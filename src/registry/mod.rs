pub mod client;
pub mod versions;

pub use client::RegistryClient;
pub use versions::VersionSet;
