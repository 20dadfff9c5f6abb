pub mod cache;
pub mod descriptor;
pub mod dispatcher;
pub mod installer;
pub mod manifest;
pub mod runtime;

pub use cache::PluginCache;
pub use descriptor::PluginDescriptor;
pub use dispatcher::Dispatcher;
