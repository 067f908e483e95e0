mod hooks;
mod metadata;
mod record;
mod registry;

pub use hooks::*;
pub use metadata::*;
pub use record::*;
pub use registry::*;
