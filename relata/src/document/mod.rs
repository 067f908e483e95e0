mod driver;
mod provider;
mod repository;

pub use driver::*;
pub use provider::*;
pub use repository::*;
