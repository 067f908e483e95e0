mod driver;
mod provider;
mod query;
mod repository;

pub use driver::*;
pub use provider::*;
pub use query::*;
pub use repository::*;
