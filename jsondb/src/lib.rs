pub mod collection;
pub mod config;
pub mod error;
pub mod filter;
pub mod fs;
pub mod schema;
pub mod store;
pub mod validation;
pub mod writer;

pub use collection::{Collection, Pending, Record};
pub use config::{CollectionConfig, StoreConfig};
pub use error::{JsonDbError, Result, ValidationErrors, ValidationIssue};
pub use filter::Filter;
pub use schema::Schema;
pub use store::Store;
pub use validation::{SchemaValidator, ValidationMode, Validator};
pub use writer::{WriteQueue, WriteTicket};
