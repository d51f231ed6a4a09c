pub mod coerce;
pub mod generate;
pub mod query_schema;
pub mod reflect;
pub mod validate;

pub use coerce::*;
pub use generate::*;
pub use query_schema::*;
pub use reflect::*;
pub use validate::*;
