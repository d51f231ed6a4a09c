pub mod body;
pub mod handlers;
pub mod routes;

pub use body::*;
pub use handlers::*;
pub use routes::*;
