pub mod expansion;
pub mod params;
pub mod spec;

pub use expansion::*;
pub use params::*;
pub use spec::*;
