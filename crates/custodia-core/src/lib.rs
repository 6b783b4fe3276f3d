pub mod error;
pub mod ids;
pub mod types;

pub use error::*;
pub use ids::*;
pub use types::*;
