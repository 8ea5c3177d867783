mod dense;
pub mod lstsq;
pub mod mcr;
pub mod svd;
mod utils;

pub use utils::Direction;
pub use utils::Normalize;
