pub mod node;
pub mod primitives;

pub use node::*;
pub use primitives::*;
