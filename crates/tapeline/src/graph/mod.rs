pub mod query;
pub mod store;
pub mod viz;

pub use store::{Graph, Node, NodeId};
