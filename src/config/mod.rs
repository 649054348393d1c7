pub mod loader;
pub mod models;

pub use loader::{RouteMap, load_route_map};
pub use models::*;
