//! Built-in problem models used by the integration tests and the
//! simulation driver.

pub mod line_explore;
pub mod tiger;

pub use line_explore::{AddObstacle, LineExplore};
pub use tiger::Tiger;
