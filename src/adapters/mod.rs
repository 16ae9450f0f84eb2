//! Port implementations: live adapters for real runs and fixed adapters for
//! reproducible tests.

pub mod fixed;
pub mod live;
