pub mod coverage;
pub mod field;
pub mod geometry;
pub mod location;
pub mod mask;
pub mod names;
pub mod screenshot;
pub mod template;
pub mod traits;
pub mod types;
