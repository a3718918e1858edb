pub mod emblems;
pub mod engine;
pub mod paths;
pub mod scheduler;
pub mod summary;
pub mod walker;
