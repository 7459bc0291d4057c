#![forbid(unsafe_code)]

pub mod dag;
pub mod ids;
pub mod model;
pub mod tags;

pub use ids::{IdGenerator, IdGeneratorError, ROOT_VERSION_ID};
