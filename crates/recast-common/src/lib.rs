//! Common utilities and data structures used by both Recast and Detour

mod geometry;
mod math;

pub use geometry::*;
pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    #[error("recast error: {0}")]
    Recast(String),

    #[error("detour error: {0}")]
    Detour(String),

    #[error("invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("build worker error: {0}")]
    Worker(String),

    #[cfg(feature = "std")]
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Recast and Detour operations
pub type Result<T> = std::result::Result<T, Error>;
