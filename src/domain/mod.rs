//! Domain layer - Core data model and port definitions
//!
//! This module defines the OSD data model and the traits (ports) that
//! external collaborators implement, following hexagonal architecture
//! principles.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
