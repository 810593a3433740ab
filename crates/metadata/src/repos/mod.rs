//! Repository traits for record operations.

pub mod images;

pub use images::ImageRepo;
