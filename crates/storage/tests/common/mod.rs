pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{can_bind_localhost, collect, png_bytes, stage};
