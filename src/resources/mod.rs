//! GPU resources owned by layers.
//!
//! - [`Texture`] - A 2D data texture
//! - [`Buffer`] - A vertex or index buffer

mod buffer;
mod texture;

pub use buffer::Buffer;
pub use texture::Texture;
