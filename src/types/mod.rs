//! Resource descriptors shared by the device, the backends and the layers.

mod buffer;
mod common;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::Extent3d;
pub use texture::{TextureDescriptor, TextureFormat, TextureRegion, TextureUsage};
