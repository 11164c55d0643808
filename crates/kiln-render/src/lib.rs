//! Kiln rendering engine.
//!
//! Sits between application draw calls and a GPU command-recording context:
//! many small draw requests are accumulated into few large submissions,
//! pipeline-state overrides travel through an explicit push/pop stack, and
//! derived GPU objects (resource sets, pipelines) are memoized instead of
//! being rebuilt per frame.
//!
//! The two entry points are [`SpriteBatch`] for quad/shape batching and
//! [`ForwardRenderer`] for the depth-sorted mesh pass. Both talk to the GPU
//! exclusively through the `kiln_gpu` device traits, so they run unchanged
//! against the mock backend in tests.

pub mod batch;
pub mod camera;
pub mod color;
pub mod defaults;
pub mod effect;
pub mod error;
pub mod forward;
pub mod instances;
pub mod material;
pub mod mesh;
pub mod resource_cache;
pub mod state;
pub mod target;
pub mod texture;

pub use batch::{BatchCapabilities, BatchVertex, SpriteBatch, SpriteBatchDescriptor};
pub use camera::Camera;
pub use color::Color;
pub use defaults::RenderDefaults;
pub use effect::{Effect, EffectDescriptor, EffectLayout, PipelineKey};
pub use error::ProtocolError;
pub use forward::{ForwardRenderer, Renderable};
pub use instances::InstanceBuffer;
pub use material::Material;
pub use mesh::{Mesh, MeshBuilder, MeshVertex};
pub use resource_cache::{ResourceSetCache, ResourceSetKey};
pub use target::RenderTarget;
pub use texture::Texture2d;
