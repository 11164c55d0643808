//! GPU device abstraction for kiln.
//!
//! Everything above this crate talks to the GPU through two object-safe
//! traits: [`Device`] for resource creation and uploads, and [`RenderPass`]
//! for command recording. Both return and accept owned handle types, so no
//! wgpu lifetimes propagate upward.
//!
//! The main components are:
//!
//! - [`Device`] / [`RenderPass`] - traits abstracting GPU operations
//! - Handle types ([`GpuBuffer`], [`GpuTexture`], ...) - can be real or mock,
//!   each carrying a stable identity used as a cache key
//! - State descriptions ([`BlendMode`], [`DepthStencilMode`], [`RasterMode`],
//!   [`SamplerKey`]) - hashable values that feed pipeline memoization
//! - `MockDevice` / `MockPass` - call-recording backends (requires the
//!   `mock` feature)
//! - [`WgpuDevice`] / [`WgpuPass`] - the real wgpu backend
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use kiln_gpu::{BufferDescriptor, BufferUsages, Device, MockDevice};
//!
//! let mock = MockDevice::new();
//! let buffer = mock.create_buffer(&BufferDescriptor {
//!     label: Some("staging"),
//!     size: 1024,
//!     usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
//! });
//!
//! assert_eq!(mock.count_buffer_creates(), 1);
//! assert!(buffer.is_mock());
//! # }
//! ```

pub mod device;
pub mod handle;
#[cfg(feature = "mock")]
pub mod mock;
pub mod state;
pub mod wgpu_backend;

pub use device::*;
pub use handle::*;
#[cfg(feature = "mock")]
pub use mock::*;
pub use state::*;
pub use wgpu_backend::{WgpuDevice, WgpuPass};
