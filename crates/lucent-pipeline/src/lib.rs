//! Lucent Pipeline
//! ================
//! Stock implementations of the pipeline collaborator traits: load
//! balancers, a tiled image traverser, pixel samplers, a flat renderer,
//! shared frame buffers and image sinks, plus a small factory that builds
//! any of them from a `name(-flag value)` text spec.

pub mod balance;
pub mod display;
pub mod factory;
pub mod image;
pub mod render;
pub mod sample;
pub mod scene;
pub mod traverse;

pub use balance::{ContiguousLoadBalancer, CyclicLoadBalancer};
pub use display::NullImageDisplay;
pub use factory::FactoryError;
pub use image::AtomicRgbaImage;
pub use render::{FlatRenderer, NoShadows};
pub use sample::{CenterSampleGenerator, SimplePixelSampler, UniformSampleGenerator};
pub use scene::{PinholeCamera, StaticScene};
pub use traverse::{TiledImageTraverser, DEFAULT_TILE_SIZE};
