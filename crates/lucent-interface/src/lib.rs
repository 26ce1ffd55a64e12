//! Lucent Interface
//! =================
//! Collaborator contracts for the Lucent rendering pipeline. The engine drives
//! every frame through a fixed sequence of phases and calls out to pluggable
//! collaborators (camera, scene, renderer, load balancer, image traverser and
//! friends) through the traits defined here. Implementations live elsewhere;
//! this crate only fixes the boundary the scheduler depends on.

pub mod callbacks;
pub mod components;
pub mod context;
pub mod frame;
pub mod image;

pub use callbacks::{
    small_rng_factory, CreateImageCallback, CreateRngCallback, SetupCallback, WorkerRng,
};
pub use components::{
    Camera, Color, IdleMode, ImageDisplay, ImageTraverser, LoadBalancer, PixelSampler, Ray,
    Renderer, SampleGenerator, Scene, ShadowAlgorithm, Tile,
};
pub use context::{ChannelSetupContext, DisplayContext, PreprocessContext, RenderContext, SetupContext};
pub use frame::FrameState;
pub use image::{ImageSpec, RenderImage};
