use crate::components::{
    Camera, LoadBalancer, PixelSampler, Renderer, SampleGenerator, Scene, ShadowAlgorithm,
};
use crate::frame::FrameState;
use crate::image::ImageSpec;

/// Handed to scene and camera preprocess calls; `(proc, num_procs)` lets the
/// collaborator parallelize itself across the live worker count.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessContext<'a> {
    pub proc: usize,
    pub num_procs: usize,
    pub frame: &'a FrameState,
}

/// Everything a render-phase collaborator needs for one channel of one frame.
pub struct RenderContext<'a> {
    pub channel: usize,
    pub proc: usize,
    pub num_procs: usize,
    pub frame: &'a FrameState,
    /// OR-reduction of every change report for this frame.
    pub frame_changed: bool,
    /// True only on the first frame after rendering began.
    pub first_frame: bool,
    pub camera: &'a dyn Camera,
    pub scene: &'a dyn Scene,
    pub load_balancer: &'a dyn LoadBalancer,
    pub pixel_sampler: &'a dyn PixelSampler,
    pub renderer: &'a dyn Renderer,
    pub shadow_algorithm: &'a dyn ShadowAlgorithm,
    pub sample_generator: &'a dyn SampleGenerator,
}

/// Context for pipeline-wide setup work.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext {
    pub num_channels: usize,
    pub proc: usize,
    pub num_procs: usize,
}

/// Per-channel variant of [`SetupContext`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelSetupContext {
    pub channel: usize,
    pub num_channels: usize,
    pub proc: usize,
    pub num_procs: usize,
    pub spec: ImageSpec,
    pub pipeline_depth: usize,
}

/// Context for handing a completed image to its display.
#[derive(Debug, Clone, Copy)]
pub struct DisplayContext {
    pub proc: usize,
    pub num_procs: usize,
    /// Index of the displayed buffer within the channel's image set.
    pub frame_index: usize,
    pub pipeline_depth: usize,
}
