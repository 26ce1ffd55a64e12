//! Display channels and the channel registry.
//!
//! A channel pairs a camera with an image display and owns a small ring of
//! frame buffers (`pipeline_depth` deep, default 2). Channels are
//! append-only: once created they keep their id for the life of the engine,
//! and deactivation simply takes them out of the render rotation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use lucent_interface::{Camera, ImageDisplay, ImageSpec, RenderImage};

use crate::error::EngineError;

pub const DEFAULT_PIPELINE_DEPTH: usize = 2;

/// Index of a channel within the registry, stable for the engine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

struct ChannelState {
    stereo: bool,
    xres: u32,
    yres: u32,
    pipeline_depth: usize,
    /// The spec frame buffers are allocated with. Tracks the display
    /// resolution only when a resolution change asks for new buffers.
    buffer_spec: ImageSpec,
}

pub struct Channel {
    id: ChannelId,
    display: RwLock<Arc<dyn ImageDisplay>>,
    camera: RwLock<Arc<dyn Camera>>,
    state: Mutex<ChannelState>,
    active: AtomicBool,
    /// Frame buffer ring; slot `serial % pipeline_depth` is the render
    /// target for that frame. Slots are lazily (re)allocated when the
    /// resolution changes.
    images: Mutex<Vec<Option<Arc<dyn RenderImage>>>>,
}

impl Channel {
    fn new(
        id: ChannelId,
        display: Arc<dyn ImageDisplay>,
        camera: Arc<dyn Camera>,
        stereo: bool,
        xres: u32,
        yres: u32,
    ) -> Self {
        Self {
            id,
            display: RwLock::new(display),
            camera: RwLock::new(camera),
            state: Mutex::new(ChannelState {
                stereo,
                xres,
                yres,
                pipeline_depth: DEFAULT_PIPELINE_DEPTH,
                buffer_spec: ImageSpec::new(stereo, xres, yres),
            }),
            active: AtomicBool::new(true),
            images: Mutex::new(vec![None; DEFAULT_PIPELINE_DEPTH]),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn camera(&self) -> Arc<dyn Camera> {
        Arc::clone(&self.camera.read())
    }

    pub fn set_camera(&self, camera: Arc<dyn Camera>) {
        let spec = self.spec();
        camera.set_aspect_ratio(spec.xres as f64 / spec.yres as f64);
        *self.camera.write() = camera;
    }

    pub fn display(&self) -> Arc<dyn ImageDisplay> {
        Arc::clone(&self.display.read())
    }

    pub fn set_display(&self, display: Arc<dyn ImageDisplay>) {
        *self.display.write() = display;
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn spec(&self) -> ImageSpec {
        let state = self.state.lock();
        ImageSpec::new(state.stereo, state.xres, state.yres)
    }

    pub fn pipeline_depth(&self) -> usize {
        self.state.lock().pipeline_depth
    }

    pub fn set_pipeline_depth(&self, depth: usize) -> Result<(), EngineError> {
        if depth == 0 {
            return Err(EngineError::invalid("pipeline depth must be at least 1"));
        }
        self.state.lock().pipeline_depth = depth;
        let mut images = self.images.lock();
        images.clear();
        images.resize(depth, None);
        Ok(())
    }

    /// Updates the resolution and propagates the new aspect ratio to the
    /// camera. With `change_pipeline` the buffers at the old resolution are
    /// replaced lazily the next time they come up as a render target;
    /// without it the existing buffers are kept as they are.
    pub fn change_resolution(
        &self,
        stereo: bool,
        xres: u32,
        yres: u32,
        change_pipeline: bool,
    ) -> Result<(), EngineError> {
        if xres == 0 || yres == 0 {
            return Err(EngineError::invalid("resolution must be nonzero"));
        }
        {
            let mut state = self.state.lock();
            state.stereo = stereo;
            state.xres = xres;
            state.yres = yres;
            if change_pipeline {
                state.buffer_spec = ImageSpec::new(stereo, xres, yres);
            }
        }
        self.camera.read().set_aspect_ratio(xres as f64 / yres as f64);
        Ok(())
    }

    /// Returns the buffer for `slot`, allocating (or reallocating after a
    /// resolution change) through `create_image` when the stored one does not
    /// match the buffer spec.
    pub fn image_for_slot(
        &self,
        slot: usize,
        create_image: &dyn Fn(&ImageSpec) -> Arc<dyn RenderImage>,
    ) -> Arc<dyn RenderImage> {
        let spec = self.state.lock().buffer_spec;
        let mut images = self.images.lock();
        let len = images.len();
        let entry = &mut images[slot % len];
        match entry {
            Some(image) if image.spec() == spec => Arc::clone(image),
            _ => {
                let image = create_image(&spec);
                *entry = Some(Arc::clone(&image));
                image
            }
        }
    }

    /// Returns the buffer for `slot` without allocating.
    pub fn existing_image(&self, slot: usize) -> Option<Arc<dyn RenderImage>> {
        let images = self.images.lock();
        images[slot % images.len()].clone()
    }
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<Vec<Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel and returns its id. The write lock serializes
    /// concurrent creations so ids are dense and unique.
    pub fn create(
        &self,
        display: Arc<dyn ImageDisplay>,
        camera: Arc<dyn Camera>,
        stereo: bool,
        xres: u32,
        yres: u32,
    ) -> Result<ChannelId, EngineError> {
        if xres == 0 || yres == 0 {
            return Err(EngineError::invalid("resolution must be nonzero"));
        }
        camera.set_aspect_ratio(xres as f64 / yres as f64);
        let mut channels = self.channels.write();
        let id = ChannelId(channels.len());
        channels.push(Arc::new(Channel::new(id, display, camera, stereo, xres, yres)));
        Ok(id)
    }

    pub fn get(&self, id: ChannelId) -> Result<Arc<Channel>, EngineError> {
        self.channels
            .read()
            .get(id.0)
            .cloned()
            .ok_or(EngineError::UnknownChannel(id.0))
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Snapshot of all channels, active or not.
    pub fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels.read().clone()
    }
}
