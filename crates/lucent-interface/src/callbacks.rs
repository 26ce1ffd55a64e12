use std::sync::Arc;

use anyhow::Result;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::context::{ChannelSetupContext, SetupContext};
use crate::image::{ImageSpec, RenderImage};

/// The random-number generator each worker thread owns for its lifetime.
pub type WorkerRng = Box<dyn RngCore + Send>;

/// Factory for per-channel image buffers; invoked by worker 0 whenever a
/// channel needs a (re)allocated render target.
pub type CreateImageCallback = Arc<dyn Fn(&ImageSpec) -> Arc<dyn RenderImage> + Send + Sync>;

/// Factory for per-worker RNGs, keyed by worker index.
pub type CreateRngCallback = Arc<dyn Fn(usize) -> WorkerRng + Send + Sync>;

/// Default RNG factory: a `SmallRng` seeded from the worker index so that
/// worker streams are decorrelated but reproducible.
pub fn small_rng_factory() -> CreateRngCallback {
    Arc::new(|worker| Box::new(SmallRng::seed_from_u64(0x5eed_c0de ^ ((worker as u64) << 17))))
}

/// Host-supplied hook run by worker 0 whenever the pipeline is negotiated:
/// once globally, then once per display channel.
pub trait SetupCallback: Send {
    fn setup_begin(&mut self, ctx: &SetupContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn setup_display_channel(&mut self, ctx: &ChannelSetupContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}
