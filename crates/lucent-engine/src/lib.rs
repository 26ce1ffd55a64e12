//! Lucent Engine
//! ==============
//! The real-time frame pipeline scheduler. A resizable pool of worker
//! threads advances through a fixed sequence of barrier-separated phases
//! every frame: transactions, preprocess, animation and pre-render
//! callbacks, a change-flag reduction, the render itself, one-shot dispatch
//! and display. All mutation of live render state funnels through the
//! transaction queue, applied by worker 0 between frames, so collaborators
//! never observe a half-updated pipeline.
//!
//! The pool size can change while rendering: [`Engine::change_num_workers`]
//! records the wish, and the transition commits at the next frame boundary
//! with every worker parked at a dedicated rendezvous.

pub mod callback;
pub mod channel;
pub mod engine;
pub mod error;
pub mod sync;
pub mod time;
pub mod transaction;

pub use callback::{CallbackHandle, OneShotWhence};
pub use channel::{Channel, ChannelId, DEFAULT_PIPELINE_DEPTH};
pub use engine::{Engine, EngineOptions};
pub use error::EngineError;
pub use time::TimeMode;
pub use transaction::{TransactionId, TransactionPolicy};
