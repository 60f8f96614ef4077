//! Callbacks into the embedding renderer.

/// Notifications raised from fetch workers and the GPU sync engine.
///
/// Both may be called from any thread. Implementations should only flag work
/// for the render loop, never touch the device.
pub trait RendererHooks: Send + Sync + 'static {
    /// New data is ready and `sync_gpu` should run soon.
    fn request_upload(&self) {}

    /// What is on screen is stale and the next frame should redraw.
    fn invalidate_frame(&self) {}
}

/// Hooks that ignore every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RendererHooks for NoopHooks {}
