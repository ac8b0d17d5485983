//! Shared GPU device state.
//!
//! One wgpu device serves every editor instance. Instances clone the
//! `Arc<GpuContext>` and come back here when they observe device loss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EditorError, EditorResult};

use super::compositor::GpuCompositor;
use super::renderer::{GpuContext, GpuOptions};

/// Process-wide device context, created lazily on first use.
pub struct DeviceContext {
    options: GpuOptions,
    current: RwLock<Option<Arc<GpuContext>>>,
    generation: AtomicU64,
}

impl DeviceContext {
    pub fn new(options: GpuOptions) -> Self {
        Self {
            options,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Get or create the shared device.
    ///
    /// Creation also builds the compositor pipelines once, so shader or
    /// pipeline errors fail initialization instead of the first frame.
    pub fn initialize(&self) -> EditorResult<Arc<GpuContext>> {
        if let Some(ctx) = self.current.read().as_ref() {
            if !ctx.is_lost() {
                return Ok(Arc::clone(ctx));
            }
        }

        let mut current = self.current.write();
        if let Some(ctx) = current.as_ref() {
            if !ctx.is_lost() {
                return Ok(Arc::clone(ctx));
            }
        }

        let ctx = self.create_context()?;
        *current = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Shared device, if one has been created.
    pub fn get(&self) -> Option<Arc<GpuContext>> {
        self.current.read().clone()
    }

    /// Replace a lost device.
    ///
    /// `stale_generation` is the generation the caller was rendering with.
    /// If another caller already replaced it, the newer device is returned
    /// and no second restart happens.
    pub fn reinitialize(&self, stale_generation: u64) -> EditorResult<Arc<GpuContext>> {
        let mut current = self.current.write();
        if let Some(ctx) = current.as_ref() {
            if ctx.generation() != stale_generation && !ctx.is_lost() {
                log::debug!(
                    "[GPU] Device already reinitialized (generation {} -> {})",
                    stale_generation,
                    ctx.generation()
                );
                return Ok(Arc::clone(ctx));
            }
        }

        log::warn!(
            "[GPU] Reinitializing device after loss (generation {})",
            stale_generation
        );
        *current = None;
        let ctx = self.create_context()?;
        *current = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    fn create_context(&self) -> EditorResult<Arc<GpuContext>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("[GPU] Initializing shared device (generation {})...", generation);

        let ctx = Arc::new(GpuContext::new_blocking(self.options, generation)?);
        GpuCompositor::new(Arc::clone(&ctx))
            .map_err(|e| EditorError::Init(format!("Compositor pipelines: {}", e)))?;

        log::info!("[GPU] Shared device ready on {}", ctx.adapter_name());
        Ok(ctx)
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    /// Latest device generation handed out (0 before initialization).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Release the device. Instances holding clones keep it alive until
    /// they drop them.
    pub fn shutdown(&self) {
        if self.current.write().take().is_some() {
            log::info!("[GPU] Shared device shut down");
        }
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new(GpuOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_state() {
        let devices = DeviceContext::default();
        assert!(!devices.is_initialized());
        assert!(devices.get().is_none());
        assert_eq!(devices.generation(), 0);
        devices.shutdown();
    }

    #[test]
    fn test_initialize_is_shared_or_init_error() {
        // Headless CI machines may have no adapter at all.
        let devices = DeviceContext::default();
        match devices.initialize() {
            Ok(first) => {
                let second = devices.initialize().unwrap();
                assert!(Arc::ptr_eq(&first, &second));
                assert_eq!(first.generation(), 1);

                first.mark_lost();
                let replaced = devices.reinitialize(first.generation()).unwrap();
                assert_eq!(replaced.generation(), 2);
                // A second observer of the same loss gets the new device
                let again = devices.reinitialize(first.generation()).unwrap();
                assert!(Arc::ptr_eq(&replaced, &again));
            },
            Err(err) => assert!(matches!(err, EditorError::Init(_))),
        }
    }
}
