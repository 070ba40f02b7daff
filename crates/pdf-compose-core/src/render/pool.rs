use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::{HtmlRenderer, RendererFactory};
use crate::error::Result;

/// Holds at most one renderer instance, launched lazily and health-checked
/// before every reuse.
pub struct RendererPool {
    factory: Arc<dyn RendererFactory>,
    slot: Mutex<Option<Arc<dyn HtmlRenderer>>>,
    launches: AtomicUsize,
}

impl RendererPool {
    pub fn new(factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            factory,
            slot: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// Get the pooled renderer, launching or relaunching it as needed.
    pub async fn acquire(&self) -> Result<RendererLease> {
        let mut slot = self.slot.lock().await;

        if let Some(renderer) = slot.as_ref() {
            if renderer.health_check().await {
                debug!("Reusing {} renderer", renderer.name());
                return Ok(RendererLease {
                    renderer: Arc::clone(renderer),
                });
            }
            warn!("{} renderer failed health check, relaunching", renderer.name());
            *slot = None;
        }

        let renderer = self.factory.launch().await?;
        let launches = self.launches.fetch_add(1, Ordering::Relaxed) + 1;
        info!("Launched {} renderer (launch #{})", renderer.name(), launches);

        *slot = Some(Arc::clone(&renderer));
        Ok(RendererLease { renderer })
    }

    /// Return a lease. The pooled instance stays up for the next caller.
    pub fn release(&self, lease: RendererLease) {
        debug!("Released {} renderer", lease.renderer.name());
        drop(lease);
    }

    /// Tear down the pooled instance; the next `acquire` launches a new one.
    pub async fn invalidate(&self) {
        if self.slot.lock().await.take().is_some() {
            debug!("Renderer invalidated");
        }
    }
}

/// A borrowed handle to the pooled renderer.
pub struct RendererLease {
    renderer: Arc<dyn HtmlRenderer>,
}

impl Deref for RendererLease {
    type Target = dyn HtmlRenderer;

    fn deref(&self) -> &Self::Target {
        self.renderer.as_ref()
    }
}
