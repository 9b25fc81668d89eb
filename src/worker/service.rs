//! # The service a worker hosts.
//!
//! The runtime knows the service only through [`Service::start`], which must
//! return once the service is ready to accept work. Shutdown is cooperative:
//! the service watches [`ServiceContext::shutdown`], stops taking new work,
//! and lets [`Service::drained`] resolve when in-flight work is done.
//!
//! Closures can be used directly through [`ServiceFn`]:
//!
//! ```rust
//! use fleetvisor::{ServiceContext, ServiceFn};
//!
//! let svc = ServiceFn::new("ticker", |ctx: ServiceContext| async move {
//!     tokio::spawn(async move {
//!         ctx.shutdown.cancelled().await;
//!     });
//!     Ok(())
//! });
//! # let _ = svc;
//! ```

use std::borrow::Cow;
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::SlotId;
use crate::relay::EventRelay;
use crate::worker::fatal::FatalHandle;

/// What a service gets from the runtime.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    /// Slot of this worker, if launched by a supervisor.
    pub slot: Option<SlotId>,
    /// Cancelled when the worker starts shutting down.
    pub shutdown: CancellationToken,
    /// Fleet event relay of this process.
    pub relay: EventRelay,
    /// Reports errors the service cannot recover from.
    pub fatal: FatalHandle,
}

/// A long-running service hosted by a worker process.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Starts the service and returns once it is ready.
    ///
    /// An `Err` is treated as a fatal error of the worker.
    async fn start(&self, ctx: ServiceContext) -> anyhow::Result<()>;

    /// Resolves when in-flight work has finished after shutdown began.
    async fn drained(&self) {}
}

/// Function-backed [`Service`].
#[derive(Debug)]
pub struct ServiceFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F, Fut> ServiceFn<F>
where
    F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Service for ServiceFn<F>
where
    F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, ctx: ServiceContext) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }
}
