//! Shared background scheduler for pool housekeeping
//!
//! Every pool in the process runs its housekeeping task on one small runtime,
//! created on first use. Pools therefore work the same whether they are built
//! inside a tokio runtime or from plain threads.

use std::future::Future;

use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use zqlz_core::Result;

static HOUSEKEEPING_RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn runtime() -> Result<&'static Runtime> {
    let runtime = HOUSEKEEPING_RUNTIME.get_or_try_init(|| {
        tracing::debug!("starting shared housekeeping runtime");
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("zqlz-housekeeping")
            .enable_all()
            .build()
    })?;
    Ok(runtime)
}

/// Run `future` on the shared housekeeping runtime
pub(crate) fn spawn<F>(future: F) -> Result<JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Ok(runtime()?.spawn(future))
}
