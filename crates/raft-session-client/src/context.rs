use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Serialized execution context for one session.
///
/// Every job gets exclusive access to the core and a handle to the context so
/// it can schedule follow-up work. Jobs must not call [`SessionContext::execute`]
/// themselves; follow-ups go through [`SessionContext::schedule`] or a spawned task.
pub struct SessionContext<C> {
    core: Arc<Mutex<C>>,
}

impl<C> Clone for SessionContext<C> {
    fn clone(&self) -> Self {
        SessionContext {
            core: self.core.clone(),
        }
    }
}

impl<C: Send + 'static> SessionContext<C> {
    pub fn new(core: C) -> Self {
        SessionContext {
            core: Arc::new(Mutex::new(core)),
        }
    }

    /// Run `job` now, after any job already running.
    pub fn execute<R>(&self, job: impl FnOnce(&mut C, &SessionContext<C>) -> R) -> R {
        let mut core = self.core.lock();
        job(&mut core, self)
    }

    /// Run `job` on the context after `delay`.
    pub fn schedule<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce(&mut C, &SessionContext<C>) + Send + 'static,
    {
        let context = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            context.execute(job);
        });
    }
}
