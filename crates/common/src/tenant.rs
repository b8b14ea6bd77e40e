//! Ambient tenant identity, carried task-locally across one operation.

use std::{
    cell::RefCell,
    future::Future,
    sync::Arc,
};

use errors::TenancyError;
use value::TenantId;

/// Accessor for the current tenant. Injected into the router and every
/// mapper rather than reached through a process singleton, so tests can
/// substitute their own implementation.
pub trait TenantContextProvider: Send + Sync + 'static {
    /// Current tenant, if one is set.
    fn get_opt(&self) -> Option<TenantId>;

    /// Replace the current tenant. Fails when no context slot is reachable
    /// from the calling task.
    fn set(&self, tenant: Option<TenantId>) -> anyhow::Result<()>;

    /// Current tenant; `TenantUnset` when missing.
    fn get(&self) -> anyhow::Result<TenantId> {
        self.get_opt()
            .ok_or_else(|| TenancyError::tenant_unset().into())
    }
}

impl<T: TenantContextProvider + ?Sized> TenantContextProvider for Arc<T> {
    fn get_opt(&self) -> Option<TenantId> {
        (**self).get_opt()
    }

    fn set(&self, tenant: Option<TenantId>) -> anyhow::Result<()> {
        (**self).set(tenant)
    }
}

tokio::task_local! {
    static CURRENT_TENANT: RefCell<Option<TenantId>>;
}

/// Default provider. One mutable slot per task tree entered via
/// [`tenant_scope`] or [`scope_as`]; concurrent tasks in different tenants
/// never observe each other's slot.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskLocalTenantContext;

impl TenantContextProvider for TaskLocalTenantContext {
    fn get_opt(&self) -> Option<TenantId> {
        CURRENT_TENANT
            .try_with(|slot| slot.borrow().clone())
            .ok()
            .flatten()
    }

    fn set(&self, tenant: Option<TenantId>) -> anyhow::Result<()> {
        CURRENT_TENANT
            .try_with(|slot| *slot.borrow_mut() = tenant)
            .map_err(|_| anyhow::Error::from(TenancyError::tenant_unset()))
    }
}

/// Run `fut` with a fresh, unset tenant slot.
pub async fn tenant_scope<F: Future>(fut: F) -> F::Output {
    CURRENT_TENANT.scope(RefCell::new(None), fut).await
}

/// Run `fut` with the tenant slot pre-set to `tenant`.
pub async fn scope_as<F: Future>(tenant: TenantId, fut: F) -> F::Output {
    CURRENT_TENANT.scope(RefCell::new(Some(tenant)), fut).await
}

/// Process-wide provider backed by a lock. Matches the sequential
/// set-then-operate style of integration tests and single-tenant embeddings;
/// not suitable for concurrent multi-tenant traffic.
#[derive(Debug, Default)]
pub struct StaticTenantContext {
    slot: parking_lot::RwLock<Option<TenantId>>,
}

impl StaticTenantContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TenantContextProvider for StaticTenantContext {
    fn get_opt(&self) -> Option<TenantId> {
        self.slot.read().clone()
    }

    fn set(&self, tenant: Option<TenantId>) -> anyhow::Result<()> {
        *self.slot.write() = tenant;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use errors::{
        ErrorKind,
        TenancyErrorExt,
    };
    use value::TenantId;

    use super::{
        scope_as,
        tenant_scope,
        TaskLocalTenantContext,
        TenantContextProvider,
    };

    fn tenant(s: &str) -> TenantId {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn get_outside_scope_is_tenant_unset() {
        let ctx = TaskLocalTenantContext;
        let err = ctx.get().unwrap_err();
        assert!(err.is_kind(ErrorKind::TenantUnset));
    }

    #[tokio::test]
    async fn set_and_get_within_scope() {
        tenant_scope(async {
            let ctx = TaskLocalTenantContext;
            assert!(ctx.get_opt().is_none());
            ctx.set(Some(tenant("ctx1"))).unwrap();
            assert_eq!(ctx.get().unwrap(), tenant("ctx1"));
            ctx.set(None).unwrap();
            assert!(ctx.get_opt().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_tasks_do_not_interfere() {
        let task = |name: &'static str| async move {
            let ctx = TaskLocalTenantContext;
            for _ in 0..100 {
                assert_eq!(ctx.get().unwrap(), tenant(name));
                tokio::task::yield_now().await;
            }
        };
        let a = tokio::spawn(scope_as(tenant("ctx1"), task("ctx1")));
        let b = tokio::spawn(scope_as(tenant("ctx2"), task("ctx2")));
        a.await.unwrap();
        b.await.unwrap();
    }

    #[tokio::test]
    async fn context_does_not_leak_into_spawned_tasks() {
        scope_as(tenant("ctx1"), async {
            let handle = tokio::spawn(async {
                let ctx = TaskLocalTenantContext;
                ctx.get_opt()
            });
            assert_eq!(handle.await.unwrap(), None);
        })
        .await;
    }
}
