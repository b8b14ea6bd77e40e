use std::borrow::Cow;

/// TenancyError can be attached to an anyhow error chain via
/// `.context(e /*TenancyError*/)`. It tags a failure with the kind used to
/// classify it, so callers (and tests) can dispatch on the kind without
/// string-matching the message.
///
/// The msg is developer facing and should say which virtual/physical pair or
/// value was involved.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct TenancyError {
    /// The classification of this failure.
    pub kind: ErrorKind,
    /// Human readable, developer facing. Should name the offending table,
    /// index, or value.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Metadata lookup miss on a data-plane operation.
    NoSuchVirtualTable,
    /// The create-table request factory returned no physical template.
    UnsupportedVirtualTable,
    /// Structural incompatibility between a virtual and a physical schema.
    InvalidMapping,
    /// No physical secondary index of matching kind is available.
    UnmappableIndex,
    /// Non-equality condition on a key, or a rewrite target that is not
    /// implemented.
    UnsupportedPredicate,
    /// A physical scalar could not be decoded back to tenant form.
    MalformedPrefix,
    /// Underlying backend failure, passed through with the original cause.
    Backend,
    /// Tenant context required but missing.
    TenantUnset,
}

impl TenancyError {
    pub fn new(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn no_such_virtual_table(table: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::NoSuchVirtualTable,
            format!("virtual table '{table}' does not exist"),
        )
    }

    pub fn unsupported_virtual_table(table: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::UnsupportedVirtualTable,
            format!("no physical template available for virtual table '{table}'"),
        )
    }

    pub fn invalid_mapping(
        virtual_table: impl std::fmt::Display,
        physical_table: impl std::fmt::Display,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            ErrorKind::InvalidMapping,
            format!("cannot map virtual table '{virtual_table}' onto '{physical_table}': {detail}"),
        )
    }

    pub fn unmappable_index(index: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::UnmappableIndex,
            format!("no compatible physical index for virtual index '{index}'"),
        )
    }

    pub fn unsupported_predicate(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::UnsupportedPredicate, detail)
    }

    pub fn malformed_prefix(value: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::MalformedPrefix,
            format!("cannot decode physical value '{value}'"),
        )
    }

    pub fn backend(detail: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Backend, detail)
    }

    pub fn tenant_unset() -> Self {
        Self::new(ErrorKind::TenantUnset, "no tenant set in the current context")
    }
}

/// Inspection of anyhow chains for an attached [`TenancyError`].
pub trait TenancyErrorExt {
    /// The kind of the innermost attached [`TenancyError`], if any.
    fn tenancy_kind(&self) -> Option<ErrorKind>;

    fn is_kind(&self, kind: ErrorKind) -> bool {
        self.tenancy_kind() == Some(kind)
    }
}

impl TenancyErrorExt for anyhow::Error {
    fn tenancy_kind(&self) -> Option<ErrorKind> {
        self.chain()
            .find_map(|cause| cause.downcast_ref::<TenancyError>())
            .map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{
        ErrorKind,
        TenancyError,
        TenancyErrorExt,
    };

    #[test]
    fn kind_survives_anyhow_chain() {
        let err: anyhow::Error = TenancyError::no_such_virtual_table("orders").into();
        assert_eq!(err.tenancy_kind(), Some(ErrorKind::NoSuchVirtualTable));

        let wrapped = err.context("while routing get_item");
        assert_eq!(wrapped.tenancy_kind(), Some(ErrorKind::NoSuchVirtualTable));
        assert!(wrapped.is_kind(ErrorKind::NoSuchVirtualTable));
        assert!(!wrapped.is_kind(ErrorKind::InvalidMapping));
    }

    #[test]
    fn kind_attached_as_context() {
        let err = anyhow::anyhow!("io failure")
            .context(TenancyError::backend("backend request failed"));
        assert_eq!(err.tenancy_kind(), Some(ErrorKind::Backend));
    }

    #[test]
    fn plain_anyhow_has_no_kind() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(err.tenancy_kind(), None);
    }
}
