//! Tenant identity.
//!
//! A tenant is an isolated namespace with its own data root.  The absence
//! of a tenant id denotes the singleton "general" tenant.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Label used for the general (tenant-less) server in logs and resource URIs.
pub const GENERAL_TENANT: &str = "general";

/// Immutable identity + data root for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
    data_root: PathBuf,
}

impl TenantContext {
    pub fn new(tenant_id: Option<String>, data_root: impl Into<PathBuf>) -> Self {
        // An empty id is the same as no id.
        let tenant_id = tenant_id.filter(|id| !id.trim().is_empty());
        Self {
            tenant_id,
            data_root: data_root.into(),
        }
    }

    /// The general tenant (no tenant id).
    pub fn general(data_root: impl Into<PathBuf>) -> Self {
        Self::new(None, data_root)
    }

    /// A named tenant.
    pub fn for_tenant(tenant_id: impl Into<String>, data_root: impl Into<PathBuf>) -> Self {
        Self::new(Some(tenant_id.into()), data_root)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn is_general(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// Tenant id, or `"general"`.
    pub fn label(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(GENERAL_TENANT)
    }

    /// Namespace handed to providers: `bs://entities/<id>` or `bs://global`.
    pub fn namespace(&self) -> String {
        match &self.tenant_id {
            Some(id) => format!("bs://entities/{id}"),
            None => "bs://global".into(),
        }
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_tenant_namespace() {
        let ctx = TenantContext::general(".data");
        assert!(ctx.is_general());
        assert_eq!(ctx.label(), "general");
        assert_eq!(ctx.namespace(), "bs://global");
    }

    #[test]
    fn named_tenant_namespace() {
        let ctx = TenantContext::for_tenant("t1", ".data/entities/t1");
        assert_eq!(ctx.tenant_id(), Some("t1"));
        assert_eq!(ctx.namespace(), "bs://entities/t1");
        assert_eq!(ctx.data_root(), Path::new(".data/entities/t1"));
    }

    #[test]
    fn blank_id_is_general() {
        let ctx = TenantContext::new(Some("  ".into()), ".data");
        assert!(ctx.is_general());
    }

    #[test]
    fn serializes_camel_case_without_missing_id() {
        let json = serde_json::to_value(TenantContext::general("/srv")).unwrap();
        assert_eq!(json, serde_json::json!({ "dataRoot": "/srv" }));
    }
}
