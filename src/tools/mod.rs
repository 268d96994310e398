// src/tools/mod.rs
// Typed tool registry with per-request permission filtering

pub mod knowledge;

pub use knowledge::knowledge_search_tool;

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::retrieval::Retriever;
use crate::store::Permission;

type ToolFn = dyn Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync;

/// One callable tool: name, one-line description for the prompt, admin
/// gating, and the async `(String) -> String` body.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub is_admin: bool,
    invoke: Arc<ToolFn>,
}

impl ToolDef {
    pub fn new(
        name: &str,
        description: &str,
        is_admin: bool,
        invoke: impl Fn(String) -> BoxFuture<'static, Result<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            is_admin,
            invoke: Arc::new(invoke),
        }
    }

    pub async fn invoke(&self, input: String) -> Result<String> {
        (self.invoke)(input).await
    }
}

/// Tool registry keyed by name. Deterministic iteration order keeps the
/// rendered prompt stable across runs.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<ToolDef>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: ToolDef) {
        self.tools.insert(tool.name.clone(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDef>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// `name: description` lines for the agent prompt.
    pub fn descriptions(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("{}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Comma-separated tool names for the prompt's Action constraint.
    pub fn names_csv(&self) -> String {
        self.tools.keys().cloned().collect::<Vec<_>>().join(", ")
    }

    /// Per-request sub-registry: admin-only tools disappear entirely for
    /// public users, so a permission failure can never surface as an error.
    pub fn for_permission(&self, permission: Permission) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(_, tool)| permission == Permission::AdminOnly || !tool.is_admin)
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        ToolRegistry { tools }
    }
}

/// Build the per-request registry. The knowledge tool is bound to the
/// requesting user's permission so retrieval stays permission-filtered all
/// the way down, and admin-only tools are filtered out before the agent
/// ever sees them.
pub fn build_registry(retriever: Arc<Retriever>, permission: Permission) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(knowledge_search_tool(retriever, permission));
    registry.for_permission(permission)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool(name: &str, is_admin: bool) -> ToolDef {
        ToolDef::new(name, "echoes its input", is_admin, |input| {
            Box::pin(async move { Ok(format!("echo: {input}")) })
        })
    }

    #[tokio::test]
    async fn registry_lookup_and_invoke() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo", false));

        let tool = registry.get("echo").unwrap();
        assert_eq!(tool.invoke("hello".to_string()).await.unwrap(), "echo: hello");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn permission_filter_hides_admin_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("public_echo", false));
        registry.register(echo_tool("admin_echo", true));

        let public = registry.for_permission(Permission::Public);
        assert!(public.get("public_echo").is_some());
        assert!(public.get("admin_echo").is_none());

        let admin = registry.for_permission(Permission::AdminOnly);
        assert_eq!(admin.len(), 2);
    }

    #[test]
    fn prompt_rendering_is_deterministic() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("zeta", false));
        registry.register(echo_tool("alpha", false));

        assert_eq!(registry.names_csv(), "alpha, zeta");
        let descriptions = registry.descriptions();
        assert!(descriptions.starts_with("alpha: "));
    }
}
