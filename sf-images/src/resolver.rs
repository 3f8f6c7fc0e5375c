//! Pluggable name-to-URL resolution (§4.3 step 1).
//!
//! Concrete resolvers (e.g. for short distro image names) are external
//! collaborators; this module only defines the contract and a registry that
//! tries each resolver in registration order, falling back to the name
//! itself when none claim it.

use std::sync::Arc;

pub trait NameResolver: Send + Sync {
    /// Whether this resolver's scheme or prefix matches `name`.
    fn matches(&self, name: &str) -> bool;

    /// Resolve a claimed name to a concrete, fetchable URL.
    fn resolve(&self, name: &str) -> sf_core::Result<String>;
}

#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn NameResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Arc<dyn NameResolver>) {
        self.resolvers.push(resolver);
    }

    /// Resolve `name`, falling back to treating it as a literal URL when no
    /// registered resolver claims it.
    pub fn resolve(&self, name: &str) -> String {
        for resolver in &self.resolvers {
            if resolver.matches(name) {
                match resolver.resolve(name) {
                    Ok(resolved) => return resolved,
                    Err(e) => {
                        tracing::warn!(name, error = %e, "resolver claimed name but failed to resolve it");
                    }
                }
            }
        }
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PrefixResolver {
        prefix: &'static str,
        target: &'static str,
    }

    impl NameResolver for PrefixResolver {
        fn matches(&self, name: &str) -> bool {
            name.starts_with(self.prefix)
        }

        fn resolve(&self, _name: &str) -> sf_core::Result<String> {
            Ok(self.target.to_string())
        }
    }

    #[test]
    fn unclaimed_names_pass_through_verbatim() {
        let registry = ResolverRegistry::new();
        assert_eq!(registry.resolve("https://example.com/x.qcow2"), "https://example.com/x.qcow2");
    }

    #[test]
    fn claimed_names_resolve() {
        let mut registry = ResolverRegistry::new();
        registry.register(Arc::new(PrefixResolver {
            prefix: "distro:",
            target: "https://images.example.com/resolved.qcow2",
        }));
        assert_eq!(
            registry.resolve("distro:focal"),
            "https://images.example.com/resolved.qcow2"
        );
    }
}
