use crate::runtime::Variables;
use std::collections::HashMap;
use std::sync::Arc;

/// Work behind a service task. Receives the visible variables and returns
/// the variables to set.
pub trait TaskHandler: Send + Sync {
    fn execute(&self, variables: &Variables) -> anyhow::Result<Variables>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Variables) -> anyhow::Result<Variables> + Send + Sync,
{
    fn execute(&self, variables: &Variables) -> anyhow::Result<Variables> {
        self(variables)
    }
}

/// Named service task handlers, looked up when models are compiled.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_arc(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("handlers", &self.names()).finish()
    }
}
