//! Component descriptors and the catalog that maps a config key to one.
//!
//! Components are registered up front by [`crate::components::register_all`];
//! a platform implementation lives under `<domain>.<name>` and is selected by
//! the `platform:` key of each entry in the domain's list.
use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::codegen::{BuildFuture, Codegen};
use crate::registry::{RegistryError, RegistrySet};
use crate::schema::{Schema, VResult, typed_schema};
use crate::value::ConfigValue;

pub type ToCode = fn(Codegen, ConfigValue) -> BuildFuture<()>;

/// Cross-component check run after every block validated. Gets its own
/// validated value and the whole root, returns the (possibly amended) value.
pub type FinalValidator = Arc<dyn Fn(&ConfigValue, &ConfigValue) -> VResult + Send + Sync>;

#[derive(Clone)]
pub struct ComponentDescriptor {
    pub key: String,
    pub config_schema: Option<Schema>,
    pub is_platform_component: bool,
    pub multi_conf: bool,
    pub dependencies: Vec<String>,
    pub auto_load: Vec<String>,
    pub conflicts_with: Vec<String>,
    pub codeowners: Vec<String>,
    pub final_validate: Option<FinalValidator>,
    pub to_code: Option<ToCode>,
    pub priority: f64,
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl ComponentDescriptor {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            config_schema: None,
            is_platform_component: false,
            multi_conf: false,
            dependencies: Vec::new(),
            auto_load: Vec::new(),
            conflicts_with: Vec::new(),
            codeowners: Vec::new(),
            final_validate: None,
            to_code: None,
            priority: 0.0,
        }
    }
    pub fn schema(mut self, schema: Schema) -> Self {
        self.config_schema = Some(schema);
        self
    }
    pub fn platform_component(mut self) -> Self {
        self.is_platform_component = true;
        self
    }
    pub fn multi_conf(mut self) -> Self {
        self.multi_conf = true;
        self
    }
    pub fn dependencies(mut self, keys: &[&str]) -> Self {
        self.dependencies = owned(keys);
        self
    }
    pub fn auto_load(mut self, keys: &[&str]) -> Self {
        self.auto_load = owned(keys);
        self
    }
    pub fn conflicts_with(mut self, keys: &[&str]) -> Self {
        self.conflicts_with = owned(keys);
        self
    }
    pub fn codeowners(mut self, owners: &[&str]) -> Self {
        self.codeowners = owned(owners);
        self
    }
    pub fn final_validate(
        mut self,
        f: impl Fn(&ConfigValue, &ConfigValue) -> VResult + Send + Sync + 'static,
    ) -> Self {
        self.final_validate = Some(Arc::new(f));
        self
    }
    pub fn to_code(mut self, priority: f64, f: ToCode) -> Self {
        self.priority = priority;
        self.to_code = Some(f);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    #[error("component '{0}' is registered twice")]
    DuplicateComponent(String),
    #[error("platform '{domain}.{name}' is registered twice")]
    DuplicatePlatform { domain: String, name: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Default, Clone)]
pub struct ComponentCatalog {
    components: IndexMap<String, ComponentDescriptor>,
    /// Keyed by domain, then platform name.
    platforms: IndexMap<String, IndexMap<String, ComponentDescriptor>>,
}

impl ComponentCatalog {
    pub fn add_component(&mut self, descriptor: ComponentDescriptor) -> Result<(), LoaderError> {
        if self.components.contains_key(&descriptor.key) {
            return Err(LoaderError::DuplicateComponent(descriptor.key));
        }
        self.components.insert(descriptor.key.clone(), descriptor);
        Ok(())
    }

    pub fn add_platform(&mut self, domain: &str, descriptor: ComponentDescriptor) -> Result<(), LoaderError> {
        let slot = self.platforms.entry(domain.to_string()).or_default();
        if slot.contains_key(&descriptor.key) {
            return Err(LoaderError::DuplicatePlatform { domain: domain.to_string(), name: descriptor.key });
        }
        slot.insert(descriptor.key.clone(), descriptor);
        Ok(())
    }

    pub fn component(&self, key: &str) -> Option<&ComponentDescriptor> {
        self.components.get(key)
    }
    pub fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.components.values()
    }
    pub fn platform(&self, domain: &str, name: &str) -> Option<&ComponentDescriptor> {
        self.platforms.get(domain)?.get(&name.to_lowercase())
    }
    pub fn platforms_of(&self, domain: &str) -> impl Iterator<Item = &ComponentDescriptor> {
        self.platforms.get(domain).into_iter().flat_map(|p| p.values())
    }

    /// Per-entry schema of a platform component: a typed schema over every
    /// implementation registered for `domain`, keyed by `platform`.
    pub fn platform_schema(&self, domain: &str) -> Schema {
        let branches: Vec<(&str, Schema)> = self
            .platforms_of(domain)
            .map(|p| (p.key.as_str(), p.config_schema.clone().unwrap_or_else(|| Schema::mapping([]))))
            .collect();
        typed_schema("platform", branches, None)
    }

    /// `declared` plus everything reachable through AUTO_LOAD, in discovery
    /// order. Platform implementations contribute their own AUTO_LOAD.
    pub fn auto_load_closure(&self, declared: &[String], platforms: &[(String, String)]) -> Vec<String> {
        let mut seen: BTreeSet<String> = declared.iter().cloned().collect();
        let mut order: Vec<String> = declared.to_vec();
        let mut queue: Vec<String> = Vec::new();
        for key in declared {
            if let Some(c) = self.component(key) {
                queue.extend(c.auto_load.iter().cloned());
            }
        }
        for (domain, name) in platforms {
            if let Some(p) = self.platform(domain, name) {
                queue.extend(p.auto_load.iter().cloned());
            }
        }
        let mut cursor = 0;
        while cursor < queue.len() {
            let key = queue[cursor].clone();
            cursor += 1;
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(c) = self.component(&key) {
                queue.extend(c.auto_load.iter().cloned());
            }
            order.push(key);
        }
        order
    }
}

/// Everything one pipeline run needs, built fresh per run.
pub struct RunContext {
    pub catalog: ComponentCatalog,
    pub registries: RegistrySet,
}

impl RunContext {
    pub fn new(catalog: ComponentCatalog, registries: RegistrySet) -> Self {
        Self { catalog, registries }
    }

    /// The built-in component set.
    pub fn builtin() -> Result<Self, LoaderError> {
        let mut catalog = ComponentCatalog::default();
        let mut registries = RegistrySet::standard();
        crate::components::register_all(&mut catalog, &mut registries)?;
        tracing::debug!(
            components = catalog.components().count(),
            registries = registries.iter().count(),
            "component catalog loaded"
        );
        Ok(Self { catalog, registries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, lambda_};

    fn catalog() -> ComponentCatalog {
        let mut c = ComponentCatalog::default();
        c.add_component(ComponentDescriptor::new("i2c")).unwrap();
        c.add_component(ComponentDescriptor::new("expander").auto_load(&["i2c"]).multi_conf()).unwrap();
        c.add_component(ComponentDescriptor::new("sensor").platform_component()).unwrap();
        c.add_platform(
            "sensor",
            ComponentDescriptor::new("template").schema(Schema::mapping([Field::optional("lambda", lambda_())])),
        )
        .unwrap();
        c.add_platform("sensor", ComponentDescriptor::new("stats").auto_load(&["expander"])).unwrap();
        c
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut c = catalog();
        assert_eq!(
            c.add_component(ComponentDescriptor::new("i2c")).unwrap_err(),
            LoaderError::DuplicateComponent("i2c".into())
        );
        assert!(c.add_platform("sensor", ComponentDescriptor::new("template")).is_err());
    }

    #[test]
    fn auto_load_is_transitive_and_ordered() {
        let c = catalog();
        let closure = c.auto_load_closure(&["sensor".into()], &[("sensor".into(), "stats".into())]);
        assert_eq!(closure, ["sensor", "expander", "i2c"]);
        let closure = c.auto_load_closure(&["expander".into(), "i2c".into()], &[]);
        assert_eq!(closure, ["expander", "i2c"]);
    }

    #[test]
    fn platform_schema_branches_per_implementation() {
        let c = catalog();
        let schema = c.platform_schema("sensor");
        let names: Vec<Option<&str>> = schema.branches().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, [Some("template"), Some("stats")]);
        assert!(c.platform("sensor", "TEMPLATE").is_some());
    }
}
