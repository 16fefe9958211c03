//! Code generation: the handle generator routines emit through, and the
//! driver that schedules one routine per validated component entry.
//!
//! Routines are `async` blocks over a shared [`Codegen`] handle. Waiting for
//! another component's variable is an ordinary `.await`; see
//! [`scheduler`] for how that suspends.
pub mod scheduler;
pub mod state;

use std::cell::{RefCell, RefMut};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use serde::Serialize;

use crate::ir::types::COMPONENT;
use crate::ir::{
    AutomationArgs, Define, Expression, LambdaExpression, Library, Statement, TemplateArguments, TypeRef, Variable,
    app,
};
use crate::loader::RunContext;
use crate::registry::{EntryBuilder, EntryCall, RegistrySet, TYPE_ID};
use crate::validate::ValidatedConfig;
use crate::value::{ConfigId, ConfigValue, Lambda, LambdaPart};

pub use scheduler::{Scheduler, SchedulerStats};
pub use state::{CodegenState, PlatformioOption};

pub type CodegenResult<T> = Result<T, CodegenError>;

/// A boxed generator routine. Not `Send`: routines share `Rc` state.
pub type BuildFuture<T> = Pin<Box<dyn Future<Output = CodegenResult<T>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedId {
    pub name: String,
    /// Labels of the routines parked on `name`, e.g. `switch[0]`.
    pub demanders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodegenError {
    #[error("couldn't find ID {}", format_unresolved(.0))]
    Unresolved(Vec<UnresolvedId>),
    #[error("error while generating code for {component}: {cause}")]
    GeneratorFailure { component: String, cause: String },
    #[error("ID {0} is already registered")]
    DuplicateVariable(String),
    #[error("Version pinning failed! Libraries '{name}@{first}' and '{name}@{second}' requested with conflicting versions")]
    LibraryConflict { name: String, first: String, second: String },
    #[error("{0}")]
    Expression(String),
    #[error("an ID of type {0} was never given a name")]
    UnnamedId(String),
    #[error("Tried to register component {0} but the component was not declared or registered twice")]
    ComponentRegistration(String),
}

fn format_unresolved(ids: &[UnresolvedId]) -> String {
    ids.iter()
        .map(|u| format!("'{}' (requested by {})", u.name, u.demanders.join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}

// ------------------------------ The handle -------------------------------- //

#[derive(Clone)]
pub struct Codegen(Rc<RefCell<CodegenState>>);

impl Codegen {
    pub fn new(target: crate::target::Target) -> Self {
        Self(Rc::new(RefCell::new(CodegenState::new(target))))
    }

    /// Short-lived borrow; never hold it across an `.await`.
    pub fn state_mut(&self) -> RefMut<'_, CodegenState> {
        self.0.borrow_mut()
    }

    pub fn target(&self) -> crate::target::Target {
        self.0.borrow().target.clone()
    }

    pub fn add(&self, statement: impl Into<Statement>) {
        self.state_mut().statements.push(statement.into());
    }
    pub fn add_global(&self, statement: impl Into<Statement>) {
        self.state_mut().globals.push(statement.into());
    }
    pub fn add_include(&self, path: &str) {
        let mut state = self.state_mut();
        if !state.includes.iter().any(|i| i == path) {
            state.includes.push(path.to_string());
        }
    }
    pub fn add_library(&self, name: &str, version: Option<&str>) -> CodegenResult<()> {
        self.state_mut().add_library(Library::new(name, version.map(str::to_string)))
    }
    pub fn add_build_flag(&self, flag: &str) {
        self.state_mut().build_flags.insert(flag.to_string());
    }
    pub fn add_define(&self, name: &str, value: Option<String>) {
        self.state_mut().add_define(Define::new(name, value));
    }
    pub fn add_platformio_option(&self, key: &str, value: PlatformioOption) {
        self.state_mut().add_platformio_option(key, value);
    }

    /// Schedules another routine; it joins the queue once the current poll ends.
    pub fn add_job(&self, priority: f64, label: impl Into<String>, future: BuildFuture<()>) {
        self.state_mut().spawned.push(state::SpawnedJob { priority, label: label.into(), future });
    }

    // ---- variables ----

    /// `Type *id;` globally and `id = rhs;` in setup. Components are remembered
    /// until `register_component` sees them.
    pub fn pvariable(&self, id: &ConfigId, rhs: Expression, ty: Option<&TypeRef>) -> CodegenResult<Expression> {
        let name = id.name().ok_or_else(|| CodegenError::UnnamedId(id.type_tag.to_string()))?;
        let ty = ty.unwrap_or(&id.type_tag).clone();
        let var = Expression::Variable(Variable { name: name.to_string(), ty: ty.clone(), pointer: true });
        let mut state = self.state_mut();
        state.register_variable(id, var.clone())?;
        if ty.inherits_from(&COMPONENT) {
            state.unregistered_components.insert(name.to_string());
        }
        state.statements.push(Statement::PVariableDecl { id: name.to_string(), ty, init: rhs });
        Ok(var)
    }

    /// `id = new Type(args...);`
    pub fn new_pvariable(&self, id: &ConfigId, args: Vec<Expression>) -> CodegenResult<Expression> {
        self.pvariable(id, id.type_tag.new_instance(args), None)
    }

    /// `id = new Type<targs...>(args...);`, `Type<>` when there are none.
    pub fn new_pvariable_templated(
        &self,
        id: &ConfigId,
        template_args: &TemplateArguments,
        args: Vec<Expression>,
    ) -> CodegenResult<Expression> {
        let ty = id.type_tag.template(template_args);
        self.pvariable(id, ty.new_instance(args), Some(&ty))
    }

    pub fn get_variable_by_name(&self, name: &str) -> VariableDemand {
        VariableDemand { cg: self.clone(), name: name.to_string() }
    }

    /// The expression bound to `id`, suspending until it is declared.
    pub async fn get_variable(&self, id: &ConfigId) -> CodegenResult<Expression> {
        Ok(self.get_variable_with_full_id(id).await?.1)
    }

    /// Like [`Self::get_variable`], plus the declaring ID (with its concrete type).
    pub async fn get_variable_with_full_id(&self, id: &ConfigId) -> CodegenResult<(ConfigId, Expression)> {
        let name = id.name().ok_or_else(|| CodegenError::UnnamedId(id.type_tag.to_string()))?;
        self.get_variable_by_name(name).await?;
        self.0
            .borrow()
            .lookup(name)
            .cloned()
            .ok_or_else(|| CodegenError::Expression(format!("ID {name} vanished after being declared")))
    }

    // ---- registries ----

    /// Copies the builder table out of `registries`; routines can't borrow it.
    pub fn install_builders(&self, registries: &RegistrySet) {
        let mut state = self.state_mut();
        for registry in registries.iter() {
            let table = state.builders.entry(registry.name().to_string()).or_default();
            for entry in registry.entries() {
                table.insert(entry.name.clone(), entry.builder);
            }
        }
    }

    pub fn registry_builder(&self, registry: &str, name: &str) -> Option<EntryBuilder> {
        self.0.borrow().builders.get(registry).and_then(|table| table.get(name)).copied()
    }

    /// Builds one validated `{type_id, name: config}` item of `registry`.
    pub async fn build_registry_entry(
        &self,
        registry: &str,
        item: &ConfigValue,
        template_arg: &TemplateArguments,
        args: &AutomationArgs,
    ) -> CodegenResult<Expression> {
        let malformed = || CodegenError::Expression(format!("malformed {registry} entry {}", item.display_scalar()));
        let map = item.as_map().ok_or_else(malformed)?;
        let id = map.get(TYPE_ID).and_then(ConfigValue::as_id).cloned().ok_or_else(malformed)?;
        let (name, config) = map.iter().find(|(k, _)| k.as_str() != TYPE_ID).ok_or_else(malformed)?;
        let builder = self
            .registry_builder(registry, name)
            .ok_or_else(|| CodegenError::Expression(format!("no {registry} named '{name}'")))?;
        let call = EntryCall { config: config.clone(), id, template_arg: template_arg.clone(), args: args.clone() };
        builder(self.clone(), call).await
    }

    /// Every item of a validated registry list, in order.
    pub async fn build_registry_list(
        &self,
        registry: &str,
        items: &ConfigValue,
        template_arg: &TemplateArguments,
        args: &AutomationArgs,
    ) -> CodegenResult<Vec<Expression>> {
        let mut out = Vec::new();
        for item in items.iter_list() {
            out.push(self.build_registry_entry(registry, item, template_arg, args).await?);
        }
        Ok(out)
    }

    // ---- component helpers ----

    pub async fn register_component(&self, var: &Expression, config: &ConfigValue) -> CodegenResult<()> {
        let name = var.to_string();
        if !self.state_mut().unregistered_components.remove(&name) {
            return Err(CodegenError::ComponentRegistration(name));
        }
        if let Some(priority) = config.get("setup_priority").and_then(ConfigValue::as_f64) {
            self.add(var.method("set_setup_priority", vec![Expression::float(priority)]));
        }
        if let Some(interval) = config.get("update_interval").and_then(ConfigValue::as_time) {
            self.add(var.method("set_update_interval", vec![Expression::int(interval.in_unit() as i64)]));
        }
        self.add(app().method("register_component", vec![var.clone()]));
        Ok(())
    }

    /// A literal, or a lambda taking the automation's `args` and returning
    /// `output_type`.
    pub async fn templatable(
        &self,
        value: &ConfigValue,
        args: &AutomationArgs,
        output_type: Option<&TypeRef>,
    ) -> CodegenResult<Expression> {
        match value {
            ConfigValue::Lambda(lambda) => self.process_lambda(lambda, args, "=", output_type).await,
            other => Expression::from_config(other).map_err(CodegenError::Expression),
        }
    }

    /// Rewrites `id(x)` to the variable for `x` (awaiting it) and wraps the
    /// body in a C++ lambda.
    pub async fn process_lambda(
        &self,
        lambda: &Lambda,
        params: &AutomationArgs,
        capture: &str,
        return_type: Option<&TypeRef>,
    ) -> CodegenResult<Expression> {
        let mut body = String::new();
        for part in lambda.parts() {
            match part {
                LambdaPart::Text(text) => body.push_str(&text),
                LambdaPart::IdRef { name, member } => {
                    let var = self.get_variable_by_name(&name).await?;
                    body.push_str(&var.to_string());
                    if member {
                        let pointer = var.as_variable().is_none_or(|v| v.pointer);
                        body.push_str(if pointer { "->" } else { "." });
                    }
                }
            }
        }
        Ok(Expression::Lambda(Box::new(LambdaExpression {
            capture: capture.to_string(),
            params: params.clone(),
            body: body.trim().to_string(),
            return_type: return_type.cloned(),
        })))
    }
}

/// Resolves once the named variable has been declared.
pub struct VariableDemand {
    cg: Codegen,
    name: String,
}

impl Future for VariableDemand {
    type Output = CodegenResult<Expression>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some((_, expr)) = self.cg.0.borrow().lookup(&self.name) {
            return Poll::Ready(Ok(expr.clone()));
        }
        self.cg.state_mut().demand = Some(self.name.clone());
        Poll::Pending
    }
}

// ------------------------------- Driver ----------------------------------- //

/// Everything the writer needs, in emission order.
#[derive(Debug, Clone, Serialize)]
pub struct CodegenOutput {
    #[serde(skip)]
    pub statements: Vec<Statement>,
    pub global_lines: Vec<String>,
    pub setup_lines: Vec<String>,
    pub includes: Vec<String>,
    pub libraries: Vec<Library>,
    pub build_flags: Vec<String>,
    pub defines: Vec<Define>,
    pub platformio_options: indexmap::IndexMap<String, PlatformioOption>,
    pub stats: SchedulerStats,
}

impl CodegenOutput {
    fn from_state(state: CodegenState, stats: SchedulerStats) -> Self {
        let mut global_lines: Vec<String> = state.globals.iter().map(ToString::to_string).collect();
        global_lines.extend(state.statements.iter().filter_map(Statement::global_declaration));
        let setup_lines = state.statements.iter().map(ToString::to_string).collect();
        Self {
            global_lines,
            setup_lines,
            includes: state.includes,
            libraries: state.libraries,
            build_flags: state.build_flags.into_iter().collect(),
            defines: state.defines.into_values().collect(),
            platformio_options: state.platformio_options,
            stats,
            statements: state.statements,
        }
    }

    /// Body of `setup()`, one statement per line.
    pub fn setup_code(&self) -> String {
        self.setup_lines.join("\n")
    }
}

/// One routine per component block, per MULTI_CONF element and per platform
/// entry, then drain. Nothing is returned unless every routine completed.
#[tracing::instrument(level = "info", skip_all, fields(components = config.components().count()))]
pub fn generate(config: &ValidatedConfig, ctx: &RunContext) -> CodegenResult<CodegenOutput> {
    let cg = Codegen::new(config.target.clone());
    cg.install_builders(&ctx.registries);
    let mut scheduler = Scheduler::new(cg.clone());

    for (key, value) in config.components() {
        let Some(component) = ctx.catalog.component(key) else { continue };
        if let Some(to_code) = component.to_code {
            if component.multi_conf {
                for (i, item) in value.iter_list().into_iter().enumerate() {
                    scheduler.add(component.priority, format!("{key}[{i}]"), to_code(cg.clone(), item.clone()));
                }
            } else {
                scheduler.add(component.priority, key.to_string(), to_code(cg.clone(), value.clone()));
            }
        }
        if !component.is_platform_component {
            continue;
        }
        for (i, entry) in value.iter_list().into_iter().enumerate() {
            let Some(platform) = entry.get("platform").and_then(ConfigValue::as_str) else { continue };
            let Some(descriptor) = ctx.catalog.platform(key, platform) else { continue };
            if let Some(to_code) = descriptor.to_code {
                scheduler.add(descriptor.priority, format!("{key}[{i}]"), to_code(cg.clone(), entry.clone()));
            }
        }
    }

    let stats = scheduler.run()?;
    tracing::info!(polls = stats.polls, parks = stats.parks, "code generation finished");
    let state = Rc::try_unwrap(cg.0)
        .map(RefCell::into_inner)
        .map_err(|_| CodegenError::Expression("code generator state still shared after the run".into()))?;
    Ok(CodegenOutput::from_state(state, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{ESPHOME_NS, FLOAT, POLLING_COMPONENT};
    use crate::target::Target;
    use crate::value::TimePeriod;

    fn run_one(cg: &Codegen, fut: BuildFuture<()>) -> CodegenResult<SchedulerStats> {
        let mut s = Scheduler::new(cg.clone());
        s.add(0.0, "test", fut);
        s.run()
    }

    #[test]
    fn pvariables_declare_globally_and_register_once() {
        let ty = ESPHOME_NS.class("Thing", &[POLLING_COMPONENT.clone()]);
        let cg = Codegen::new(Target::default());
        let id = ConfigId::declare(Some("thing".into()), ty);
        let c = cg.clone();
        run_one(&cg, Box::pin(async move {
            let var = c.new_pvariable(&id, vec![])?;
            let mut config = ConfigValue::map();
            if let Some(m) = config.as_map_mut() {
                m.insert("update_interval".into(), ConfigValue::Time(TimePeriod::from_millis(1000)));
            }
            c.register_component(&var, &config).await?;
            assert!(c.register_component(&var, &config).await.is_err());
            Ok(())
        }))
        .unwrap();
        let state = cg.state_mut();
        let lines: Vec<String> = state.statements.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            ["thing = new Thing();", "thing->set_update_interval(1000);", "App.register_component(thing);"]
        );
        assert_eq!(state.statements[0].global_declaration().as_deref(), Some("Thing *thing;"));
    }

    #[test]
    fn lambdas_rewrite_id_calls() {
        let cg = Codegen::new(Target::default());
        let id = ConfigId::declare(Some("temp".into()), FLOAT.clone());
        cg.pvariable(&id, Expression::raw("new float()"), None).unwrap();
        let c = cg.clone();
        let out = Rc::new(RefCell::new(String::new()));
        let sink = out.clone();
        run_one(&cg, Box::pin(async move {
            let lambda = Lambda::new("return id(temp).state + id(temp);");
            let args = vec![(FLOAT.clone(), "x".to_string())];
            let expr = c.templatable(&ConfigValue::Lambda(lambda), &args, Some(&FLOAT)).await?;
            *sink.borrow_mut() = expr.to_string();
            Ok(())
        }))
        .unwrap();
        assert_eq!(*out.borrow(), "[=](float x) -> float {\n  return temp->state + temp;\n}");
    }

    #[test]
    fn templatable_literals_pass_through() {
        let cg = Codegen::new(Target::default());
        let c = cg.clone();
        run_one(&cg, Box::pin(async move {
            let e = c.templatable(&ConfigValue::Time(TimePeriod::from_millis(500)), &vec![], None).await?;
            assert_eq!(e.to_string(), "500");
            Ok(())
        }))
        .unwrap();
    }
}
