//! One run from a JSON config document to rendered project files.
//!
//! Every run builds its own [`RunContext`] and code generator, so several
//! runs may proceed on different threads without sharing anything.
use serde_json::Value;

use crate::codegen::{self, CodegenOutput};
use crate::error::Result;
use crate::loader::RunContext;
use crate::settings::Settings;
use crate::validate::{ValidatedConfig, validate_config};
use crate::value::ConfigValue;
use crate::writer::{self, Project};

/// Everything a successful compile produced. Nothing is written yet.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub config: ValidatedConfig,
    pub output: CodegenOutput,
    pub project: Project,
}

impl Compiled {
    pub fn name(&self) -> &str {
        &self.project.manifest.name
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub fn validate(raw: &Value, ctx: &RunContext) -> Result<ValidatedConfig> {
    let config = validate_config(&ConfigValue::from_json(raw), ctx)?;
    tracing::info!(components = config.components().count(), "configuration valid");
    Ok(config)
}

/// Validation, code generation and rendering against an existing context.
#[tracing::instrument(level = "info", skip_all)]
pub fn compile_with(raw: &Value, ctx: &RunContext, settings: &Settings) -> Result<Compiled> {
    let config = validate(raw, ctx)?;
    let output = codegen::generate(&config, ctx)?;
    let project = writer::render(&output, &config.target, &settings.platformio_options);
    Ok(Compiled { config, output, project })
}

/// [`compile_with`] on a fresh built-in context.
pub fn compile(raw: &Value, settings: &Settings) -> Result<Compiled> {
    let ctx = RunContext::builtin()?;
    compile_with(raw, &ctx, settings)
}

/// Canonical form of a config, as `nodegen config` prints it.
pub fn canonical(raw: &Value) -> Result<Value> {
    let ctx = RunContext::builtin()?;
    Ok(validate(raw, &ctx)?.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(extra: Value) -> Value {
        let mut doc = json!({"esphome": {"name": "kitchen", "platform": "ESP32", "board": "nodemcu-32s"}});
        if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            doc.extend(extra.clone());
        }
        doc
    }

    #[test]
    fn compile_renders_every_file() {
        let compiled = compile(
            &device(json!({"switch": [{"platform": "gpio", "pin": 2, "name": "Relay"}]})),
            &Settings::default(),
        )
        .unwrap();
        assert_eq!(compiled.name(), "kitchen");
        assert!(compiled.project.main_cpp.contains("App.register_switch("), "{}", compiled.project.main_cpp);
        assert!(compiled.project.defines_h.contains("#define USE_SWITCH"));
        assert!(compiled.project.platformio_ini.starts_with("[env:kitchen]\n"));
    }

    #[test]
    fn invalid_configs_produce_no_project() {
        let err = compile(&device(json!({"switch": [{"platform": "gpio", "name": "Relay"}]})), &Settings::default())
            .unwrap_err();
        assert_eq!(err.kinds(), ["InvalidConfig"]);
    }
}
