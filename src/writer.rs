//! Turns a [`CodegenOutput`] into project files: `src/main.cpp`, the defines
//! header, `platformio.ini` and a JSON build manifest.
//!
//! Rendering is pure; [`write_project`] is the only part touching the disk.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::codegen::{CodegenOutput, PlatformioOption};
use crate::target::Target;

pub const INCLUDE_BLOCK_BEGIN: &str = "// ========== AUTO GENERATED INCLUDE BLOCK BEGIN ===========";
pub const INCLUDE_BLOCK_END: &str = "// ========== AUTO GENERATED INCLUDE BLOCK END ===========";
pub const CODE_BLOCK_BEGIN: &str = "// ========== AUTO GENERATED CODE BEGIN ===========";
pub const CODE_BLOCK_END: &str = "// =========== AUTO GENERATED CODE END ============";

const MAIN_CPP: &str = "src/main.cpp";
const DEFINES_H: &str = "src/esphome/core/defines.h";
const PLATFORMIO_INI: &str = "platformio.ini";
const MANIFEST_JSON: &str = "manifest.json";

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to serialize the manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// What the downstream toolchain needs besides the sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub platform: Option<String>,
    pub board: Option<String>,
    pub libraries: Vec<String>,
    pub build_flags: Vec<String>,
    pub defines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub main_cpp: String,
    pub defines_h: String,
    pub platformio_ini: String,
    pub manifest: Manifest,
}

// ------------------------------- Rendering -------------------------------- //

pub fn render_main_cpp(output: &CodegenOutput) -> String {
    let mut out = String::from("// Auto generated code by nodegen\n");
    out.push_str(INCLUDE_BLOCK_BEGIN);
    out.push('\n');
    for include in &output.includes {
        if include.starts_with('<') {
            out.push_str(&format!("#include {include}\n"));
        } else {
            out.push_str(&format!("#include \"{include}\"\n"));
        }
    }
    for line in &output.global_lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(INCLUDE_BLOCK_END);
    out.push_str("\n\nvoid setup() {\n  ");
    out.push_str(CODE_BLOCK_BEGIN);
    out.push('\n');
    for line in output.setup_lines.iter().flat_map(|s| s.lines()) {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("  ");
    out.push_str(CODE_BLOCK_END);
    out.push_str("\n  App.setup();\n}\n\nvoid loop() {\n  App.loop();\n}\n");
    out
}

pub fn render_defines_h(output: &CodegenOutput) -> String {
    let mut out = String::from("#pragma once\n");
    for define in &output.defines {
        out.push_str(&define.as_macro());
        out.push('\n');
    }
    out
}

fn env_name(target: &Target) -> &str {
    if target.name.is_empty() { "device" } else { &target.name }
}

/// `defaults` come from the settings file; anything the config set wins.
pub fn render_platformio_ini(
    output: &CodegenOutput,
    target: &Target,
    defaults: &IndexMap<String, PlatformioOption>,
) -> String {
    let mut options: BTreeMap<String, PlatformioOption> = BTreeMap::new();
    options.insert("framework".into(), PlatformioOption::Value("arduino".into()));
    if let Some(platform) = target.platform {
        options.insert("platform".into(), PlatformioOption::Value(platform.pio_platform().into()));
    }
    if let Some(board) = &target.board {
        options.insert("board".into(), PlatformioOption::Value(board.clone()));
    }
    if !output.libraries.is_empty() {
        let libs = output.libraries.iter().map(|l| l.as_lib_dep()).collect();
        options.insert("lib_deps".into(), PlatformioOption::List(libs));
    }
    if !output.build_flags.is_empty() {
        options.insert("build_flags".into(), PlatformioOption::List(output.build_flags.clone()));
    }
    for (key, value) in defaults.iter().chain(&output.platformio_options) {
        options.insert(key.clone(), value.clone());
    }

    let mut out = format!("[env:{}]\n", env_name(target));
    for (key, value) in options {
        match value {
            PlatformioOption::Value(v) => out.push_str(&format!("{key} = {v}\n")),
            PlatformioOption::List(mut items) => {
                items.sort();
                out.push_str(&format!("{key} =\n"));
                for item in items {
                    out.push_str(&format!("    {item}\n"));
                }
            }
        }
    }
    out
}

pub fn manifest(output: &CodegenOutput, target: &Target) -> Manifest {
    Manifest {
        name: env_name(target).to_string(),
        platform: target.platform.map(|p| p.to_string()),
        board: target.board.clone(),
        libraries: output.libraries.iter().map(|l| l.as_lib_dep()).collect(),
        build_flags: output.build_flags.clone(),
        defines: output.defines.iter().map(|d| d.as_build_flag()).collect(),
    }
}

pub fn render(output: &CodegenOutput, target: &Target, defaults: &IndexMap<String, PlatformioOption>) -> Project {
    Project {
        main_cpp: render_main_cpp(output),
        defines_h: render_defines_h(output),
        platformio_ini: render_platformio_ini(output, target, defaults),
        manifest: manifest(output, target),
    }
}

// -------------------------------- Writing --------------------------------- //

fn write_file(dir: &Path, relative: &str, contents: &str) -> Result<PathBuf, WriterError> {
    let path = dir.join(relative);
    let io = |source| WriterError::Io { path: path.clone(), source };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    std::fs::write(&path, contents).map_err(io)?;
    Ok(path)
}

/// Writes every file below `dir` and returns their paths.
#[tracing::instrument(level = "info", skip(project))]
pub fn write_project(project: &Project, dir: &Path, write_manifest: bool) -> Result<Vec<PathBuf>, WriterError> {
    let mut written = vec![
        write_file(dir, MAIN_CPP, &project.main_cpp)?,
        write_file(dir, DEFINES_H, &project.defines_h)?,
        write_file(dir, PLATFORMIO_INI, &project.platformio_ini)?,
    ];
    if write_manifest {
        let json = serde_json::to_string_pretty(&project.manifest)?;
        written.push(write_file(dir, MANIFEST_JSON, &json)?);
    }
    tracing::info!(files = written.len(), "project written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::SchedulerStats;
    use crate::ir::{Define, Library};
    use crate::target::Platform;
    use pretty_assertions::assert_eq;

    fn output() -> CodegenOutput {
        CodegenOutput {
            statements: Vec::new(),
            global_lines: vec!["using namespace esphome;".into(), "sensor::Sensor *temp;".into()],
            setup_lines: vec!["temp = new sensor::Sensor();".into(), "App.register_sensor(temp);".into()],
            includes: vec!["esphome.h".into()],
            libraries: vec![Library::new("Wire", None), Library::new("ArduinoJson", Some("6.18.5".into()))],
            build_flags: vec!["-DUSE_SENSOR".into(), "-DESPHOME_LOG_LEVEL=5".into()],
            defines: vec![Define::new("USE_SENSOR", None)],
            platformio_options: IndexMap::new(),
            stats: SchedulerStats::default(),
        }
    }

    fn target() -> Target {
        Target { name: "kitchen".into(), platform: Some(Platform::Esp32), board: Some("nodemcu-32s".into()) }
    }

    #[test]
    fn main_cpp_layout() {
        let cpp = render_main_cpp(&output());
        let expected = format!(
            "// Auto generated code by nodegen\n{INCLUDE_BLOCK_BEGIN}\n#include \"esphome.h\"\n\
             using namespace esphome;\nsensor::Sensor *temp;\n{INCLUDE_BLOCK_END}\n\nvoid setup() {{\n  \
             {CODE_BLOCK_BEGIN}\n  temp = new sensor::Sensor();\n  App.register_sensor(temp);\n  \
             {CODE_BLOCK_END}\n  App.setup();\n}}\n\nvoid loop() {{\n  App.loop();\n}}\n"
        );
        assert_eq!(cpp, expected);
    }

    #[test]
    fn platformio_sections_are_sorted() {
        let mut defaults = IndexMap::new();
        defaults.insert("upload_speed".to_string(), PlatformioOption::Value("921600".into()));
        defaults.insert("framework".to_string(), PlatformioOption::Value("espidf".into()));
        let ini = render_platformio_ini(&output(), &target(), &defaults);
        assert_eq!(
            ini,
            "[env:kitchen]\n\
             board = nodemcu-32s\n\
             build_flags =\n    -DESPHOME_LOG_LEVEL=5\n    -DUSE_SENSOR\n\
             framework = espidf\n\
             lib_deps =\n    ArduinoJson@6.18.5\n    Wire\n\
             platform = espressif32\n\
             upload_speed = 921600\n"
        );
    }

    #[test]
    fn manifest_lists_defines_as_flags() {
        let m = manifest(&output(), &target());
        assert_eq!(m.platform.as_deref(), Some("ESP32"));
        assert_eq!(m.defines, ["-DUSE_SENSOR"]);
        assert_eq!(m.libraries, ["Wire", "ArduinoJson@6.18.5"]);
    }
}
