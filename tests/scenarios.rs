use std::collections::BTreeSet;

use nodegen::codegen::{CodegenError, UnresolvedId};
use nodegen::components::template::TEMPLATE_SENSOR;
use nodegen::ir::Statement;
use nodegen::settings::Settings;
use nodegen::validate::ConfigError;
use nodegen::{Compiled, Error, compile};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn device(extra: Value) -> Value {
    let mut doc = json!({"esphome": {"name": "livingroom", "platform": "ESP32", "board": "nodemcu-32s"}});
    if let (Some(doc), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
        doc.extend(extra.clone());
    }
    doc
}

fn compile_ok(extra: Value) -> Compiled {
    match compile(&device(extra), &Settings::default()) {
        Ok(compiled) => compiled,
        Err(error) => panic!("expected a project, got:\n{error}"),
    }
}

fn compile_err(extra: Value) -> Error {
    match compile(&device(extra), &Settings::default()) {
        Ok(compiled) => panic!("expected an error, got:\n{}", compiled.project.main_cpp),
        Err(error) => error,
    }
}

fn flags(compiled: &Compiled) -> BTreeSet<String> {
    let output = &compiled.output;
    output.defines.iter().map(|d| d.as_build_flag()).chain(output.build_flags.iter().cloned()).collect()
}

fn line_index(lines: &[String], predicate: impl Fn(&str) -> bool, what: &str) -> usize {
    lines.iter().position(|l| predicate(l)).unwrap_or_else(|| panic!("no line for {what} in\n{}", lines.join("\n")))
}

#[test]
fn template_sensor_declares_registers_and_flags_once() {
    let bare = compile_ok(json!({}));
    let compiled = compile_ok(json!({
        "sensor": [{"platform": "template", "name": "Answer", "lambda": "return 1;"}],
    }));

    let declarations = compiled
        .output
        .statements
        .iter()
        .filter(|s| matches!(s, Statement::PVariableDecl { ty, .. } if ty.name() == TEMPLATE_SENSOR.name()))
        .count();
    assert_eq!(declarations, 1);

    let setup = compiled.output.setup_code();
    assert_eq!(setup.matches("App.register_sensor(").count(), 1, "{setup}");
    assert!(setup.contains("set_template("), "{setup}");
    assert!(setup.contains("return 1;"), "{setup}");
    assert!(setup.contains("set_update_interval(60000)"), "{setup}");

    let added: Vec<String> = flags(&compiled).difference(&flags(&bare)).cloned().collect();
    assert_eq!(added, ["-DUSE_SENSOR"]);
}

#[test]
fn on_boot_delay_then_conditional_log() {
    let compiled = compile_ok(json!({
        "esphome": {
            "name": "livingroom", "platform": "ESP32", "board": "nodemcu-32s",
            "on_boot": {"then": [
                {"delay": "1s"},
                {"if": {"condition": {"lambda": "return true;"}, "then": [{"logger.log": "booted"}]}},
            ]},
        },
        "logger": {},
    }));
    let lines = &compiled.output.setup_lines;
    let setup = compiled.output.setup_code();

    let trigger = line_index(lines, |l| l.contains("StartupTrigger"), "startup trigger");
    let delay = line_index(lines, |l| l.contains("new DelayAction"), "delay action");
    let if_action = line_index(lines, |l| l.contains("new IfAction"), "if action");
    assert!(trigger < delay && delay < if_action, "{setup}");
    assert!(setup.contains("new LambdaCondition"), "{setup}");
    assert!(setup.contains("add_then("), "{setup}");
    assert!(!setup.contains("add_else("), "{setup}");
    assert!(setup.contains("booted"), "{setup}");
}

#[test]
fn expander_pin_waits_for_its_hub() {
    // The switch comes first in the document, so its routine has to park
    // until the expander is declared.
    let compiled = compile_ok(json!({
        "switch": [{"platform": "gpio", "id": "relay", "name": "Relay", "pin": {"pcf8574": "io", "number": 3}}],
        "pcf8574": [{"id": "io"}],
    }));
    let lines = &compiled.output.setup_lines;
    let hub = line_index(lines, |l| l.starts_with("io = new "), "hub declaration");
    let parent = line_index(lines, |l| l.contains("->set_parent(io)"), "pin parent");
    let relay = line_index(lines, |l| l.starts_with("relay = new "), "switch declaration");
    assert!(hub < parent && parent < relay, "{}", lines.join("\n"));
    assert!(compiled.output.stats.parks >= 1);
    assert!(compiled.config.loaded.contains("i2c"));
}

#[test]
fn duplicate_sensor_ids_are_reported_once() {
    let error = compile_err(json!({
        "sensor": [
            {"platform": "template", "id": "t", "name": "A", "lambda": "return 1;"},
            {"platform": "template", "id": "t", "name": "B", "lambda": "return 2;"},
        ],
    }));
    assert_eq!(error.kinds(), ["DuplicateId"]);
    let Error::Validation(report) = &error else { panic!("{error}") };
    let ConfigError::DuplicateId { name, first_path, second_path } = &report.errors[0] else { panic!("{error}") };
    assert_eq!(name, "t");
    assert_eq!(first_path.to_string(), "sensor[0].id");
    assert_eq!(second_path.to_string(), "sensor[1].id");
}

#[test]
fn missing_reference_names_its_demander() {
    let error = compile_err(json!({
        "switch": [{"platform": "template", "name": "A", "turn_on_action": [{"switch.turn_on": "missing"}]}],
    }));
    let Error::Codegen(CodegenError::Unresolved(unresolved)) = error else { panic!("{error}") };
    assert_eq!(unresolved, [UnresolvedId { name: "missing".into(), demanders: vec!["switch[0]".into()] }]);
}

#[test]
fn kalman_option_is_rejected_for_mean() {
    let error = compile_err(json!({
        "sensor": [
            {"platform": "template", "id": "s", "name": "S", "lambda": "return 1;"},
            {
                "platform": "combination", "type": "mean", "name": "Avg",
                "sources": [{"source": "s"}], "process_std_dev": 0.1,
            },
        ],
    }));
    assert_eq!(error.kinds(), ["InvalidConfig"]);
    let Error::Validation(report) = &error else { panic!("{error}") };
    let ConfigError::InvalidConfig { path, message } = &report.errors[0] else { panic!("{error}") };
    assert_eq!(message, "extra keys not allowed");
    assert_eq!(path.to_string(), "sensor[1].process_std_dev");
    assert!(error.to_string().contains("[process_std_dev] is an invalid option for [sensor]."), "{error}");
}

#[test]
fn unknown_top_level_keys_are_named() {
    let error = compile_err(json!({"sensr": []}));
    assert_eq!(error.kinds(), ["UnknownComponent"]);
    assert!(error.to_string().contains("Component not found: sensr"), "{error}");
}

#[test]
fn copy_sensor_inherits_unit_from_its_source() {
    let compiled = compile_ok(json!({
        "sensor": [
            {"platform": "copy", "source_id": "temp", "name": "Mirror"},
            {"platform": "template", "id": "temp", "name": "Temp", "unit_of_measurement": "°C"},
        ],
    }));
    let mirror = &compiled.config.get("sensor").and_then(|s| s.as_seq()).expect("sensor list")[0];
    assert_eq!(mirror.get("unit_of_measurement").and_then(|u| u.as_str()), Some("°C"));
    assert!(compiled.output.setup_code().contains("->set_source(temp)"));
}
