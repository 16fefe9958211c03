//! The ID pass: runs once over the fully validated tree.
//!
//! Manual declarations must be unique; unnamed declarations get
//! `<component>_<n>` names; named uses must point at an assignable type;
//! unnamed uses bind to the single assignable declaration. A named use of an
//! undeclared ID is left alone here, code generation reports it.
use std::collections::{BTreeMap, BTreeSet};

use crate::ir::TypeRef;
use crate::schema::leaf::is_reserved_id;
use crate::validate::ConfigError;
use crate::value::{ConfigId, ConfigPath, ConfigValue};

struct Occurrence {
    path: ConfigPath,
    id: ConfigId,
}

fn collect(value: &ConfigValue, path: &ConfigPath, out: &mut Vec<Occurrence>) {
    match value {
        ConfigValue::Id(id) => out.push(Occurrence { path: path.clone(), id: id.clone() }),
        ConfigValue::Map(m) => {
            for (k, v) in m {
                collect(v, &path.child_key(k.as_str()), out);
            }
        }
        ConfigValue::Seq(items) => {
            for (i, v) in items.iter().enumerate() {
                collect(v, &path.child_index(i), out);
            }
        }
        _ => {}
    }
}

fn prefix_for(path: &ConfigPath) -> String {
    let raw = path.first_key().unwrap_or("id");
    let mut s: String =
        raw.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' }).collect();
    if s.starts_with(|c: char| c.is_ascii_digit()) {
        s.insert(0, '_');
    }
    s
}

fn set_name(root: &mut ConfigValue, path: &ConfigPath, name: &str) {
    if let Some(ConfigValue::Id(id)) = root.at_mut(path) {
        id.name = Some(name.to_string());
    }
}

/// Resolves every ID in `root` in place. Returns all problems found.
#[tracing::instrument(level = "debug", skip_all)]
pub fn resolve_ids(root: &mut ConfigValue) -> Vec<ConfigError> {
    let mut occurrences = Vec::new();
    collect(root, &ConfigPath::root(), &mut occurrences);
    let mut errors = Vec::new();

    // manual declarations
    let mut declared: BTreeMap<String, (ConfigPath, TypeRef)> = BTreeMap::new();
    let mut declaration_order: Vec<String> = Vec::new();
    for occ in occurrences.iter().filter(|o| o.id.is_declaration) {
        let Some(name) = occ.id.name() else { continue };
        if let Some((first_path, _)) = declared.get(name) {
            errors.push(ConfigError::DuplicateId {
                name: name.to_string(),
                first_path: first_path.clone(),
                second_path: occ.path.clone(),
            });
            continue;
        }
        declared.insert(name.to_string(), (occ.path.clone(), occ.id.type_tag.clone()));
        declaration_order.push(name.to_string());
    }

    // automatic names, never colliding with manual ones
    let taken: BTreeSet<String> = occurrences.iter().filter_map(|o| o.id.name().map(str::to_string)).collect();
    let mut counters: BTreeMap<String, usize> = BTreeMap::new();
    for occ in occurrences.iter().filter(|o| o.id.is_declaration && o.id.name.is_none()) {
        let prefix = prefix_for(&occ.path);
        let counter = counters.entry(prefix.clone()).or_insert(0);
        let name = loop {
            *counter += 1;
            let candidate = format!("{prefix}_{counter}");
            if !taken.contains(&candidate) && !declared.contains_key(&candidate) && !is_reserved_id(&candidate) {
                break candidate;
            }
        };
        set_name(root, &occ.path, &name);
        declared.insert(name.clone(), (occ.path.clone(), occ.id.type_tag.clone()));
        declaration_order.push(name);
    }

    // uses
    for occ in occurrences.iter().filter(|o| !o.id.is_declaration) {
        let demanded = &occ.id.type_tag;
        match occ.id.name() {
            Some(name) => {
                if let Some((_, declared_ty)) = declared.get(name) {
                    if !declared_ty.inherits_from(demanded) {
                        errors.push(ConfigError::TypeMismatch {
                            name: name.to_string(),
                            declared: declared_ty.to_string(),
                            demanded: demanded.to_string(),
                            path: occ.path.clone(),
                        });
                    }
                }
            }
            None => {
                let matches: Vec<&String> = declaration_order
                    .iter()
                    .filter(|n| declared.get(*n).is_some_and(|(_, ty)| ty.inherits_from(demanded)))
                    .collect();
                match matches.as_slice() {
                    [] => errors.push(ConfigError::InvalidConfig {
                        path: occ.path.clone(),
                        message: format!(
                            "Couldn't find any component that can be used for '{demanded}'. Are you missing a hub declaration?"
                        ),
                    }),
                    [only] => {
                        let only = only.to_string();
                        set_name(root, &occ.path, &only);
                    }
                    [first, ..] => errors.push(ConfigError::InvalidConfig {
                        path: occ.path.clone(),
                        message: format!(
                            "Too many candidates found for '{}' type '{demanded}', one is '{first}'. Please set the ID explicitly.",
                            occ.path.last_key().unwrap_or("id")
                        ),
                    }),
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{COMPONENT, ESPHOME_NS};
    use crate::value::ConfigMap;

    fn id_value(name: Option<&str>, ty: &TypeRef, declare: bool) -> ConfigValue {
        let name = name.map(str::to_string);
        let id = if declare { ConfigId::declare(name, ty.clone()) } else { ConfigId::reference(name, ty.clone()) };
        ConfigValue::Id(id)
    }

    fn entry(pairs: Vec<(&str, ConfigValue)>) -> ConfigValue {
        ConfigValue::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<ConfigMap>())
    }

    #[test]
    fn duplicate_manual_ids_are_reported_with_both_paths() {
        let ty = ESPHOME_NS.class("Sensor", &[]);
        let mut root = entry(vec![(
            "sensor",
            ConfigValue::Seq(vec![
                entry(vec![("id", id_value(Some("t"), &ty, true))]),
                entry(vec![("id", id_value(Some("t"), &ty, true))]),
            ]),
        )]);
        let errors = resolve_ids(&mut root);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConfigError::DuplicateId { name, first_path, second_path } => {
                assert_eq!(name, "t");
                assert_eq!(first_path.to_string(), "sensor[0].id");
                assert_eq!(second_path.to_string(), "sensor[1].id");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn auto_names_skip_taken_ones() {
        let ty = ESPHOME_NS.class("Sensor", &[]);
        let mut root = entry(vec![(
            "sensor",
            ConfigValue::Seq(vec![
                entry(vec![("id", id_value(Some("sensor_1"), &ty, true))]),
                entry(vec![("id", id_value(None, &ty, true))]),
                entry(vec![("id", id_value(None, &ty, true))]),
            ]),
        )]);
        assert!(resolve_ids(&mut root).is_empty());
        let names: Vec<String> = root.get("sensor").unwrap().as_seq().unwrap().iter()
            .map(|e| e.get("id").and_then(|v| v.as_id()).and_then(|i| i.name.clone()).unwrap())
            .collect();
        assert_eq!(names, ["sensor_1", "sensor_2", "sensor_3"]);
    }

    #[test]
    fn uses_check_types_and_resolve_by_type() {
        let hub = ESPHOME_NS.class("Hub", &[COMPONENT.clone()]);
        let other = ESPHOME_NS.class("Other", &[]);
        let mut root = entry(vec![
            ("hub", entry(vec![("id", id_value(Some("bus"), &hub, true))])),
            ("a", entry(vec![("hub_id", id_value(None, &COMPONENT, false))])),
            ("b", entry(vec![("other_id", id_value(Some("bus"), &other, false))])),
            ("c", entry(vec![("later", id_value(Some("missing"), &hub, false))])),
        ]);
        let errors = resolve_ids(&mut root);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ConfigError::TypeMismatch { name, .. } if name == "bus"));
        let resolved = root.at(&ConfigPath::key("a").child_key("hub_id")).and_then(|v| v.as_id()).unwrap();
        assert_eq!(resolved.name(), Some("bus"));
    }

    #[test]
    fn unnamed_use_without_candidates_fails() {
        let hub = ESPHOME_NS.class("Hub", &[]);
        let mut root = entry(vec![("a", entry(vec![("hub_id", id_value(None, &hub, false))]))]);
        let errors = resolve_ids(&mut root);
        assert!(matches!(&errors[0], ConfigError::InvalidConfig { message, .. } if message.contains("missing a hub")));
    }
}
