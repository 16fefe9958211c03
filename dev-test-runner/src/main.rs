//! Runs every JSON fixture under `fixtures/` through the full pipeline and
//! checks the outcome it declares.
//!
//! A fixture is `{"name", "config", "expect"}`; `expect` either lists
//! substrings (or regexes) the generated `main.cpp` must contain, or the
//! error kinds and messages the run must fail with.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use nodegen::settings::Settings;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    name: String,
    config: serde_json::Value,
    expect: Expect,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Expect {
    Ok {
        #[serde(default)]
        contains: Vec<String>,
        #[serde(default)]
        matches: Vec<String>,
        #[serde(default)]
        absent: Vec<String>,
    },
    Err {
        kinds: Vec<String>,
        #[serde(default)]
        messages: Vec<String>,
    },
}

/// `/pattern/` in a message list is a regex, anything else a substring.
static REGEX_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/(.+)/$").expect("static pattern"));

fn text_matches(haystack: &str, needle: &str) -> Result<bool, String> {
    match REGEX_LITERAL.captures(needle) {
        Some(caps) => {
            let re = Regex::new(&caps[1]).map_err(|e| format!("bad regex {needle}: {e}"))?;
            Ok(re.is_match(haystack))
        }
        None => Ok(haystack.contains(needle)),
    }
}

fn load(path: &Path) -> Result<Fixture, String> {
    let src = std::fs::read_to_string(path).map_err(|e| format!("read failed: {e}"))?;
    let de = &mut serde_json::Deserializer::from_str(&src);
    serde_path_to_error::deserialize(de).map_err(|err| format!("at JSON path {} → {}", err.path(), err.inner()))
}

fn check(fixture: &Fixture) -> Result<(), String> {
    let outcome = nodegen::compile(&fixture.config, &Settings::default());
    match (&fixture.expect, outcome) {
        (Expect::Ok { contains, matches, absent }, Ok(compiled)) => {
            let cpp = &compiled.project.main_cpp;
            for needle in contains.iter().chain(matches) {
                if !text_matches(cpp, needle)? {
                    return Err(format!("main.cpp lacks {needle:?}\n{cpp}"));
                }
            }
            for needle in absent {
                if text_matches(cpp, needle)? {
                    return Err(format!("main.cpp unexpectedly has {needle:?}"));
                }
            }
            Ok(())
        }
        (Expect::Ok { .. }, Err(error)) => Err(format!("expected success, got:\n{error}")),
        (Expect::Err { .. }, Ok(_)) => Err("expected an error, compile succeeded".into()),
        (Expect::Err { kinds, messages }, Err(error)) => {
            let got = error.kinds();
            if got.iter().map(|k| k.to_string()).collect::<Vec<_>>() != *kinds {
                return Err(format!("expected kinds {kinds:?}, got {got:?}\n{error}"));
            }
            let text = error.to_string();
            for needle in messages {
                if !text_matches(&text, needle)? {
                    return Err(format!("error lacks {needle:?}:\n{text}"));
                }
            }
            Ok(())
        }
    }
}

fn fixture_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures"))
}

fn main() -> ExitCode {
    let dir = fixture_dir();
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(error) => {
            eprintln!("{} cannot read {}: {error}", "error:".red().bold(), dir.display());
            return ExitCode::FAILURE;
        }
    };
    paths.sort();

    let mut failures = 0;
    for path in &paths {
        let result = load(path).and_then(|fixture| check(&fixture).map(|()| fixture.name));
        match result {
            Ok(name) => eprintln!("{} {name}", "✔".green()),
            Err(message) => {
                failures += 1;
                eprintln!("{} {}", "✘".red(), path.display().to_string().bold());
                for line in message.lines() {
                    eprintln!("  {line}");
                }
            }
        }
    }
    eprintln!("{} passed, {failures} failed", paths.len() - failures);
    if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
