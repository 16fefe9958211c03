//! `--jq-expr` preprocessing: run a jq filter over an input document before
//! it is validated. A filter may yield several documents; each becomes its
//! own config.
use anyhow::{Context, Result, anyhow};
use jaq_core::{Compiler, Ctx, RcIter, compile::Undefined, load};
use jaq_json::Val;
use serde_json::Value;

pub fn run_jaq(filter_src: &str, input: &Value) -> Result<Vec<Value>> {
    let loader = load::Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = load::Arena::default();
    let program = load::File { code: filter_src, path: () };

    let modules = loader.load(&arena, program).map_err(format_parse_errors)?;
    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(format_undefined_errors)?;

    let inputs = RcIter::new(core::iter::empty());
    let results = filter.run((Ctx::new([], &inputs), Val::from(input.clone())));

    let mut out = Vec::new();
    for (i, item) in results.enumerate() {
        let val = item.map_err(|e| anyhow!("jq filter failed: {e:?}"))?;
        // Val's Display is JSON text.
        let doc = serde_json::from_str(&val.to_string()).with_context(|| format!("jq output #{i} is not JSON"))?;
        out.push(doc);
    }
    tracing::debug!(outputs = out.len(), "jq filter applied");
    Ok(out)
}

fn format_parse_errors(errs: Vec<(load::File<&str, ()>, load::Error<&str>)>) -> anyhow::Error {
    let lines: Vec<String> = errs.iter().map(|(file, err)| format!("cannot parse `{}`: {err:?}", file.code)).collect();
    anyhow!(lines.join("\n"))
}

fn format_undefined_errors(errs: Vec<(load::File<&str, ()>, Vec<(&str, Undefined)>)>) -> anyhow::Error {
    let lines: Vec<String> = errs
        .iter()
        .flat_map(|(file, list)| {
            list.iter().map(move |(name, undef)| format!("`{name}` is undefined ({undef:?}) in `{}`", file.code))
        })
        .collect();
    anyhow!(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_can_fan_out() {
        let input = json!({"devices": [{"esphome": {"name": "a"}}, {"esphome": {"name": "b"}}]});
        let docs = run_jaq(".devices[]", &input).unwrap();
        assert_eq!(docs, [json!({"esphome": {"name": "a"}}), json!({"esphome": {"name": "b"}})]);
    }

    #[test]
    fn unknown_functions_are_reported() {
        let err = run_jaq("nosuchfn(1)", &json!(null)).unwrap_err();
        assert!(err.to_string().contains("nosuchfn"), "{err}");
    }
}
