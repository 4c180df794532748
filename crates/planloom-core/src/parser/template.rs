//! Template-string compilation
//!
//! Plan strings may interpolate upstream outputs with `{0.price}`
//! notation, where the integer names a step by its original index. The
//! compiler lowers that authoring notation into a positional template
//! record: markers become `{k}` slots indexing into an ordered list of
//! dependency references, so execution only needs positional
//! substitution.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::path;
use crate::types::{DependencyRef, TemplateRef};

static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\d+)(?:\.([^}]+))?\}").expect("marker pattern"));

/// Compile `{index.path}` markers against the index → step-id map.
///
/// Markers whose index is not in the map stay verbatim in the output.
/// Returns `None` when no marker binds, leaving the original string
/// untouched; otherwise every bound marker becomes a distinct `{k}`
/// slot, even when the same source path appears twice.
pub fn compile_template(
    input: &str,
    step_id_by_index: &HashMap<usize, String>,
) -> Option<TemplateRef> {
    let mut rewritten = String::new();
    let mut values: Vec<DependencyRef> = Vec::new();
    let mut last_end = 0;

    for caps in MARKER.captures_iter(input) {
        let matched = caps.get(0).expect("whole match");
        let Some(step_id) = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| step_id_by_index.get(&index))
        else {
            // unknown step index: the marker text stays verbatim
            continue;
        };
        let output_key = caps
            .get(2)
            .map(|p| path::normalize(p.as_str()))
            .unwrap_or_default();

        rewritten.push_str(&input[last_end..matched.start()]);
        rewritten.push('{');
        rewritten.push_str(&values.len().to_string());
        rewritten.push('}');
        values.push(DependencyRef::new(step_id.clone(), output_key));
        last_end = matched.end();
    }

    if values.is_empty() {
        return None;
    }
    rewritten.push_str(&input[last_end..]);
    Some(TemplateRef::new(rewritten, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_map(pairs: &[(usize, &str)]) -> HashMap<usize, String> {
        pairs
            .iter()
            .map(|(index, id)| (*index, id.to_string()))
            .collect()
    }

    #[test]
    fn test_rewrites_markers_into_positional_slots() {
        let ids = id_map(&[(0, "sid-A")]);
        let template =
            compile_template("Price: {0.price} USD ({0.currency})", &ids).expect("template");
        assert_eq!(template.template, "Price: {0} USD ({1})");
        assert_eq!(
            template.values,
            vec![
                DependencyRef::new("sid-A", "price"),
                DependencyRef::new("sid-A", "currency"),
            ]
        );
    }

    #[test]
    fn test_marker_without_path_selects_whole_output() {
        let ids = id_map(&[(0, "sid-A")]);
        let template = compile_template("all: {0}", &ids).expect("template");
        assert_eq!(template.template, "all: {0}");
        assert_eq!(template.values, vec![DependencyRef::new("sid-A", "")]);
    }

    #[test]
    fn test_unknown_index_stays_verbatim() {
        let ids = id_map(&[(0, "sid-A")]);
        let template = compile_template("{0.name} and {7.other}", &ids).expect("template");
        assert_eq!(template.template, "{0} and {7.other}");
        assert_eq!(template.values, vec![DependencyRef::new("sid-A", "name")]);
    }

    #[test]
    fn test_no_bound_marker_returns_none() {
        let ids = id_map(&[(0, "sid-A")]);
        assert!(compile_template("plain text", &ids).is_none());
        assert!(compile_template("{9.missing} only", &ids).is_none());
    }

    #[test]
    fn test_same_path_twice_yields_two_slots() {
        let ids = id_map(&[(0, "sid-A")]);
        let template = compile_template("{0.x} vs {0.x}", &ids).expect("template");
        assert_eq!(template.template, "{0} vs {1}");
        assert_eq!(template.values.len(), 2);
    }

    #[test]
    fn test_bracket_paths_normalize() {
        let ids = id_map(&[(1, "sid-B")]);
        let template = compile_template(r#"item: {1.items[0]["name"]}"#, &ids).expect("template");
        assert_eq!(template.values, vec![DependencyRef::new("sid-B", "items[0].name")]);
    }

    #[test]
    fn test_oversized_index_stays_verbatim() {
        let ids = id_map(&[(0, "sid-A")]);
        let template =
            compile_template("{0.a} {99999999999999999999.b}", &ids).expect("template");
        assert_eq!(template.template, "{0} {99999999999999999999.b}");
    }
}
