//! Line-level rewriting of service config files.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::task::steps::LineMutator;

/// Key/value delimiter used by a config file, judged from its name.
///
/// Returns `None` for formats that are copied verbatim.
#[must_use]
pub fn delimiter_for(file_name: &str) -> Option<&'static str> {
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext);
    match extension {
        Some("yaml" | "yml") => Some(": "),
        Some("xml") => None,
        _ => Some("="),
    }
}

/// Rewrites `line` when its key appears in `values`.
///
/// Leading indentation and flag dashes (`--port=1`) are preserved. Comments
/// and lines without the delimiter pass through unchanged.
#[must_use]
pub fn mutate_line(line: &str, delimiter: &str, values: &BTreeMap<String, String>) -> String {
    let body = line.trim_start();
    if body.is_empty() || body.starts_with('#') {
        return line.to_owned();
    }
    let separator = delimiter.trim();
    let Some((raw_key, _)) = body.split_once(separator) else {
        return line.to_owned();
    };
    let flagged = raw_key.trim();
    let key = flagged.trim_start_matches('-');
    let Some(value) = values.get(key) else {
        return line.to_owned();
    };
    let indent = line.strip_suffix(body).unwrap_or_default();
    let dashes = flagged.strip_suffix(key).unwrap_or_default();
    format!("{indent}{dashes}{key}{delimiter}{value}")
}

/// Builds a [`LineMutator`] that applies [`mutate_line`] with `values`.
#[must_use]
pub fn config_mutator(values: BTreeMap<String, String>, delimiter: &'static str) -> LineMutator {
    Arc::new(move |line: &str| mutate_line(line, delimiter, &values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn values() -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("listen.port"), String::from("6700")),
            (String::from("data_path"), String::from("/data")),
        ])
    }

    #[rstest]
    #[case("listen.port=1", "=", "listen.port=6700")]
    #[case("--listen.port=1", "=", "--listen.port=6700")]
    #[case("  data_path: /old", ": ", "  data_path: /data")]
    #[case("# listen.port=1", "=", "# listen.port=1")]
    #[case("other=1", "=", "other=1")]
    #[case("no delimiter here", "=", "no delimiter here")]
    #[case("", "=", "")]
    fn lines_are_rewritten_only_for_known_keys(
        #[case] line: &str,
        #[case] delimiter: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(mutate_line(line, delimiter, &values()), expected);
    }

    #[rstest]
    #[case("store.yaml", Some(": "))]
    #[case("mds.conf", Some("="))]
    #[case("coor_list", Some("="))]
    #[case("logback-executor.xml", None)]
    fn delimiters_follow_the_file_format(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(delimiter_for(name), expected);
    }
}
