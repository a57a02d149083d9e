use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").unwrap())
}

/// Substitute `${NAME}` placeholders from `vars`. Unknown placeholders are
/// left untouched so kubectl reports them instead of silently blanking.
pub fn render(template: &str, vars: &BTreeMap<&str, &str>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match vars.get(name) {
                Some(v) => (*v).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Variables available to replica manifests.
pub fn replica_vars<'a>(
    region: &'a str,
    primary_region: &'a str,
    namespace: &'a str,
) -> BTreeMap<&'static str, &'a str> {
    BTreeMap::from([
        ("REGION", region),
        ("PRIMARY_REGION", primary_region),
        ("NAMESPACE", namespace),
    ])
}
