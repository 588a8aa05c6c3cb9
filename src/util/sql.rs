use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("static identifier regex"))
}

// Table/column names come from configuration and are spliced into SQL and REST paths,
// so only plain (optionally schema-qualified) identifiers are accepted.
pub fn validate_ident(name: &str) -> Result<()> {
    if !ident_re().is_match(name) { bail!("invalid identifier: {:?}", name); }
    Ok(())
}

// Double-quote each dotted part: public.meta_ads -> "public"."meta_ads"
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
