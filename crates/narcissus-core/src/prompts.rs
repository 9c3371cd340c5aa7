use std::sync::OnceLock;

use regex::Regex;

use crate::error::{NarcissusError, Result};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

/// Fill `{name}` placeholders in `template` from `vars`.
///
/// Every placeholder must have a value; unused variables are ignored.
/// Values are inserted verbatim and never re-scanned.
pub fn render(template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder().captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value = vars
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| NarcissusError::Template(format!("no value for placeholder '{}'", name)))?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Ok(out)
}
