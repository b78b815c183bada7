//! Placeholder substitution for chat messages.
//!
//! Only the documented `${NAME}` placeholders are replaced. Anything else,
//! including documented placeholders whose value is unknown for this build,
//! is left untouched so a template never ends up half-rendered silently.

use std::collections::BTreeMap;

/// Placeholder names recognised in templates.
pub const PLACEHOLDERS: [&str; 12] = [
    "BUILD_ID",
    "BUILD_NAME",
    "BUILD_JOB_NAME",
    "BUILD_PIPELINE_NAME",
    "BUILD_TEAM_NAME",
    "ATC_EXTERNAL_URL",
    "BUILD_URL",
    "STATE",
    "COMMIT",
    "SHORT_COMMIT",
    "OWNER",
    "REPO",
];

/// Values available for substitution.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a placeholder value. Names outside [`PLACEHOLDERS`] are ignored.
    pub fn set(&mut self, name: &str, value: Option<impl Into<String>>) -> &mut Self {
        if let (Some(known), Some(value)) = (PLACEHOLDERS.iter().copied().find(|p| *p == name), value) {
            self.values.insert(known, value.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Render `template`, replacing each known `${NAME}` with its value.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
