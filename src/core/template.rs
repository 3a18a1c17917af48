//! `{placeholder}` expansion for build command templates.
//!
//! `${...}` is left untouched so CMake variable references pass through.

use std::collections::BTreeMap;

use crate::adapters::BuildContext;
use crate::domain::Target;

/// Placeholders every template may use
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "source", "build", "install", "config", "jobs", "cuda", "gui", "python",
];

/// Prefix of the cross-target placeholder `{install:<target>}`
pub const INSTALL_OF: &str = "install:";

/// Placeholder names referenced by a template, in order of appearance
pub fn placeholders(template: &str) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    scan(template, |name| {
        names.push(name.to_string());
        Ok(String::new())
    })?;
    Ok(names)
}

/// Expand every placeholder in `template` from `vars`
pub fn expand(template: &str, vars: &BTreeMap<String, String>) -> Result<String, String> {
    scan(template, |name| {
        vars.get(name)
            .cloned()
            .ok_or_else(|| format!("unknown placeholder '{{{}}}' in '{}'", name, template))
    })
}

/// Variables available while building `target`
pub fn template_vars(target: &Target, ctx: &BuildContext) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    let on_off = |flag: bool| (if flag { "ON" } else { "OFF" }).to_string();

    vars.insert("source".into(), target.source_path.display().to_string());
    vars.insert("build".into(), target.build_path.display().to_string());
    vars.insert("install".into(), target.install_path.display().to_string());
    vars.insert("config".into(), ctx.build_type.to_string());
    vars.insert("jobs".into(), ctx.jobs.to_string());
    vars.insert("cuda".into(), on_off(ctx.cuda && target.accelerated));
    vars.insert("gui".into(), on_off(ctx.gui));
    vars.insert("python".into(), ctx.python.clone());

    for (name, root) in &ctx.install_roots {
        vars.insert(format!("{}{}", INSTALL_OF, name), root.display().to_string());
    }

    vars
}

fn scan<F>(template: &str, mut resolve: F) -> Result<String, String>
where
    F: FnMut(&str) -> Result<String, String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let literal_dollar = rest[..open].ends_with('$');
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let close = after
            .find('}')
            .ok_or_else(|| format!("unterminated '{{' in '{}'", template))?;

        if literal_dollar {
            out.push('{');
            out.push_str(&after[..=close]);
        } else {
            let name = after[..close].trim();
            if name.is_empty() {
                return Err(format!("empty placeholder in '{}'", template));
            }
            out.push_str(&resolve(name)?);
        }

        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
