//! Template substitution.
//!
//! The engine only needs two things from a templater: the rendered bytes
//! and whether the output depends on the viewer. Viewer-dependent output is
//! kept out of the shared cache tier and never gets an ETag.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{EngineError, EngineResult};
use crate::security::Identity;

/// What a template may see about the current request.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub path: &'a str,
    pub language: Option<&'a str>,
    pub identity: Option<&'a Identity>,
    pub device_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub body: Bytes,
    /// The output varies per session or per request.
    pub dynamic: bool,
}

pub trait Templater: Send + Sync {
    fn render(&self, source: &[u8], ctx: &TemplateContext<'_>) -> EngineResult<Rendered>;
}

/// `{{name}}` substitution.
///
/// Names registered with [`VariableTemplater::with_var`] are constant. The
/// built-in `user`, `language`, `device` and `path` names depend on the
/// request and make the output dynamic. Unknown names are left untouched.
#[derive(Debug, Default, Clone)]
pub struct VariableTemplater {
    vars: HashMap<String, String>,
}

impl VariableTemplater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    fn lookup(&self, name: &str, ctx: &TemplateContext<'_>) -> Option<(String, bool)> {
        if let Some(value) = self.vars.get(name) {
            return Some((value.clone(), false));
        }
        let value = match name {
            "user" => ctx.identity.map(|i| i.name.clone()).unwrap_or_default(),
            "language" => ctx.language.unwrap_or_default().to_string(),
            "device" => ctx.device_id.to_string(),
            "path" => ctx.path.to_string(),
            _ => return None,
        };
        Some((value, true))
    }
}

impl Templater for VariableTemplater {
    fn render(&self, source: &[u8], ctx: &TemplateContext<'_>) -> EngineResult<Rendered> {
        let text = std::str::from_utf8(source)
            .map_err(|e| EngineError::Internal(format!("template is not utf-8: {e}")))?;

        let mut out = String::with_capacity(text.len());
        let mut dynamic = false;
        let mut rest = text;

        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };
            let raw = &rest[open..open + 2 + close + 2];
            let name = raw[2..raw.len() - 2].trim();

            out.push_str(&rest[..open]);
            match self.lookup(name, ctx) {
                Some((value, varies)) => {
                    out.push_str(&value);
                    dynamic |= varies;
                }
                None => out.push_str(raw),
            }
            rest = &rest[open + raw.len()..];
        }
        out.push_str(rest);

        Ok(Rendered {
            body: Bytes::from(out),
            dynamic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(identity: Option<&'a Identity>, language: Option<&'a str>) -> TemplateContext<'a> {
        TemplateContext {
            path: "/page",
            language,
            identity,
            device_id: "dev-1",
        }
    }

    #[test]
    fn test_constant_vars_are_static() {
        let t = VariableTemplater::new().with_var("site", "Shop");
        let out = t.render(b"<h1>{{ site }}</h1>", &ctx(None, None)).unwrap();
        assert_eq!(&out.body[..], b"<h1>Shop</h1>");
        assert!(!out.dynamic);
    }

    #[test]
    fn test_viewer_vars_are_dynamic() {
        let ann = Identity::new("ann");
        let t = VariableTemplater::new();
        let out = t
            .render(b"hi {{user}} ({{language}})", &ctx(Some(&ann), Some("de")))
            .unwrap();
        assert_eq!(&out.body[..], b"hi ann (de)");
        assert!(out.dynamic);
    }

    #[test]
    fn test_unknown_and_unterminated_left_alone() {
        let t = VariableTemplater::new();
        let out = t.render(b"{{nope}} and {{open", &ctx(None, None)).unwrap();
        assert_eq!(&out.body[..], b"{{nope}} and {{open");
        assert!(!out.dynamic);
    }
}
