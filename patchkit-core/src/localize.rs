use fluent_bundle::{FluentArgs, FluentBundle, FluentResource};
use unic_langid::LanguageIdentifier;

pub use fluent_bundle::FluentValue;

const EN_GB: &str = include_str!("../i18n/en-GB.ftl");

/// Fluent catalogue for user-facing summary lines.
pub struct Localizer {
    bundle: FluentBundle<FluentResource>,
}

impl Localizer {
    /// Built-in catalogue for `lang`; unknown languages fall back to en-GB.
    pub fn builtin(lang: &str) -> Self {
        let fallback: LanguageIdentifier = "en-GB".parse().unwrap_or_default();
        let langid: LanguageIdentifier = lang.parse().unwrap_or_else(|_| fallback.clone());
        // Only en-GB ships today; other locales format with it.
        // A resource with syntax errors still carries every message that parsed.
        let res = FluentResource::try_new(EN_GB.to_owned()).unwrap_or_else(|(res, _)| res);
        let mut bundle = FluentBundle::new(vec![langid, fallback]);
        bundle.set_use_isolating(false);
        let _ = bundle.add_resource(res);
        Self { bundle }
    }

    /// Format message `code`; returns `code` itself when it is missing or fails.
    pub fn msg(&self, code: &str, args: &[(&str, FluentValue<'_>)]) -> String {
        let Some(pattern) = self.bundle.get_message(code).and_then(|m| m.value()) else {
            return code.to_string();
        };
        let mut fa = FluentArgs::new();
        for (k, v) in args {
            fa.set(*k, v.clone());
        }
        let mut errs = vec![];
        let s = self.bundle.format_pattern(pattern, Some(&fa), &mut errs).to_string();
        if errs.is_empty() {
            s
        } else {
            code.to_string()
        }
    }

    pub fn count(&self, code: &str, count: usize) -> String {
        self.msg(code, &[("count", FluentValue::from(count))])
    }
}
