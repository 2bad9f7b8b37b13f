//! Parsers for the HTML challenge pages served outside the JSON API.
//!
//! The unlock page is a plain form. Two variants exist in the wild: one that
//! asks for a "Delete" confirmation before the challenge and one that does
//! not, so the parser reports every button it recognises and leaves the
//! branching to the unlock flow.

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static AUTHENTICITY_TOKEN_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"input[name="authenticity_token"]"#).expect("invalid selector")
});
static ASSIGNMENT_TOKEN_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"input[name="assignment_token"]"#).expect("invalid selector")
});
static VERIFICATION_STRING_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"input[id="verification_string"]"#).expect("invalid selector")
});
static START_BUTTON_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[value="Start"]"#).expect("invalid selector"));
static FINISH_BUTTON_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[value="Continue to X"]"#).expect("invalid selector"));
static DELETE_BUTTON_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[value="Delete"]"#).expect("invalid selector"));

/// Hidden form tokens and visible action buttons of an unlock page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockPage {
    pub authenticity_token: Option<String>,
    pub assignment_token: Option<String>,
    /// A captcha widget is present and still demands solving.
    pub needs_unlock: bool,
    pub start_button: bool,
    pub finish_button: bool,
    pub delete_button: bool,
}

impl UnlockPage {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);

        let input_value = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .and_then(|element| element.value().attr("value"))
                .map(str::to_string)
        };

        UnlockPage {
            authenticity_token: input_value(&AUTHENTICITY_TOKEN_SEL),
            assignment_token: input_value(&ASSIGNMENT_TOKEN_SEL),
            needs_unlock: document.select(&VERIFICATION_STRING_SEL).next().is_some(),
            start_button: document.select(&START_BUTTON_SEL).next().is_some(),
            finish_button: document.select(&FINISH_BUTTON_SEL).next().is_some(),
            delete_button: document.select(&DELETE_BUTTON_SEL).next().is_some(),
        }
    }

    /// Any confirm-style button the flow should press before (or after) the
    /// captcha itself.
    pub fn has_confirm_button(&self) -> bool {
        self.start_button || self.finish_button
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(extra: &str) -> String {
        format!(
            r#"<html><body><form action="/account/access" method="post">
                <input type="hidden" name="authenticity_token" value="aaa111">
                <input type="hidden" name="assignment_token" value="bbb222">
                {extra}
            </form></body></html>"#
        )
    }

    #[test]
    fn parses_tokens_and_start_button() {
        let parsed = UnlockPage::parse(&page(r#"<input type="submit" value="Start">"#));
        assert_eq!(parsed.authenticity_token.as_deref(), Some("aaa111"));
        assert_eq!(parsed.assignment_token.as_deref(), Some("bbb222"));
        assert!(parsed.start_button);
        assert!(!parsed.delete_button);
        assert!(!parsed.needs_unlock);
        assert!(parsed.has_confirm_button());
    }

    #[test]
    fn detects_captcha_widget() {
        let parsed = UnlockPage::parse(&page(r#"<input id="verification_string" type="hidden">"#));
        assert!(parsed.needs_unlock);
        assert!(!parsed.has_confirm_button());
    }

    #[test]
    fn detects_delete_confirmation_variant() {
        let parsed = UnlockPage::parse(&page(r#"<input type="submit" value="Delete">"#));
        assert!(parsed.delete_button);
    }

    #[test]
    fn empty_page_parses_to_nothing() {
        let parsed = UnlockPage::parse("<html><body>done</body></html>");
        assert_eq!(parsed, UnlockPage::default());
    }
}
