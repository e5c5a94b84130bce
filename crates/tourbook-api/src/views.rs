//! # Page Rendering
//!
//! The rendered site goes through the narrow [`PageRenderer`] contract: a
//! template name plus a JSON context in, an HTML document out. The built-in
//! [`HtmlRenderer`] produces plain, escaped markup for the five templates
//! the site uses (`overview`, `tour`, `login`, `account`, `error`); a real
//! templating engine can replace it without touching any handler.
//!
//! Every template receives `title` and, when someone is logged in, `user`.

use std::fmt::Write as _;

use serde_json::Value;
use thiserror::Error;

/// Rendering failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// No template with this name.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// The context lacks a value the template needs.
    #[error("template {template} requires `{field}`")]
    MissingField {
        /// Template name.
        template: String,
        /// Missing context key.
        field: &'static str,
    },
}

/// Turns a template name and context into an HTML document.
pub trait PageRenderer: Send + Sync {
    /// Render `template` with `context`.
    fn render(&self, template: &str, context: &Value) -> Result<String, RenderError>;
}

/// Minimal built-in renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl PageRenderer for HtmlRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String, RenderError> {
        let body = match template {
            "overview" => overview(context),
            "tour" => tour(context)?,
            "login" => login(),
            "account" => account(context)?,
            "error" => error(context),
            other => return Err(RenderError::UnknownTemplate(other.to_string())),
        };
        Ok(layout(context, &body))
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn layout(context: &Value, body: &str) -> String {
    let title = escape_html(text(context, "title"));
    let nav = match context.get("user").filter(|u| !u.is_null()) {
        Some(user) => format!(
            r#"<a href="/my-tours">My bookings</a> <a href="/me">{}</a>"#,
            escape_html(text(user, "name"))
        ),
        None => r#"<a href="/login">Log in</a>"#.to_string(),
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Natours | {title}</title></head>\n<body>\n<header><a href=\"/\">All tours</a> {nav}</header>\n<main>\n{body}\n</main>\n</body>\n</html>\n"
    )
}

fn overview(context: &Value) -> String {
    let mut out = String::from("<section class=\"card-container\">\n");
    let tours = context
        .get("tours")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for tour in tours {
        let _ = writeln!(
            out,
            "<article class=\"card\"><h3>{}</h3><p>{}</p><p>{} per person</p><a href=\"/tour/{}\">Details</a></article>",
            escape_html(text(tour, "name")),
            escape_html(text(tour, "summary")),
            tour.get("price").and_then(Value::as_f64).unwrap_or_default(),
            escape_html(text(tour, "slug")),
        );
    }
    out.push_str("</section>");
    out
}

fn tour(context: &Value) -> Result<String, RenderError> {
    let tour = context.get("tour").ok_or(RenderError::MissingField {
        template: "tour".to_string(),
        field: "tour",
    })?;
    let mut out = format!(
        "<section class=\"tour\" data-tour-id=\"{}\"><h1>{}</h1><p>{} days, {}</p><p>{}</p>",
        escape_html(text(tour, "id")),
        escape_html(text(tour, "name")),
        tour.get("duration").and_then(Value::as_u64).unwrap_or_default(),
        escape_html(text(tour, "difficulty")),
        escape_html(text(tour, "description")),
    );
    if let Some(reviews) = context.get("reviews").and_then(Value::as_array) {
        out.push_str("<ul class=\"reviews\">");
        for review in reviews {
            let _ = write!(
                out,
                "<li>{} ({})</li>",
                escape_html(text(review, "review")),
                review.get("rating").and_then(Value::as_f64).unwrap_or_default(),
            );
        }
        out.push_str("</ul>");
    }
    out.push_str("</section>");
    Ok(out)
}

fn login() -> String {
    "<form class=\"form--login\"><input id=\"email\" type=\"email\" required><input id=\"password\" type=\"password\" required minlength=\"8\"><button>Login</button></form>".to_string()
}

fn account(context: &Value) -> Result<String, RenderError> {
    let user = context
        .get("user")
        .filter(|u| !u.is_null())
        .ok_or(RenderError::MissingField {
            template: "account".to_string(),
            field: "user",
        })?;
    Ok(format!(
        "<form class=\"form-user-data\" action=\"/submit-user-data\" method=\"POST\"><input name=\"name\" value=\"{}\"><input name=\"email\" type=\"email\" value=\"{}\"><button>Save settings</button></form>",
        escape_html(text(user, "name")),
        escape_html(text(user, "email")),
    ))
}

fn error(context: &Value) -> String {
    format!(
        "<div class=\"error\"><h2 class=\"error__title\">{}</h2><div class=\"error__msg\">{}</div></div>",
        escape_html(text(context, "title")),
        escape_html(text(context, "msg")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_template_escapes_message() {
        let html = HtmlRenderer
            .render(
                "error",
                &json!({ "title": "Something went wrong!", "msg": "<script>x</script>" }),
            )
            .unwrap();
        assert!(html.contains("Something went wrong!"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn overview_lists_tours() {
        let html = HtmlRenderer
            .render(
                "overview",
                &json!({
                    "title": "All Tours",
                    "tours": [{ "name": "The Forest Hiker", "slug": "the-forest-hiker", "summary": "s", "price": 397.0 }],
                }),
            )
            .unwrap();
        assert!(html.contains("The Forest Hiker"));
        assert!(html.contains("/tour/the-forest-hiker"));
        assert!(html.contains("Log in"));
    }

    #[test]
    fn layout_shows_logged_in_user() {
        let html = HtmlRenderer
            .render("login", &json!({ "title": "Log into your account", "user": { "name": "Ana" } }))
            .unwrap();
        assert!(html.contains("Ana"));
        assert!(!html.contains("Log in<"));
    }

    #[test]
    fn account_requires_user() {
        let err = HtmlRenderer
            .render("account", &json!({ "title": "Your account" }))
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingField { field: "user", .. }));
    }

    #[test]
    fn unknown_template() {
        assert_eq!(
            HtmlRenderer.render("nope", &json!({})).unwrap_err(),
            RenderError::UnknownTemplate("nope".into())
        );
    }

    #[test]
    fn escape_covers_attribute_breakers() {
        assert_eq!(escape_html(r#"a"b'c&"#), "a&quot;b&#x27;c&amp;");
    }
}
