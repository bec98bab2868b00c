//! SVG canonicalization: explicit viewBox, light background plate, dark fills.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Fill used for the injected background plate.
pub const BACKGROUND_FILL: &str = "white";
/// Fill injected on shapes that carry no explicit fill.
pub const FOREGROUND_FILL: &str = "black";

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

static ROOT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<svg\b[^>]*>").expect("root tag pattern"));
static SHAPE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(path|circle|ellipse|polygon|rect)\b[^>]*>").expect("shape tag pattern")
});
static STYLE_FILL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|;)\s*fill\s*:").expect("style fill pattern"));

/// Parsed `viewBox` rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewBox {
    /// Left edge.
    pub min_x: f64,
    /// Top edge.
    pub min_y: f64,
    /// Width, always positive.
    pub width: f64,
    /// Height, always positive.
    pub height: f64,
}

impl ViewBox {
    /// Square box anchored at the origin.
    pub fn square(size: f64) -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            width: size,
            height: size,
        }
    }

    /// Parses `"x y w h"` (whitespace and/or comma separated). Rejects non-positive extents.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<f64> = raw
            .split(|ch: char| ch.is_whitespace() || ch == ',')
            .filter(|part| !part.is_empty())
            .map(str::parse::<f64>)
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        let [min_x, min_y, width, height] = parts.as_slice() else {
            return None;
        };
        let all_finite = parts.iter().all(|value| value.is_finite());
        if !all_finite || *width <= 0.0 || *height <= 0.0 {
            return None;
        }
        Some(Self {
            min_x: *min_x,
            min_y: *min_y,
            width: *width,
            height: *height,
        })
    }

    /// Background plate covering exactly this box.
    pub fn background_rect(&self) -> String {
        format!(
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{BACKGROUND_FILL}"/>"#,
            self.min_x, self.min_y, self.width, self.height
        )
    }
}

impl fmt::Display for ViewBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.min_x, self.min_y, self.width, self.height)
    }
}

/// Canonicalizes raw markup. Pure: identical input always yields identical output.
///
/// 1. resolves the viewBox (explicit, else synthesized from `width`/`height`, else `default_viewbox`)
///    and writes it, plus the SVG namespace, onto the root tag when missing;
/// 2. injects `fill="black"` on shapes without an explicit fill;
/// 3. inserts a white background rect covering the viewBox right after the root tag.
pub fn canonicalize(markup: &str, default_viewbox: ViewBox) -> Result<String> {
    if markup.trim().is_empty() {
        return Err(Error::Conversion("empty SVG markup".to_string()));
    }
    let root = ROOT_TAG
        .find(markup)
        .ok_or_else(|| Error::Conversion("markup has no <svg> root element".to_string()))?;

    let (root_tag, viewbox) = rewrite_root(root.as_str(), default_viewbox);
    let self_closing = root_tag.ends_with("/>");
    let open_tag = if self_closing {
        format!("{}>", root_tag.trim_end_matches("/>").trim_end())
    } else {
        root_tag
    };

    let body = inject_fills(&markup[root.end()..]);
    let background = viewbox.background_rect();

    let mut out = String::with_capacity(markup.len() + background.len() + 64);
    out.push_str(&markup[..root.start()]);
    out.push_str(&open_tag);
    if !body.starts_with(&background) {
        out.push_str(&background);
    }
    out.push_str(&body);
    if self_closing {
        out.push_str("</svg>");
    }
    Ok(out)
}

/// Returns the innermost complete `<svg>...</svg>` span inside a larger fragment.
///
/// Renderers wrap tokens in extra markup; the innermost span is the first closing tag
/// paired with the nearest opening tag before it.
pub fn extract_svg_fragment(fragment: &str) -> Option<&str> {
    let close = fragment.find("</svg>")?;
    let open = ROOT_TAG
        .find_iter(&fragment[..close])
        .filter(|tag| !tag.as_str().ends_with("/>"))
        .last()?;
    Some(&fragment[open.start()..close + "</svg>".len()])
}

fn rewrite_root(tag: &str, default_viewbox: ViewBox) -> (String, ViewBox) {
    let attrs = parse_attributes(tag);
    let explicit = attr(&attrs, "viewBox").and_then(ViewBox::parse);
    let viewbox = explicit
        .or_else(|| synthesize_viewbox(&attrs))
        .unwrap_or(default_viewbox);
    let has_namespace = attr(&attrs, "xmlns").is_some();

    if explicit.is_some() && has_namespace {
        return (tag.to_string(), viewbox);
    }

    let mut rebuilt = String::from("<svg");
    for attribute in attrs.iter().filter(|attribute| attribute.name != "viewBox") {
        push_attribute(&mut rebuilt, &attribute.name, attribute.value.as_deref());
    }
    push_attribute(&mut rebuilt, "viewBox", Some(&viewbox.to_string()));
    if !has_namespace {
        push_attribute(&mut rebuilt, "xmlns", Some(SVG_NAMESPACE));
    }
    rebuilt.push_str(if tag.ends_with("/>") { "/>" } else { ">" });
    (rebuilt, viewbox)
}

fn synthesize_viewbox(attrs: &[Attribute]) -> Option<ViewBox> {
    let width = numeric_portion(attr(attrs, "width")?)?;
    let height = numeric_portion(attr(attrs, "height")?)?;
    (width > 0.0 && height > 0.0).then_some(ViewBox {
        min_x: 0.0,
        min_y: 0.0,
        width,
        height,
    })
}

/// Leading SVG number of a length: `"48px"` -> 48.0, `"1e2"` -> 100.0.
///
/// Units are discarded. Percentages have no intrinsic extent and yield `None`.
fn numeric_portion(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    let digits_from = |mut at: usize| {
        while bytes.get(at).is_some_and(u8::is_ascii_digit) {
            at += 1;
        }
        at
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if bytes.get(end) == Some(&b'.') {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_end = digits_from(end + 1 + sign);
        if exp_end > end + 1 + sign {
            end = exp_end;
        }
    }
    if raw[end..].trim_start().starts_with('%') {
        return None;
    }
    raw[..end].parse::<f64>().ok().filter(|value| value.is_finite())
}

fn inject_fills(body: &str) -> String {
    SHAPE_TAG
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let tag = &caps[0];
            if has_fill(tag) {
                return tag.to_string();
            }
            let name = &caps[1];
            let rest = &tag[1 + name.len()..];
            format!(r#"<{name} fill="{FOREGROUND_FILL}"{rest}"#)
        })
        .into_owned()
}

fn has_fill(tag: &str) -> bool {
    let attrs = parse_attributes(tag);
    attr(&attrs, "fill").is_some()
        || attr(&attrs, "style").is_some_and(|style| STYLE_FILL.is_match(style))
}

#[derive(Debug, PartialEq)]
struct Attribute {
    name: String,
    value: Option<String>,
}

fn attr<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attribute| attribute.name == name)
        .map(|attribute| attribute.value.as_deref().unwrap_or(""))
}

fn push_attribute(out: &mut String, name: &str, value: Option<&str>) {
    out.push(' ');
    out.push_str(name);
    if let Some(value) = value {
        let quote = if value.contains('"') { '\'' } else { '"' };
        out.push('=');
        out.push(quote);
        out.push_str(value);
        out.push(quote);
    }
}

/// Splits the attribute list of a single start tag (`<name a="1" b='2' c>`).
fn parse_attributes(tag: &str) -> Vec<Attribute> {
    let inner = tag
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_end_matches('/');
    let mut chars = inner.char_indices().peekable();
    // element name
    while chars.next_if(|(_, ch)| !ch.is_whitespace()).is_some() {}

    let mut attrs = Vec::new();
    loop {
        while chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };
        let mut end = start;
        while let Some((idx, ch)) = chars.next_if(|(_, ch)| !ch.is_whitespace() && *ch != '=') {
            end = idx + ch.len_utf8();
        }
        let name = inner[start..end].to_string();
        while chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}
        if chars.next_if(|(_, ch)| *ch == '=').is_none() {
            if !name.is_empty() {
                attrs.push(Attribute { name, value: None });
            }
            continue;
        }
        while chars.next_if(|(_, ch)| ch.is_whitespace()).is_some() {}
        let value = match chars.peek().map(|(_, ch)| *ch) {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut value = String::new();
                for (_, ch) in chars.by_ref() {
                    if ch == quote {
                        break;
                    }
                    value.push(ch);
                }
                value
            }
            Some(_) => {
                let mut value = String::new();
                while let Some((_, ch)) = chars.next_if(|(_, ch)| !ch.is_whitespace()) {
                    value.push(ch);
                }
                value
            }
            None => String::new(),
        };
        attrs.push(Attribute {
            name,
            value: Some(value),
        });
    }
    attrs
}
