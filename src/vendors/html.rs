//! Just enough HTML picking to read the vendor pages.
//!
//! The pages are generated by the same server-side templates for years,
//! so regular expressions over the markup are reliable enough.

use std::{collections::HashMap, sync::OnceLock};

use regex::Regex;

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

static_regex!(tag_re, r"(?s)<[^>]*>");
static_regex!(input_re, r"(?is)<input\b[^>]*>");
static_regex!(attr_re, r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#);
static_regex!(row_re, r"(?is)<tr\b[^>]*>(.*?)</tr>");
static_regex!(cell_re, r"(?is)<td\b([^>]*)>(.*?)</td>");
static_regex!(anchor_re, r"(?is)<a\b([^>]*)>(.*?)</a>");
static_regex!(option_re, r"(?is)<option\b([^>]*)>(.*?)</option>");

/// Replace the handful of entities the vendors emit
pub fn unescape(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

/// Text content of a fragment, whitespace collapsed
pub fn text(fragment: &str) -> String {
    let stripped = tag_re().replace_all(fragment, " ");
    collapse_whitespace(&unescape(&stripped))
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Attributes of the first tag of the fragment
pub fn attributes(tag: &str) -> HashMap<String, String> {
    attr_re()
        .captures_iter(tag)
        .map(|cap| {
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            (cap[1].to_lowercase(), unescape(value))
        })
        .collect()
}

/// `name -> value` of every `<input>` of the fragment
pub fn inputs(fragment: &str) -> HashMap<String, String> {
    input_re()
        .find_iter(fragment)
        .filter_map(|m| {
            let mut attrs = attributes(m.as_str());
            let name = attrs.remove("name")?;
            Some((name, attrs.remove("value").unwrap_or_default()))
        })
        .collect()
}

/// Inner HTML of every row
pub fn rows(fragment: &str) -> impl Iterator<Item = &str> {
    row_re()
        .captures_iter(fragment)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell<'a> {
    pub attributes: HashMap<String, String>,
    pub inner: &'a str,
}

impl Cell<'_> {
    pub fn has_class(&self, class: &str) -> bool {
        self.attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }
}

/// Every `<td>` of the fragment, in document order
pub fn cells(fragment: &str) -> Vec<Cell<'_>> {
    cell_re()
        .captures_iter(fragment)
        .map(|cap| Cell {
            attributes: attributes(&format!("<td {}>", &cap[1])),
            inner: cap.get(2).map_or("", |m| m.as_str()),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub attributes: HashMap<String, String>,
    pub text: String,
}

/// First `<a>` of the fragment
pub fn first_anchor(fragment: &str) -> Option<Anchor> {
    anchor_re().captures(fragment).map(|cap| Anchor {
        attributes: attributes(&format!("<a {}>", &cap[1])),
        text: text(&cap[2]),
    })
}

/// `(value, text)` of every `<option>` of the fragment
pub fn options(fragment: &str) -> Vec<(String, String)> {
    option_re()
        .captures_iter(fragment)
        .map(|cap| {
            let value = attributes(&cap[1]).remove("value").unwrap_or_default();
            (value, text(&cap[2]))
        })
        .collect()
}

/// Inner HTML of the first `<tag>` of the fragment
pub fn first_element<'a>(fragment: &'a str, tag: &str) -> Option<&'a str> {
    let open = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}>")).ok()?;
    open.captures(fragment)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str())
}

/// Inner HTML of the elements `<tag ...>` whose attribute `attr` contains `value`
pub fn elements_with<'a>(html: &'a str, tag: &str, attr: &str, value: &str) -> Vec<&'a str> {
    let Ok(open) = Regex::new(&format!(r"(?is)<{tag}\b([^>]*)>")) else {
        return vec![];
    };
    let close = format!("</{tag}>");
    let lower = html.to_ascii_lowercase();

    let mut found = vec![];
    for cap in open.captures_iter(html) {
        let attrs = attributes(&cap[1]);
        let matches = attrs
            .get(attr)
            .is_some_and(|v| v.split_whitespace().any(|part| part == value));
        if !matches {
            continue;
        }
        let Some(whole) = cap.get(0) else { continue };
        let start = whole.end();
        if let Some(end) = lower[start..].find(&close) {
            found.push(&html[start..start + end]);
        }
    }
    found
}
