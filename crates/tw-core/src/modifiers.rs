//! Modifier table
//!
//! Single source of truth mapping `(tag, attribute)` and `(rel, as)` to the
//! modifier embedded in a rewritten URL. Attribute interceptors, the HTML
//! rewriter and the synthetic location all consult this table.

use crate::types::Modifier;

/// Attributes that carry a URL on any element.
pub const GENERIC_URL_ATTRS: &[&str] = &[
    "href", "src", "action", "formaction", "background", "poster", "xlink:href",
];

/// Attributes holding a srcset candidate list.
pub const SRCSET_ATTRS: &[&str] = &["srcset", "imagesrcset"];

/// Lazy-load attributes that are preserved but never rewritten.
pub const LAZY_ATTRS: &[&str] = &["data-src", "data-srcset"];

/// `(tag, attr) -> modifier`. `None` in the modifier slot means "use the
/// configured default".
const TAG_ATTR_TABLE: &[(&str, &str, Option<Modifier>)] = &[
    ("a", "href", None),
    ("area", "href", None),
    ("base", "href", None),
    ("form", "action", None),
    ("meta", "content", None),
    ("button", "formaction", None),
    ("input", "formaction", None),
    ("input", "src", Some(Modifier::OtherEmbed)),
    ("ins", "cite", Some(Modifier::Navigation)),
    ("del", "cite", Some(Modifier::Navigation)),
    ("q", "cite", Some(Modifier::Navigation)),
    ("blockquote", "cite", Some(Modifier::Navigation)),
    ("audio", "src", Some(Modifier::OtherEmbed)),
    ("audio", "poster", Some(Modifier::Image)),
    ("video", "src", Some(Modifier::OtherEmbed)),
    ("video", "poster", Some(Modifier::Image)),
    ("embed", "src", Some(Modifier::OtherEmbed)),
    ("frame", "src", Some(Modifier::Frame)),
    ("iframe", "src", Some(Modifier::Iframe)),
    ("img", "src", Some(Modifier::Image)),
    ("img", "srcset", Some(Modifier::Image)),
    ("image", "href", Some(Modifier::Image)),
    ("image", "xlink:href", Some(Modifier::Image)),
    ("link", "imagesrcset", Some(Modifier::Image)),
    ("object", "data", Some(Modifier::OtherEmbed)),
    ("object", "codebase", Some(Modifier::OtherEmbed)),
    ("param", "value", Some(Modifier::OtherEmbed)),
    ("script", "src", Some(Modifier::Script)),
    ("script", "xlink:href", Some(Modifier::Script)),
    ("source", "src", Some(Modifier::OtherEmbed)),
    ("source", "srcset", Some(Modifier::OtherEmbed)),
    ("track", "src", Some(Modifier::OtherEmbed)),
    ("body", "background", Some(Modifier::Image)),
    ("table", "background", Some(Modifier::Image)),
    ("td", "background", Some(Modifier::Image)),
    ("th", "background", Some(Modifier::Image)),
];

/// `<link as=...>` destination -> modifier.
const LINK_AS_TABLE: &[(&str, Modifier)] = &[
    ("script", Modifier::Script),
    ("worker", Modifier::Worker),
    ("style", Modifier::Stylesheet),
    ("image", Modifier::Image),
    ("document", Modifier::Iframe),
    ("fetch", Modifier::Navigation),
    ("json", Modifier::Navigation),
    ("font", Modifier::OtherEmbed),
    ("audio", Modifier::OtherEmbed),
    ("video", Modifier::OtherEmbed),
    ("embed", Modifier::OtherEmbed),
    ("object", Modifier::OtherEmbed),
    ("track", Modifier::OtherEmbed),
];

fn table_entry(tag: &str, attr: &str) -> Option<Option<Modifier>> {
    TAG_ATTR_TABLE
        .iter()
        .find(|(t, a, _)| t.eq_ignore_ascii_case(tag) && a.eq_ignore_ascii_case(attr))
        .map(|(_, _, m)| *m)
}

/// Shared predicate: does `attr` on `tag` carry a URL that must be rewritten?
pub fn is_url_attr(tag: &str, attr: &str) -> bool {
    if table_entry(tag, attr).is_some() {
        return true;
    }
    if tag.eq_ignore_ascii_case("meta") {
        return false;
    }
    GENERIC_URL_ATTRS.iter().any(|a| a.eq_ignore_ascii_case(attr))
}

/// Is `attr` a srcset-grammar attribute?
pub fn is_srcset_attr(attr: &str) -> bool {
    SRCSET_ATTRS.iter().any(|a| a.eq_ignore_ascii_case(attr))
}

/// Modifier for a URL-bearing attribute. Attributes without a table entry
/// fall back to `default`.
pub fn modifier_for(tag: &str, attr: &str, default: Modifier) -> Modifier {
    match table_entry(tag, attr) {
        Some(Some(m)) => m,
        Some(None) | None => default,
    }
}

/// Modifier for `<link rel=... as=... href=...>`.
pub fn link_modifier(rel: &str, as_hint: Option<&str>) -> Modifier {
    let mut preload = false;
    for token in rel.split_ascii_whitespace() {
        let token = token.to_ascii_lowercase();
        match token.as_str() {
            "stylesheet" => return Modifier::Stylesheet,
            "icon" | "apple-touch-icon" | "mask-icon" => return Modifier::Image,
            "preload" | "prefetch" | "import" => preload = true,
            "modulepreload" => return Modifier::Script,
            _ => {}
        }
    }
    if !preload {
        return Modifier::OtherEmbed;
    }
    let as_hint = as_hint.unwrap_or_default().trim();
    LINK_AS_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(as_hint))
        .map(|(_, m)| *m)
        .unwrap_or(Modifier::Navigation)
}

// =============================================================================
// Preservation
// =============================================================================

/// How a preserved value is interpreted by auto-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreserveKind {
    Src,
    Srcset,
}

/// Media attribute whose value is forwarded to auto-fetch, if any.
pub fn preserve_kind(tag: &str, attr: &str) -> Option<PreserveKind> {
    let media_tag = ["img", "image", "video", "audio", "source", "picture"]
        .iter()
        .any(|t| t.eq_ignore_ascii_case(tag));
    if !media_tag {
        return None;
    }
    let attr = attr.to_ascii_lowercase();
    match attr.as_str() {
        "src" | "data-src" | "poster" => Some(PreserveKind::Src),
        "srcset" | "data-srcset" => Some(PreserveKind::Srcset),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_modifiers() {
        let d = Modifier::Navigation;
        assert_eq!(modifier_for("IMG", "src", d), Modifier::Image);
        assert_eq!(modifier_for("iframe", "SRC", d), Modifier::Iframe);
        assert_eq!(modifier_for("frame", "src", d), Modifier::Frame);
        assert_eq!(modifier_for("script", "src", d), Modifier::Script);
        assert_eq!(modifier_for("video", "poster", d), Modifier::Image);
        assert_eq!(modifier_for("a", "href", Modifier::Iframe), Modifier::Iframe);
    }

    #[test]
    fn test_every_url_attr_has_a_modifier() {
        for (tag, attr, _) in TAG_ATTR_TABLE {
            assert!(is_url_attr(tag, attr), "{tag} {attr}");
        }
        assert!(is_url_attr("div", "background"));
        assert_eq!(modifier_for("div", "background", Modifier::Navigation), Modifier::Navigation);
        assert!(!is_url_attr("div", "class"));
        assert!(!is_url_attr("meta", "href"));
    }

    #[test]
    fn test_link_modifier() {
        assert_eq!(link_modifier("stylesheet", None), Modifier::Stylesheet);
        assert_eq!(link_modifier("Preload", Some("script")), Modifier::Script);
        assert_eq!(link_modifier("preload", Some("image")), Modifier::Image);
        assert_eq!(link_modifier("preload", Some("unknown")), Modifier::Navigation);
        assert_eq!(link_modifier("shortcut icon", None), Modifier::Image);
        assert_eq!(link_modifier("canonical", None), Modifier::OtherEmbed);
    }

    #[test]
    fn test_preserve_kind() {
        assert_eq!(preserve_kind("img", "data-src"), Some(PreserveKind::Src));
        assert_eq!(preserve_kind("source", "srcset"), Some(PreserveKind::Srcset));
        assert_eq!(preserve_kind("script", "src"), None);
    }
}
