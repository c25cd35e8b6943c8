//! Core type definitions for Timewarp
//!
//! These types describe the archive URL scheme (modifiers), the values that
//! cross the interception boundary, and the per-call rewrite context.

use std::fmt;

// =============================================================================
// Rewrite Modifiers (archive URL scheme)
// =============================================================================

/// Resource-class code embedded in a rewritten URL.
///
/// The archive server routes on these codes bit-for-bit, so `as_str` is the
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// `mp_` - generic resource / top-level navigation
    Navigation,
    /// `im_` - image
    Image,
    /// `oe_` - other embed, audio and video
    OtherEmbed,
    /// `cs_` - stylesheet
    Stylesheet,
    /// `js_` - script
    Script,
    /// `if_` - iframe document
    Iframe,
    /// `fr_` - legacy frame document
    Frame,
    /// `wkr_` - worker script
    Worker,
    /// `sw_` - service worker script
    ServiceWorker,
    /// `ws_` - websocket
    WebSocket,
    /// `id_` - identity (served without any server-side rewriting)
    Identity,
    /// Empty modifier: `{prefix}{timestamp}/{url}`
    Bare,
    /// `-` - never rewrite
    NoRewrite,
}

impl Modifier {
    /// Wire representation of this modifier.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "mp_",
            Self::Image => "im_",
            Self::OtherEmbed => "oe_",
            Self::Stylesheet => "cs_",
            Self::Script => "js_",
            Self::Iframe => "if_",
            Self::Frame => "fr_",
            Self::Worker => "wkr_",
            Self::ServiceWorker => "sw_",
            Self::WebSocket => "ws_",
            Self::Identity => "id_",
            Self::Bare => "",
            Self::NoRewrite => "-",
        }
    }

    /// Is this a media-class modifier (queued separately by auto-fetch)?
    #[inline]
    pub fn is_audio_video(self) -> bool {
        matches!(self, Self::OtherEmbed)
    }
}

impl TryFrom<&str> for Modifier {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "mp_" => Ok(Self::Navigation),
            "im_" => Ok(Self::Image),
            "oe_" => Ok(Self::OtherEmbed),
            "cs_" => Ok(Self::Stylesheet),
            "js_" => Ok(Self::Script),
            "if_" => Ok(Self::Iframe),
            "fr_" => Ok(Self::Frame),
            "wkr_" => Ok(Self::Worker),
            "sw_" => Ok(Self::ServiceWorker),
            "ws_" => Ok(Self::WebSocket),
            "id_" => Ok(Self::Identity),
            "" => Ok(Self::Bare),
            "-" => Ok(Self::NoRewrite),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Intercepted URL values
// =============================================================================

/// A URL-bearing value as it arrives from page code.
///
/// Page code hands interceptors strings, `URL`/`Request`/`Location`-like
/// objects, or arbitrary values. The shape is resolved once at the boundary
/// and everything downstream works on a single string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlLike {
    /// A plain string.
    Str(String),
    /// An object exposing `href` or `url`.
    Object { href: String },
    /// Anything without a usable string form. Passed through untouched.
    Opaque,
}

impl UrlLike {
    /// The string form, if there is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Object { href } => Some(href),
            Self::Opaque => None,
        }
    }

    /// Apply `f` to the string form, keeping the variant.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(&str) -> String,
    {
        match self {
            Self::Str(s) => Self::Str(f(&s)),
            Self::Object { href } => Self::Object { href: f(&href) },
            Self::Opaque => Self::Opaque,
        }
    }
}

impl From<&str> for UrlLike {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for UrlLike {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

// =============================================================================
// Rewrite Context
// =============================================================================

/// Per-call rewrite parameters. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteContext<'a> {
    /// Emit `/coll/...` instead of `scheme://archive-host/coll/...`
    pub use_relative: bool,
    /// Modifier to embed; `None` uses the configured default
    pub modifier: Option<Modifier>,
    /// Base URI of the originating document (rewritten or original form)
    pub document_base: Option<&'a str>,
    /// Explicit base that wins over `document_base`
    pub base_override: Option<&'a str>,
}

impl<'a> RewriteContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    pub fn relative(mut self) -> Self {
        self.use_relative = true;
        self
    }

    pub fn with_document_base(mut self, base: &'a str) -> Self {
        self.document_base = Some(base);
        self
    }

    pub fn with_base_override(mut self, base: &'a str) -> Self {
        self.base_override = Some(base);
        self
    }

    /// Base to resolve dot-relative URLs against, if the caller supplied one.
    pub fn base(&self) -> Option<&'a str> {
        self.base_override.or(self.document_base)
    }
}
