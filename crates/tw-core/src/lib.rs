//! Timewarp Core Library
//!
//! This crate provides the rewriting engine for client-side web-archive
//! replay. A captured page runs against it believing it is still live on its
//! original origin, while every URL it touches is redirected to the archive
//! and every clock it reads is pinned to the capture.
//!
//! # Architecture
//!
//! Everything funnels through [`Rewriter`]: attribute interceptors, the HTML
//! and CSS rewriters, the synthetic location, network overrides and cookie
//! handling all ask it to classify and rewrite URLs. Nothing here touches a
//! browser directly; host objects are reached through small traits
//! ([`NativeLocation`], [`NativeHistory`], [`RealmHost`],
//! [`CapabilityInstaller`]) that `tw-wasm` implements.
//!
//! # Modules
//!
//! - `types`: Modifiers, intercepted value shapes, rewrite context
//! - `config`: Archive info (`wb_info`) and derived paths
//! - `url`: Allocation-free URL helpers
//! - `rewriter`: URL classification, rewrite and extraction
//! - `modifiers`: (tag, attribute) to modifier table
//! - `srcset`, `css`, `html`: Value rewriters
//! - `interceptors`: Attribute, script and style interception
//! - `location`, `history`: Synthetic navigation state
//! - `realm`: Window registry and proxy bridge
//! - `messaging`: Control messages and postMessage envelopes
//! - `network`: fetch/XHR/WebSocket/worker overrides
//! - `cookie`, `storage`, `clock`: Replay state
//! - `install`: Capability installer registry

pub mod clock;
pub mod config;
pub mod cookie;
pub mod css;
pub mod history;
pub mod html;
pub mod install;
pub mod interceptors;
pub mod location;
pub mod messaging;
pub mod modifiers;
pub mod network;
pub mod realm;
pub mod rewriter;
pub mod srcset;
pub mod storage;
pub mod types;
pub mod url;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use clock::{ReplayClock, SeededRandom};
pub use config::{ArchiveInfo, ConfigError, ReplayPaths};
pub use cookie::{rewrite_cookie, CookieWrite};
pub use css::{extract_media_blocks, rewrite_css};
pub use history::{HistoryError, HistoryShim, NativeHistory};
pub use html::{rewrite_html, rewrite_html_complete, HtmlOptions, WriteBuffer};
pub use install::{AppliedOverrides, CapabilityInstaller, InstallError, InstallerRegistry};
pub use interceptors::{rewrite_attr, unrewrite_attr, ElementView, Preserve, PreserveSink};
pub use location::{DocumentShim, LocationProp, NativeLocation, SyntheticLocation};
pub use messaging::{ControlChannel, ControlMessage, Envelope};
pub use network::{NetworkApi, NetworkShim, RequestPlan};
pub use realm::{ProxyBridge, RealmHost, RealmRegistry, WindowId};
pub use rewriter::Rewriter;
pub use srcset::{extract_srcset, rewrite_srcset};
pub use storage::{ReplayStorage, StorageArea, StorageEvent};
pub use types::{Modifier, RewriteContext, UrlLike};
