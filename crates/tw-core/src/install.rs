//! Capability installers
//!
//! Each global override is a small installer that feature-detects its target
//! and patches it. Installers run in registration order; a failing installer
//! is logged and skipped so the page always gets every override that could be
//! applied.

use crate::config::ArchiveInfo;
use crate::realm::{RealmRegistry, WindowId};

/// Error type for a single installer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InstallError {
    /// The host does not expose the API (no `Proxy`, no `Worklet`, ...)
    #[error("{0} is not available in this realm")]
    Unsupported(&'static str),
    /// Existing property cannot be redefined
    #[error("Property {0} is not configurable")]
    NotConfigurable(String),
    #[error("Host error: {0}")]
    Host(String),
}

// =============================================================================
// Capability Flags
// =============================================================================

bitflags::bitflags! {
    /// Set of overrides installed in (or enabled for) a realm.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AppliedOverrides: u32 {
        const HISTORY = 1 << 0;
        const LOCATION = 1 << 1;
        /// Attribute setters/getters and URL-bearing properties
        const ELEMENT_ATTRS = 1 << 2;
        /// innerHTML, outerHTML, insertAdjacentHTML
        const HTML_INSERTION = 1 << 3;
        const DOCUMENT_WRITE = 1 << 4;
        const STYLE = 1 << 5;
        const FETCH = 1 << 6;
        const XHR = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const EVENT_SOURCE = 1 << 9;
        /// Worker, SharedWorker, ServiceWorker, Worklet
        const WORKERS = 1 << 10;
        const BEACON = 1 << 11;
        const WINDOW_OPEN = 1 << 12;
        const DATE = 1 << 13;
        const RANDOM = 1 << 14;
        const CRYPTO = 1 << 15;
        const COOKIE = 1 << 16;
        const STORAGE = 1 << 17;
        const POST_MESSAGE = 1 << 18;
        /// window/document proxies
        const PROXY = 1 << 19;
        const AUTO_FETCH = 1 << 20;

        /// Everything that patches DOM interfaces
        const DOM = Self::ELEMENT_ATTRS.bits()
            | Self::HTML_INSERTION.bits()
            | Self::DOCUMENT_WRITE.bits()
            | Self::STYLE.bits();
        const ALL = (1 << 21) - 1;
    }
}

impl AppliedOverrides {
    /// Overrides the configuration allows.
    pub fn enabled_for(info: &ArchiveInfo) -> Self {
        let mut enabled = Self::ALL;
        if info.skip_dom {
            enabled.remove(Self::DOM);
        }
        if info.skip_postmessage {
            enabled.remove(Self::POST_MESSAGE);
        }
        if !info.enable_auto_fetch {
            enabled.remove(Self::AUTO_FETCH);
        }
        if info.is_proxy() {
            // Same-origin proxying: the page already lives at its original URL
            enabled.remove(Self::LOCATION | Self::HISTORY | Self::PROXY);
        }
        enabled
    }
}

// =============================================================================
// Installer Registry
// =============================================================================

/// One override. `G` is the realm's global object handle.
pub trait CapabilityInstaller<G: ?Sized> {
    fn capability(&self) -> AppliedOverrides;

    fn name(&self) -> &'static str;

    fn install(&self, globals: &G) -> Result<(), InstallError>;
}

/// Ordered list of installers.
pub struct InstallerRegistry<G: ?Sized> {
    installers: Vec<Box<dyn CapabilityInstaller<G>>>,
}

impl<G: ?Sized> Default for InstallerRegistry<G> {
    fn default() -> Self {
        Self { installers: Vec::new() }
    }
}

impl<G: ?Sized> InstallerRegistry<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, installer: Box<dyn CapabilityInstaller<G>>) {
        self.installers.push(installer);
    }

    pub fn len(&self) -> usize {
        self.installers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installers.is_empty()
    }

    /// Run every installer whose capability is in `enabled` and not yet in
    /// `applied`. Returns the updated applied set.
    pub fn install_all(&self, globals: &G, enabled: AppliedOverrides, applied: AppliedOverrides) -> AppliedOverrides {
        let mut applied = applied;
        for installer in &self.installers {
            let cap = installer.capability();
            if !enabled.contains(cap) || applied.contains(cap) {
                continue;
            }
            match installer.install(globals) {
                Ok(()) => {
                    log::debug!("installed {}", installer.name());
                    applied.insert(cap);
                }
                Err(InstallError::Unsupported(what)) => {
                    log::debug!("skipping {}: {} unsupported", installer.name(), what);
                }
                Err(e) => {
                    log::warn!("override {} not installed: {}", installer.name(), e);
                }
            }
        }
        applied
    }

    /// Initialize `window` once. `None` if it was already initialized.
    pub fn initialize_realm(
        &self,
        registry: &mut RealmRegistry,
        window: WindowId,
        globals: &G,
        info: &ArchiveInfo,
    ) -> Option<AppliedOverrides> {
        if !registry.mark_initialized(window) {
            log::debug!("window {} already initialized", window.index());
            return None;
        }
        let applied = self.install_all(globals, AppliedOverrides::enabled_for(info), AppliedOverrides::empty());
        log::info!("realm {} initialized with {:?}", window.index(), applied);
        Some(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_info;
    use std::cell::RefCell;

    /// Fake global object recording installs.
    #[derive(Default)]
    struct Globals {
        installed: RefCell<Vec<&'static str>>,
        has_worklet: bool,
    }

    struct Fixed {
        cap: AppliedOverrides,
        name: &'static str,
    }

    impl CapabilityInstaller<Globals> for Fixed {
        fn capability(&self) -> AppliedOverrides {
            self.cap
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn install(&self, globals: &Globals) -> Result<(), InstallError> {
            match self.name {
                "worklet" if !globals.has_worklet => Err(InstallError::Unsupported("Worklet")),
                "cookie" => Err(InstallError::NotConfigurable("document.cookie".into())),
                _ => {
                    globals.installed.borrow_mut().push(self.name);
                    Ok(())
                }
            }
        }
    }

    fn registry() -> InstallerRegistry<Globals> {
        let mut reg = InstallerRegistry::new();
        for (cap, name) in [
            (AppliedOverrides::HISTORY, "history"),
            (AppliedOverrides::WORKERS, "worklet"),
            (AppliedOverrides::COOKIE, "cookie"),
            (AppliedOverrides::ELEMENT_ATTRS, "attrs"),
            (AppliedOverrides::FETCH, "fetch"),
        ] {
            reg.register(Box::new(Fixed { cap, name }));
        }
        reg
    }

    #[test]
    fn test_failures_do_not_stop_installation() {
        let reg = registry();
        let globals = Globals::default();
        let applied = reg.install_all(&globals, AppliedOverrides::ALL, AppliedOverrides::empty());
        assert_eq!(*globals.installed.borrow(), vec!["history", "attrs", "fetch"]);
        assert!(applied.contains(AppliedOverrides::FETCH));
        assert!(!applied.contains(AppliedOverrides::COOKIE));
        assert!(!applied.contains(AppliedOverrides::WORKERS));
    }

    #[test]
    fn test_install_is_idempotent() {
        let reg = registry();
        let globals = Globals::default();
        let applied = reg.install_all(&globals, AppliedOverrides::ALL, AppliedOverrides::empty());
        reg.install_all(&globals, AppliedOverrides::ALL, applied);
        assert_eq!(globals.installed.borrow().len(), 3);
    }

    #[test]
    fn test_enabled_for_toggles() {
        let mut info = sample_info();
        info.skip_dom = true;
        let enabled = AppliedOverrides::enabled_for(&info);
        assert!(!enabled.intersects(AppliedOverrides::DOM));
        assert!(!enabled.contains(AppliedOverrides::AUTO_FETCH));
        assert!(enabled.contains(AppliedOverrides::POST_MESSAGE));

        let reg = registry();
        let globals = Globals::default();
        reg.install_all(&globals, enabled, AppliedOverrides::empty());
        assert!(!globals.installed.borrow().contains(&"attrs"));
    }

    #[test]
    fn test_initialize_realm_once() {
        let reg = registry();
        let globals = Globals::default();
        let mut realms = RealmRegistry::new();
        let win = realms.register(None, true);
        let info = sample_info();

        assert!(reg.initialize_realm(&mut realms, win, &globals, &info).is_some());
        assert!(reg.initialize_realm(&mut realms, win, &globals, &info).is_none());
        assert_eq!(globals.installed.borrow().len(), 3);
    }
}
