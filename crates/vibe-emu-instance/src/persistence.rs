use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use log::{info, warn};

use crate::engine::EngineCore;
use crate::hardware::{BootRomKind, Model};

/// Boot ROM images shipped with the embedding application.
#[derive(Clone, Debug, Default)]
pub struct BuiltInBootRoms {
    images: BTreeMap<BootRomKind, Vec<u8>>,
    fast_cgb: Option<Vec<u8>>,
}

impl BuiltInBootRoms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: BootRomKind, image: impl Into<Vec<u8>>) -> Self {
        self.images.insert(kind, image.into());
        self
    }

    /// CGB image that skips the logo animation.
    pub fn with_fast_cgb(mut self, image: impl Into<Vec<u8>>) -> Self {
        self.fast_cgb = Some(image.into());
        self
    }

    pub fn get(&self, kind: BootRomKind) -> Option<&[u8]> {
        self.images.get(&kind).map(Vec::as_slice)
    }

    pub fn fast_cgb(&self) -> Option<&[u8]> {
        self.fast_cgb.as_deref()
    }
}

/// Picks the boot ROM image for a model: fast CGB image, then the user's
/// custom file, then the built-in table.
#[derive(Debug, Default)]
pub struct BootRomSelector {
    custom: BTreeMap<BootRomKind, PathBuf>,
    fast_boot: bool,
    built_in: BuiltInBootRoms,
}

impl BootRomSelector {
    pub fn new(built_in: BuiltInBootRoms) -> Self {
        Self {
            built_in,
            ..Self::default()
        }
    }

    pub fn set_custom_path(&mut self, kind: BootRomKind, path: Option<PathBuf>) {
        match path {
            Some(path) => {
                self.custom.insert(kind, path);
            }
            None => {
                self.custom.remove(&kind);
            }
        }
    }

    pub fn set_fast_boot(&mut self, fast_boot: bool) {
        self.fast_boot = fast_boot;
    }

    pub fn resolve(&self, kind: BootRomKind) -> Option<Cow<'_, [u8]>> {
        if self.fast_boot && kind == BootRomKind::Cgb {
            if let Some(image) = self.built_in.fast_cgb() {
                return Some(Cow::Borrowed(image));
            }
            warn!("No fast CGB boot ROM available; using the regular one");
        } else if let Some(path) = self.custom.get(&kind) {
            match fs::read(path) {
                Ok(image) => return Some(Cow::Owned(image)),
                Err(e) => warn!(
                    "Failed to load boot ROM {}: {e}; using the built-in {kind:?} boot ROM",
                    path.display()
                ),
            }
        }

        let built_in = self.built_in.get(kind).map(Cow::Borrowed);
        if built_in.is_none() {
            warn!("Unable to find a suitable boot ROM for {kind:?}");
        }
        built_in
    }

    /// Hands the resolved image to the engine. Without one, the engine keeps
    /// whatever boot ROM it had.
    pub fn install(&self, engine: &mut dyn EngineCore, model: Model) {
        if let Some(image) = self.resolve(model.boot_rom_kind()) {
            engine.load_boot_rom(&image);
        }
    }
}

/// Remembers the user's model while a save state has put the engine on a
/// different one.
#[derive(Debug, Default)]
pub struct ModelBookkeeping {
    original: Option<Model>,
}

impl ModelBookkeeping {
    pub fn original(&self) -> Option<Model> {
        self.original
    }

    /// A save state switched away from `previous`. Only the first switch is
    /// remembered.
    pub fn record_implicit_switch(&mut self, previous: Model) {
        if self.original.is_none() {
            info!("Save state switched the model away from {previous:?}");
            self.original = Some(previous);
        }
    }

    pub fn take_original(&mut self) -> Option<Model> {
        self.original.take()
    }

    /// The user picked a model explicitly.
    pub fn clear(&mut self) {
        self.original = None;
    }
}
