use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// DMG hardware revision.
pub enum DmgRevision {
    Rev0,
    RevA,
    RevB,
    #[default]
    RevC,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// CGB hardware revision.
pub enum CgbRevision {
    Rev0,
    RevA,
    RevB,
    RevC,
    RevD,
    #[default]
    RevE,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Regional variant of the original Super Game Boy.
pub enum SgbVariant {
    #[default]
    Ntsc,
    Pal,
}

/// Console variant being emulated.
///
/// The model decides which boot ROM is installed, the screen geometry (SGB
/// models can render a border) and the nominal frame rate reported by the
/// engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    Dmg(DmgRevision),
    Mgb,
    Sgb(SgbVariant),
    Sgb2,
    Cgb(CgbRevision),
    Agb,
}

impl Default for Model {
    fn default() -> Self {
        Model::Cgb(CgbRevision::default())
    }
}

impl Model {
    /// Boot ROM family this model starts from.
    pub const fn boot_rom_kind(self) -> BootRomKind {
        match self {
            Model::Dmg(_) => BootRomKind::Dmg,
            Model::Mgb => BootRomKind::Mgb,
            Model::Sgb(_) => BootRomKind::Sgb,
            Model::Sgb2 => BootRomKind::Sgb2,
            Model::Cgb(_) => BootRomKind::Cgb,
            Model::Agb => BootRomKind::Agb,
        }
    }

    #[inline]
    pub const fn is_sgb(self) -> bool {
        matches!(self, Model::Sgb(_) | Model::Sgb2)
    }

    #[inline]
    pub const fn is_color(self) -> bool {
        matches!(self, Model::Cgb(_) | Model::Agb)
    }
}

/// Boot ROM families. Several models share one image (e.g. every DMG revision).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootRomKind {
    Dmg,
    Mgb,
    Sgb,
    Sgb2,
    Cgb,
    Agb,
}

impl BootRomKind {
    pub const ALL: [BootRomKind; 6] = [
        BootRomKind::Dmg,
        BootRomKind::Mgb,
        BootRomKind::Sgb,
        BootRomKind::Sgb2,
        BootRomKind::Cgb,
        BootRomKind::Agb,
    ];
}

/// When the engine renders the SGB border around the LCD image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BorderMode {
    #[default]
    Never,
    Always,
    SgbOnly,
}
