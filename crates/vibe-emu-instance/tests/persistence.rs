//! ROM loading, save states, boot ROM selection and configuration.

mod common;

use common::{BORDER_SCREEN, SMALL_SCREEN, new_instance};
use vibe_emu_instance::config::{BootRomPaths, InstanceConfig};
use vibe_emu_instance::engine::{Register, RomImage};
use vibe_emu_instance::hardware::{CgbRevision, DmgRevision, SgbVariant};
use vibe_emu_instance::{BootRomKind, BorderMode, InstanceError, Model, PixelBufferMode};

#[test]
fn failed_load_reports_engine_status() {
    let (instance, _witness) = new_instance();
    let err = instance
        .load_rom(RomImage::Buffer(Vec::new()), None, None)
        .unwrap_err();
    assert_eq!(err.status(), Some(-1));
    assert!(!instance.is_rom_loaded());
}

#[test]
fn load_picks_up_battery_and_symbols() {
    let (instance, witness) = new_instance();
    let dir = tempfile::tempdir().unwrap();
    let sram = dir.path().join("game.sav");
    let symbols = dir.path().join("game.sym");
    std::fs::write(&sram, [0u8; 8]).unwrap();
    std::fs::write(&symbols, "00:0100 Start\n").unwrap();

    instance
        .load_rom(
            RomImage::Buffer(vec![0; 32]),
            Some(sram.clone()),
            Some(symbols.clone()),
        )
        .unwrap();
    assert!(instance.is_rom_loaded());

    let witness = witness.lock().unwrap();
    assert_eq!(witness.battery.as_deref(), Some(sram.as_path()));
    assert_eq!(witness.symbols.as_deref(), Some(symbols.as_path()));
    assert_eq!(witness.boot_rom, vec![0xC0; 16]);
}

#[test]
fn missing_battery_does_not_fail_the_load() {
    let (instance, witness) = new_instance();
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.gb");
    std::fs::write(&rom, [0u8; 32]).unwrap();

    instance
        .load_isx(RomImage::Path(rom), Some(dir.path().join("absent.sav")), None)
        .unwrap();
    assert!(instance.is_rom_loaded());
    assert!(witness.lock().unwrap().battery.is_none());
}

#[test]
fn missing_rom_file_is_an_error() {
    let (instance, _witness) = new_instance();
    let dir = tempfile::tempdir().unwrap();
    let err = instance
        .load_rom(RomImage::Path(dir.path().join("absent.gb")), None, None)
        .unwrap_err();
    assert!(matches!(err, InstanceError::Load { .. }));
    assert_eq!(err.status(), None);
}

#[test]
fn sram_is_written_to_the_given_path() {
    let (instance, _witness) = new_instance();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.sav");
    instance.save_sram(&path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), vec![0xBA]);
}

#[test]
fn save_state_switches_model_until_the_next_reset() {
    let (instance, _witness) = new_instance();
    let dmg = Model::Dmg(DmgRevision::default());
    let cgb = Model::Cgb(CgbRevision::default());

    instance.set_model(dmg);
    let state = instance.create_save_state();
    instance.set_model(cgb);

    instance.load_save_state(state.clone()).unwrap();
    assert_eq!(instance.get_model(), dmg);
    instance.reset();
    assert_eq!(instance.get_model(), cgb);

    // An explicit model choice is kept across the reset.
    instance.load_save_state(state).unwrap();
    instance.set_model(Model::Agb);
    instance.reset();
    assert_eq!(instance.get_model(), Model::Agb);
}

#[test]
fn save_state_round_trips_through_a_file() {
    let (instance, _witness) = new_instance();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slot1.state");

    instance.set_register_value(Register::A, 0x77);
    instance.create_save_state_to(&path).unwrap();
    instance.set_register_value(Register::A, 0x00);

    instance.load_save_state_from(&path).unwrap();
    assert_eq!(instance.get_register_value(Register::A), 0x77);
}

#[test]
fn corrupt_save_state_is_rejected() {
    let (instance, _witness) = new_instance();
    let err = instance.load_save_state(vec![4, 1]).unwrap_err();
    assert!(matches!(err, InstanceError::SaveState { .. }));

    let dir = tempfile::tempdir().unwrap();
    let err = instance
        .load_save_state_from(&dir.path().join("absent.state"))
        .unwrap_err();
    assert!(matches!(err, InstanceError::Io(_)));
}

#[test]
fn border_mode_resizes_the_frame() {
    let (instance, _witness) = new_instance();
    instance.set_border_mode(BorderMode::Always);
    assert_eq!(instance.get_border_mode(), BorderMode::Always);
    assert_eq!(instance.get_dimensions(), BORDER_SCREEN);

    let mut pixels = vec![0xFFFF_FFFF; instance.get_pixel_buffer_size()];
    assert!(instance.read_pixel_buffer(&mut pixels));
    assert!(pixels.iter().all(|&p| p == 0));

    instance.set_border_mode(BorderMode::SgbOnly);
    assert_eq!(instance.get_dimensions(), SMALL_SCREEN);
    instance.set_model(Model::Sgb(SgbVariant::Pal));
    assert_eq!(instance.get_dimensions(), BORDER_SCREEN);
}

#[test]
fn boot_rom_follows_fast_boot_and_custom_paths() {
    let (instance, witness) = new_instance();
    let boot_rom = || witness.lock().unwrap().boot_rom.clone();

    instance.set_use_fast_boot_rom(true);
    instance.reset();
    assert_eq!(boot_rom(), vec![0xFA; 16]);

    let dir = tempfile::tempdir().unwrap();
    let custom = dir.path().join("dmg_boot.bin");
    std::fs::write(&custom, [0x11; 16]).unwrap();
    instance.set_boot_rom_path(BootRomKind::Dmg, Some(custom));
    instance.set_model(Model::Dmg(DmgRevision::Rev0));
    assert_eq!(boot_rom(), vec![0x11; 16]);

    instance.set_use_fast_boot_rom(false);
    instance.set_boot_rom_path(BootRomKind::Cgb, Some(dir.path().join("absent.bin")));
    instance.set_model(Model::Cgb(CgbRevision::RevE));
    assert_eq!(boot_rom(), vec![0xC0; 16]);
}

#[test]
fn config_is_applied_to_the_instance() {
    let (instance, witness) = new_instance();
    let dir = tempfile::tempdir().unwrap();
    let custom = dir.path().join("dmg_boot.bin");
    std::fs::write(&custom, [0x22; 16]).unwrap();

    let cfg = InstanceConfig {
        model: Model::Dmg(DmgRevision::RevB),
        border_mode: BorderMode::Always,
        boot_roms: BootRomPaths {
            dmg: Some(custom),
            ..BootRomPaths::default()
        },
        pixel_buffer_mode: PixelBufferMode::Single,
        volume: 30,
        mono: true,
        sample_rate: 44_100,
        audio_buffer_size: 512,
        rewind_seconds: 30.0,
        ..InstanceConfig::default()
    };
    instance.apply_config(&cfg);

    assert_eq!(instance.get_model(), cfg.model);
    assert_eq!(instance.get_border_mode(), BorderMode::Always);
    assert_eq!(instance.get_dimensions(), BORDER_SCREEN);
    assert_eq!(instance.get_pixel_buffering_mode(), PixelBufferMode::Single);
    assert_eq!(instance.get_volume(), 30);
    assert!(instance.is_mono_forced());
    assert_eq!(instance.get_current_sample_rate(), 44_100);
    assert_eq!(instance.get_audio_buffer_size(), 512);
    assert!(!instance.is_turbo_mode());

    let witness = witness.lock().unwrap();
    assert_eq!(witness.boot_rom, vec![0x22; 16]);
    assert_eq!(witness.sample_rate, 44_100);
    assert_eq!(witness.rewind_seconds, 30.0);
}
