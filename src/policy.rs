// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The quirk policy: turns a stock blob plus flags into an overlay blob.
//!
//! Generation is a single linear pass. Each step reads the decoded stock
//! tree and appends content to an [`OverlayBuilder`]; nothing is revisited
//! once written. Steps marked optional swallow [`Error::NotFound`] (and log
//! the skip); everything else aborts the whole generation with no partial
//! output.

use log::{debug, info, warn};

use crate::error::{Error, FormatError, FormatErrorKind};
use crate::model::{DeviceTree, Node, Value};
use crate::overlay::{OverlayBuilder, PHANDLE_PLACEHOLDER};
use crate::symbols::Symbols;
use crate::timing::{self, TimingOptions};

/// One recognized quirk flag.
///
/// Unknown tokens are dropped during parsing, so an unrecognized flag can
/// never change the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// `LSi`: the left stick is wired inverted on purpose; suppress the
    /// default un-inversion.
    LeftStickInverted,
    /// `RSi`: invert the right stick.
    RightStickInverted,
    /// `HPi`: keep the stock headphone-detect polarity instead of flipping
    /// it.
    HeadphoneKeepPolarity,
    /// `DR90`: rotate the panel 90 degrees.
    Rotate90,
    /// `DR180`: rotate the panel 180 degrees.
    Rotate180,
    /// `DR270`: rotate the panel 270 degrees.
    Rotate270,
    /// `JPmm`: force the multi-channel analog joypad variant.
    MultiChannelJoypad,
    /// `JPk36`: force the legacy joypad variant, overriding `JPmm` and the
    /// disabled-ADC-keys inference.
    LegacyJoypad,
    /// `Dno`: ignore the vendor's declared native timing mode.
    IgnoreNativeMode,
    /// `PRs`: swap horizontal and vertical active for panels mounted
    /// rotated.
    SwapPanelAxes,
}

impl Flag {
    /// Parses one flag token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "LSi" => Some(Self::LeftStickInverted),
            "RSi" => Some(Self::RightStickInverted),
            "HPi" => Some(Self::HeadphoneKeepPolarity),
            "DR90" => Some(Self::Rotate90),
            "DR180" => Some(Self::Rotate180),
            "DR270" => Some(Self::Rotate270),
            "JPmm" => Some(Self::MultiChannelJoypad),
            "JPk36" => Some(Self::LegacyJoypad),
            "Dno" => Some(Self::IgnoreNativeMode),
            "PRs" => Some(Self::SwapPanelAxes),
            _ => None,
        }
    }
}

/// Everything a generation request can vary.
#[derive(Debug, Default)]
pub struct Options {
    /// Recognized quirk flags; order and duplication carry no meaning.
    pub flags: Vec<Flag>,
    /// Free-form panel name echoed into the descriptor.
    pub name: Option<String>,
    /// Panel diagonal in inches, used only when the panel declares no
    /// physical size.
    pub diagonal: Option<f64>,
    /// Emit human-readable comments into the descriptor.
    pub comments: bool,
}

impl Options {
    /// Builds options from raw flag tokens, dropping unknown ones.
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut flags = Vec::new();
        for token in tokens {
            match Flag::from_token(token) {
                Some(flag) => flags.push(flag),
                None => debug!("ignoring unknown flag token {token:?}"),
            }
        }
        Self {
            flags,
            ..Self::default()
        }
    }

    fn has(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    /// Requested panel rotation in degrees, if any.
    #[must_use]
    pub fn rotation(&self) -> Option<u32> {
        if self.has(Flag::Rotate90) {
            Some(90)
        } else if self.has(Flag::Rotate180) {
            Some(180)
        } else if self.has(Flag::Rotate270) {
            Some(270)
        } else {
            None
        }
    }
}

const KEY_VOLUMEUP: u32 = 0x73;
const KEY_VOLUMEDOWN: u32 = 0x72;

/// Generates an overlay blob for `stock`.
///
/// This is a pure function: no I/O, no state across calls, safe to invoke
/// concurrently.
///
/// # Errors
///
/// Returns [`Error::Format`] for a malformed stock blob, [`Error::NotFound`]
/// when a node or property the core algorithm requires is missing, and
/// [`Error::ResourceExhausted`] when the overlay runs out of fragment
/// indices.
pub fn generate(stock: &[u8], options: &Options) -> crate::Result<Vec<u8>> {
    let tree = DeviceTree::from_bytes(stock)?;
    let symbols = Symbols::new(&tree)?;
    let mut builder = OverlayBuilder::new();

    add_panel(&mut builder, &tree, &symbols, options)?;

    let adc_disabled = adc_keys_disabled(&tree);
    if adc_disabled {
        add_adc_keys_disable(&mut builder, &tree, &symbols)?;
    }

    add_joypad(&mut builder, options, adc_disabled)?;

    if let Err(e) = add_headphone_detect(&mut builder, &tree, &symbols, options) {
        warn!("headphone detect skipped: {e}");
    }

    Ok(builder.finish().to_dtb())
}

/// Step 1-3: panel fragment with the synthesized descriptor, rotation,
/// reset GPIO, and the optional power-supply and enable-GPIO carries.
fn add_panel(
    builder: &mut OverlayBuilder,
    tree: &DeviceTree,
    symbols: &Symbols,
    options: &Options,
) -> crate::Result<()> {
    let dsi_path = symbols.label_path("dsi")?;
    // panel@0 sits directly under the DSI controller on every supported SoC.
    let panel_path = format!("{dsi_path}/panel@0");
    let panel = tree
        .find_node(&panel_path)
        .ok_or_else(|| Error::not_found("panel node", &panel_path))?;

    let timing_options = TimingOptions {
        name: options.name.as_deref(),
        diagonal: options.diagonal,
        ignore_native: options.has(Flag::IgnoreNativeMode),
        swap_axes: options.has(Flag::SwapPanelAxes),
        comments: options.comments,
    };
    let descriptor: Vec<String> = timing::panel_descriptor(panel, &timing_options)?
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect();

    let fragment = builder.add_fragment("/")?;
    let panel_ovl = format!("{fragment}{panel_path}");
    builder.set_property(&panel_ovl, "compatible", Value::str("rocknix,generic-dsi"));
    builder.set_property(&panel_ovl, "panel_description", Value::strs(descriptor));
    if let Some(degrees) = options.rotation() {
        builder.set_property(&panel_ovl, "rotation", Value::u32(degrees));
        info!("panel rotated {degrees} degrees");
    }

    let reset = gpio_triple(panel, "reset-gpios")?;
    let gpio_sym = symbols.label_for_phandle(reset[0])?.to_owned();
    let gpio_num = gpio_number(&gpio_sym)?;
    builder.set_property(
        &panel_ovl,
        "reset-gpios",
        Value::cells([PHANDLE_PLACEHOLDER, reset[1], reset[2]]),
    );
    builder.add_fixup(&gpio_sym, &format!("{panel_ovl}:reset-gpios:0"));

    let pins_path = format!("{fragment}/pinctrl/gpio-lcd/lcd-rst");
    builder.set_property(
        &pins_path,
        "rockchip,pins",
        Value::cells([gpio_num, reset[1], 0, PHANDLE_PLACEHOLDER]),
    );
    builder.add_fixup("pcfg_pull_none", &format!("{pins_path}:rockchip,pins:12"));

    if let Err(e) = add_power_supply(builder, tree, symbols, panel, &fragment) {
        warn!("panel power supply skipped: {e}");
    }
    if let Err(e) = add_enable_gpio(builder, symbols, panel, &panel_ovl) {
        warn!("panel enable GPIO skipped: {e}");
    }

    Ok(())
}

/// Copies the panel's power-supply regulator GPIO and pin config into the
/// panel fragment. Optional: many stock trees gate the panel rail
/// elsewhere.
fn add_power_supply(
    builder: &mut OverlayBuilder,
    tree: &DeviceTree,
    symbols: &Symbols,
    panel: &Node,
    fragment: &str,
) -> crate::Result<()> {
    let supply_phandle = panel
        .u32("power-supply")
        .ok_or_else(|| Error::not_found("panel property", "power-supply"))?;
    let supply_path = symbols.phandle_path(supply_phandle)?.to_owned();
    let supply = tree
        .find_node(&supply_path)
        .ok_or_else(|| Error::not_found("supply node", &supply_path))?;

    // Fixed regulators spell it either way.
    let gpio_name = if supply.property("gpio").is_some() {
        "gpio"
    } else {
        "gpios"
    };
    let gpio = gpio_triple(supply, gpio_name)?;
    let gpio_sym = symbols.label_for_phandle(gpio[0])?.to_owned();
    let gpio_num = gpio_number(&gpio_sym)?;

    let supply_ovl = format!("{fragment}{supply_path}");
    builder.set_property(
        &supply_ovl,
        gpio_name,
        Value::cells([PHANDLE_PLACEHOLDER, gpio[1], gpio[2]]),
    );
    builder.add_fixup(&gpio_sym, &format!("{supply_ovl}:{gpio_name}:0"));
    if supply.property("enable-active-high").is_some() {
        builder.set_property(&supply_ovl, "enable-active-high", Value::Empty);
    }

    let pins_path = format!("{fragment}/pinctrl/gpio-lcd/lcd-pwr");
    builder.set_property(
        &pins_path,
        "rockchip,pins",
        Value::cells([gpio_num, gpio[1], 0, PHANDLE_PLACEHOLDER]),
    );
    builder.add_fixup("pcfg_pull_none", &format!("{pins_path}:rockchip,pins:12"));

    info!("panel power supply {gpio_sym} copied from {supply_path}");
    Ok(())
}

/// Copies the panel's enable GPIO, when it has one.
fn add_enable_gpio(
    builder: &mut OverlayBuilder,
    symbols: &Symbols,
    panel: &Node,
    panel_ovl: &str,
) -> crate::Result<()> {
    let enable = gpio_triple(panel, "enable-gpios")?;
    let gpio_sym = symbols.label_for_phandle(enable[0])?.to_owned();
    builder.set_property(
        panel_ovl,
        "enable-gpios",
        Value::cells([PHANDLE_PLACEHOLDER, enable[1], enable[2]]),
    );
    builder.add_fixup(&gpio_sym, &format!("{panel_ovl}:enable-gpios:0"));
    info!("panel enable GPIO {gpio_sym} copied");
    Ok(())
}

/// A stock tree without usable ADC keys needs them masked in the overlay.
fn adc_keys_disabled(tree: &DeviceTree) -> bool {
    match tree.find_node("/adc-keys") {
        None => true,
        Some(node) => node.str("status") == Some("disabled"),
    }
}

/// Step 4: mask `/adc-keys` and, when the stock tree carries a joystick
/// node, resurrect the volume keys as GPIO keys.
fn add_adc_keys_disable(
    builder: &mut OverlayBuilder,
    tree: &DeviceTree,
    symbols: &Symbols,
) -> crate::Result<()> {
    let fragment = builder.add_fragment("/")?;
    builder.set_property(
        &format!("{fragment}/adc-keys"),
        "compatible",
        Value::str("deliberately-disabled-adc-keys"),
    );
    info!("disabled adc-keys");

    if tree.find_node("/play_joystick").is_some() {
        add_gpio_vol_keys(builder, tree, symbols, &fragment)?;
    }
    Ok(())
}

/// Volume up/down live at fixed indices 14 and 15 of the stock joystick's
/// key-GPIO array and pin table.
fn add_gpio_vol_keys(
    builder: &mut OverlayBuilder,
    tree: &DeviceTree,
    symbols: &Symbols,
    fragment: &str,
) -> crate::Result<()> {
    let keys = tree
        .find_node("/play_joystick")
        .and_then(|n| n.cells("key-gpios"))
        .ok_or_else(|| Error::not_found("joystick property", "key-gpios"))?;
    let pins = tree
        .find_node("/pinctrl/buttons/gpio-key-pin")
        .and_then(|n| n.cells("rockchip,pins"))
        .ok_or_else(|| Error::not_found("button pin property", "rockchip,pins"))?;

    let slice3 = |data: &[u32], index: usize| -> crate::Result<[u32; 3]> {
        data.get(index * 3..index * 3 + 3)
            .and_then(|s| <[u32; 3]>::try_from(s).ok())
            .ok_or_else(|| {
                Error::Format(FormatError::new(FormatErrorKind::InvalidValue("key-gpios"), 0))
            })
    };
    let slice4 = |data: &[u32], index: usize| -> crate::Result<[u32; 4]> {
        data.get(index * 4..index * 4 + 4)
            .and_then(|s| <[u32; 4]>::try_from(s).ok())
            .ok_or_else(|| {
                Error::Format(FormatError::new(
                    FormatErrorKind::InvalidValue("rockchip,pins"),
                    0,
                ))
            })
    };
    let vol_up = slice3(&keys, 14)?;
    let vol_dn = slice3(&keys, 15)?;
    let vol_up_pin = slice4(&pins, 14)?;
    let vol_dn_pin = slice4(&pins, 15)?;

    let gpio_sym = symbols.label_for_phandle(vol_up[0])?.to_owned();

    let pins_path = format!("{fragment}/pinctrl/btns/btn-pins-vol-overlay");
    builder.set_property(
        &pins_path,
        "rockchip,pins",
        Value::cells([
            vol_up_pin[0],
            vol_up_pin[1],
            vol_up_pin[2],
            PHANDLE_PLACEHOLDER,
            vol_dn_pin[0],
            vol_dn_pin[1],
            vol_dn_pin[2],
            PHANDLE_PLACEHOLDER,
        ]),
    );
    let pins_phandle = builder.add_label("overlay_btns", &pins_path);
    builder.set_property(&pins_path, "phandle", Value::u32(pins_phandle));
    builder.add_fixup("pcfg_pull_up", &format!("{pins_path}:rockchip,pins:12"));
    builder.add_fixup("pcfg_pull_up", &format!("{pins_path}:rockchip,pins:28"));

    let keys_path = format!("{fragment}/gpio-keys-overlay");
    builder.set_property(&keys_path, "compatible", Value::str("gpio-keys"));
    builder.set_property(&keys_path, "autorepeat", Value::Empty);
    builder.set_property(&keys_path, "pinctrl-0", Value::u32(pins_phandle));
    builder.add_local_fixup(&keys_path, "pinctrl-0");
    builder.set_property(&keys_path, "pinctrl-names", Value::str("default"));

    for (button, key, code, label) in [
        ("button-vol-up", vol_up, KEY_VOLUMEUP, "VOLUMEUP"),
        ("button-vol-down", vol_dn, KEY_VOLUMEDOWN, "VOLUMEDOWN"),
    ] {
        let button_path = format!("{keys_path}/{button}");
        builder.set_property(
            &button_path,
            "gpios",
            Value::cells([PHANDLE_PLACEHOLDER, key[1], key[2]]),
        );
        builder.set_property(&button_path, "label", Value::str(label));
        builder.set_property(&button_path, "linux,code", Value::u32(code));
        builder.add_fixup(&gpio_sym, &format!("{button_path}:gpios:0"));
    }

    info!("volume keys moved to GPIO keys on {gpio_sym}");
    Ok(())
}

/// Steps 5-6: the joypad fragment, its variant, and stick inversion.
fn add_joypad(
    builder: &mut OverlayBuilder,
    options: &Options,
    adc_disabled: bool,
) -> crate::Result<()> {
    let fragment = builder.add_fragment("&joypad")?;

    let multi_channel = !options.has(Flag::LegacyJoypad)
        && (options.has(Flag::MultiChannelJoypad) || adc_disabled);
    if multi_channel {
        builder.set_property(
            &fragment,
            "compatible",
            Value::str("rocknix-singleadc-joypad"),
        );
        builder.set_property(
            &fragment,
            "io-channels",
            Value::cells([
                PHANDLE_PLACEHOLDER,
                0,
                PHANDLE_PLACEHOLDER,
                1,
                PHANDLE_PLACEHOLDER,
                2,
                PHANDLE_PLACEHOLDER,
                3,
            ]),
        );
        for offset in [0u32, 8, 16, 24] {
            builder.add_fixup("saradc", &format!("{fragment}:io-channels:{offset}"));
        }
        builder.set_property(
            &fragment,
            "io-channel-names",
            Value::strs(["key-lx", "key-ly", "key-rx", "key-ry"]),
        );
        builder.set_property(&fragment, "poll-interval", Value::u32(10));
        builder.set_property(&fragment, "button-adc-fuzz", Value::u32(32));
        builder.set_property(&fragment, "button-adc-flat", Value::u32(32));
        builder.set_property(&fragment, "button-adc-scale", Value::u32(2));
        builder.set_property(&fragment, "button-adc-deadzone", Value::u32(64));
        info!("multi-channel joypad variant on {fragment}");
    }

    // The left stick ships inverted, so the default is to un-invert it.
    // Disabling ADC keys flips the analog layout once more, so both
    // conditions together cancel out.
    let invert_left = !options.has(Flag::LeftStickInverted) ^ adc_disabled;
    if invert_left {
        builder.set_property(&fragment, "invert-absx", Value::u32(1));
        builder.set_property(&fragment, "invert-absy", Value::u32(1));
        info!("left stick un-inverted on {fragment}");
    } else {
        info!("left stick left inverted");
    }

    if options.has(Flag::RightStickInverted) {
        builder.set_property(&fragment, "invert-absrx", Value::u32(1));
        builder.set_property(&fragment, "invert-absry", Value::u32(1));
        info!("invert right stick on {fragment}");
    }

    Ok(())
}

/// Step 7: headphone-detect GPIO and its pin bias. Entirely optional; the
/// caller logs and swallows any failure.
fn add_headphone_detect(
    builder: &mut OverlayBuilder,
    tree: &DeviceTree,
    symbols: &Symbols,
    options: &Options,
) -> crate::Result<()> {
    let sound = tree
        .find_node("/rk817-sound")
        .ok_or_else(|| Error::not_found("sound node", "/rk817-sound"))?;
    let hpdet = gpio_triple(sound, "hp-det-gpio")?;
    let gpio_sym = symbols.label_for_phandle(hpdet[0])?.to_owned();

    // The stock polarity picks the pull bias; the written polarity is
    // flipped for the replacement detect circuit unless told otherwise.
    let bias = match hpdet[2] {
        0 => "pcfg_pull_down",
        1 => "pcfg_pull_up",
        _ => {
            return Err(Error::Format(FormatError::new(
                FormatErrorKind::InvalidValue("hp-det-gpio polarity"),
                0,
            )));
        }
    };
    let polarity = if options.has(Flag::HeadphoneKeepPolarity) {
        hpdet[2]
    } else {
        hpdet[2] ^ 1
    };

    let hp_det_pins = tree
        .find_node("/pinctrl/headphone/hp-det")
        .and_then(|n| n.cells("rockchip,pins"))
        .ok_or_else(|| Error::not_found("pin node", "/pinctrl/headphone/hp-det"))?;
    let pin_cells = hp_det_pins.get(0..3).ok_or_else(|| {
        Error::Format(FormatError::new(
            FormatErrorKind::InvalidValue("rockchip,pins"),
            0,
        ))
    })?;

    // All reads done; writes below cannot fail, so the fragment is never
    // left half-built.
    let fragment = builder.add_fragment("/")?;
    let sound_path = format!("{fragment}/rk817-sound");
    builder.set_property(
        &sound_path,
        "simple-audio-card,hp-det-gpio",
        Value::cells([PHANDLE_PLACEHOLDER, hpdet[1], polarity]),
    );
    builder.add_fixup(
        &gpio_sym,
        &format!("{sound_path}:simple-audio-card,hp-det-gpio:0"),
    );

    let pins_path = format!("{fragment}/pinctrl/headphone/hp-det");
    builder.set_property(
        &pins_path,
        "rockchip,pins",
        Value::cells([pin_cells[0], pin_cells[1], pin_cells[2], PHANDLE_PLACEHOLDER]),
    );
    builder.add_fixup(bias, &format!("{pins_path}:rockchip,pins:12"));

    info!("hp-det-gpio {gpio_sym} on {fragment}");
    Ok(())
}

fn gpio_triple(node: &Node, name: &'static str) -> crate::Result<[u32; 3]> {
    let cells = node
        .cells(name)
        .ok_or_else(|| Error::not_found("property", name))?;
    <[u32; 3]>::try_from(cells)
        .map_err(|_| Error::Format(FormatError::new(FormatErrorKind::InvalidValue(name), 0)))
}

/// Pin-bank number from a GPIO controller label such as `gpio3`.
fn gpio_number(symbol: &str) -> crate::Result<u32> {
    symbol
        .strip_prefix("gpio")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| {
            Error::Format(FormatError::new(
                FormatErrorKind::InvalidValue("GPIO controller symbol"),
                0,
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tokens_parse() {
        assert_eq!(Flag::from_token("LSi"), Some(Flag::LeftStickInverted));
        assert_eq!(Flag::from_token("JPk36"), Some(Flag::LegacyJoypad));
        assert_eq!(Flag::from_token("PRs"), Some(Flag::SwapPanelAxes));
        assert_eq!(Flag::from_token("XYZ"), None);
    }

    #[test]
    fn unknown_tokens_are_dropped() {
        let options = Options::from_tokens(["LSi", "bogus", "RSi", "LSi"]);
        assert_eq!(
            options.flags,
            [
                Flag::LeftStickInverted,
                Flag::RightStickInverted,
                Flag::LeftStickInverted
            ]
        );
    }

    #[test]
    fn rotation_degrees() {
        assert_eq!(Options::from_tokens(["DR90"]).rotation(), Some(90));
        assert_eq!(Options::from_tokens(["DR270"]).rotation(), Some(270));
        assert_eq!(Options::from_tokens(["LSi"]).rotation(), None);
    }

    #[test]
    fn gpio_symbol_number() {
        assert_eq!(gpio_number("gpio3").unwrap(), 3);
        assert!(gpio_number("pcfg_pull_up").is_err());
    }
}
