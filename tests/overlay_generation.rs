// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end tests: build a synthetic stock blob, run the generator, and
//! inspect the decoded overlay.

use rocknix_dtbo::model::{DeviceTree, Node, Value};
use rocknix_dtbo::overlay::PHANDLE_PLACEHOLDER;
use rocknix_dtbo::{Error, Options, generate};

const GPIO3_PHANDLE: u32 = 0x20;
const GPIO0_PHANDLE: u32 = 0x21;
const SUPPLY_PHANDLE: u32 = 0x30;
const NATIVE_MODE_PHANDLE: u32 = 0x42;

/// A minimal stock tree with the parts every generation requires: the DSI
/// panel with one vendor timing, its reset GPIO, and the symbol table.
fn stock_tree() -> DeviceTree {
    let timing = Node::builder("timing@0")
        .prop("clock-frequency", Value::u32(30_000_000))
        .prop("hactive", Value::u32(800))
        .prop("hfront-porch", Value::u32(40))
        .prop("hsync-len", Value::u32(20))
        .prop("hback-porch", Value::u32(40))
        .prop("vactive", Value::u32(1280))
        .prop("vfront-porch", Value::u32(20))
        .prop("vsync-len", Value::u32(10))
        .prop("vback-porch", Value::u32(20))
        .prop("phandle", Value::u32(NATIVE_MODE_PHANDLE))
        .build();
    let panel = Node::builder("panel@0")
        .prop("dsi,format", Value::u32(0))
        .prop("dsi,lanes", Value::u32(4))
        .prop("dsi,flags", Value::u32(0xa03))
        .prop("width-mm", Value::u32(52))
        .prop("height-mm", Value::u32(70))
        .prop("reset-gpios", Value::cells([GPIO3_PHANDLE, 5, 1]))
        .prop("panel-init-sequence", Value::bytes([0x05, 0x78, 0x01, 0x29]))
        .child(
            Node::builder("display-timings")
                .prop("native-mode", Value::u32(NATIVE_MODE_PHANDLE))
                .child(timing)
                .build(),
        )
        .build();

    DeviceTree::new(
        Node::builder("")
            .child(Node::builder("dsi@ff450000").child(panel).build())
            .child(
                Node::builder("pinctrl")
                    .child(
                        Node::builder("gpio3@ff460000")
                            .prop("phandle", Value::u32(GPIO3_PHANDLE))
                            .build(),
                    )
                    .build(),
            )
            .child(
                Node::builder("__symbols__")
                    .prop("dsi", Value::str("/dsi@ff450000"))
                    .prop("gpio3", Value::str("/pinctrl/gpio3@ff460000"))
                    .build(),
            )
            .build(),
    )
}

fn with_adc_keys(tree: &mut DeviceTree) {
    tree.set_property("/adc-keys", "status", Value::str("okay"));
}

fn with_joystick(tree: &mut DeviceTree) {
    let mut key_gpios: Vec<u32> = (0..14).flat_map(|i| [GPIO3_PHANDLE, i, 0]).collect();
    key_gpios.extend([GPIO3_PHANDLE, 11, 1]); // volume up
    key_gpios.extend([GPIO3_PHANDLE, 12, 1]); // volume down
    tree.set_property("/play_joystick", "key-gpios", Value::cells(key_gpios));

    let mut pins: Vec<u32> = (0..14).flat_map(|i| [3, i, 0, 0x99]).collect();
    pins.extend([3, 11, 0, 0x99]);
    pins.extend([3, 12, 0, 0x99]);
    tree.set_property(
        "/pinctrl/buttons/gpio-key-pin",
        "rockchip,pins",
        Value::cells(pins),
    );
}

fn with_power_supply(tree: &mut DeviceTree) {
    tree.find_node_mut("/dsi@ff450000/panel@0")
        .unwrap()
        .add_property(rocknix_dtbo::model::Property::new(
            "power-supply",
            Value::u32(SUPPLY_PHANDLE),
        ));
    tree.set_property("/vcc18-lcd0", "phandle", Value::u32(SUPPLY_PHANDLE));
    tree.set_property("/vcc18-lcd0", "gpio", Value::cells([GPIO0_PHANDLE, 10, 0]));
    tree.set_property("/vcc18-lcd0", "enable-active-high", Value::Empty);
    tree.set_property(
        "/pinctrl/gpio0@ff220000",
        "phandle",
        Value::u32(GPIO0_PHANDLE),
    );
    tree.set_property(
        "/__symbols__",
        "gpio0",
        Value::str("/pinctrl/gpio0@ff220000"),
    );
}

fn with_sound(tree: &mut DeviceTree) {
    tree.set_property(
        "/rk817-sound",
        "hp-det-gpio",
        Value::cells([GPIO3_PHANDLE, 22, 1]),
    );
    tree.set_property(
        "/pinctrl/headphone/hp-det",
        "rockchip,pins",
        Value::cells([2, 22, 0, 0x55]),
    );
}

fn generate_tree(stock: &DeviceTree, options: &Options) -> DeviceTree {
    let overlay = generate(&stock.to_dtb(), options).unwrap();
    DeviceTree::from_bytes(&overlay).unwrap()
}

/// Collects `path:property:offset` for every placeholder occurrence outside
/// the bookkeeping nodes.
fn sentinel_locations(node: &Node, path: &str, out: &mut Vec<String>) {
    for prop in node.properties() {
        let Some(cells) = prop.value().as_cells() else {
            continue;
        };
        for (index, cell) in cells.iter().enumerate() {
            if *cell == PHANDLE_PLACEHOLDER {
                out.push(format!("{path}:{}:{}", prop.name(), index * 4));
            }
        }
    }
    for child in node.children() {
        if path.is_empty() && child.name().starts_with("__") {
            continue;
        }
        sentinel_locations(child, &format!("{path}/{}", child.name()), out);
    }
}

fn fixup_locations(overlay: &DeviceTree) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(fixups) = overlay.find_node("/__fixups__") {
        for prop in fixups.properties() {
            match prop.value() {
                Value::Str(s) => out.push(s.clone()),
                Value::StrList(list) => out.extend(list.iter().cloned()),
                other => panic!("unexpected fixup value {other:?}"),
            }
        }
    }
    out
}

#[test]
fn panel_fragment_carries_descriptor_and_reset_gpio() {
    let overlay = generate_tree(&stock_tree(), &Options::default());

    let panel = overlay
        .find_node("/fragment@0/__overlay__/dsi@ff450000/panel@0")
        .unwrap();
    assert_eq!(panel.str("compatible"), Some("rocknix,generic-dsi"));
    assert_eq!(
        panel.cells("reset-gpios"),
        Some(vec![PHANDLE_PLACEHOLDER, 5, 1])
    );

    let desc = match panel.property("panel_description").unwrap().value() {
        Value::StrList(lines) => lines.clone(),
        other => panic!("descriptor must be a string list, got {other:?}"),
    };
    assert!(desc[0].starts_with("G size=52,70"), "{}", desc[0]);
    assert!(desc.iter().all(|l| !l.is_empty()));
    assert!(desc.iter().any(|l| l.starts_with("M clock=")));
    assert!(desc.iter().any(|l| l.starts_with("I seq=29")));

    let pins = overlay
        .find_node("/fragment@0/__overlay__/pinctrl/gpio-lcd/lcd-rst")
        .unwrap();
    // Bank 3 from the gpio3 symbol, pin 5 from the stock triple.
    assert_eq!(
        pins.cells("rockchip,pins"),
        Some(vec![3, 5, 0, PHANDLE_PLACEHOLDER])
    );

    let fixups = fixup_locations(&overlay);
    assert!(fixups.contains(
        &"/fragment@0/__overlay__/dsi@ff450000/panel@0:reset-gpios:0".to_owned()
    ));
    assert!(fixups.contains(
        &"/fragment@0/__overlay__/pinctrl/gpio-lcd/lcd-rst:rockchip,pins:12".to_owned()
    ));
}

#[test]
fn every_sentinel_has_exactly_one_fixup() {
    let mut stock = stock_tree();
    with_joystick(&mut stock);
    with_power_supply(&mut stock);
    with_sound(&mut stock);
    let overlay = generate_tree(&stock, &Options::from_tokens(["RSi"]));

    let mut sentinels = Vec::new();
    sentinel_locations(overlay.root(), "", &mut sentinels);
    let mut fixups = fixup_locations(&overlay);

    sentinels.sort();
    fixups.sort();
    assert_eq!(sentinels, fixups);
}

#[test]
fn fragment_indices_are_contiguous_and_bookkeeping_is_last() {
    let mut stock = stock_tree();
    with_joystick(&mut stock);
    with_sound(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());

    let names: Vec<&str> = overlay.root().children().map(Node::name).collect();
    let fragments: Vec<&&str> = names.iter().filter(|n| n.starts_with("fragment@")).collect();
    for (i, name) in fragments.iter().enumerate() {
        assert_eq!(**name, format!("fragment@{i}"));
    }
    assert_eq!(
        &names[names.len() - 2..],
        ["__fixups__", "__local_fixups__"]
    );
}

#[test]
fn missing_adc_keys_disables_them_and_switches_joypad() {
    // The base stock tree has neither /adc-keys nor /play_joystick.
    let overlay = generate_tree(&stock_tree(), &Options::default());

    let disabled = overlay
        .find_node("/fragment@1/__overlay__/adc-keys")
        .unwrap();
    assert_eq!(
        disabled.str("compatible"),
        Some("deliberately-disabled-adc-keys")
    );
    // No joystick node to source volume keys from.
    assert!(
        overlay
            .find_node("/fragment@1/__overlay__/gpio-keys-overlay")
            .is_none()
    );

    let joypad = overlay.find_node("/fragment@2/__overlay__").unwrap();
    assert_eq!(joypad.str("compatible"), Some("rocknix-singleadc-joypad"));
    assert_eq!(
        joypad.cells("io-channels").map(|c| c.len()),
        Some(8)
    );
    let fixups = fixup_locations(&overlay);
    for offset in [0, 8, 16, 24] {
        assert!(fixups.contains(&format!("/fragment@2/__overlay__:io-channels:{offset}")));
    }
}

#[test]
fn present_adc_keys_keep_legacy_joypad() {
    let mut stock = stock_tree();
    with_adc_keys(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());

    // No disable fragment, so the joypad is fragment@1 and stays legacy.
    let joypad = overlay.find_node("/fragment@1/__overlay__").unwrap();
    assert!(joypad.property("compatible").is_none());
    assert!(joypad.property("io-channels").is_none());
    assert!(overlay.find_node("/fragment@2").is_none());
}

#[test]
fn legacy_flag_overrides_disabled_adc_inference() {
    let overlay = generate_tree(&stock_tree(), &Options::from_tokens(["JPk36", "JPmm"]));
    let joypad = overlay.find_node("/fragment@2/__overlay__").unwrap();
    assert!(joypad.property("io-channels").is_none());
}

#[test]
fn volume_keys_synthesized_from_joystick() {
    let mut stock = stock_tree();
    with_joystick(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());

    let base = "/fragment@1/__overlay__";
    let keys = overlay
        .find_node(&format!("{base}/gpio-keys-overlay"))
        .unwrap();
    assert_eq!(keys.str("compatible"), Some("gpio-keys"));
    assert_eq!(
        keys.property("autorepeat").map(|p| p.value()),
        Some(&Value::Empty)
    );
    assert_eq!(keys.str("pinctrl-names"), Some("default"));

    let up = keys.child("button-vol-up").unwrap();
    assert_eq!(up.str("label"), Some("VOLUMEUP"));
    assert_eq!(up.u32("linux,code"), Some(0x73));
    assert_eq!(up.cells("gpios"), Some(vec![PHANDLE_PLACEHOLDER, 11, 1]));
    let down = keys.child("button-vol-down").unwrap();
    assert_eq!(down.str("label"), Some("VOLUMEDOWN"));
    assert_eq!(down.u32("linux,code"), Some(0x72));
    assert_eq!(down.cells("gpios"), Some(vec![PHANDLE_PLACEHOLDER, 12, 1]));

    // The pin config keeps both 4-cell entries with placeholder biases.
    let pins = overlay
        .find_node(&format!("{base}/pinctrl/btns/btn-pins-vol-overlay"))
        .unwrap();
    assert_eq!(
        pins.cells("rockchip,pins"),
        Some(vec![
            3,
            11,
            0,
            PHANDLE_PLACEHOLDER,
            3,
            12,
            0,
            PHANDLE_PLACEHOLDER
        ])
    );
    let pins_phandle = pins.u32("phandle").unwrap();
    assert_eq!(keys.u32("pinctrl-0"), Some(pins_phandle));

    // The pinctrl reference is overlay-internal, so it is a local fixup.
    assert_eq!(
        overlay
            .find_node(&format!("/__local_fixups__{base}/gpio-keys-overlay"))
            .unwrap()
            .u32("pinctrl-0"),
        Some(0)
    );
    assert_eq!(
        overlay.find_node("/__symbols__").unwrap().str("overlay_btns"),
        Some(&format!("{base}/pinctrl/btns/btn-pins-vol-overlay")[..])
    );

    let fixups = fixup_locations(&overlay);
    assert!(fixups.contains(&format!("{base}/pinctrl/btns/btn-pins-vol-overlay:rockchip,pins:12")));
    assert!(fixups.contains(&format!("{base}/pinctrl/btns/btn-pins-vol-overlay:rockchip,pins:28")));
    assert!(fixups.contains(&format!("{base}/gpio-keys-overlay/button-vol-up:gpios:0")));
}

#[test]
fn left_stick_inversion_follows_xor_rule() {
    // ADC keys present, no suppressing flag: un-invert.
    let mut stock = stock_tree();
    with_adc_keys(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());
    let joypad = overlay.find_node("/fragment@1/__overlay__").unwrap();
    assert_eq!(joypad.u32("invert-absx"), Some(1));
    assert_eq!(joypad.u32("invert-absy"), Some(1));

    // ADC keys present, flag set: both conditions false, leave inverted.
    let overlay = generate_tree(&stock, &Options::from_tokens(["LSi"]));
    let joypad = overlay.find_node("/fragment@1/__overlay__").unwrap();
    assert!(joypad.property("invert-absx").is_none());

    // ADC keys disabled and flag set: conditions differ again, invert.
    let overlay = generate_tree(&stock_tree(), &Options::from_tokens(["LSi"]));
    let joypad = overlay.find_node("/fragment@2/__overlay__").unwrap();
    assert_eq!(joypad.u32("invert-absx"), Some(1));
}

#[test]
fn right_stick_inverts_on_flag() {
    let mut stock = stock_tree();
    with_adc_keys(&mut stock);
    let overlay = generate_tree(&stock, &Options::from_tokens(["RSi"]));
    let joypad = overlay.find_node("/fragment@1/__overlay__").unwrap();
    assert_eq!(joypad.u32("invert-absrx"), Some(1));
    assert_eq!(joypad.u32("invert-absry"), Some(1));

    let overlay = generate_tree(&stock, &Options::default());
    let joypad = overlay.find_node("/fragment@1/__overlay__").unwrap();
    assert!(joypad.property("invert-absrx").is_none());
}

#[test]
fn rotation_flag_sets_panel_rotation() {
    let overlay = generate_tree(&stock_tree(), &Options::from_tokens(["DR270"]));
    let panel = overlay
        .find_node("/fragment@0/__overlay__/dsi@ff450000/panel@0")
        .unwrap();
    assert_eq!(panel.u32("rotation"), Some(270));

    let overlay = generate_tree(&stock_tree(), &Options::default());
    let panel = overlay
        .find_node("/fragment@0/__overlay__/dsi@ff450000/panel@0")
        .unwrap();
    assert!(panel.property("rotation").is_none());
}

#[test]
fn headphone_detect_flips_polarity_and_copies_bias() {
    let mut stock = stock_tree();
    with_adc_keys(&mut stock);
    with_sound(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());

    let sound = overlay
        .find_node("/fragment@2/__overlay__/rk817-sound")
        .unwrap();
    // Stock polarity 1 flips to 0.
    assert_eq!(
        sound.cells("simple-audio-card,hp-det-gpio"),
        Some(vec![PHANDLE_PLACEHOLDER, 22, 0])
    );
    let pins = overlay
        .find_node("/fragment@2/__overlay__/pinctrl/headphone/hp-det")
        .unwrap();
    assert_eq!(
        pins.cells("rockchip,pins"),
        Some(vec![2, 22, 0, PHANDLE_PLACEHOLDER])
    );
    // Bias comes from the stock polarity, not the flipped one.
    let fixups = overlay.find_node("/__fixups__").unwrap();
    assert_eq!(
        fixups.str("pcfg_pull_up"),
        Some("/fragment@2/__overlay__/pinctrl/headphone/hp-det:rockchip,pins:12")
    );

    // The suppressing flag keeps the stock polarity.
    let overlay = generate_tree(&stock, &Options::from_tokens(["HPi"]));
    let sound = overlay
        .find_node("/fragment@2/__overlay__/rk817-sound")
        .unwrap();
    assert_eq!(
        sound.cells("simple-audio-card,hp-det-gpio"),
        Some(vec![PHANDLE_PLACEHOLDER, 22, 1])
    );
}

#[test]
fn missing_sound_node_is_skipped() {
    let mut stock = stock_tree();
    with_adc_keys(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());
    assert!(overlay.find_node("/fragment@2").is_none());
}

#[test]
fn power_supply_copied_when_present() {
    let mut stock = stock_tree();
    with_power_supply(&mut stock);
    let overlay = generate_tree(&stock, &Options::default());

    let supply = overlay
        .find_node("/fragment@0/__overlay__/vcc18-lcd0")
        .unwrap();
    assert_eq!(
        supply.cells("gpio"),
        Some(vec![PHANDLE_PLACEHOLDER, 10, 0])
    );
    assert_eq!(
        supply.property("enable-active-high").map(|p| p.value()),
        Some(&Value::Empty)
    );
    let pins = overlay
        .find_node("/fragment@0/__overlay__/pinctrl/gpio-lcd/lcd-pwr")
        .unwrap();
    assert_eq!(
        pins.cells("rockchip,pins"),
        Some(vec![0, 10, 0, PHANDLE_PLACEHOLDER])
    );
    let fixups = fixup_locations(&overlay);
    assert!(fixups.contains(&"/fragment@0/__overlay__/vcc18-lcd0:gpio:0".to_owned()));
}

#[test]
fn missing_power_supply_is_skipped_but_reset_survives() {
    let overlay = generate_tree(&stock_tree(), &Options::default());
    assert!(
        overlay
            .find_node("/fragment@0/__overlay__/pinctrl/gpio-lcd/lcd-pwr")
            .is_none()
    );
    assert!(
        overlay
            .find_node("/fragment@0/__overlay__/pinctrl/gpio-lcd/lcd-rst")
            .is_some()
    );
}

#[test]
fn unknown_flags_do_not_change_output() {
    let stock = stock_tree().to_dtb();
    let plain = generate(&stock, &Options::from_tokens([])).unwrap();
    let with_unknown = generate(&stock, &Options::from_tokens(["ZZtop"])).unwrap();
    assert_eq!(plain, with_unknown);
}

#[test]
fn truncated_input_is_a_format_error() {
    let stock = stock_tree().to_dtb();
    let result = generate(&stock[..stock.len() - 16], &Options::default());
    assert!(matches!(result, Err(Error::Format(_))));
}

#[test]
fn missing_dsi_symbol_is_fatal() {
    let mut stock = stock_tree();
    stock
        .find_node_mut("/__symbols__")
        .unwrap()
        .remove_property("dsi");
    let result = generate(&stock.to_dtb(), &Options::default());
    assert!(matches!(result, Err(Error::NotFound { .. })));
}

#[test]
fn overlay_round_trips_through_the_codec() {
    let mut stock = stock_tree();
    with_joystick(&mut stock);
    with_sound(&mut stock);
    let overlay_bytes = generate(&stock.to_dtb(), &Options::from_tokens(["RSi"])).unwrap();
    let overlay = DeviceTree::from_bytes(&overlay_bytes).unwrap();
    assert_eq!(overlay.to_dtb(), overlay_bytes);
}
