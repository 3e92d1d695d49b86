// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Display-timing synthesis.
//!
//! A vendor device tree usually ships a single panel timing. Emulated
//! systems want many refresh rates, so this module derives a whole mode
//! table from the vendor set: for each target frame rate it searches for
//! stretched blanking totals and a pixel clock that hit the target exactly,
//! under the constraint that the panel already proved it can scan the
//! vendor totals at the vendor clock.
//!
//! The output is the textual panel descriptor interpreted by the display
//! driver at runtime: one `G` geometry line, one `M` line per synthesized
//! mode, and one `I` line per init-sequence command.

use crate::error::{Error, FormatError, FormatErrorKind};
use crate::model::Node;

/// Options consumed by the synthesizer, extracted from the request.
#[derive(Debug, Default)]
pub struct TimingOptions<'a> {
    /// Free-form panel name echoed into the `G` line.
    pub name: Option<&'a str>,
    /// Target diagonal in inches, used when the panel declares no physical
    /// size.
    pub diagonal: Option<f64>,
    /// Ignore the vendor's declared native mode.
    pub ignore_native: bool,
    /// Swap horizontal and vertical active for a known rotation quirk.
    pub swap_axes: bool,
    /// Append human-readable achieved-vs-target comments to mode lines.
    pub comments: bool,
}

/// Pixel formats indexed by the `dsi,format` property.
const DSI_FORMATS: [&str; 4] = ["rgb888", "rgb666", "rgb666_packed", "rgb565"];

/// Always-set DSI mode flag.
const DSI_EXTRA_FLAGS: u32 = 0x0400;

const DEFAULT_DELAY_MS: u32 = 50;
/// Legacy device trees have no ready timeout; use a fixed one.
const READY_DELAY_MS: u32 = 20;

/// Diagonal assumed when neither the panel nor the request declares a size.
const DEFAULT_DIAGONAL_MM: f64 = 3.5 * 2.54;
const MM_PER_INCH: f64 = 25.4;

/// Canonical refresh rates worth synthesizing, beyond the panel's native
/// one. NTSC/PAL-derived rates carry their historical 1001 divisors and
/// console-specific corrections.
const COMMON_FPS: [f64; 11] = [
    50.0 / 1.001,
    50.0,
    50.0070,
    57.5,
    59.7275,
    60.0 / 1.001,
    60.0,
    60.0988,
    75.47,
    90.0,
    120.0,
];

/// One vendor-declared timing, kHz clock plus the four horizontal and four
/// vertical components (active, front porch, sync length, back porch).
#[derive(Debug, Clone)]
struct VendorMode {
    clock_khz: u32,
    hor: [u32; 4],
    ver: [u32; 4],
}

impl VendorMode {
    fn htotal(&self) -> u32 {
        self.hor.iter().sum()
    }

    fn vtotal(&self) -> u32 {
        self.ver.iter().sum()
    }
}

/// Synthesizes the panel descriptor lines for `panel`.
///
/// The returned list may contain empty spacer lines; the caller decides
/// whether to keep them.
///
/// # Errors
///
/// Returns [`Error::NotFound`] when a property the algorithm requires is
/// missing (the `dsi,*` triple, the timing subnode, per-mode components,
/// the init sequence) and [`Error::Format`] for values outside their legal
/// range or a truncated init-sequence record. Per-target search failures
/// are not errors; they degrade to a comment line.
pub fn panel_descriptor(panel: &Node, options: &TimingOptions<'_>) -> crate::Result<Vec<String>> {
    let mut acc = Vec::new();

    let delays = [
        panel.u32_or("prepare-delay-ms", DEFAULT_DELAY_MS),
        panel.u32_or("reset-delay-ms", DEFAULT_DELAY_MS),
        panel.u32_or("init-delay-ms", DEFAULT_DELAY_MS),
        panel.u32_or("enable-delay-ms", DEFAULT_DELAY_MS),
        READY_DELAY_MS,
    ];
    let delays: Vec<String> = delays.iter().map(ToString::to_string).collect();

    let format_index = required_u32(panel, "dsi,format")?;
    let format = *DSI_FORMATS.get(format_index as usize).ok_or_else(|| {
        Error::Format(FormatError::new(
            FormatErrorKind::InvalidValue("dsi,format"),
            0,
        ))
    })?;
    let lanes = required_u32(panel, "dsi,lanes")?;
    let flags = required_u32(panel, "dsi,flags")? | DSI_EXTRA_FLAGS;

    let (modes, native_fps) = collect_vendor_modes(panel, options)?;

    let (width, height) = panel_size_mm(panel, &modes, options)?;

    let name = options.name.map(|n| format!("{n} ")).unwrap_or_default();
    acc.push(format!(
        "G {name}size={width},{height} delays={} format={format} lanes={lanes} flags=0x{flags:x}",
        delays.join(",")
    ));
    acc.push(String::new());

    synthesize_modes(&mut acc, &modes, native_fps, options);
    acc.push(String::new());

    init_sequence(&mut acc, panel, options)?;

    Ok(acc)
}

fn required_u32(node: &Node, name: &'static str) -> crate::Result<u32> {
    node.u32(name)
        .ok_or_else(|| Error::not_found("panel property", name))
}

fn mode_u32(mode: &Node, name: &'static str) -> crate::Result<u32> {
    mode.u32(name)
        .ok_or_else(|| Error::not_found("timing property", name))
}

/// Reads the vendor timing set, deduplicated by frame rate.
///
/// The first mode seen at a given rate wins. Returns the retained
/// `(fps, mode)` list in arrival order and the native frame rate (the rate
/// of the mode matching the declared native phandle), if any.
fn collect_vendor_modes(
    panel: &Node,
    options: &TimingOptions<'_>,
) -> crate::Result<(Vec<(f64, VendorMode)>, Option<f64>)> {
    let timings = panel
        .child("display-timings")
        .ok_or_else(|| Error::not_found("panel subnode", "display-timings"))?;

    let native = if options.ignore_native {
        None
    } else {
        Some(
            timings
                .u32("native-mode")
                .ok_or_else(|| Error::not_found("timing property", "native-mode"))?,
        )
    };

    let mut modes: Vec<(f64, VendorMode)> = Vec::new();
    let mut native_fps = None;

    for mode_node in timings.children() {
        let clock_khz = (f64::from(mode_u32(mode_node, "clock-frequency")?) / 1000.0).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clock_khz = clock_khz as u32;

        let mut hor = [
            mode_u32(mode_node, "hactive")?,
            mode_u32(mode_node, "hfront-porch")?,
            mode_u32(mode_node, "hsync-len")?,
            mode_u32(mode_node, "hback-porch")?,
        ];
        let mut ver = [
            mode_u32(mode_node, "vactive")?,
            mode_u32(mode_node, "vfront-porch")?,
            mode_u32(mode_node, "vsync-len")?,
            mode_u32(mode_node, "vback-porch")?,
        ];
        if options.swap_axes {
            core::mem::swap(&mut hor[0], &mut ver[0]);
        }

        let mode = VendorMode {
            clock_khz,
            hor,
            ver,
        };
        let fps =
            f64::from(clock_khz) * 1000.0 / (f64::from(mode.htotal()) * f64::from(mode.vtotal()));

        if !modes.iter().any(|(existing, _)| *existing == fps) {
            modes.push((fps, mode));
        }
        let is_native = native.is_some_and(|n| mode_node.u32("phandle") == Some(n));
        if is_native {
            native_fps = Some(fps);
        }
    }

    if modes.is_empty() {
        return Err(Error::not_found("vendor timing modes", "display-timings"));
    }

    Ok((modes, native_fps))
}

/// Physical size in millimeters: explicit properties win; otherwise derive
/// from a diagonal and the aspect ratio of the first retained mode.
fn panel_size_mm(
    panel: &Node,
    modes: &[(f64, VendorMode)],
    options: &TimingOptions<'_>,
) -> crate::Result<(u32, u32)> {
    if let (Some(w), Some(h)) = (panel.u32("width-mm"), panel.u32("height-mm")) {
        return Ok((w, h));
    }

    let diag_mm = options
        .diagonal
        .map_or(DEFAULT_DIAGONAL_MM, |inches| inches * MM_PER_INCH);
    let mode = &modes
        .first()
        .ok_or_else(|| Error::not_found("vendor timing modes", "display-timings"))?
        .1;
    let hactive = f64::from(mode.hor[0]);
    let vactive = f64::from(mode.ver[0]);
    let pxdiag = (hactive * hactive + vactive * vactive).sqrt();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let size = (
        (diag_mm * hactive / pxdiag).round() as u32,
        (diag_mm * vactive / pxdiag).round() as u32,
    );
    Ok(size)
}

/// Emits one `M` line per achievable target frame rate.
fn synthesize_modes(
    acc: &mut Vec<String>,
    modes: &[(f64, VendorMode)],
    native_fps: Option<f64>,
    options: &TimingOptions<'_>,
) {
    let default_fps = native_fps.unwrap_or(60.0);

    let mut targets: Vec<f64> = Vec::new();
    targets.extend(native_fps);
    targets.extend(
        COMMON_FPS
            .iter()
            .copied()
            .filter(|fps| Some(*fps) != native_fps),
    );

    for target in targets {
        match synthesize_one(modes, target) {
            Ok(synth) => {
                let hor = synth.hor.map(|c| c.to_string()).join(",");
                let ver = synth.ver.map(|c| c.to_string()).join(",");
                let default = if target == default_fps {
                    " default=1"
                } else {
                    ""
                };
                let comment = if options.comments {
                    let warn = if synth.derived_clock { "(CAN FAIL) " } else { "" };
                    format!(
                        " # {warn}fps={:.6} (target={target:.6})",
                        synth.achieved_fps
                    )
                } else {
                    String::new()
                };
                acc.push(format!(
                    "M clock={} horizontal={hor} vertical={ver}{default}{comment}",
                    synth.clock_khz
                ));
            }
            Err(failed) => {
                acc.push(format!(
                    "# failed to find mode for fps={target:.6} c={} h={} v={}",
                    failed.clock_khz, failed.htotal, failed.vtotal
                ));
            }
        }
    }
}

struct SynthesizedMode {
    clock_khz: u32,
    hor: [u32; 4],
    ver: [u32; 4],
    achieved_fps: f64,
    derived_clock: bool,
}

/// Search parameters of a failed target, echoed into the diagnostic line.
struct SearchFailed {
    clock_khz: u32,
    htotal: u32,
    vtotal: u32,
}

/// Finds totals and a clock hitting `target` frames per second.
///
/// Base mode: the smallest retained rate at or above the target; if none,
/// the largest retained rate, whose clock cannot be trusted and is derived
/// from scratch. The brute force then walks stretched vertical totals and
/// 10 kHz clock steps, keeping the candidate whose implied horizontal total
/// is closest to a whole number; ties prefer the lower clock, then the
/// lower vertical total, so the result is a total order and deterministic.
fn synthesize_one(modes: &[(f64, VendorMode)], target: f64) -> Result<SynthesizedMode, SearchFailed> {
    let base = modes
        .iter()
        .filter(|(fps, _)| *fps >= target)
        .min_by(|(a, _), (b, _)| a.total_cmp(b));
    let (base, clock_known) = match base {
        Some((_, mode)) => (mode, true),
        None => {
            let largest = modes
                .iter()
                .max_by(|(a, _), (b, _)| a.total_cmp(b))
                .expect("caller guarantees at least one vendor mode");
            (&largest.1, false)
        }
    };

    let htotal = base.htotal();
    let vtotal = base.vtotal();
    let perfect_clock = target * f64::from(htotal) * f64::from(vtotal) / 1000.0;

    // Round the derived clock up to 10 kHz. A vendor clock far above the
    // perfect one would deviate enough to lose the image, so it is derived
    // too.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded_up = ((perfect_clock / 10.0).ceil() * 10.0) as u32;
    let (start_clock, derived_clock) = if !clock_known {
        (rounded_up, true)
    } else if f64::from(base.clock_khz) > 1.25 * perfect_clock {
        (rounded_up, false)
    } else {
        (base.clock_khz, false)
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let max_vtotal = (f64::from(vtotal) * 1.25).round() as u32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clock_end = (1.25 * perfect_clock).round() as u32;

    let mut best: Option<(f64, u32, u32)> = None;
    for vt in vtotal..=max_vtotal {
        for clock in (start_clock..clock_end).step_by(10) {
            let ht = f64::from(clock) * 1000.0 / target / f64::from(vt);
            if ht < f64::from(htotal) || ht >= f64::from(htotal) * 1.05 {
                continue;
            }
            let score = (ht - ht.round()).abs();
            let candidate = (score, clock, vt);
            let better = match best {
                None => true,
                Some(current) => {
                    (candidate.0, candidate.1, candidate.2) < (current.0, current.1, current.2)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
    }

    let Some((_, new_clock, new_vtotal)) = best else {
        return Err(SearchFailed {
            clock_khz: start_clock,
            htotal,
            vtotal,
        });
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let new_htotal = (f64::from(new_clock) * 1000.0 / target / f64::from(new_vtotal)).round() as u32;

    let mut hor = base.hor;
    let mut ver = base.ver;
    hor[3] += new_htotal - htotal;
    ver[3] += new_vtotal - vtotal;
    let achieved_fps =
        f64::from(new_clock) * 1000.0 / f64::from(new_vtotal) / f64::from(new_htotal);

    Ok(SynthesizedMode {
        clock_khz: new_clock,
        hor,
        ver,
        achieved_fps,
        derived_clock,
    })
}

/// Decodes the panel init sequence: repeated `{command, wait, length,
/// data…}` records consumed front to back until the stream is exhausted.
fn init_sequence(
    acc: &mut Vec<String>,
    panel: &Node,
    options: &TimingOptions<'_>,
) -> crate::Result<()> {
    let prop = panel
        .property("panel-init-sequence")
        .ok_or_else(|| Error::not_found("panel property", "panel-init-sequence"))?;
    // Cell-typed sequences are re-flattened to the raw big-endian stream.
    let bytes = prop.value().to_bytes();

    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes.get(offset..offset + 3).ok_or_else(|| {
            Error::Format(FormatError::new(FormatErrorKind::InvalidInitSequence, offset))
        })?;
        let (command, wait, data_len) = (header[0], header[1], header[2]);
        offset += 3;

        let data = bytes
            .get(offset..offset + data_len as usize)
            .ok_or_else(|| {
                Error::Format(FormatError::new(FormatErrorKind::InvalidInitSequence, offset))
            })?;
        offset += data_len as usize;

        let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
        let wait_part = if wait != 0 {
            format!(" wait={wait}")
        } else {
            String::new()
        };
        let comment = if options.comments {
            format!(" # orig_cmd=0x{command:x}")
        } else {
            String::new()
        };
        acc.push(format!("I seq={hex}{wait_part}{comment}"));
    }

    Ok(())
}
