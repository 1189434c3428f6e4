// ============================================================================
// PSEUDOCOLOR: map grey intensity through a 256-entry colour palette
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::canvas::{ColorSpace, ImageBuffer};
use crate::ops::color_space::hsv_to_rgb;
use crate::ops::map_pixels;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Palette {
    #[default]
    Jet,
    Viridis,
    Plasma,
    Hot,
    Cool,
    Rainbow,
    Turbo,
}

impl Palette {
    pub const ALL: [Palette; 7] = [
        Palette::Jet,
        Palette::Viridis,
        Palette::Plasma,
        Palette::Hot,
        Palette::Cool,
        Palette::Rainbow,
        Palette::Turbo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Palette::Jet => "jet",
            Palette::Viridis => "viridis",
            Palette::Plasma => "plasma",
            Palette::Hot => "hot",
            Palette::Cool => "cool",
            Palette::Rainbow => "rainbow",
            Palette::Turbo => "turbo",
        }
    }

    /// The palette's 256 BGR entries, built on first use.
    pub fn lut(self) -> &'static [[u8; 3]; 256] {
        static LUTS: [OnceLock<[[u8; 3]; 256]>; 7] = [const { OnceLock::new() }; 7];
        LUTS[self as usize].get_or_init(|| build_lut(self))
    }

    /// RGB in 0..1 for `x` in 0..1.
    fn sample(self, x: f32) -> (f32, f32, f32) {
        match self {
            Palette::Jet => (
                (1.5 - (4.0 * x - 3.0).abs()).clamp(0.0, 1.0),
                (1.5 - (4.0 * x - 2.0).abs()).clamp(0.0, 1.0),
                (1.5 - (4.0 * x - 1.0).abs()).clamp(0.0, 1.0),
            ),
            Palette::Hot => (
                (3.0 * x).clamp(0.0, 1.0),
                (3.0 * x - 1.0).clamp(0.0, 1.0),
                (3.0 * x - 2.0).clamp(0.0, 1.0),
            ),
            Palette::Cool => (x, 1.0 - x, 1.0),
            // violet at 0 sweeping down to red at 1
            Palette::Rainbow => hsv_to_rgb((1.0 - x) * 270.0, 1.0, 1.0),
            Palette::Turbo => (
                horner(x, &[0.135_721_38, 4.615_392_6, -42.660_322_58, 132.131_082_34, -152.942_393_96, 59.286_379_43]),
                horner(x, &[0.091_402_61, 2.194_188_39, 4.842_966_58, -14.185_033_33, 4.277_298_57, 2.829_566_04]),
                horner(x, &[0.106_673_3, 12.641_946_08, -60.582_048_36, 110.362_767_71, -89.903_109_12, 27.348_249_73]),
            ),
            Palette::Viridis => (
                horner(x, &[0.277_727_33, 0.105_093_04, -0.330_861_83, -4.634_230_5, 6.228_269_94, 4.776_385, -5.435_455_86]),
                horner(x, &[0.005_407_34, 1.404_613_53, 0.214_847_56, -5.799_100_97, 14.179_933_37, -13.745_145_38, 4.645_852_61]),
                horner(x, &[0.334_099_81, 1.384_590_16, 0.095_095_16, -19.332_440_96, 56.690_552_6, -65.353_032_63, 26.312_435_25]),
            ),
            Palette::Plasma => (
                horner(x, &[0.058_732_34, 2.176_514_63, -2.689_460_48, 6.130_348_35, -11.107_436_19, 10.023_065_58, -3.658_713_84]),
                horner(x, &[0.023_336_71, 0.238_383_42, -7.455_851_14, 42.346_188_15, -82.666_311_09, 71.413_617_7, -22.931_534_65]),
                horner(x, &[0.543_340_18, 0.753_960_46, 3.110_799_94, -28.518_854_65, 60.139_847_67, -54.072_186_56, 18.191_907_79]),
            ),
        }
    }
}

/// Evaluate `c[0] + c[1]x + c[2]x² + …`.
fn horner(x: f32, coeffs: &[f32]) -> f32 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

fn build_lut(palette: Palette) -> [[u8; 3]; 256] {
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut lut = [[0u8; 3]; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let (r, g, b) = palette.sample(i as f32 / 255.0);
        *entry = [to_u8(b), to_u8(g), to_u8(r)];
    }
    lut
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown palette '{0}' (expected one of jet, viridis, plasma, hot, cool, rainbow, turbo)")]
pub struct UnknownPalette(pub String);

impl FromStr for Palette {
    type Err = UnknownPalette;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        Palette::ALL
            .into_iter()
            .find(|p| p.name() == key)
            .ok_or_else(|| UnknownPalette(s.trim().to_string()))
    }
}

/// Map each grey level through `palette`. Expects GRAY, returns BGR.
pub fn pseudocolor(src: &ImageBuffer, palette: Palette) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Gray);
    let lut = palette.lut();
    map_pixels(src, ColorSpace::Bgr, |px, out| {
        out.copy_from_slice(&lut[px[0] as usize]);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jet_endpoints_are_dark_blue_and_dark_red() {
        let lut = Palette::Jet.lut();
        assert_eq!(lut[0], [128, 0, 0]);
        assert_eq!(lut[255], [0, 0, 128]);
    }

    #[test]
    fn hot_runs_from_black_to_white() {
        let lut = Palette::Hot.lut();
        assert_eq!(lut[0], [0, 0, 0]);
        assert_eq!(lut[255], [255, 255, 255]);
    }

    #[test]
    fn palette_names_parse_case_insensitively() {
        for p in Palette::ALL {
            assert_eq!(p.name().to_uppercase().parse::<Palette>(), Ok(p));
        }
        assert!("sepia".parse::<Palette>().is_err());
        assert_eq!(Palette::default(), Palette::Jet);
    }

    #[test]
    fn viridis_is_dark_purple_to_yellow() {
        let lut = Palette::Viridis.lut();
        let [b0, g0, r0] = lut[0];
        assert!(b0 > r0 && b0 > g0);
        let [b1, g1, r1] = lut[255];
        assert!(r1 > 200 && g1 > 200 && b1 < 80);
    }

    #[test]
    fn pseudocolor_looks_up_every_pixel() {
        let gray = ImageBuffer::from_raw(3, 1, ColorSpace::Gray, vec![0, 128, 255]).unwrap();
        let out = pseudocolor(&gray, Palette::Jet);
        assert_eq!(out.color_space(), ColorSpace::Bgr);
        let lut = Palette::Jet.lut();
        assert_eq!(out.pixel(1, 0), &lut[128]);
        assert_eq!(out.pixel(2, 0), &lut[255]);
    }
}
