// ============================================================================
// OPERATOR LIBRARY: pure image → image transforms
// ============================================================================
//
// Every synchronous operator consumes a buffer by reference and returns a new
// one.  Rows are processed in parallel via rayon; results never depend on
// scheduling, so calling an operator twice yields identical output.
// ============================================================================

pub mod adjustments;
pub mod ai;
pub mod clahe;
pub mod color_space;
pub mod colorize;
pub mod colormap;
pub mod filters;

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;

use crate::canvas::{ColorSpace, ImageBuffer};
use crate::params::{ACE_STRENGTH, CLAHE_CLIP, GAMMA, ParamError, ParamSpec, SATURATION};

pub use colormap::Palette;

// ============================================================================
// HELPER: parallel per-pixel map
// ============================================================================

/// Map every pixel of `src` into a freshly allocated buffer tagged `out_space`.
/// `f` receives the input pixel (all channels) and the output pixel slot.
pub(crate) fn map_pixels<F>(src: &ImageBuffer, out_space: ColorSpace, f: F) -> ImageBuffer
where
    F: Fn(&[u8], &mut [u8]) + Sync,
{
    let w = src.width() as usize;
    let h = src.height() as usize;
    let cin = src.channels();
    let cout = out_space.channels();
    let mut dst = vec![0u8; w * h * cout];
    if w == 0 || h == 0 {
        return ImageBuffer::from_parts(src.width(), src.height(), out_space, dst);
    }

    let raw = src.samples();
    let stride_in = w * cin;
    dst.par_chunks_mut(w * cout).enumerate().for_each(|(y, row_out)| {
        let row_in = &raw[y * stride_in..(y + 1) * stride_in];
        for (px_in, px_out) in row_in.chunks_exact(cin).zip(row_out.chunks_exact_mut(cout)) {
            f(px_in, px_out);
        }
    });

    ImageBuffer::from_parts(src.width(), src.height(), out_space, dst)
}

/// Apply a 256-entry table to every sample of every channel.
pub(crate) fn apply_lut(src: &ImageBuffer, lut: &[u8; 256]) -> ImageBuffer {
    map_pixels(src, src.color_space(), |px, out| {
        for (o, &s) in out.iter_mut().zip(px) {
            *o = lut[s as usize];
        }
    })
}

// ============================================================================
// OPERATOR CATALOGUE
// ============================================================================

/// Identifier used on the command surface (`apply(operatorId, params, commit)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorId {
    Ace,
    Clahe,
    Gamma,
    Sharpen,
    Saturation,
    Pseudocolor,
    Colorize,
}

impl OperatorId {
    pub const ALL: [OperatorId; 7] = [
        OperatorId::Ace,
        OperatorId::Clahe,
        OperatorId::Gamma,
        OperatorId::Sharpen,
        OperatorId::Saturation,
        OperatorId::Pseudocolor,
        OperatorId::Colorize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OperatorId::Ace => "ace",
            OperatorId::Clahe => "clahe",
            OperatorId::Gamma => "gamma",
            OperatorId::Sharpen => "sharpen",
            OperatorId::Saturation => "saturation",
            OperatorId::Pseudocolor => "pseudocolor",
            OperatorId::Colorize => "colorize",
        }
    }

    /// The slider range of the operator's single numeric parameter, if any.
    pub fn param_spec(self) -> Option<&'static ParamSpec> {
        match self {
            OperatorId::Ace => Some(&ACE_STRENGTH),
            OperatorId::Clahe => Some(&CLAHE_CLIP),
            OperatorId::Gamma => Some(&GAMMA),
            OperatorId::Saturation => Some(&SATURATION),
            OperatorId::Sharpen | OperatorId::Pseudocolor | OperatorId::Colorize => None,
        }
    }

    /// Tag the operator consumes.
    pub fn input_space(self) -> ColorSpace {
        match self {
            OperatorId::Ace | OperatorId::Pseudocolor | OperatorId::Colorize => ColorSpace::Gray,
            OperatorId::Clahe
            | OperatorId::Gamma
            | OperatorId::Sharpen
            | OperatorId::Saturation => ColorSpace::Bgr,
        }
    }

    /// Tag the operator produces.
    pub fn output_space(self) -> ColorSpace {
        match self {
            OperatorId::Ace => ColorSpace::Gray,
            _ => ColorSpace::Bgr,
        }
    }

    /// Colorization is the only operator dispatched off the control context.
    pub fn is_expensive(self) -> bool {
        self == OperatorId::Colorize
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatorId {
    type Err = ParseOperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        OperatorId::ALL
            .into_iter()
            .find(|id| id.name() == key)
            .or(match key.as_str() {
                "sat" => Some(OperatorId::Saturation),
                "pseudo" | "colormap" => Some(OperatorId::Pseudocolor),
                "deep" => Some(OperatorId::Colorize),
                _ => None,
            })
            .ok_or(ParseOperatorError::UnknownOperator(s.trim().to_string()))
    }
}

/// A fully parameterised operator invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operator {
    Ace { strength: f32 },
    Clahe { clip_limit: f32 },
    Gamma { gamma: f32 },
    Sharpen,
    Saturation { factor: f32 },
    Pseudocolor { palette: Palette },
    Colorize,
}

impl Operator {
    pub fn id(&self) -> OperatorId {
        match self {
            Operator::Ace { .. } => OperatorId::Ace,
            Operator::Clahe { .. } => OperatorId::Clahe,
            Operator::Gamma { .. } => OperatorId::Gamma,
            Operator::Sharpen => OperatorId::Sharpen,
            Operator::Saturation { .. } => OperatorId::Saturation,
            Operator::Pseudocolor { .. } => OperatorId::Pseudocolor,
            Operator::Colorize => OperatorId::Colorize,
        }
    }

    /// Build an operator from its id and an optional numeric value; missing
    /// values take the slider default.
    pub fn with_value(id: OperatorId, value: Option<f32>) -> Self {
        let pick = |spec: &ParamSpec| value.unwrap_or(spec.default);
        match id {
            OperatorId::Ace => Operator::Ace { strength: pick(&ACE_STRENGTH) },
            OperatorId::Clahe => Operator::Clahe { clip_limit: pick(&CLAHE_CLIP) },
            OperatorId::Gamma => Operator::Gamma { gamma: pick(&GAMMA) },
            OperatorId::Sharpen => Operator::Sharpen,
            OperatorId::Saturation => Operator::Saturation { factor: pick(&SATURATION) },
            OperatorId::Pseudocolor => Operator::Pseudocolor { palette: Palette::default() },
            OperatorId::Colorize => Operator::Colorize,
        }
    }

    /// The single numeric parameter, if the operator has one.
    pub fn value(&self) -> Option<f32> {
        match *self {
            Operator::Ace { strength } => Some(strength),
            Operator::Clahe { clip_limit } => Some(clip_limit),
            Operator::Gamma { gamma } => Some(gamma),
            Operator::Saturation { factor } => Some(factor),
            Operator::Sharpen | Operator::Pseudocolor { .. } | Operator::Colorize => None,
        }
    }

    /// Clamp the numeric parameter into its declared range. Non-finite values
    /// are rejected.
    pub fn sanitized(self) -> Result<Self, ParamError> {
        let Some(spec) = self.id().param_spec() else {
            return Ok(self);
        };
        let Some(value) = self.value() else {
            return Ok(self);
        };
        let v = spec.clamp(value)?;
        if v != value {
            log::debug!("{} = {} clamped to {}", spec.name, value, v);
        }
        Ok(match self {
            Operator::Ace { .. } => Operator::Ace { strength: v },
            Operator::Clahe { .. } => Operator::Clahe { clip_limit: v },
            Operator::Gamma { .. } => Operator::Gamma { gamma: v },
            Operator::Saturation { .. } => Operator::Saturation { factor: v },
            other => other,
        })
    }

    /// Run a synchronous operator. `input` must already carry
    /// [`OperatorId::input_space`]; colorization is not handled here (it goes
    /// through the adapter) and returns `None`.
    pub fn apply(&self, input: &ImageBuffer) -> Option<ImageBuffer> {
        debug_assert_eq!(input.color_space(), self.id().input_space());
        let out = match *self {
            Operator::Ace { strength } => filters::ace_enhance(input, strength),
            Operator::Clahe { clip_limit } => clahe::clahe_enhance(input, clip_limit),
            Operator::Gamma { gamma } => adjustments::gamma_correction(input, gamma),
            Operator::Sharpen => filters::sharpen(input),
            Operator::Saturation { factor } => adjustments::saturation_boost(input, factor),
            Operator::Pseudocolor { palette } => colormap::pseudocolor(input, palette),
            Operator::Colorize => return None,
        };
        Some(out)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Pseudocolor { palette } => write!(f, "pseudocolor ({})", palette),
            other => match other.value() {
                Some(v) => write!(f, "{} ({:.2})", other.id(), v),
                None => write!(f, "{}", other.id()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseOperatorError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("invalid value '{value}' for {op}")]
    InvalidValue { op: OperatorId, value: String },
    #[error("{0} takes no parameter")]
    UnexpectedValue(OperatorId),
}

/// Parses `name`, `name=value` or `name:value`
/// (e.g. `gamma=2.0`, `sharpen`, `pseudocolor=viridis`).
impl FromStr for Operator {
    type Err = ParseOperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = match s.split_once(['=', ':']) {
            Some((n, v)) => (n, Some(v.trim())),
            None => (s, None),
        };
        let id: OperatorId = name.parse()?;
        let invalid = |v: &str| ParseOperatorError::InvalidValue {
            op: id,
            value: v.to_string(),
        };
        match (id, value) {
            (_, None) | (_, Some("")) => Ok(Operator::with_value(id, None)),
            (OperatorId::Pseudocolor, Some(v)) => Ok(Operator::Pseudocolor {
                palette: v.parse().map_err(|_| invalid(v))?,
            }),
            (OperatorId::Sharpen | OperatorId::Colorize, Some(_)) => {
                Err(ParseOperatorError::UnexpectedValue(id))
            }
            (_, Some(v)) => {
                let n: f32 = v.parse().map_err(|_| invalid(v))?;
                Ok(Operator::with_value(id, Some(n)))
            }
        }
    }
}
