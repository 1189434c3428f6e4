// ============================================================================
// OPERATOR PARAMETERS: declared ranges and slider defaults
// ============================================================================

/// Inclusive range plus default for a single numeric operator parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("{name} must be a finite number (got {value})")]
    NotFinite { name: &'static str, value: f32 },
}

impl ParamSpec {
    /// Clamp into `[min, max]`. NaN and infinities are rejected rather than
    /// silently mapped to a bound.
    pub fn clamp(&self, value: f32) -> Result<f32, ParamError> {
        if !value.is_finite() {
            return Err(ParamError::NotFinite {
                name: self.name,
                value,
            });
        }
        Ok(value.clamp(self.min, self.max))
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

pub const ACE_STRENGTH: ParamSpec = ParamSpec {
    name: "ace_strength",
    min: 0.5,
    max: 5.0,
    default: 2.0,
};

pub const CLAHE_CLIP: ParamSpec = ParamSpec {
    name: "clahe_clip",
    min: 1.0,
    max: 8.0,
    default: 2.5,
};

pub const GAMMA: ParamSpec = ParamSpec {
    name: "gamma",
    min: 0.1,
    max: 3.0,
    default: 1.5,
};

pub const SATURATION: ParamSpec = ParamSpec {
    name: "saturation",
    min: 0.0,
    max: 3.0,
    default: 1.4,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_lie_inside_their_ranges() {
        for spec in [ACE_STRENGTH, CLAHE_CLIP, GAMMA, SATURATION] {
            assert!(spec.contains(spec.default), "{}", spec.name);
        }
    }

    #[test]
    fn clamp_bounds_and_rejects_nan() {
        assert_eq!(GAMMA.clamp(0.0), Ok(0.1));
        assert_eq!(GAMMA.clamp(2.0), Ok(2.0));
        assert_eq!(CLAHE_CLIP.clamp(100.0), Ok(8.0));
        assert!(SATURATION.clamp(f32::NAN).is_err());
        assert!(SATURATION.clamp(f32::INFINITY).is_err());
    }
}
