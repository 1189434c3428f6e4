// ============================================================================
// COLORIZATION ADAPTER: learned grey → colour with a deterministic fallback
// ============================================================================
//
// The model handle is owned by the adapter and initialised lazily, exactly
// once.  An initialisation failure is recorded as adapter state and logged a
// single time; every later call silently takes the fallback path
// (pseudocolor with the default palette).  Inference errors and panics at
// call time also fall back, and the outcome is tagged so callers can tell
// which path produced the image.
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use image::imageops::{self, FilterType};
use image::Luma;

use crate::canvas::{ColorSpace, ImageBuffer};
use crate::ops::ai::{ModelError, ModelResources, OnnxColorizer};
use crate::ops::color_space::{bgr_to_lab_f32, pack_lab};
use crate::ops::colormap::{Palette, pseudocolor};

/// Mean lightness subtracted from the network input.
pub const L_MEAN: f32 = 50.0;
/// Palette used when the model cannot produce a result.
pub const FALLBACK_PALETTE: Palette = Palette::Jet;

/// Predicted chrominance at model resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct AbPlane {
    pub width: u32,
    pub height: u32,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

/// A loaded inference backend. `predict_ab` receives the mean-centred
/// lightness plane at `input_size()` resolution, row-major.
pub trait ColorizationModel: Send + Sync {
    /// (width, height) the network expects.
    fn input_size(&self) -> (u32, u32);
    fn predict_ab(&self, l_centered: &[f32]) -> Result<AbPlane, ModelError>;
}

pub type ModelLoader = Box<dyn FnOnce() -> Result<Arc<dyn ColorizationModel>, ModelError> + Send>;

pub enum ModelState {
    Ready(Arc<dyn ColorizationModel>),
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    ModelUnavailable,
    InferenceFailed(String),
}

/// Result of [`ColorizationAdapter::colorize`]. Both variants carry a BGR
/// image of the input's dimensions.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorizeOutcome {
    Model(ImageBuffer),
    Fallback {
        image: ImageBuffer,
        reason: FallbackReason,
    },
}

impl ColorizeOutcome {
    pub fn image(&self) -> &ImageBuffer {
        match self {
            ColorizeOutcome::Model(img) => img,
            ColorizeOutcome::Fallback { image, .. } => image,
        }
    }

    pub fn into_image(self) -> ImageBuffer {
        match self {
            ColorizeOutcome::Model(img) => img,
            ColorizeOutcome::Fallback { image, .. } => image,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ColorizeOutcome::Fallback { .. })
    }
}

pub struct ColorizationAdapter {
    loader: Mutex<Option<ModelLoader>>,
    state: OnceLock<ModelState>,
}

impl ColorizationAdapter {
    /// Adapter whose model is produced by `loader` on first use.
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader: Mutex::new(Some(loader)),
            state: OnceLock::new(),
        }
    }

    /// Adapter with an already loaded model.
    pub fn with_model(model: Arc<dyn ColorizationModel>) -> Self {
        let state = OnceLock::new();
        let _ = state.set(ModelState::Ready(model));
        Self {
            loader: Mutex::new(None),
            state,
        }
    }

    /// Adapter that always takes the fallback path.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let state = OnceLock::new();
        let _ = state.set(ModelState::Unavailable {
            reason: reason.into(),
        });
        Self {
            loader: Mutex::new(None),
            state,
        }
    }

    /// Adapter backed by ONNX Runtime, loading the three resources from
    /// `model_dir` on first use.
    pub fn from_paths(runtime: Option<String>, model_dir: Option<PathBuf>) -> Self {
        Self::new(Box::new(move || {
            let dir = model_dir.ok_or_else(|| {
                ModelError::ResourceMissing(PathBuf::from(crate::ops::ai::TOPOLOGY_FILE))
            })?;
            let resources = ModelResources::discover(&dir)?;
            let runtime = runtime.ok_or(ModelError::RuntimeNotConfigured)?;
            let model = OnnxColorizer::load(&runtime, &resources)?;
            log::info!(
                "ONNX Runtime {} session ready for {}",
                model.runtime_version(),
                resources.topology.display()
            );
            Ok(Arc::new(model) as Arc<dyn ColorizationModel>)
        }))
    }

    /// Resolve the model state, running the loader on the first call.
    pub fn initialize(&self) -> &ModelState {
        self.state.get_or_init(|| {
            let loader = self.loader.lock().ok().and_then(|mut l| l.take());
            let result = match loader {
                Some(load) => catch_unwind(AssertUnwindSafe(load)).unwrap_or_else(|_| {
                    Err(ModelError::SessionCreateFailed("model loader panicked".to_string()))
                }),
                None => Err(ModelError::RuntimeNotConfigured),
            };
            match result {
                Ok(model) => {
                    log::info!("Colorization model available");
                    ModelState::Ready(model)
                }
                Err(e) => {
                    log::warn!(
                        "Colorization model unavailable ({}); using {} pseudocolor instead",
                        e,
                        FALLBACK_PALETTE
                    );
                    ModelState::Unavailable {
                        reason: e.to_string(),
                    }
                }
            }
        })
    }

    pub fn is_model_ready(&self) -> bool {
        matches!(self.initialize(), ModelState::Ready(_))
    }

    /// Colorize a GRAY buffer. Never fails: any model problem yields the
    /// pseudocolor fallback.
    pub fn colorize(&self, gray: &ImageBuffer) -> ColorizeOutcome {
        let gray = gray.convert_to(ColorSpace::Gray);
        let model = match self.initialize() {
            ModelState::Ready(m) => Arc::clone(m),
            ModelState::Unavailable { .. } => {
                return ColorizeOutcome::Fallback {
                    image: pseudocolor(&gray, FALLBACK_PALETTE),
                    reason: FallbackReason::ModelUnavailable,
                };
            }
        };
        let attempt = catch_unwind(AssertUnwindSafe(|| run_model(model.as_ref(), &gray)))
            .unwrap_or_else(|_| Err(ModelError::InferenceFailed("inference panicked".to_string())));
        match attempt {
            Ok(img) => ColorizeOutcome::Model(img),
            Err(e) => {
                log::warn!("Colorization inference failed: {}", e);
                ColorizeOutcome::Fallback {
                    image: pseudocolor(&gray, FALLBACK_PALETTE),
                    reason: FallbackReason::InferenceFailed(e.to_string()),
                }
            }
        }
    }
}

/// Lightness (0..100) of a neutral pixel for every grey level.
fn gray_lightness_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0.0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let g = i as u8;
            *v = bgr_to_lab_f32(g, g, g).0;
        }
        lut
    })
}

fn resize_plane(data: Vec<f32>, w: u32, h: u32, nw: u32, nh: u32) -> Option<Vec<f32>> {
    if (w, h) == (nw, nh) {
        return Some(data);
    }
    let img = image::ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w, h, data)?;
    Some(imageops::resize(&img, nw, nh, FilterType::Triangle).into_raw())
}

fn run_model(model: &dyn ColorizationModel, gray: &ImageBuffer) -> Result<ImageBuffer, ModelError> {
    let (w, h) = gray.dimensions();
    if gray.is_empty() {
        return Ok(gray.convert_to(ColorSpace::Bgr));
    }
    let lut = gray_lightness_lut();
    let l_full: Vec<f32> = gray.samples().iter().map(|&v| lut[v as usize]).collect();

    // --- Network input: lightness at model resolution, mean-centred ---
    let (mw, mh) = model.input_size();
    let mut l_small = resize_plane(l_full.clone(), w, h, mw, mh)
        .ok_or_else(|| ModelError::InferenceFailed("input resize failed".to_string()))?;
    for v in &mut l_small {
        *v -= L_MEAN;
    }

    let ab = model.predict_ab(&l_small)?;
    let n = ab.width as usize * ab.height as usize;
    if n == 0 || ab.a.len() != n || ab.b.len() != n {
        return Err(ModelError::InvalidOutput(format!(
            "ab planes do not match {}x{}",
            ab.width, ab.height
        )));
    }

    // --- Upsample chrominance, recombine with full-resolution lightness ---
    let invalid = || ModelError::InvalidOutput("ab resize failed".to_string());
    let a = resize_plane(ab.a, ab.width, ab.height, w, h).ok_or_else(invalid)?;
    let b = resize_plane(ab.b, ab.width, ab.height, w, h).ok_or_else(invalid)?;

    let mut lab = Vec::with_capacity(l_full.len() * 3);
    for ((&l, &a), &b) in l_full.iter().zip(&a).zip(&b) {
        lab.extend_from_slice(&pack_lab(l, a, b));
    }
    Ok(ImageBuffer::from_parts(w, h, ColorSpace::Lab, lab).convert_to(ColorSpace::Bgr))
}
