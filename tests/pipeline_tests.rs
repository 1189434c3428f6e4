use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromafe::ops::colorize::AbPlane;
use chromafe::{
    ApplyOutcome, ColorSpace, ColorizationAdapter, ColorizationModel, CommandError, DisplaySink, ImageBuffer,
    JobEvent, ModelError, Operator, Palette, Pipeline, SaveFormat,
};

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<ImageBuffer>>>);

impl DisplaySink for Recorder {
    fn show(&mut self, image: &ImageBuffer) {
        self.0.lock().unwrap().push(image.clone());
    }
}

impl Recorder {
    fn last(&self) -> Option<ImageBuffer> {
        self.0.lock().unwrap().last().cloned()
    }
}

fn fallback_pipeline() -> (Pipeline, Recorder) {
    let rec = Recorder::default();
    let p = Pipeline::new(ColorizationAdapter::unavailable("no model in tests")).with_display(Box::new(rec.clone()));
    (p, rec)
}

/// Predicts a constant warm tint regardless of input.
struct TintModel;

impl ColorizationModel for TintModel {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn predict_ab(&self, l_centered: &[f32]) -> Result<AbPlane, ModelError> {
        assert_eq!(l_centered.len(), 64);
        Ok(AbPlane {
            width: 8,
            height: 8,
            a: vec![30.0; 64],
            b: vec![40.0; 64],
        })
    }
}

#[test]
fn gamma_scenario_commits_and_undoes() {
    let (mut p, rec) = fallback_pipeline();
    p.load_buffer(ImageBuffer::filled(100, 100, ColorSpace::Bgr, 128)).unwrap();

    assert_eq!(p.apply(Operator::Gamma { gamma: 2.0 }, true).unwrap(), ApplyOutcome::Committed);
    let expected = chromafe::ops::adjustments::build_gamma_lut(2.0)[128];
    assert_eq!(expected, 180);
    assert!(p.displayed().unwrap().samples().iter().all(|&s| s == expected));
    assert_eq!(rec.last().as_ref(), p.displayed());

    p.undo().unwrap();
    assert!(p.displayed().unwrap().samples().iter().all(|&s| s == 128));
    assert!(!p.can_undo());
    assert!(p.can_redo());
}

#[test]
fn live_preview_never_touches_history() {
    let (mut p, _) = fallback_pipeline();
    p.load_buffer(ImageBuffer::filled(20, 10, ColorSpace::Bgr, 60)).unwrap();
    p.apply(Operator::Sharpen, true).unwrap();
    let committed = p.committed().unwrap().clone();

    for g in [0.5, 1.2, 2.4] {
        assert_eq!(p.preview_live(Operator::Gamma { gamma: g }).unwrap(), ApplyOutcome::Previewed);
        assert_eq!(p.committed().unwrap(), &committed);
        assert_eq!(p.session().unwrap().history.len(), 2);
    }
    assert_ne!(p.displayed().unwrap(), &committed);

    // Undo drops the preview and steps back from the committed entry.
    p.undo().unwrap();
    assert!(!p.session().unwrap().is_previewing());
    assert!(p.displayed().unwrap().samples().iter().all(|&s| s == 60));
}

#[test]
fn preview_then_undo_on_fresh_load_returns_loaded_image() {
    let (mut p, _) = fallback_pipeline();
    let src = ImageBuffer::filled(8, 8, ColorSpace::Bgr, 100);
    p.load_buffer(src.clone()).unwrap();
    p.preview_live(Operator::Saturation { factor: 2.0 }).unwrap();
    p.preview_live(Operator::Pseudocolor { palette: Palette::Hot }).unwrap();
    p.undo().unwrap();
    assert_eq!(p.displayed().unwrap(), &src);
    assert!(p.undo().unwrap_err().is_precondition());
}

#[test]
fn failed_commands_leave_state_unchanged() {
    let (mut p, _) = fallback_pipeline();
    assert!(matches!(p.load(Path::new("/no/such/image.png")), Err(CommandError::Io(_))));
    assert!(p.session().is_none());

    p.load_buffer(ImageBuffer::filled(4, 4, ColorSpace::Bgr, 9)).unwrap();
    let before = p.summary().unwrap();
    assert!(p.load(Path::new("/no/such/image.png")).is_err());
    assert!(p.redo().is_err());
    assert!(p.save(Path::new("out.unknownext"), None).is_err());
    assert_eq!(p.summary().unwrap(), before);
    assert!(p.displayed().unwrap().samples().iter().all(|&s| s == 9));
}

#[test]
fn fallback_colorization_is_pseudocolor_of_luminance() {
    let (mut p, rec) = fallback_pipeline();
    let src = ImageBuffer::from_raw(2, 1, ColorSpace::Bgr, vec![0, 0, 0, 255, 255, 255]).unwrap();
    p.load_buffer(src).unwrap();
    let handle = match p.apply(Operator::Colorize, true).unwrap() {
        ApplyOutcome::Submitted(h) => h,
        other => panic!("expected submission, got {:?}", other),
    };
    assert!(p.is_colorizing());
    match p.wait_for_colorization(Duration::from_secs(10)) {
        Some(JobEvent::Committed { handle: h, fallback, .. }) => {
            assert_eq!(h, handle);
            assert!(fallback.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    let lut = Palette::Jet.lut();
    let shown = p.displayed().unwrap();
    assert_eq!(shown.pixel(0, 0), &lut[0]);
    assert_eq!(shown.pixel(1, 0), &lut[255]);
    assert_eq!(rec.last().as_ref(), Some(shown));
    p.undo().unwrap();
    assert_eq!(p.displayed().unwrap().pixel(1, 0), &[255, 255, 255]);
}

#[test]
fn model_colorization_keeps_full_resolution_lightness() {
    let mut p = Pipeline::new(ColorizationAdapter::with_model(Arc::new(TintModel)));
    p.load_buffer(ImageBuffer::filled(30, 20, ColorSpace::Bgr, 120)).unwrap();
    p.apply(Operator::Colorize, true).unwrap();
    let event = p.wait_for_colorization(Duration::from_secs(10)).unwrap();
    assert!(matches!(event, JobEvent::Committed { fallback: None, .. }));

    let out = p.displayed().unwrap();
    assert_eq!(out.dimensions(), (30, 20));
    let [b, g, r] = [out.pixel(5, 5)[0], out.pixel(5, 5)[1], out.pixel(5, 5)[2]];
    // Positive a and b push toward red/yellow.
    assert!(r > g && g > b, "{:?}", (b, g, r));
    let lab = out.convert_to(ColorSpace::Lab);
    let l_in = ImageBuffer::filled(1, 1, ColorSpace::Bgr, 120).convert_to(ColorSpace::Lab).samples()[0];
    assert!(lab.pixel(5, 5)[0].abs_diff(l_in) <= 3);
}

#[test]
fn loading_a_new_image_discards_pending_colorization() {
    let (mut p, _) = fallback_pipeline();
    p.load_buffer(ImageBuffer::filled(6, 6, ColorSpace::Bgr, 1)).unwrap();
    p.apply(Operator::Colorize, true).unwrap();
    p.load_buffer(ImageBuffer::filled(6, 6, ColorSpace::Bgr, 2)).unwrap();
    assert!(!p.is_colorizing());
    std::thread::sleep(Duration::from_millis(100));
    assert!(p.pump().is_none());
    assert_eq!(p.session().unwrap().history.len(), 1);
    assert!(p.displayed().unwrap().samples().iter().all(|&s| s == 2));
}

#[test]
fn save_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.png");
    let (mut p, _) = fallback_pipeline();
    p.load_buffer(ImageBuffer::filled(12, 7, ColorSpace::Bgr, 128)).unwrap();
    p.apply(Operator::Pseudocolor { palette: Palette::Viridis }, true).unwrap();
    assert!(p.summary().unwrap().dirty);
    p.save(&path, None).unwrap();
    assert!(!p.summary().unwrap().dirty);
    let saved = p.displayed().unwrap().clone();

    let (mut q, _) = fallback_pipeline();
    q.load(&path).unwrap();
    assert_eq!(q.displayed().unwrap(), &saved);
    assert_eq!(q.summary().unwrap().name, "result.png");

    let bmp = dir.path().join("result.out");
    q.save(&bmp, Some(SaveFormat::Bmp)).unwrap();
    assert!(bmp.exists());
}

/// Same tint as [`TintModel`], but holds the worker long enough for the
/// control side to keep issuing commands.
struct SlowTintModel;

impl ColorizationModel for SlowTintModel {
    fn input_size(&self) -> (u32, u32) {
        TintModel.input_size()
    }

    fn predict_ab(&self, l_centered: &[f32]) -> Result<AbPlane, ModelError> {
        std::thread::sleep(Duration::from_millis(200));
        TintModel.predict_ab(l_centered)
    }
}

#[test]
fn preview_and_undo_do_not_cancel_pending_colorization() {
    let rec = Recorder::default();
    let mut p = Pipeline::new(ColorizationAdapter::with_model(Arc::new(SlowTintModel)))
        .with_display(Box::new(rec.clone()));
    let original = ImageBuffer::filled(10, 10, ColorSpace::Bgr, 90);
    p.load_buffer(original.clone()).unwrap();
    p.apply(Operator::Sharpen, true).unwrap();

    assert!(matches!(p.apply(Operator::Colorize, true), Ok(ApplyOutcome::Submitted(_))));
    p.preview_live(Operator::Gamma { gamma: 2.0 }).unwrap();
    assert!(p.session().unwrap().is_previewing());
    p.undo().unwrap();
    assert!(p.is_colorizing(), "undo must leave the job pending");
    assert!(p.can_redo());

    let event = p.wait_for_colorization(Duration::from_secs(10)).unwrap();
    assert!(matches!(event, JobEvent::Committed { fallback: None, .. }));

    let session = p.session().unwrap();
    assert!(!session.is_previewing());
    let entries: Vec<_> = session.history.entries().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].image, original);
    assert_eq!(entries[1].operator, Some(Operator::Colorize));
    assert_eq!(session.history.cursor(), 1);
    assert!(!p.can_redo());
    assert!(!p.is_colorizing());
    assert_eq!(p.displayed(), Some(&entries[1].image));
    assert_eq!(rec.last().as_ref(), Some(&entries[1].image));
}
