use chromafe::ops::adjustments::{gamma_correction, saturation_boost};
use chromafe::ops::colormap::pseudocolor;
use chromafe::{ColorSpace, ColorizationAdapter, ColorizeOutcome, FallbackReason, ImageBuffer, Operator, OperatorId, Palette};

/// Deterministic colourful test card.
fn card(w: u32, h: u32) -> ImageBuffer {
    let mut samples = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..h {
        for x in 0..w {
            samples.push(((x * 37 + y * 11) % 256) as u8);
            samples.push(((x * 5 + y * 53) % 256) as u8);
            samples.push(((x * y + 7) % 256) as u8);
        }
    }
    ImageBuffer::from_raw(w, h, ColorSpace::Bgr, samples).unwrap()
}

#[test]
fn gamma_one_is_identity() {
    let img = card(33, 21);
    assert_eq!(gamma_correction(&img, 1.0), img);
}

#[test]
fn saturation_one_is_identity_within_rounding() {
    let img = card(33, 21);
    let out = saturation_boost(&img, 1.0);
    for (a, b) in out.samples().iter().zip(img.samples()) {
        assert!(a.abs_diff(*b) <= 1, "{} vs {}", a, b);
    }
}

#[test]
fn saturation_zero_gives_neutral_pixels() {
    let out = saturation_boost(&card(9, 9), 0.0);
    for px in out.samples().chunks_exact(3) {
        assert!(px[0] == px[1] && px[1] == px[2], "{:?}", px);
    }
}

#[test]
fn every_operator_is_deterministic() {
    let img = card(40, 24);
    let ops = [
        Operator::Ace { strength: 2.5 },
        Operator::Clahe { clip_limit: 3.0 },
        Operator::Gamma { gamma: 0.7 },
        Operator::Sharpen,
        Operator::Saturation { factor: 1.8 },
        Operator::Pseudocolor { palette: Palette::Turbo },
    ];
    for op in ops {
        let input = img.convert_to(op.id().input_space());
        let first = op.apply(&input).unwrap();
        let second = op.apply(&input).unwrap();
        assert_eq!(first, second, "{}", op);
        assert_eq!(first.dimensions(), img.dimensions(), "{}", op);
        assert_eq!(first.color_space(), op.id().output_space(), "{}", op);
        // The input is never modified.
        assert_eq!(input, img.convert_to(op.id().input_space()));
    }
}

#[test]
fn operators_accept_one_pixel_images() {
    let img = ImageBuffer::filled(1, 1, ColorSpace::Bgr, 77);
    for id in OperatorId::ALL {
        let op = Operator::with_value(id, None);
        if id == OperatorId::Colorize {
            continue;
        }
        let out = op.apply(&img.convert_to(id.input_space())).unwrap();
        assert_eq!(out.dimensions(), (1, 1), "{}", op);
    }
}

#[test]
fn colorize_without_model_equals_default_pseudocolor() {
    let gray = card(17, 13).convert_to(ColorSpace::Gray);
    let adapter = ColorizationAdapter::from_paths(None, None);
    let outcome = adapter.colorize(&gray);
    assert!(!adapter.is_model_ready());
    match &outcome {
        ColorizeOutcome::Fallback { reason, .. } => assert_eq!(reason, &FallbackReason::ModelUnavailable),
        ColorizeOutcome::Model(_) => panic!("no model was configured"),
    }
    assert_eq!(outcome.into_image(), pseudocolor(&gray, Palette::Jet));
    // Second call takes the same path.
    assert_eq!(adapter.colorize(&gray).image(), &pseudocolor(&gray, Palette::Jet));
}

#[test]
fn colorize_with_missing_model_dir_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = ColorizationAdapter::from_paths(
        Some("/nonexistent/libonnxruntime.so".to_string()),
        Some(dir.path().to_path_buf()),
    );
    let gray = ImageBuffer::filled(5, 5, ColorSpace::Gray, 10);
    assert!(adapter.colorize(&gray).is_fallback());
}
