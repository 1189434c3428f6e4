// ============================================================================
// PIPELINE CONTROLLER: command surface over one PipelineSession
// ============================================================================
//
// All state lives here and is mutated only through `&mut self`, so every
// command, including the hand-off of a finished colorization (`pump`), runs in
// one serialized order.  Commands either succeed or leave the session exactly
// as they found it.
//
// The working tag of a session is BGR: operators that consume GRAY or LAB get
// an explicit conversion, and GRAY results are expanded back to BGR before
// they are displayed or committed.
// ============================================================================

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::canvas::{ColorSpace, ImageBuffer, side_by_side};
use crate::error::CommandError;
use crate::history::DEFAULT_MAX_DEPTH;
use crate::io::{EncodeOptions, FileCodec, ImageCodec, SaveFormat};
use crate::jobs::{ColorizeCompletion, ColorizeGate, JobHandle};
use crate::ops::colorize::{ColorizationAdapter, ColorizeOutcome, FallbackReason};
use crate::ops::Operator;
use crate::project::{LivePreview, PipelineSession};
use crate::settings::AppSettings;

/// Receives the displayed image once per observable state change.
pub trait DisplaySink: Send {
    fn show(&mut self, image: &ImageBuffer);
}

/// Discards every frame (headless use).
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _image: &ImageBuffer) {}
}

/// What a successful `apply` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed,
    Previewed,
    /// Colorization was handed to the background gate; the result is
    /// committed by a later [`Pipeline::pump`] or
    /// [`Pipeline::wait_for_colorization`].
    Submitted(JobHandle),
}

/// A background colorization that reached the controller.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    Committed {
        handle: JobHandle,
        fallback: Option<FallbackReason>,
        elapsed: Duration,
    },
    Failed {
        handle: JobHandle,
        message: String,
    },
}

/// Snapshot of the session for status display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub name: String,
    /// Name with a trailing `*` while there are unsaved changes.
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// 1-based position of the cursor.
    pub history_position: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    /// Bytes held by distinct history snapshots.
    pub history_bytes: usize,
    /// Entry descriptions, oldest first.
    pub steps: Vec<String>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub previewing: bool,
    pub colorization_pending: bool,
    pub dirty: bool,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} | history {}/{} (max {})",
            self.title, self.width, self.height, self.history_position, self.history_len, self.history_capacity
        )?;
        if self.previewing {
            f.write_str(" | preview")?;
        }
        if self.colorization_pending {
            f.write_str(" | colorizing...")?;
        }
        Ok(())
    }
}

pub struct Pipeline {
    session: Option<PipelineSession>,
    adapter: Arc<ColorizationAdapter>,
    gate: ColorizeGate,
    display: Box<dyn DisplaySink>,
    codec: Box<dyn ImageCodec>,
    max_history_depth: usize,
    encode_options: EncodeOptions,
}

impl Pipeline {
    pub fn new(adapter: ColorizationAdapter) -> Self {
        Self {
            session: None,
            adapter: Arc::new(adapter),
            gate: ColorizeGate::new(),
            display: Box::new(NullDisplay),
            codec: Box::new(FileCodec),
            max_history_depth: DEFAULT_MAX_DEPTH,
            encode_options: EncodeOptions::default(),
        }
    }

    /// Controller configured from persisted settings. The model is not
    /// loaded until [`Pipeline::initialize_model`] or the first colorization.
    pub fn from_settings(settings: &AppSettings) -> Self {
        let adapter = ColorizationAdapter::from_paths(settings.runtime_path(), settings.model_dir());
        Self::new(adapter)
            .with_max_history_depth(settings.max_history_depth)
            .with_encode_options(EncodeOptions {
                quality: settings.jpeg_quality,
                ..EncodeOptions::default()
            })
    }

    pub fn with_display(mut self, display: Box<dyn DisplaySink>) -> Self {
        self.display = display;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Applies to sessions created after this call.
    pub fn with_max_history_depth(mut self, depth: usize) -> Self {
        self.max_history_depth = depth.max(1);
        self
    }

    pub fn with_encode_options(mut self, options: EncodeOptions) -> Self {
        self.encode_options = options;
        self
    }

    /// Resolve the colorization model now so an unavailable model is
    /// reported at startup. Returns whether the model is usable.
    pub fn initialize_model(&self) -> bool {
        self.adapter.is_model_ready()
    }

    // ------------------------------------------------------------------
    // Load / save
    // ------------------------------------------------------------------

    /// Decode `path` and start a new session with it. On failure the current
    /// session is untouched.
    pub fn load(&mut self, path: &Path) -> Result<(), CommandError> {
        let image = self.codec.decode(path)?;
        if image.is_empty() {
            return Err(CommandError::precondition(format!("{} has no pixels", path.display())));
        }
        self.start_session(image, Some(path.to_path_buf()));
        Ok(())
    }

    /// Start a new session from an in-memory buffer.
    pub fn load_buffer(&mut self, image: ImageBuffer) -> Result<(), CommandError> {
        if image.is_empty() {
            return Err(CommandError::precondition("cannot load an empty image"));
        }
        self.start_session(image, None);
        Ok(())
    }

    fn start_session(&mut self, image: ImageBuffer, path: Option<PathBuf>) {
        self.gate.cancel();
        let image = image.convert_to(ColorSpace::Bgr);
        log::info!(
            "session started: {} ({}x{})",
            path.as_deref().map_or("<memory>".into(), |p| p.display().to_string()),
            image.width(),
            image.height()
        );
        self.session = Some(PipelineSession::new(image, path, self.max_history_depth));
        self.refresh_display();
    }

    /// Encode the displayed image. `format` defaults to the one implied by
    /// the file extension.
    pub fn save(&mut self, path: &Path, format: Option<SaveFormat>) -> Result<(), CommandError> {
        let session = self.session.as_mut().ok_or_else(no_image)?;
        let format = match format {
            Some(f) => f,
            None => SaveFormat::infer(path)?,
        };
        self.codec
            .encode(session.displayed(), path, format, self.encode_options)?;
        session.path = Some(path.to_path_buf());
        session.mark_clean();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    /// Run `operator` on the committed image. With `commit` the result
    /// becomes a new history entry; without it the result only replaces the
    /// live preview. Colorization always commits, asynchronously.
    pub fn apply(&mut self, operator: Operator, commit: bool) -> Result<ApplyOutcome, CommandError> {
        let session = self.session.as_ref().ok_or_else(no_image)?;
        let operator = operator.sanitized()?;

        if operator.id().is_expensive() {
            if !commit {
                return Err(CommandError::precondition("colorization cannot be previewed"));
            }
            return self.submit_colorization();
        }

        let input = session.committed().convert_to(operator.id().input_space());
        let result = operator
            .apply(&input)
            .ok_or_else(|| CommandError::OperatorFailed(format!("{} produced no image", operator)))?
            .convert_to(ColorSpace::Bgr);

        let Some(session) = self.session.as_mut() else {
            return Err(no_image());
        };
        if commit {
            if self.gate.cancel().is_some() {
                log::info!("pending colorization superseded by {}", operator);
            }
            session.live_override = None;
            session.history.commit(result, Some(operator));
            session.mark_dirty();
            log::debug!("committed {}", operator);
            self.refresh_display();
            Ok(ApplyOutcome::Committed)
        } else {
            session.live_override = Some(LivePreview {
                image: result,
                operator,
            });
            self.refresh_display();
            Ok(ApplyOutcome::Previewed)
        }
    }

    pub fn apply_committed(&mut self, operator: Operator) -> Result<ApplyOutcome, CommandError> {
        self.apply(operator, true)
    }

    pub fn preview_live(&mut self, operator: Operator) -> Result<ApplyOutcome, CommandError> {
        self.apply(operator, false)
    }

    /// Commit the live preview as shown (slider release).
    pub fn commit_preview(&mut self) -> Result<(), CommandError> {
        let session = self.session.as_mut().ok_or_else(no_image)?;
        let preview = session
            .live_override
            .take()
            .ok_or_else(|| CommandError::precondition("no live preview to commit"))?;
        self.gate.cancel();
        session.history.commit(preview.image, Some(preview.operator));
        session.mark_dirty();
        self.refresh_display();
        Ok(())
    }

    /// Drop the live preview and show the committed image again.
    pub fn discard_preview(&mut self) -> Result<(), CommandError> {
        let session = self.session.as_mut().ok_or_else(no_image)?;
        if session.live_override.take().is_none() {
            return Err(CommandError::precondition("no live preview to discard"));
        }
        self.refresh_display();
        Ok(())
    }

    fn submit_colorization(&mut self) -> Result<ApplyOutcome, CommandError> {
        let session = self.session.as_ref().ok_or_else(no_image)?;
        let gray = session.committed().convert_to(ColorSpace::Gray);
        let handle = self.gate.submit(Arc::clone(&self.adapter), gray, session.id)?;
        log::info!("colorization submitted (job {})", handle.token);
        Ok(ApplyOutcome::Submitted(handle))
    }

    // ------------------------------------------------------------------
    // History navigation
    // ------------------------------------------------------------------

    /// Step back one entry, discarding any live preview. With a single entry
    /// and a preview showing, only the preview is discarded.
    pub fn undo(&mut self) -> Result<(), CommandError> {
        let session = self.session.as_mut().ok_or_else(no_image)?;
        let had_preview = session.live_override.is_some();
        if !session.history.can_undo() && !had_preview {
            return Err(CommandError::precondition("nothing to undo"));
        }
        session.live_override = None;
        if let Some(entry) = session.history.undo() {
            log::debug!("undo -> {}", entry.description());
        }
        session.mark_dirty();
        self.refresh_display();
        Ok(())
    }

    /// Step forward one entry, discarding any live preview.
    pub fn redo(&mut self) -> Result<(), CommandError> {
        let session = self.session.as_mut().ok_or_else(no_image)?;
        let had_preview = session.live_override.is_some();
        if !session.history.can_redo() && !had_preview {
            return Err(CommandError::precondition("nothing to redo"));
        }
        session.live_override = None;
        if let Some(entry) = session.history.redo() {
            log::debug!("redo -> {}", entry.description());
        }
        session.mark_dirty();
        self.refresh_display();
        Ok(())
    }

    /// Return to the loaded image with a fresh single-entry history.
    pub fn reset(&mut self) -> Result<(), CommandError> {
        let session = self.session.as_mut().ok_or_else(no_image)?;
        self.gate.cancel();
        session.live_override = None;
        session.history.reset(session.original.clone());
        session.mark_clean();
        self.refresh_display();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Background colorization hand-off
    // ------------------------------------------------------------------

    /// Abandon the pending colorization; its result is discarded on arrival.
    pub fn cancel_colorization(&mut self) -> Result<JobHandle, CommandError> {
        self.gate
            .cancel()
            .ok_or_else(|| CommandError::precondition("no colorization pending"))
    }

    /// Apply a finished colorization, if one has arrived. Never blocks.
    pub fn pump(&mut self) -> Option<JobEvent> {
        let completion = self.gate.poll()?;
        Some(self.finish_colorization(completion))
    }

    /// Block up to `timeout` for the pending colorization and apply it.
    pub fn wait_for_colorization(&mut self, timeout: Duration) -> Option<JobEvent> {
        let completion = self.gate.wait(timeout)?;
        Some(self.finish_colorization(completion))
    }

    fn finish_colorization(&mut self, completion: ColorizeCompletion) -> JobEvent {
        let handle = completion.handle;
        let outcome = match completion.outcome {
            Ok(outcome) => outcome,
            Err(message) => {
                log::error!("colorization job {} panicked: {}", handle.token, message);
                return JobEvent::Failed { handle, message };
            }
        };
        let Some(session) = self.session.as_mut().filter(|s| s.id == handle.session) else {
            return JobEvent::Failed {
                handle,
                message: "session closed before colorization finished".to_string(),
            };
        };

        let fallback = match &outcome {
            ColorizeOutcome::Model(_) => None,
            ColorizeOutcome::Fallback { reason, .. } => Some(reason.clone()),
        };
        let image = outcome.into_image().convert_to(ColorSpace::Bgr);
        session.live_override = None;
        session.history.commit(image, Some(Operator::Colorize));
        session.mark_dirty();
        log::info!(
            "colorization job {} committed in {:.2?}{}",
            handle.token,
            completion.elapsed,
            if fallback.is_some() { " (fallback)" } else { "" }
        );
        self.refresh_display();
        JobEvent::Committed {
            handle,
            fallback,
            elapsed: completion.elapsed,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn session(&self) -> Option<&PipelineSession> {
        self.session.as_ref()
    }

    pub fn displayed(&self) -> Option<&ImageBuffer> {
        self.session.as_ref().map(PipelineSession::displayed)
    }

    pub fn committed(&self) -> Option<&ImageBuffer> {
        self.session.as_ref().map(PipelineSession::committed)
    }

    pub fn can_undo(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.history.can_undo())
    }

    pub fn can_redo(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.history.can_redo())
    }

    pub fn is_colorizing(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn is_model_ready(&self) -> bool {
        self.adapter.is_model_ready()
    }

    /// Original and displayed image side by side.
    pub fn compare(&self) -> Result<ImageBuffer, CommandError> {
        let session = self.session.as_ref().ok_or_else(no_image)?;
        Ok(side_by_side(&session.original, session.displayed()))
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        let s = self.session.as_ref()?;
        let (width, height) = s.displayed().dimensions();
        Some(SessionSummary {
            name: s.name.clone(),
            title: s.display_title(),
            width,
            height,
            history_position: s.history.cursor() + 1,
            history_len: s.history.len(),
            history_capacity: s.history.max_depth(),
            history_bytes: s.history.memory_usage(),
            steps: s.history.descriptions(),
            can_undo: s.history.can_undo(),
            can_redo: s.history.can_redo(),
            previewing: s.is_previewing(),
            colorization_pending: self.gate.is_busy(),
            dirty: s.is_dirty,
        })
    }

    fn refresh_display(&mut self) {
        if let Some(session) = &self.session {
            self.display.show(session.displayed());
        }
    }
}

fn no_image() -> CommandError {
    CommandError::precondition("no image loaded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Palette;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Frames(Arc<Mutex<Vec<ImageBuffer>>>);

    impl DisplaySink for Frames {
        fn show(&mut self, image: &ImageBuffer) {
            self.0.lock().unwrap().push(image.clone());
        }
    }

    impl Frames {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn pipeline() -> (Pipeline, Frames) {
        let frames = Frames::default();
        let p = Pipeline::new(ColorizationAdapter::unavailable("test"))
            .with_display(Box::new(frames.clone()));
        (p, frames)
    }

    fn flat(v: u8) -> ImageBuffer {
        ImageBuffer::filled(6, 4, ColorSpace::Bgr, v)
    }

    #[test]
    fn commands_before_load_are_precondition_failures() {
        let (mut p, frames) = pipeline();
        assert!(p.apply(Operator::Sharpen, true).unwrap_err().is_precondition());
        assert!(p.undo().unwrap_err().is_precondition());
        assert!(p.redo().unwrap_err().is_precondition());
        assert!(p.reset().unwrap_err().is_precondition());
        assert!(p.commit_preview().unwrap_err().is_precondition());
        assert!(p.compare().unwrap_err().is_precondition());
        assert!(p.save(Path::new("x.png"), None).unwrap_err().is_precondition());
        assert!(p.summary().is_none());
        assert_eq!(frames.count(), 0);
    }

    struct EmptyDecode;

    impl ImageCodec for EmptyDecode {
        fn decode(&self, _path: &Path) -> Result<ImageBuffer, crate::error::IoError> {
            Ok(ImageBuffer::filled(0, 4, ColorSpace::Bgr, 0))
        }

        fn encode(
            &self,
            _buffer: &ImageBuffer,
            _path: &Path,
            _format: SaveFormat,
            _options: EncodeOptions,
        ) -> Result<(), crate::error::IoError> {
            Ok(())
        }
    }

    #[test]
    fn load_rejects_a_decoded_image_without_pixels() {
        let (p, frames) = pipeline();
        let mut p = p.with_codec(Box::new(EmptyDecode));
        p.load_buffer(flat(50)).unwrap();
        let shown = frames.count();

        let err = p.load(Path::new("blank.png")).unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(p.committed().unwrap(), &flat(50));
        assert_eq!(frames.count(), shown);
        assert!(p.compare().is_ok());
    }

    #[test]
    fn preview_is_computed_from_committed_not_previous_preview() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(128)).unwrap();
        p.preview_live(Operator::Gamma { gamma: 2.0 }).unwrap();
        p.preview_live(Operator::Gamma { gamma: 2.0 }).unwrap();
        assert_eq!(p.displayed().unwrap().samples()[0], 180);
        assert_eq!(p.committed().unwrap().samples()[0], 128);
        assert!(!p.can_undo());
    }

    #[test]
    fn commit_preview_records_history() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(128)).unwrap();
        p.preview_live(Operator::Gamma { gamma: 2.0 }).unwrap();
        p.commit_preview().unwrap();
        assert!(p.can_undo());
        assert_eq!(p.committed().unwrap().samples()[0], 180);
        assert_eq!(
            p.session().unwrap().history.current().operator,
            Some(Operator::Gamma { gamma: 2.0 })
        );
        assert!(p.commit_preview().unwrap_err().is_precondition());
    }

    #[test]
    fn gray_output_is_expanded_to_bgr() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(90)).unwrap();
        p.apply(Operator::Ace { strength: 2.0 }, true).unwrap();
        assert_eq!(p.committed().unwrap().color_space(), ColorSpace::Bgr);
    }

    #[test]
    fn out_of_range_parameters_are_clamped_and_nan_rejected() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(128)).unwrap();
        p.apply(Operator::Gamma { gamma: 40.0 }, true).unwrap();
        assert_eq!(
            p.session().unwrap().history.current().operator,
            Some(Operator::Gamma { gamma: 3.0 })
        );
        let before = p.summary().unwrap();
        let err = p.apply(Operator::Gamma { gamma: f32::NAN }, true).unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(p.summary().unwrap(), before);
    }

    #[test]
    fn display_is_pushed_once_per_change() {
        let (mut p, frames) = pipeline();
        p.load_buffer(flat(10)).unwrap();
        p.apply(Operator::Sharpen, true).unwrap();
        p.preview_live(Operator::Gamma { gamma: 2.0 }).unwrap();
        p.undo().unwrap();
        assert_eq!(frames.count(), 4);
        let _ = p.redo();
        assert_eq!(frames.count(), 5);
        assert!(p.redo().is_err());
        assert_eq!(frames.count(), 5);
    }

    #[test]
    fn colorize_preview_is_rejected() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(10)).unwrap();
        assert!(p.apply(Operator::Colorize, false).unwrap_err().is_precondition());
        assert!(!p.is_colorizing());
    }

    #[test]
    fn fallback_colorization_commits_pseudocolor() {
        let (mut p, _) = pipeline();
        let src = flat(200);
        p.load_buffer(src.clone()).unwrap();
        assert!(matches!(p.apply(Operator::Colorize, true), Ok(ApplyOutcome::Submitted(_))));
        assert!(p.apply(Operator::Colorize, true).unwrap_err().is_precondition());
        let event = p.wait_for_colorization(Duration::from_secs(10)).unwrap();
        assert!(matches!(
            event,
            JobEvent::Committed {
                fallback: Some(FallbackReason::ModelUnavailable),
                ..
            }
        ));
        let expected = Operator::Pseudocolor { palette: Palette::Jet }
            .apply(&src.convert_to(ColorSpace::Gray))
            .unwrap();
        assert_eq!(p.committed().unwrap(), &expected);
        assert_eq!(
            p.session().unwrap().history.current().operator,
            Some(Operator::Colorize)
        );
    }

    #[test]
    fn committed_apply_supersedes_pending_colorization() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(50)).unwrap();
        p.apply(Operator::Colorize, true).unwrap();
        p.apply(Operator::Sharpen, true).unwrap();
        assert!(!p.is_colorizing());
        std::thread::sleep(Duration::from_millis(100));
        assert!(p.pump().is_none());
        assert_eq!(p.session().unwrap().history.len(), 2);
    }

    #[test]
    fn cancel_without_pending_job_fails() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(50)).unwrap();
        assert!(p.cancel_colorization().unwrap_err().is_precondition());
        p.apply(Operator::Colorize, true).unwrap();
        assert!(p.cancel_colorization().is_ok());
        assert!(!p.is_colorizing());
    }

    #[test]
    fn reset_restores_original_with_single_entry() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(128)).unwrap();
        p.apply(Operator::Gamma { gamma: 2.0 }, true).unwrap();
        p.apply(Operator::Sharpen, true).unwrap();
        p.reset().unwrap();
        let s = p.summary().unwrap();
        assert_eq!((s.history_position, s.history_len), (1, 1));
        assert_eq!(p.displayed().unwrap().samples()[0], 128);
        assert!(!s.dirty);
    }

    #[test]
    fn compare_places_original_left_of_displayed() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(128)).unwrap();
        p.apply(Operator::Gamma { gamma: 2.0 }, true).unwrap();
        let cmp = p.compare().unwrap();
        assert_eq!(cmp.dimensions(), (12, 4));
        assert_eq!(cmp.pixel(0, 0), &[128, 128, 128]);
        assert_eq!(cmp.pixel(6, 0), &[180, 180, 180]);
    }

    #[test]
    fn summary_formats_for_status_line() {
        let (mut p, _) = pipeline();
        p.load_buffer(flat(1)).unwrap();
        p.preview_live(Operator::Sharpen).unwrap();
        let text = p.summary().unwrap().to_string();
        assert_eq!(text, "Untitled 6x4 | history 1/1 (max 20) | preview");

        p.commit_preview().unwrap();
        let s = p.summary().unwrap();
        assert_eq!(s.to_string(), "Untitled* 6x4 | history 2/2 (max 20)");
        assert_eq!(s.steps, vec!["Original".to_string(), "sharpen".to_string()]);
        assert_eq!(s.history_bytes, 2 * flat(1).byte_size());
    }
}
