use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::canvas::ImageBuffer;
use crate::history::HistoryStore;
use crate::ops::Operator;

/// Uncommitted result shown while a slider is being dragged.
#[derive(Clone, Debug, PartialEq)]
pub struct LivePreview {
    pub image: ImageBuffer,
    pub operator: Operator,
}

/// Per-document state: created on load, replaced wholesale by the next load.
pub struct PipelineSession {
    pub id: Uuid,
    /// The image as first loaded. Never modified.
    pub original: ImageBuffer,
    pub history: HistoryStore,
    pub live_override: Option<LivePreview>,
    /// `None` for buffers loaded from memory.
    pub path: Option<PathBuf>,
    /// Display name (file name or "Untitled").
    pub name: String,
    pub is_dirty: bool,
}

impl PipelineSession {
    pub fn new(original: ImageBuffer, path: Option<PathBuf>, max_history_depth: usize) -> Self {
        let name = path
            .as_deref()
            .map(display_name)
            .unwrap_or_else(|| "Untitled".to_string());
        Self {
            id: Uuid::new_v4(),
            history: HistoryStore::new(original.clone(), max_history_depth),
            original,
            live_override: None,
            path,
            name,
            is_dirty: false,
        }
    }

    /// The live preview if one is showing, otherwise the committed entry.
    pub fn displayed(&self) -> &ImageBuffer {
        match &self.live_override {
            Some(preview) => &preview.image,
            None => &self.history.current().image,
        }
    }

    pub fn committed(&self) -> &ImageBuffer {
        &self.history.current().image
    }

    pub fn is_previewing(&self) -> bool {
        self.live_override.is_some()
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
