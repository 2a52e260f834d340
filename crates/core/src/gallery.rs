//! Newest-first gallery of plate crops received during a run.

use std::collections::VecDeque;

/// Number of crops visible at the start of every run.
pub const INITIAL_VISIBLE_CROPS: usize = 4;

/// How many more crops each "show more" reveals.
pub const CROPS_PAGE_SIZE: usize = 4;

/// Ordered crop image references, most recent first.
///
/// The visible cursor only grows while a run is active. [`reset`](Self::reset)
/// is the single way to bring it back to [`INITIAL_VISIBLE_CROPS`].
#[derive(Debug, Clone)]
pub struct CropGallery {
    crops: VecDeque<String>,
    visible_limit: usize,
}

impl Default for CropGallery {
    fn default() -> Self {
        Self {
            crops: VecDeque::new(),
            visible_limit: INITIAL_VISIBLE_CROPS,
        }
    }
}

impl CropGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a newly received crop.
    pub fn push(&mut self, image_ref: impl Into<String>) {
        self.crops.push_front(image_ref.into());
    }

    /// Reveal the next page of crops, capped at the total count.
    ///
    /// Never lowers the cursor, even when fewer crops exist than the
    /// initial page.
    pub fn show_more(&mut self) {
        let grown = (self.visible_limit + CROPS_PAGE_SIZE).min(self.crops.len());
        self.visible_limit = self.visible_limit.max(grown);
    }

    /// Drop every crop and restore the initial cursor.
    pub fn reset(&mut self) {
        self.crops.clear();
        self.visible_limit = INITIAL_VISIBLE_CROPS;
    }

    /// Number of crops currently shown. Always `<= len()`.
    pub fn visible_count(&self) -> usize {
        self.visible_limit.min(self.crops.len())
    }

    /// Crops not yet revealed.
    pub fn hidden_count(&self) -> usize {
        self.crops.len() - self.visible_count()
    }

    /// The shown slice, newest first.
    pub fn visible(&self) -> impl Iterator<Item = &str> {
        self.crops
            .iter()
            .take(self.visible_count())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.crops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crops.is_empty()
    }
}
