//! Tracks which in-flight fence last rendered into each swapchain image.
//!
//! When the swapchain has more images than there are frame slots, the
//! presentation engine can hand back an image that a different slot is still
//! rendering into. Before recording into such an image the scheduler waits on
//! the fence stored here.

use ash::vk;

/// Mapping from swapchain image index to the fence of the slot that last
/// submitted work targeting it.
#[derive(Debug, Clone, Default)]
pub struct ImageFenceTable {
    fences: Vec<Option<vk::Fence>>,
}

impl ImageFenceTable {
    /// Creates a table with no recorded fences for `image_count` images.
    pub fn new(image_count: usize) -> Self {
        Self {
            fences: vec![None; image_count],
        }
    }

    /// Forgets every recorded fence and resizes the table.
    ///
    /// Called after swapchain recreation, once the device is idle.
    pub fn reset(&mut self, image_count: usize) {
        self.fences.clear();
        self.fences.resize(image_count, None);
    }

    /// Returns the fence recorded for `image_index`, if any.
    #[inline]
    pub fn get(&self, image_index: u32) -> Option<vk::Fence> {
        self.fences.get(image_index as usize).copied().flatten()
    }

    /// Records `fence` as the one guarding `image_index`.
    ///
    /// Grows the table when the index is past its end.
    pub fn assign(&mut self, image_index: u32, fence: vk::Fence) {
        let index = image_index as usize;
        if index >= self.fences.len() {
            self.fences.resize(index + 1, None);
        }
        self.fences[index] = Some(fence);
    }

    /// Number of image entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// Returns `true` if the table tracks no images.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}
