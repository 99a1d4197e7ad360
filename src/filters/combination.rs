use std::sync::Arc;

use image::DynamicImage;
use log::warn;

use crate::filters::ImageFilter;
use crate::filters::ImageId;
use crate::filters::SharedImageFilter;
use crate::filters::INVALID_IMAGE_ID;

/// Applies a list of filters in insertion order. The chain short-circuits on
/// the first failing filter, the frame keeps the changes made up to there.
pub struct BasicCombinationImageFilter {
    current_image_id: ImageId,
    filters: Vec<SharedImageFilter>,
}

impl Default for BasicCombinationImageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicCombinationImageFilter {
    pub fn new() -> Self {
        Self {
            current_image_id: INVALID_IMAGE_ID,
            filters: vec![],
        }
    }

    pub fn push_filter(&mut self, filter: SharedImageFilter) {
        self.filters.push(filter);
    }

    pub fn pop_filter(&mut self) -> Option<SharedImageFilter> {
        self.filters.pop()
    }

    /// Removes the filter if it is on the list. Filters are compared by
    /// identity, not by value.
    pub fn remove_filter(&mut self, filter: &SharedImageFilter) -> bool {
        let count_before = self.filters.len();
        self.filters.retain(|other| !Arc::ptr_eq(other, filter));
        self.filters.len() != count_before
    }

    pub fn is_filter_on_the_list(&self, filter: &SharedImageFilter) -> bool {
        self.filters.iter().any(|other| Arc::ptr_eq(other, filter))
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

impl ImageFilter for BasicCombinationImageFilter {
    fn on_filter_image(&mut self, image: &mut DynamicImage) -> bool {
        let image_id = self.current_image_id;
        for (index, filter) in self.filters.iter().enumerate() {
            if !filter.lock().filter_image(image, image_id) {
                warn!("filter {index} failed, stopping the filter chain");
                return false;
            }
        }
        true
    }

    fn set_current_image_id(&mut self, id: ImageId) {
        self.current_image_id = id;
    }

    fn current_image_id(&self) -> ImageId {
        self.current_image_id
    }
}
