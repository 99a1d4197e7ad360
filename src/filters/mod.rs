pub mod combination;
pub mod crop;
pub mod grabcut;
pub mod grayscale;
pub mod segmentation;

use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;

pub type ImageId = i32;

pub const INVALID_IMAGE_ID: ImageId = -1;

/// Axis aligned pixel rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ImageRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One stage of an image pipeline. Stages mutate the frame in place and
/// answer false when the buffer should not be trusted anymore.
pub trait ImageFilter: Send {
    fn on_filter_image(&mut self, image: &mut DynamicImage) -> bool;

    fn set_current_image_id(&mut self, id: ImageId);
    fn current_image_id(&self) -> ImageId;

    /// Stamps the frame id, then runs the filter.
    fn filter_image(&mut self, image: &mut DynamicImage, id: ImageId) -> bool {
        if id < INVALID_IMAGE_ID {
            self.set_current_image_id(INVALID_IMAGE_ID);
        } else {
            self.set_current_image_id(id);
        }
        self.on_filter_image(image)
    }
}

pub type SharedImageFilter = Arc<Mutex<dyn ImageFilter>>;

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopFilter {
        current_image_id: ImageId,
    }

    impl ImageFilter for NoopFilter {
        fn on_filter_image(&mut self, _image: &mut DynamicImage) -> bool {
            true
        }
        fn set_current_image_id(&mut self, id: ImageId) {
            self.current_image_id = id;
        }
        fn current_image_id(&self) -> ImageId {
            self.current_image_id
        }
    }

    #[test]
    fn ids_below_the_sentinel_are_replaced_by_it() {
        let mut filter = NoopFilter {
            current_image_id: INVALID_IMAGE_ID,
        };
        let mut image = DynamicImage::new_rgb8(2, 2);

        assert!(filter.filter_image(&mut image, 7));
        assert_eq!(filter.current_image_id(), 7);

        assert!(filter.filter_image(&mut image, -42));
        assert_eq!(filter.current_image_id(), INVALID_IMAGE_ID);
    }
}
