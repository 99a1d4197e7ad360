use image::DynamicImage;
use log::error;

use crate::filters::ImageFilter;
use crate::filters::ImageId;
use crate::filters::ImageRegion;
use crate::filters::INVALID_IMAGE_ID;

/// Crops frames to a fixed region of interest.
pub struct CropImageFilter {
    current_image_id: ImageId,
    crop_region: Option<ImageRegion>,
}

impl Default for CropImageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CropImageFilter {
    pub fn new() -> Self {
        Self {
            current_image_id: INVALID_IMAGE_ID,
            crop_region: None,
        }
    }

    pub fn set_crop_region(&mut self, region: ImageRegion) {
        self.crop_region = Some(region);
    }

    pub fn crop_region(&self) -> Option<ImageRegion> {
        self.crop_region
    }
}

impl ImageFilter for CropImageFilter {
    fn on_filter_image(&mut self, image: &mut DynamicImage) -> bool {
        let Some(mut region) = self.crop_region else {
            error!("cropping cannot be done without setting a crop region first");
            return false;
        };
        // a region starting outside the image cannot be cropped
        if region.x >= image.width() || region.y >= image.height() {
            return false;
        }
        if region.x + region.width > image.width() {
            region.width = image.width() - region.x;
        }
        if region.y + region.height > image.height() {
            region.height = image.height() - region.y;
        }
        if region.is_empty() {
            return false;
        }
        *image = image.crop_imm(region.x, region.y, region.width, region.height);
        true
    }

    fn set_current_image_id(&mut self, id: ImageId) {
        self.current_image_id = id;
    }

    fn current_image_id(&self) -> ImageId {
        self.current_image_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use image::RgbImage;

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let mut rgb = RgbImage::new(width, height);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            *pixel = Rgb([x as u8, y as u8, (x + y) as u8]);
        }
        DynamicImage::ImageRgb8(rgb)
    }

    #[test]
    fn a_full_image_region_leaves_the_image_identical() {
        let mut image = gradient_image(16, 12);
        let before = image.clone();

        let mut filter = CropImageFilter::new();
        filter.set_crop_region(ImageRegion::new(0, 0, 16, 12));
        assert!(filter.on_filter_image(&mut image));
        assert_eq!(image.as_bytes(), before.as_bytes());
    }

    #[test]
    fn the_region_is_clamped_to_the_image_bounds() {
        let mut image = gradient_image(16, 12);

        let mut filter = CropImageFilter::new();
        filter.set_crop_region(ImageRegion::new(10, 8, 100, 100));
        assert!(filter.on_filter_image(&mut image));
        assert_eq!(image.width(), 6);
        assert_eq!(image.height(), 4);
    }

    #[test]
    fn an_unset_region_fails_the_filter() {
        let mut image = gradient_image(16, 12);
        let mut filter = CropImageFilter::new();
        assert!(!filter.on_filter_image(&mut image));
    }

    #[test]
    fn a_region_outside_the_image_fails_the_filter() {
        let mut image = gradient_image(16, 12);
        let mut filter = CropImageFilter::new();
        filter.set_crop_region(ImageRegion::new(16, 0, 4, 4));
        assert!(!filter.on_filter_image(&mut image));
    }
}
