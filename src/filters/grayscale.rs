use image::DynamicImage;

use crate::filters::ImageFilter;
use crate::filters::ImageId;
use crate::filters::INVALID_IMAGE_ID;

/// Converts frames to single channel grayscale.
pub struct ConvertGrayscaleImageFilter {
    current_image_id: ImageId,
}

impl ConvertGrayscaleImageFilter {
    pub fn new() -> Self {
        Self {
            current_image_id: INVALID_IMAGE_ID,
        }
    }
}

impl Default for ConvertGrayscaleImageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFilter for ConvertGrayscaleImageFilter {
    fn on_filter_image(&mut self, image: &mut DynamicImage) -> bool {
        // nothing to do if the image is grayscale already
        if matches!(image, DynamicImage::ImageLuma8(_)) {
            return true;
        }
        *image = DynamicImage::ImageLuma8(image.to_luma8());
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

    #[test]
    fn color_frames_become_single_channel() {
        let mut rgb = RgbImage::new(4, 4);
        rgb.put_pixel(1, 1, Rgb([200, 40, 40]));
        let mut image = DynamicImage::ImageRgb8(rgb);

        let mut filter = ConvertGrayscaleImageFilter::new();
        assert!(filter.on_filter_image(&mut image));
        assert!(matches!(image, DynamicImage::ImageLuma8(_)));
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 4);
    }

    #[test]
    fn grayscale_frames_pass_through_untouched() {
        let mut image = DynamicImage::new_luma8(4, 4);
        let before = image.clone();

        let mut filter = ConvertGrayscaleImageFilter::new();
        assert!(filter.on_filter_image(&mut image));
        assert_eq!(image.as_bytes(), before.as_bytes());
    }
}
