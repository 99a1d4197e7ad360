use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use image::imageops;
use image::DynamicImage;
use image::GrayImage;
use image::Luma;
use image::RgbImage;
use imageproc::contours::find_contours;
use imageproc::contours::BorderType;
use imageproc::region_labelling::connected_components;
use imageproc::region_labelling::Connectivity;
use log::warn;
use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::filters::segmentation;
use crate::filters::segmentation::MODEL_COMPONENT_COUNT;
use crate::filters::ImageFilter;
use crate::filters::ImageId;
use crate::filters::ImageRegion;
use crate::filters::INVALID_IMAGE_ID;

struct InputState {
    image: Option<RgbImage>,
    image_id: ImageId,
    fresh: bool,
}

struct SeedState {
    foreground: Vec<(u32, u32)>,
    background: Vec<(u32, u32)>,
    dilation_size: u32,
    region_padding: Option<u32>,
}

struct ResultState {
    mask: Option<GrayImage>,
    image_id: ImageId,
    region: Option<ImageRegion>,
}

// Input, seeds and result are guarded separately and never locked together.
// The condition variable pairs with the input mutex.
struct WorkerShared {
    input: Mutex<InputState>,
    seeds: Mutex<SeedState>,
    result: Mutex<ResultState>,
    wake: Condvar,
    stop: AtomicBool,
}

/// Interactive foreground segmentation running on a background worker.
///
/// Frames go in through the filter interface and never block the caller. The
/// worker always segments the most recently submitted frame, intermediate
/// frames are dropped while it is busy. Results are polled through
/// `result_image_id` and `result_mask`.
pub struct GrabCutImageFilter {
    current_image_id: ImageId,
    shared: Arc<WorkerShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl GrabCutImageFilter {
    pub fn new() -> Self {
        let shared = Arc::new(WorkerShared {
            input: Mutex::new(InputState {
                image: None,
                image_id: INVALID_IMAGE_ID,
                fresh: false,
            }),
            seeds: Mutex::new(SeedState {
                foreground: vec![],
                background: vec![],
                dilation_size: 0,
                region_padding: None,
            }),
            result: Mutex::new(ResultState {
                mask: None,
                image_id: INVALID_IMAGE_ID,
                region: None,
            }),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || segmentation_worker(worker_shared));
        Self {
            current_image_id: INVALID_IMAGE_ID,
            shared,
            worker: Some(worker),
        }
    }

    /// Replaces the foreground seed points, background points are kept.
    pub fn set_model_points(&mut self, foreground: Vec<(u32, u32)>) {
        self.shared.seeds.lock().foreground = foreground;
    }

    pub fn set_model_points_with_background(
        &mut self,
        foreground: Vec<(u32, u32)>,
        background: Vec<(u32, u32)>,
    ) {
        let mut seeds = self.shared.seeds.lock();
        seeds.foreground = foreground;
        seeds.background = background;
    }

    /// Every seed pixel marks a square of side `2 * dilation_size + 1`.
    pub fn set_model_points_dilation_size(&mut self, dilation_size: u32) {
        self.shared.seeds.lock().dilation_size = dilation_size;
    }

    /// Restricts segmentation to the bounding box of the seed points, grown
    /// by `additional_width` pixels on each side.
    pub fn set_use_only_region_around_model_points(&mut self, additional_width: u32) {
        self.shared.seeds.lock().region_padding = Some(additional_width);
    }

    pub fn set_use_full_image(&mut self) {
        self.shared.seeds.lock().region_padding = None;
    }

    /// Region the most recent segmentation worked on, if it was restricted.
    pub fn region_around_model_points(&self) -> Option<ImageRegion> {
        self.shared.result.lock().region
    }

    /// Id of the frame the current result was computed from. Polling this is
    /// the way to detect a newly finished segmentation.
    pub fn result_image_id(&self) -> ImageId {
        self.shared.result.lock().image_id
    }

    /// Latest completed segmentation, foreground pixels are white.
    pub fn result_mask(&self) -> Option<GrayImage> {
        self.shared.result.lock().mask.clone()
    }

    /// Boundary of the mask component containing the given pixel. Empty when
    /// the pixel is outside the image or not part of the segmentation.
    pub fn result_contour_with_pixel(&self, x: u32, y: u32) -> Vec<(u32, u32)> {
        let Some(mask) = self.result_mask() else {
            return vec![];
        };
        component_contour(&mask, x, y)
    }
}

impl Default for GrabCutImageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageFilter for GrabCutImageFilter {
    fn on_filter_image(&mut self, image: &mut DynamicImage) -> bool {
        // segmentation works on three channel color frames
        if !matches!(image, DynamicImage::ImageRgb8(_)) {
            *image = DynamicImage::ImageRgb8(image.to_rgb8());
        }
        let frame = image.to_rgb8();
        {
            let mut input = self.shared.input.lock();
            input.image = Some(frame);
            input.image_id = self.current_image_id;
            input.fresh = true;
        }
        // the worker only has work to do once foreground seeds exist
        let have_foreground_points = !self.shared.seeds.lock().foreground.is_empty();
        if have_foreground_points {
            self.shared.wake.notify_one();
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

impl Drop for GrabCutImageFilter {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("segmentation worker panicked");
            }
        }
    }
}

fn segmentation_worker(shared: Arc<WorkerShared>) {
    loop {
        let (frame, frame_id) = {
            let mut input = shared.input.lock();
            while !input.fresh && !shared.stop.load(Ordering::SeqCst) {
                shared.wake.wait(&mut input);
            }
            if shared.stop.load(Ordering::SeqCst) {
                return;
            }
            input.fresh = false;
            match input.image.clone() {
                Some(image) => (image, input.image_id),
                None => continue,
            }
        };

        let (seed_mask, region_padding) = {
            let seeds = shared.seeds.lock();
            (
                build_seed_mask(frame.width(), frame.height(), &seeds),
                seeds.region_padding,
            )
        };

        let Some((mask, region)) = segment_frame(&frame, &seed_mask, region_padding, &shared.stop)
        else {
            // stopped mid segmentation, the partial result is discarded
            return;
        };

        let mut result = shared.result.lock();
        result.mask = Some(mask);
        result.image_id = frame_id;
        result.region = region;
    }
}

fn segment_frame(
    frame: &RgbImage,
    seed_mask: &GrayImage,
    region_padding: Option<u32>,
    stop: &AtomicBool,
) -> Option<(GrayImage, Option<ImageRegion>)> {
    match region_padding {
        Some(padding) => {
            let region = region_around_seeds(seed_mask, padding);
            let frame_crop =
                imageops::crop_imm(frame, region.x, region.y, region.width, region.height)
                    .to_image();
            let mask_crop =
                imageops::crop_imm(seed_mask, region.x, region.y, region.width, region.height)
                    .to_image();
            let segmented = run_segmentation(&frame_crop, mask_crop, stop)?;
            let mut mask = GrayImage::new(frame.width(), frame.height());
            imageops::replace(&mut mask, &segmented, i64::from(region.x), i64::from(region.y));
            Some((mask, Some(region)))
        }
        None => {
            let mask = run_segmentation(frame, seed_mask.clone(), stop)?;
            Some((mask, None))
        }
    }
}

fn run_segmentation(
    frame: &RgbImage,
    mut labels: GrayImage,
    stop: &AtomicBool,
) -> Option<GrayImage> {
    let mut foreground_seeds = 0usize;
    let mut probable_background = 0usize;
    for pixel in labels.pixels() {
        match pixel[0] {
            segmentation::LABEL_FOREGROUND => foreground_seeds += 1,
            segmentation::LABEL_PROBABLY_BACKGROUND => probable_background += 1,
            _ => {}
        }
    }
    // the color models cannot be estimated from fewer samples than components
    if foreground_seeds < MODEL_COMPONENT_COUNT || probable_background < MODEL_COMPONENT_COUNT {
        return Some(GrayImage::new(labels.width(), labels.height()));
    }

    if !segmentation::refine_labels(frame, &mut labels, stop) {
        return None;
    }

    let mut mask = GrayImage::new(labels.width(), labels.height());
    for (x, y, pixel) in labels.enumerate_pixels() {
        if segmentation::is_foreground_label(pixel[0]) {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    Some(mask)
}

fn build_seed_mask(width: u32, height: u32, seeds: &SeedState) -> GrayImage {
    let mut mask =
        GrayImage::from_pixel(width, height, Luma([segmentation::LABEL_PROBABLY_BACKGROUND]));
    for point in &seeds.foreground {
        mark_seed(
            &mut mask,
            *point,
            segmentation::LABEL_FOREGROUND,
            seeds.dilation_size,
        );
    }
    for point in &seeds.background {
        mark_seed(
            &mut mask,
            *point,
            segmentation::LABEL_BACKGROUND,
            seeds.dilation_size,
        );
    }
    mask
}

fn mark_seed(mask: &mut GrayImage, point: (u32, u32), label: u8, dilation_size: u32) {
    if mask.width() == 0 || mask.height() == 0 {
        return;
    }
    let x_min = point.0.saturating_sub(dilation_size);
    let y_min = point.1.saturating_sub(dilation_size);
    let x_max = point.0.saturating_add(dilation_size).min(mask.width() - 1);
    let y_max = point.1.saturating_add(dilation_size).min(mask.height() - 1);
    for y in y_min..=y_max {
        for x in x_min..=x_max {
            mask.put_pixel(x, y, Luma([label]));
        }
    }
}

/// Bounding box of all seed pixels, grown by `padding` on each side. Padding
/// that would leave the image is dropped on that side only.
fn region_around_seeds(seed_mask: &GrayImage, padding: u32) -> ImageRegion {
    let mut x_min = u32::MAX;
    let mut y_min = u32::MAX;
    let mut x_max = 0u32;
    let mut y_max = 0u32;
    let mut found = false;
    for (x, y, pixel) in seed_mask.enumerate_pixels() {
        if pixel[0] == segmentation::LABEL_PROBABLY_BACKGROUND {
            continue;
        }
        found = true;
        x_min = x_min.min(x);
        y_min = y_min.min(y);
        x_max = x_max.max(x);
        y_max = y_max.max(y);
    }
    if !found {
        warn!("no seed points in the mask, using the full image as working region");
        return ImageRegion::new(0, 0, seed_mask.width(), seed_mask.height());
    }
    let x = x_min.saturating_sub(padding);
    let y = y_min.saturating_sub(padding);
    let right = x_max.saturating_add(padding).min(seed_mask.width() - 1);
    let bottom = y_max.saturating_add(padding).min(seed_mask.height() - 1);
    ImageRegion::new(x, y, right - x + 1, bottom - y + 1)
}

fn component_contour(mask: &GrayImage, x: u32, y: u32) -> Vec<(u32, u32)> {
    if x >= mask.width() || y >= mask.height() {
        warn!(
            "pixel ({x}, {y}) is outside the {}x{} mask",
            mask.width(),
            mask.height()
        );
        return vec![];
    }
    if mask.get_pixel(x, y)[0] == 0 {
        return vec![];
    }
    let components = connected_components(mask, Connectivity::Four, Luma([0u8]));
    let component = components.get_pixel(x, y)[0];
    let mut component_mask = GrayImage::new(mask.width(), mask.height());
    for (pixel_x, pixel_y, pixel) in components.enumerate_pixels() {
        if pixel[0] == component {
            component_mask.put_pixel(pixel_x, pixel_y, Luma([255]));
        }
    }
    find_contours::<i32>(&component_mask)
        .into_iter()
        .find(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| {
            contour
                .points
                .into_iter()
                .map(|point| (point.x as u32, point.y as u32))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Duration;
    use std::time::Instant;

    fn two_tone_frame(width: u32, height: u32) -> RgbImage {
        let mut frame = RgbImage::new(width, height);
        for (x, _y, pixel) in frame.enumerate_pixels_mut() {
            *pixel = if x < width / 2 {
                Rgb([200, 30, 30])
            } else {
                Rgb([20, 40, 210])
            };
        }
        frame
    }

    fn wait_for_result(filter: &GrabCutImageFilter, expected_id: ImageId) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut last_seen = INVALID_IMAGE_ID;
        loop {
            let result_id = filter.result_image_id();
            assert!(result_id >= last_seen);
            last_seen = result_id;
            if result_id == expected_id {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "segmentation did not finish in time"
            );
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn too_few_seed_pixels_yield_an_all_zero_mask() {
        let frame = two_tone_frame(10, 10);
        let mut labels =
            GrayImage::from_pixel(10, 10, Luma([segmentation::LABEL_PROBABLY_BACKGROUND]));
        for x in 0..3 {
            labels.put_pixel(x, 0, Luma([segmentation::LABEL_FOREGROUND]));
        }
        let stop = AtomicBool::new(false);

        let mask = run_segmentation(&frame, labels, &stop).unwrap();
        assert_eq!(mask.dimensions(), (10, 10));
        assert!(mask.pixels().all(|pixel| pixel[0] == 0));
    }

    #[test]
    fn frames_without_seed_points_never_wake_the_worker() {
        let mut filter = GrabCutImageFilter::new();
        let mut image = DynamicImage::ImageRgb8(two_tone_frame(16, 16));
        for id in 1..=5 {
            assert!(filter.filter_image(&mut image, id));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(filter.result_image_id(), INVALID_IMAGE_ID);
        assert!(filter.result_mask().is_none());
    }

    #[test]
    fn the_result_converges_on_the_latest_frame() {
        let mut filter = GrabCutImageFilter::new();
        filter.set_model_points_dilation_size(2);
        filter.set_model_points_with_background(vec![(4, 8)], vec![(12, 8)]);

        let mut image = DynamicImage::ImageRgb8(two_tone_frame(16, 16));
        for id in 1..=5 {
            assert!(filter.filter_image(&mut image, id));
        }
        wait_for_result(&filter, 5);

        let mask = filter.result_mask().unwrap();
        assert_eq!(mask.dimensions(), (16, 16));
        assert_eq!(mask.get_pixel(4, 8)[0], 255);
        assert_eq!(mask.get_pixel(13, 8)[0], 0);

        assert!(!filter.result_contour_with_pixel(4, 8).is_empty());
        assert!(filter.result_contour_with_pixel(13, 8).is_empty());
    }

    #[test]
    fn replacing_the_foreground_points_keeps_the_background_points() {
        let mut filter = GrabCutImageFilter::new();
        filter.set_model_points_with_background(vec![(1, 1)], vec![(2, 2)]);
        filter.set_model_points(vec![(3, 3)]);
        filter.set_use_only_region_around_model_points(5);
        {
            let seeds = filter.shared.seeds.lock();
            assert_eq!(seeds.foreground, vec![(3, 3)]);
            assert_eq!(seeds.background, vec![(2, 2)]);
            assert_eq!(seeds.region_padding, Some(5));
        }

        filter.set_use_full_image();
        assert_eq!(filter.shared.seeds.lock().region_padding, None);
    }

    #[test]
    fn region_restriction_reports_the_used_region() {
        let mut filter = GrabCutImageFilter::new();
        filter.set_model_points_dilation_size(2);
        filter.set_use_only_region_around_model_points(4);
        filter.set_model_points_with_background(vec![(4, 8)], vec![(12, 8)]);

        let mut image = DynamicImage::ImageRgb8(two_tone_frame(16, 16));
        assert!(filter.filter_image(&mut image, 1));
        wait_for_result(&filter, 1);

        assert_eq!(
            filter.region_around_model_points(),
            Some(ImageRegion::new(0, 2, 16, 13))
        );
        let mask = filter.result_mask().unwrap();
        assert_eq!(mask.dimensions(), (16, 16));
        // pixels outside the working region stay background
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(4, 8)[0], 255);
    }

    #[test]
    fn the_working_region_is_clamped_to_the_image() {
        let mut mask =
            GrayImage::from_pixel(32, 32, Luma([segmentation::LABEL_PROBABLY_BACKGROUND]));
        mark_seed(&mut mask, (30, 16), segmentation::LABEL_FOREGROUND, 2);

        let region = region_around_seeds(&mask, 10);
        assert_eq!(region, ImageRegion::new(18, 4, 14, 25));
        assert_eq!(region.x + region.width, 32);
    }

    #[test]
    fn seed_squares_are_clipped_at_the_image_border() {
        let mut mask =
            GrayImage::from_pixel(8, 8, Luma([segmentation::LABEL_PROBABLY_BACKGROUND]));
        mark_seed(&mut mask, (0, 0), segmentation::LABEL_FOREGROUND, 2);

        let marked = mask
            .pixels()
            .filter(|pixel| pixel[0] == segmentation::LABEL_FOREGROUND)
            .count();
        assert_eq!(marked, 9);
    }

    #[test]
    fn the_contour_of_the_clicked_component_is_extracted() {
        let mut mask = GrayImage::new(12, 12);
        for y in 3..7 {
            for x in 2..6 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask.put_pixel(10, 10, Luma([255]));

        let contour = component_contour(&mask, 3, 4);
        assert!(!contour.is_empty());
        assert!(contour.contains(&(2, 3)));
        assert!(contour.contains(&(5, 6)));
        assert!(!contour.contains(&(10, 10)));

        assert!(component_contour(&mask, 0, 0).is_empty());
        assert!(component_contour(&mask, 40, 4).is_empty());
    }

    #[test]
    fn segmentation_is_deterministic() {
        let frame = two_tone_frame(20, 20);
        let seeds = SeedState {
            foreground: vec![(4, 10)],
            background: vec![(16, 10)],
            dilation_size: 2,
            region_padding: None,
        };
        let seed_mask = build_seed_mask(20, 20, &seeds);
        let stop = AtomicBool::new(false);

        let first = run_segmentation(&frame, seed_mask.clone(), &stop).unwrap();
        let second = run_segmentation(&frame, seed_mask, &stop).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn dropping_the_filter_stops_the_worker() {
        let mut filter = GrabCutImageFilter::new();
        filter.set_model_points_dilation_size(2);
        filter.set_model_points_with_background(vec![(20, 20)], vec![(100, 100)]);
        let mut image = DynamicImage::ImageRgb8(two_tone_frame(128, 128));
        assert!(filter.filter_image(&mut image, 1));
        drop(filter);
    }
}
