use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use image::GrayImage;
use image::Luma;
use image::Rgb;
use image::RgbImage;

pub const LABEL_BACKGROUND: u8 = 0;
pub const LABEL_FOREGROUND: u8 = 1;
pub const LABEL_PROBABLY_BACKGROUND: u8 = 2;
pub const LABEL_PROBABLY_FOREGROUND: u8 = 3;

/// Mixture size of the foreground and background color models.
pub const MODEL_COMPONENT_COUNT: usize = 5;

const KMEANS_SWEEPS: usize = 8;
const REFINEMENT_SWEEPS: usize = 2;
const SMOOTHNESS_WEIGHT: f64 = 2.0;
const VARIANCE_FLOOR: f64 = 0.5;

pub fn is_foreground_label(label: u8) -> bool {
    label == LABEL_FOREGROUND || label == LABEL_PROBABLY_FOREGROUND
}

#[derive(Debug, Clone, Copy, Default)]
struct GaussianComponent {
    weight: f64,
    mean: [f64; 3],
    variance: [f64; 3],
}

/// Diagonal covariance Gaussian mixture over RGB colors.
struct ColorModel {
    components: Vec<GaussianComponent>,
}

impl ColorModel {
    /// Fits via k-means with deterministic luminance quantile seeding, so
    /// equal inputs always produce equal models.
    fn fit(samples: &[[f64; 3]]) -> Self {
        if samples.is_empty() {
            return Self { components: vec![] };
        }
        let component_count = MODEL_COMPONENT_COUNT.min(samples.len());

        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.sort_by(|a, b| luminance(&samples[*a]).total_cmp(&luminance(&samples[*b])));
        let mut means: Vec<[f64; 3]> = (0..component_count)
            .map(|k| samples[order[(2 * k + 1) * samples.len() / (2 * component_count)]])
            .collect();

        let mut assignment = vec![0usize; samples.len()];
        for _ in 0..KMEANS_SWEEPS {
            for (index, sample) in samples.iter().enumerate() {
                assignment[index] = nearest_mean(sample, &means);
            }
            let mut sums = vec![[0.0f64; 3]; component_count];
            let mut counts = vec![0usize; component_count];
            for (index, sample) in samples.iter().enumerate() {
                let k = assignment[index];
                counts[k] += 1;
                for channel in 0..3 {
                    sums[k][channel] += sample[channel];
                }
            }
            for k in 0..component_count {
                // an empty cluster keeps its previous center
                if counts[k] > 0 {
                    for channel in 0..3 {
                        means[k][channel] = sums[k][channel] / counts[k] as f64;
                    }
                }
            }
        }

        for (index, sample) in samples.iter().enumerate() {
            assignment[index] = nearest_mean(sample, &means);
        }
        let mut components = vec![GaussianComponent::default(); component_count];
        let mut counts = vec![0usize; component_count];
        for (index, sample) in samples.iter().enumerate() {
            let k = assignment[index];
            counts[k] += 1;
            for channel in 0..3 {
                components[k].mean[channel] += sample[channel];
            }
        }
        for k in 0..component_count {
            if counts[k] == 0 {
                continue;
            }
            for channel in 0..3 {
                components[k].mean[channel] /= counts[k] as f64;
            }
        }
        for (index, sample) in samples.iter().enumerate() {
            let k = assignment[index];
            for channel in 0..3 {
                let difference = sample[channel] - components[k].mean[channel];
                components[k].variance[channel] += difference * difference;
            }
        }
        for k in 0..component_count {
            if counts[k] == 0 {
                continue;
            }
            components[k].weight = counts[k] as f64 / samples.len() as f64;
            for channel in 0..3 {
                components[k].variance[channel] =
                    (components[k].variance[channel] / counts[k] as f64).max(VARIANCE_FLOOR);
            }
        }
        components.retain(|component| component.weight > 0.0);
        Self { components }
    }

    fn log_likelihood(&self, color: &[f64; 3]) -> f64 {
        let mut density = 0.0;
        for component in &self.components {
            let mut exponent = 0.0;
            let mut normalization = 1.0;
            for channel in 0..3 {
                let difference = color[channel] - component.mean[channel];
                exponent += difference * difference / component.variance[channel];
                normalization *= component.variance[channel];
            }
            density += component.weight * (-0.5 * exponent).exp()
                / ((2.0 * std::f64::consts::PI).powi(3) * normalization).sqrt();
        }
        density.max(f64::MIN_POSITIVE).ln()
    }
}

fn luminance(color: &[f64; 3]) -> f64 {
    0.299 * color[0] + 0.587 * color[1] + 0.114 * color[2]
}

fn nearest_mean(sample: &[f64; 3], means: &[[f64; 3]]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (k, mean) in means.iter().enumerate() {
        let mut distance = 0.0;
        for channel in 0..3 {
            let difference = sample[channel] - mean[channel];
            distance += difference * difference;
        }
        if distance < best_distance {
            best_distance = distance;
            best = k;
        }
    }
    best
}

fn color_of(pixel: &Rgb<u8>) -> [f64; 3] {
    [
        f64::from(pixel[0]),
        f64::from(pixel[1]),
        f64::from(pixel[2]),
    ]
}

/// One refinement iteration over the label mask: fit color models for both
/// sides, reclassify the probable pixels by likelihood, then smooth with a
/// few neighborhood sweeps. Hard seed labels are never changed.
///
/// Returns false when the stop flag was raised, the mask is then unusable.
pub fn refine_labels(image: &RgbImage, labels: &mut GrayImage, stop: &AtomicBool) -> bool {
    let width = image.width();
    let height = image.height();

    let mut foreground_samples = vec![];
    let mut background_samples = vec![];
    for (x, y, pixel) in image.enumerate_pixels() {
        if is_foreground_label(labels.get_pixel(x, y)[0]) {
            foreground_samples.push(color_of(pixel));
        } else {
            background_samples.push(color_of(pixel));
        }
    }
    if foreground_samples.is_empty() || background_samples.is_empty() {
        return !stop.load(Ordering::SeqCst);
    }

    if stop.load(Ordering::SeqCst) {
        return false;
    }
    let foreground_model = ColorModel::fit(&foreground_samples);
    if stop.load(Ordering::SeqCst) {
        return false;
    }
    let background_model = ColorModel::fit(&background_samples);
    if stop.load(Ordering::SeqCst) {
        return false;
    }

    // the models stay fixed from here on, so the likelihoods can too
    let mut advantage = vec![0.0f64; (width * height) as usize];
    for (x, y, pixel) in image.enumerate_pixels() {
        let color = color_of(pixel);
        advantage[(y * width + x) as usize] =
            foreground_model.log_likelihood(&color) - background_model.log_likelihood(&color);
    }
    if stop.load(Ordering::SeqCst) {
        return false;
    }

    for y in 0..height {
        for x in 0..width {
            let label = labels.get_pixel(x, y)[0];
            if label != LABEL_PROBABLY_BACKGROUND && label != LABEL_PROBABLY_FOREGROUND {
                continue;
            }
            let new_label = if advantage[(y * width + x) as usize] > 0.0 {
                LABEL_PROBABLY_FOREGROUND
            } else {
                LABEL_PROBABLY_BACKGROUND
            };
            labels.put_pixel(x, y, Luma([new_label]));
        }
    }

    for _ in 0..REFINEMENT_SWEEPS {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        for y in 0..height {
            for x in 0..width {
                let label = labels.get_pixel(x, y)[0];
                if label != LABEL_PROBABLY_BACKGROUND && label != LABEL_PROBABLY_FOREGROUND {
                    continue;
                }
                let mut disagreement = 0.0;
                for (neighbor_x, neighbor_y) in neighbors(x, y, width, height) {
                    if is_foreground_label(labels.get_pixel(neighbor_x, neighbor_y)[0]) {
                        disagreement += 1.0;
                    } else {
                        disagreement -= 1.0;
                    }
                }
                let score =
                    advantage[(y * width + x) as usize] + SMOOTHNESS_WEIGHT * disagreement;
                let new_label = if score > 0.0 {
                    LABEL_PROBABLY_FOREGROUND
                } else {
                    LABEL_PROBABLY_BACKGROUND
                };
                labels.put_pixel(x, y, Luma([new_label]));
            }
        }
    }
    true
}

fn neighbors(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let mut list = Vec::with_capacity(4);
    if x > 0 {
        list.push((x - 1, y));
    }
    if y > 0 {
        list.push((x, y - 1));
    }
    if x + 1 < width {
        list.push((x + 1, y));
    }
    if y + 1 < height {
        list.push((x, y + 1));
    }
    list.into_iter()
}
