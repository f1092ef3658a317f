//! Response filters applied to the image ahead of feature extraction.
//!
//! [`FilterKind`] selects a kernel; [`FilterKind::apply`] runs it and
//! returns a [`FilterResponse`] that always carries the response volume
//! and, when the input had restricted validity, the validity mask the
//! response is defined on. Collaborating kernels may or may not track
//! validity, so the response type normalizes both shapes for the engine.
//!
//! All kernels are separable and run axis by axis. Voxels flagged
//! invalid (for example sentinel padding outside the scanned field of
//! view) are excluded from filtering: before each pass they take the
//! nearest valid intensity along the axis being convolved, so they never
//! leak placeholder values into the response.

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::volume::VolumeGeometry;

/// One-dimensional Laws texture kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Laws1d {
    /// Level (local average).
    L5,
    /// Edge.
    E5,
    /// Spot.
    S5,
    /// Wave.
    W5,
    /// Ripple.
    R5,
}

impl Laws1d {
    /// Kernel coefficients.
    #[must_use]
    pub const fn coefficients(self) -> [f64; 5] {
        match self {
            Self::L5 => [1.0, 4.0, 6.0, 4.0, 1.0],
            Self::E5 => [-1.0, -2.0, 0.0, 2.0, 1.0],
            Self::S5 => [-1.0, 0.0, 2.0, 0.0, -1.0],
            Self::W5 => [-1.0, 2.0, 0.0, -2.0, 1.0],
            Self::R5 => [1.0, -4.0, 6.0, -4.0, 1.0],
        }
    }

    /// Lowercase tag matching the serialized form.
    #[must_use]
    pub const fn serde_tag(self) -> &'static str {
        match self {
            Self::L5 => "l5",
            Self::E5 => "e5",
            Self::S5 => "s5",
            Self::W5 => "w5",
            Self::R5 => "r5",
        }
    }

    const fn tag(self) -> &'static str {
        match self {
            Self::L5 => "L5",
            Self::E5 => "E5",
            Self::S5 => "S5",
            Self::W5 => "W5",
            Self::R5 => "R5",
        }
    }
}

/// A 3-D Laws kernel as the outer product of three 1-D kernels, one per
/// array axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawsKernel(pub [Laws1d; 3]);

impl std::fmt::Display for LawsKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.0[0].tag(), self.0[1].tag(), self.0[2].tag())
    }
}

/// Selects which response filter to run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum FilterKind {
    /// Uniform box average.
    Mean {
        /// Box width in voxels; must be odd.
        support: usize,
    },
    /// Laplacian-of-Gaussian edge enhancement.
    LogOfGaussian {
        /// Gaussian scale in millimetres.
        sigma_mm: f64,
        /// Kernel truncation radius in multiples of sigma.
        #[serde(default = "default_log_cutoff")]
        cutoff: f64,
    },
    /// Laws texture energy.
    Laws {
        /// The three 1-D kernels, ordered by array axis.
        kernel: LawsKernel,
        /// Pool the absolute response into a local energy map.
        energy: bool,
        /// Energy pooling window in voxels; must be odd.
        support: usize,
    },
}

const fn default_log_cutoff() -> f64 {
    4.0
}

/// The outcome of applying a filter.
///
/// `validity` is present when the input carried a validity mask; the
/// response is meaningful only where it is `true`.
#[derive(Debug, Clone)]
pub struct FilterResponse {
    /// Filtered intensities.
    pub response: Array3<f32>,
    /// Voxels the response is defined on, when restricted.
    pub validity: Option<Array3<bool>>,
}

impl FilterKind {
    /// Stable name used in logs and diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mean { .. } => "mean",
            Self::LogOfGaussian { .. } => "log_of_gaussian",
            Self::Laws { .. } => "laws",
        }
    }

    /// Check kernel parameters, returning a human-readable reason on
    /// failure.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Mean { support } | Self::Laws { support, .. } => {
                if *support == 0 || support.is_multiple_of(2) {
                    return Err(format!("support must be odd and positive, got {support}"));
                }
            }
            Self::LogOfGaussian { sigma_mm, cutoff } => {
                if !sigma_mm.is_finite() || *sigma_mm <= 0.0 {
                    return Err(format!("sigma_mm must be finite and positive, got {sigma_mm}"));
                }
                if !cutoff.is_finite() || *cutoff <= 0.0 {
                    return Err(format!("cutoff must be finite and positive, got {cutoff}"));
                }
            }
        }
        Ok(())
    }

    /// Run the filter over `image`.
    ///
    /// `validity` marks voxels whose intensities are trustworthy; when
    /// given, invalid voxels are excluded from the convolution and the
    /// same mask is handed back as the response's validity.
    #[must_use = "returns the filter response"]
    pub fn apply(
        &self,
        image: &Array3<f32>,
        geometry: &VolumeGeometry,
        validity: Option<&Array3<bool>>,
    ) -> FilterResponse {
        let mut working = image.clone();
        if let Some(valid) = validity {
            fill_invalid(&mut working, valid);
        }

        let response = match self {
            Self::Mean { support } => {
                let kernel = box_kernel(*support);
                let mut out = working;
                for axis in 0..3 {
                    out = convolve_axis(&out, &kernel, Axis(axis));
                }
                out
            }
            Self::LogOfGaussian { sigma_mm, cutoff } => {
                log_response(&working, geometry, *sigma_mm, *cutoff)
            }
            Self::Laws {
                kernel,
                energy,
                support,
            } => {
                let mut out = working;
                for (axis, laws) in kernel.0.iter().enumerate() {
                    out = convolve_axis(&out, &laws.coefficients(), Axis(axis));
                }
                if *energy {
                    out.mapv_inplace(f32::abs);
                    let pool = box_kernel(*support);
                    for axis in 0..3 {
                        out = convolve_axis(&out, &pool, Axis(axis));
                    }
                }
                out
            }
        };

        FilterResponse {
            response,
            validity: validity.cloned(),
        }
    }
}

/// Normalized box kernel of odd width.
fn box_kernel(support: usize) -> Vec<f64> {
    let width = support.max(1);
    #[allow(clippy::cast_precision_loss)]
    let weight = 1.0 / width as f64;
    vec![weight; width]
}

/// Sampled Gaussian normalized to unit sum.
fn gaussian_kernel(sigma: f64, cutoff: f64) -> Vec<f64> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let radius = (sigma * cutoff).ceil().max(1.0) as usize;
    #[allow(clippy::cast_possible_wrap)]
    let half = radius as i64;
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let x = k as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= total;
    }
    kernel
}

/// Sampled second derivative of a Gaussian, adjusted to zero sum so that
/// flat regions produce a zero response.
fn gaussian_second_derivative(sigma: f64, cutoff: f64) -> Vec<f64> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let radius = (sigma * cutoff).ceil().max(1.0) as usize;
    #[allow(clippy::cast_possible_wrap)]
    let half = radius as i64;
    let sigma2 = sigma * sigma;
    let mut kernel: Vec<f64> = (-half..=half)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let x = k as f64;
            let gauss = (-x * x / (2.0 * sigma2)).exp();
            (x * x - sigma2) / (sigma2 * sigma2) * gauss
        })
        .collect();
    #[allow(clippy::cast_precision_loss)]
    let mean = kernel.iter().sum::<f64>() / kernel.len() as f64;
    for w in &mut kernel {
        *w -= mean;
    }
    kernel
}

/// Laplacian of Gaussian as the sum of three separable passes, one
/// second-derivative axis at a time.
fn log_response(
    image: &Array3<f32>,
    geometry: &VolumeGeometry,
    sigma_mm: f64,
    cutoff: f64,
) -> Array3<f32> {
    let mut total = Array3::<f32>::zeros(image.dim());
    for derivative_axis in 0..3 {
        let mut pass = image.clone();
        for axis in 0..3 {
            let sigma_voxels = sigma_mm / geometry.spacing[axis].max(f64::EPSILON);
            let kernel = if axis == derivative_axis {
                gaussian_second_derivative(sigma_voxels, cutoff)
            } else {
                gaussian_kernel(sigma_voxels, cutoff)
            };
            pass = convolve_axis(&pass, &kernel, Axis(axis));
        }
        total += &pass;
    }
    total
}

/// Mirror an out-of-range index back into `0..len`.
fn reflect(index: i64, len: usize) -> usize {
    #[allow(clippy::cast_possible_wrap)]
    let len = len as i64;
    let mut i = index;
    // Bounce until inside; terminates because each pass shrinks |i|.
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= len {
            i = 2 * len - i - 1;
        } else {
            #[allow(clippy::cast_sign_loss)]
            return i as usize;
        }
    }
}

/// Convolve every lane along `axis` with `kernel`, mirroring at the
/// volume boundary.
fn convolve_axis(data: &Array3<f32>, kernel: &[f64], axis: Axis) -> Array3<f32> {
    let mut out = data.clone();
    #[allow(clippy::cast_possible_wrap)]
    let offset = (kernel.len() / 2) as i64;
    let mut lane_buffer = Vec::new();
    for (lane_in, mut lane_out) in data
        .lanes(axis)
        .into_iter()
        .zip(out.lanes_mut(axis).into_iter())
    {
        let len = lane_in.len();
        lane_buffer.clear();
        lane_buffer.extend(lane_in.iter().map(|&v| f64::from(v)));
        for (position, slot) in lane_out.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_wrap)]
            let centre = position as i64;
            let mut accumulated = 0.0_f64;
            for (tap, weight) in kernel.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let source = reflect(centre + tap as i64 - offset, len);
                accumulated = weight.mul_add(lane_buffer[source], accumulated);
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                *slot = accumulated as f32;
            }
        }
    }
    out
}

/// Replace invalid voxels with a valid intensity from the same lane, so
/// later convolution never reads placeholder values.
///
/// Voxels before the lane's first valid entry take that entry; the rest
/// carry the preceding valid value forward. Lanes with no valid voxel
/// are left untouched; they stay excluded through the response's
/// validity mask.
fn fill_invalid(data: &mut Array3<f32>, validity: &Array3<bool>) {
    for axis in 0..3 {
        for (mut lane, valid_lane) in data
            .lanes_mut(Axis(axis))
            .into_iter()
            .zip(validity.lanes(Axis(axis)).into_iter())
        {
            let Some(first) = valid_lane.iter().position(|&ok| ok) else {
                continue;
            };
            let mut carry = lane[first];
            for i in 0..first {
                lane[i] = carry;
            }
            for i in first..lane.len() {
                if valid_lane[i] {
                    carry = lane[i];
                } else {
                    lane[i] = carry;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GEOMETRY: VolumeGeometry = VolumeGeometry::isotropic([1.0, 1.0, 1.0]);

    fn constant_volume(value: f32) -> Array3<f32> {
        Array3::from_elem((5, 5, 5), value)
    }

    #[test]
    fn mean_preserves_constant_volumes() {
        let image = constant_volume(7.5);
        let out = FilterKind::Mean { support: 3 }.apply(&image, &GEOMETRY, None);
        for &v in out.response.iter() {
            assert!((v - 7.5).abs() < 1e-4, "box mean drifted to {v}");
        }
        assert!(out.validity.is_none());
    }

    #[test]
    fn mean_support_one_is_identity() {
        let mut image = constant_volume(0.0);
        image[[2, 2, 2]] = 9.0;
        let out = FilterKind::Mean { support: 1 }.apply(&image, &GEOMETRY, None);
        assert_eq!(out.response, image);
    }

    #[test]
    fn log_response_vanishes_on_flat_input() {
        let image = constant_volume(123.0);
        let out = FilterKind::LogOfGaussian {
            sigma_mm: 1.5,
            cutoff: 4.0,
        }
        .apply(&image, &GEOMETRY, None);
        for &v in out.response.iter() {
            assert!(v.abs() < 1e-3, "flat volume produced LoG response {v}");
        }
    }

    #[test]
    fn laws_level_kernel_scales_constants() {
        let image = constant_volume(1.0);
        let kernel = LawsKernel([Laws1d::L5, Laws1d::L5, Laws1d::L5]);
        let out = FilterKind::Laws {
            kernel,
            energy: false,
            support: 3,
        }
        .apply(&image, &GEOMETRY, None);
        // Sum of L5 is 16, applied along all three axes.
        let expected = 16.0_f32.powi(3);
        for &v in out.response.iter() {
            assert!((v - expected).abs() < 0.5, "got {v}, expected {expected}");
        }
    }

    #[test]
    fn invalid_voxels_do_not_leak_into_response() {
        let mut image = constant_volume(10.0);
        image[[2, 2, 2]] = -2048.0;
        let mut validity = Array3::from_elem((5, 5, 5), true);
        validity[[2, 2, 2]] = false;

        let out = FilterKind::Mean { support: 3 }.apply(&image, &GEOMETRY, Some(&validity));
        let probe = out.response[[2, 2, 1]];
        assert!(
            (probe - 10.0).abs() < 1e-3,
            "sentinel leaked into neighbouring response: {probe}"
        );
        assert_eq!(out.validity, Some(validity));
    }

    #[test]
    fn validate_rejects_even_support() {
        assert!(FilterKind::Mean { support: 4 }.validate().is_err());
        assert!(FilterKind::Mean { support: 3 }.validate().is_ok());
    }

    #[test]
    fn serde_round_trips_with_name_tag() {
        let filter = FilterKind::Laws {
            kernel: LawsKernel([Laws1d::L5, Laws1d::E5, Laws1d::S5]),
            energy: true,
            support: 7,
        };
        let json = serde_json::to_value(filter).unwrap();
        assert_eq!(json["name"], "laws");
        assert_eq!(json["kernel"][1], "e5");
        let back: FilterKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn laws_kernel_displays_compact_tag() {
        let kernel = LawsKernel([Laws1d::L5, Laws1d::E5, Laws1d::S5]);
        assert_eq!(kernel.to_string(), "L5E5S5");
    }

    #[test]
    fn reflect_mirrors_at_both_ends() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
        assert_eq!(reflect(2, 5), 2);
    }
}
