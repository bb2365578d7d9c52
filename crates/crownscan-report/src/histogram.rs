//! Fixed-width histograms over finite values.

/// Equal-width histogram over `[lo, hi]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    lo: f32,
    hi: f32,
    heights: Vec<f32>,
}

impl Histogram {
    /// Bin the finite values of `values` into `bins` equal-width bins
    /// spanning their min and max; the last bin includes the max.
    ///
    /// When all values are equal the range is widened by 0.5 on each
    /// side. With `density` the heights integrate to 1, otherwise they
    /// are counts. Returns `None` if `bins` is zero or no value is finite.
    #[must_use]
    pub fn from_values<I>(values: I, bins: usize, density: bool) -> Option<Self>
    where
        I: IntoIterator<Item = f32>,
    {
        if bins == 0 {
            return None;
        }
        let finite: Vec<f32> = values.into_iter().filter(|v| v.is_finite()).collect();
        let (min, max) = finite
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if finite.is_empty() {
            return None;
        }
        let (lo, hi) = if max > min {
            (min, max)
        } else {
            (min - 0.5, max + 0.5)
        };

        #[allow(clippy::cast_precision_loss)]
        let bins_f = bins as f32;
        let mut heights = vec![0.0_f32; bins];
        for v in &finite {
            let pos = (v - lo) / (hi - lo) * bins_f;
            // `pos` is within 0..=bins.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = (pos as usize).min(bins - 1);
            heights[index] += 1.0;
        }

        if density {
            #[allow(clippy::cast_precision_loss)]
            let total = finite.len() as f32;
            let width = (hi - lo) / bins_f;
            for h in &mut heights {
                *h /= total * width;
            }
        }
        Some(Self { lo, hi, heights })
    }

    /// Left edge of the first bin.
    #[must_use]
    pub const fn lo(&self) -> f32 {
        self.lo
    }

    /// Right edge of the last bin.
    #[must_use]
    pub const fn hi(&self) -> f32 {
        self.hi
    }

    /// Bar heights, one per bin.
    #[must_use]
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Tallest bar.
    #[must_use]
    pub fn peak(&self) -> f32 {
        self.heights.iter().copied().fold(0.0, f32::max)
    }

    /// Width of one bin.
    #[must_use]
    pub fn bin_width(&self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let bins = self.heights.len() as f32;
        (self.hi - self.lo) / bins
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counts_include_the_maximum() {
        let h = Histogram::from_values([0.0, 0.1, 0.5, 1.0], 10, false).unwrap();
        assert_eq!(h.heights().len(), 10);
        assert_eq!(h.heights()[0], 1.0);
        assert_eq!(h.heights()[1], 1.0);
        assert_eq!(h.heights()[5], 1.0);
        assert_eq!(h.heights()[9], 1.0);
        assert_eq!(h.heights().iter().sum::<f32>(), 4.0);
    }

    #[test]
    fn density_integrates_to_one() {
        let values = (0..1000).map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let v = (i % 37) as f32 / 37.0;
            v
        });
        let h = Histogram::from_values(values, 100, true).unwrap();
        let area: f32 = h.heights().iter().map(|v| v * h.bin_width()).sum();
        assert!((area - 1.0).abs() < 1e-4, "area {area}");
    }

    #[test]
    fn constant_values_widen_range() {
        let h = Histogram::from_values([2.0; 5], 10, false).unwrap();
        assert_eq!((h.lo(), h.hi()), (1.5, 2.5));
        assert_eq!(h.peak(), 5.0);
    }

    #[test]
    fn non_finite_values_are_ignored() {
        assert!(Histogram::from_values([f32::NAN, f32::INFINITY], 10, false).is_none());
        let h = Histogram::from_values([f32::NAN, 0.0, 1.0], 2, false).unwrap();
        assert_eq!(h.heights(), [1.0, 1.0]);
    }

    #[test]
    fn zero_bins_is_none() {
        assert!(Histogram::from_values([1.0], 0, false).is_none());
    }
}
