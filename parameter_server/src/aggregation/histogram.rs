/// A fixed-width histogram of the values of a gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Buckets `values` into `nbuckets` equally wide buckets spanning `[min, max]`.
    ///
    /// # Returns
    /// `None` if there are no values, no buckets or some value isn't finite.
    pub fn from_values<I>(values: I, nbuckets: usize) -> Option<Self>
    where
        I: IntoIterator<Item = f32> + Clone,
    {
        if nbuckets == 0 {
            return None;
        }

        let mut len = 0usize;
        let mut sum = 0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;

        for v in values.clone() {
            if !v.is_finite() {
                return None;
            }
            len += 1;
            sum += v as f64;
            min = min.min(v);
            max = max.max(v);
        }

        if len == 0 {
            return None;
        }

        let width = (max - min) / nbuckets as f32;
        let mut counts = vec![0; nbuckets];

        for v in values {
            let bucket = if width > 0. {
                (((v - min) / width) as usize).min(nbuckets - 1)
            } else {
                0
            };
            counts[bucket] += 1;
        }

        Some(Self {
            min,
            max,
            mean: (sum / len as f64) as f32,
            counts,
        })
    }

    /// Returns the amount of values in the histogram.
    pub fn len(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
