/// Exponential moving average reported through a gauge.
pub(crate) struct RunningAverage {
    value: Option<f64>,
    epsilon: f64,
    inner: metrics::Gauge,
}

impl RunningAverage {
    /// `epsilon` is the weight of each new sample.
    pub fn new(epsilon: f64, inner: metrics::Gauge) -> Self {
        assert!((0.0..1.0).contains(&epsilon) && epsilon > 0.0);
        Self {
            value: None,
            epsilon,
            inner,
        }
    }

    pub fn set(&mut self, new_value: f64) {
        let value = match self.value {
            /* First sample seeds the average instead of being pulled towards zero */
            None => new_value,
            Some(value) => (1.0 - self.epsilon) * value + self.epsilon * new_value,
        };
        self.value = Some(value);
        self.inner.set(value);
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}
