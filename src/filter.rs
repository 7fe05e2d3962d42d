use glam::Vec3;

/// Fixed-capacity history of sensor vectors for moving averages.
///
/// Once full, each insert overwrites the oldest entry.
#[derive(Debug, Clone)]
pub struct SensorFilter {
    data: Vec<Vec3>,
    /// Slot the next insert writes to
    head: usize,
    len: usize,
}

impl SensorFilter {
    /// Create a filter holding at most `capacity` vectors (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![Vec3::ZERO; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    pub fn insert(&mut self, v: Vec3) {
        self.data[self.head] = v;
        self.head = (self.head + 1) % self.data.len();
        if self.len < self.data.len() {
            self.len += 1;
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// The `k`-th most recent entry (0 = newest), or zero past the valid range
    pub fn lookback(&self, k: usize) -> Vec3 {
        if k >= self.len {
            return Vec3::ZERO;
        }
        let cap = self.data.len();
        self.data[(self.head + cap - 1 - k) % cap]
    }

    pub fn sum(&self) -> Vec3 {
        (0..self.len).map(|k| self.lookback(k)).sum()
    }

    /// Arithmetic mean of the valid entries, zero when empty
    pub fn mean(&self) -> Vec3 {
        if self.len == 0 {
            Vec3::ZERO
        } else {
            self.sum() / self.len as f32
        }
    }

    /// 8-tap Savitzky-Golay smoothing over the newest entries.
    ///
    /// Entries older than the valid range count as zero.
    pub fn savitzky_golay_smooth8(&self) -> Vec3 {
        self.lookback(0) * 0.41667 + self.lookback(1) * 0.33333 + self.lookback(2) * 0.25
            + self.lookback(3) * 0.16667
            + self.lookback(4) * 0.08333
            - self.lookback(6) * 0.08333
            - self.lookback(7) * 0.16667
    }
}
