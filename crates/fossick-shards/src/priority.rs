/// Ordered multiset of the ranks currently executing, kept as a sorted
/// vector with binary-search insert/remove. `max` answers "is anything more
/// important than me still running?" during early termination.
#[derive(Debug, Default)]
pub struct PrioritySlice {
    sorted: Vec<f64>,
}

impl PrioritySlice {
    pub fn new() -> Self {
        PrioritySlice::default()
    }

    pub fn append(&mut self, v: f64) {
        let i = self.sorted.partition_point(|&x| x <= v);
        self.sorted.insert(i, v);
    }

    /// Remove one occurrence of `v`. Removing a value that was never
    /// appended is a caller bug and is ignored.
    pub fn remove(&mut self, v: f64) {
        let i = self.sorted.partition_point(|&x| x < v);
        if self.sorted.get(i) == Some(&v) {
            self.sorted.remove(i);
        }
    }

    /// Largest rank still present, or negative infinity when empty to
    /// signal "no contenders".
    pub fn max(&self) -> f64 {
        self.sorted.last().copied().unwrap_or(f64::NEG_INFINITY)
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_remove_max() {
        let mut p = PrioritySlice::new();
        for (step, (is_append, value, expected_max)) in [
            (true, 1.0, 1.0),
            (true, 3.0, 3.0),
            (true, 2.0, 3.0),
            (false, 1.0, 3.0),
            (false, 3.0, 2.0),
            (false, 2.0, f64::NEG_INFINITY),
        ]
        .into_iter()
        .enumerate()
        {
            if is_append {
                p.append(value);
            } else {
                p.remove(value);
            }
            assert_eq!(p.max(), expected_max, "step {}", step);
        }
        assert!(p.is_empty());
    }

    #[test]
    fn duplicates_are_tracked_individually() {
        let mut p = PrioritySlice::new();
        p.append(5.0);
        p.append(5.0);
        p.remove(5.0);
        assert_eq!(p.max(), 5.0);
        p.remove(5.0);
        assert_eq!(p.max(), f64::NEG_INFINITY);
    }
}
