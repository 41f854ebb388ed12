/// Smallest standard deviation handed out by [`RunningStats::std`].
pub const STD_FLOOR: f64 = 1e-6;

/// Starting guesses for live input, before any real chunk has been seen.
pub const LIVE_PRIOR_MEAN: f64 = 12.0;
pub const LIVE_PRIOR_STD: f64 = 1.5;
pub const LIVE_PRIOR_COUNT: u64 = 2;

/// Streaming per-channel mean and variance (Welford).
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    count: Vec<u64>,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningStats {
    pub fn new(channels: usize) -> Self {
        Self {
            count: vec![0; channels],
            mean: vec![0.0; channels],
            m2: vec![0.0; channels],
        }
    }

    /// Seed every channel as if `count` observations with the given mean and
    /// population standard deviation had already been pushed.
    pub fn preload(&mut self, mean: &[f64], std: &[f64], count: u64) {
        for ch in 0..self.channels() {
            self.count[ch] = count;
            self.mean[ch] = mean.get(ch).copied().unwrap_or(0.0);
            let s = std.get(ch).copied().unwrap_or(0.0);
            self.m2[ch] = s * s * count as f64;
        }
    }

    pub fn push(&mut self, levels: &[f64]) {
        for (ch, &x) in levels.iter().enumerate().take(self.channels()) {
            self.count[ch] += 1;
            let delta = x - self.mean[ch];
            self.mean[ch] += delta / self.count[ch] as f64;
            self.m2[ch] += delta * (x - self.mean[ch]);
        }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> Vec<f64> {
        self.mean.clone()
    }

    pub fn std(&self) -> Vec<f64> {
        self.count
            .iter()
            .zip(self.m2.iter())
            .map(|(&n, &m2)| {
                if n == 0 {
                    STD_FLOOR
                } else {
                    (m2 / n as f64).sqrt().max(STD_FLOOR)
                }
            })
            .collect()
    }
}

/// Per-column mean and population std over the strictly positive entries.
///
/// A column without any positive entry summarizes to `(0.0, 0.0)`.
pub fn positive_summary(rows: &[Vec<f64>], channels: usize) -> (Vec<f64>, Vec<f64>) {
    let mut mean = vec![0.0; channels];
    let mut std = vec![0.0; channels];
    for ch in 0..channels {
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|row| row.get(ch).copied())
            .filter(|&v| v > 0.0)
            .collect();
        if values.is_empty() {
            continue;
        }
        let n = values.len() as f64;
        let m = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n;
        mean[ch] = m;
        std[ch] = var.sqrt();
    }
    (mean, std)
}

/// Map one channel level onto `[0, 1]`: dark at half a std below the mean,
/// full at three quarters of a std above it.
pub fn brightness(level: f64, mean: f64, std: f64) -> f64 {
    if !(std > 0.0) {
        return 0.0;
    }
    let b = (level - mean + 0.5 * std) / (1.25 * std);
    if b.is_nan() {
        0.0
    } else {
        b.clamp(0.0, 1.0)
    }
}

/// [`brightness`] for a whole channel-level vector.
pub fn normalize(levels: &[f64], mean: &[f64], std: &[f64]) -> Vec<f64> {
    levels
        .iter()
        .zip(mean.iter().zip(std.iter()))
        .map(|(&l, (&m, &s))| brightness(l, m, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_batch_statistics() {
        let samples = [4.0, 7.0, 13.0, 16.0];
        let mut stats = RunningStats::new(1);
        for s in samples {
            stats.push(&[s]);
        }
        assert!((stats.mean()[0] - 10.0).abs() < 1e-12);
        // population variance = 22.5
        assert!((stats.std()[0] - 22.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn order_of_pushes_does_not_matter() {
        let forward = [1.5, 9.0, -3.0, 4.25, 11.0, 0.5];
        let mut a = RunningStats::new(2);
        let mut b = RunningStats::new(2);
        for &x in forward.iter() {
            a.push(&[x, x * 2.0]);
        }
        for &x in forward.iter().rev() {
            b.push(&[x, x * 2.0]);
        }
        for ch in 0..2 {
            assert!((a.mean()[ch] - b.mean()[ch]).abs() < 1e-12);
            assert!((a.std()[ch] - b.std()[ch]).abs() < 1e-9);
        }
    }

    #[test]
    fn preload_sets_priors() {
        let mut stats = RunningStats::new(3);
        stats.preload(&[LIVE_PRIOR_MEAN; 3], &[LIVE_PRIOR_STD; 3], LIVE_PRIOR_COUNT);
        assert_eq!(stats.mean(), vec![12.0; 3]);
        for s in stats.std() {
            assert!((s - 1.5).abs() < 1e-12);
        }
        stats.push(&[12.0, 12.0, 12.0]);
        assert_eq!(stats.mean(), vec![12.0; 3]);
    }

    #[test]
    fn std_is_floored() {
        let mut stats = RunningStats::new(1);
        assert_eq!(stats.std(), vec![STD_FLOOR]);
        stats.push(&[5.0]);
        stats.push(&[5.0]);
        assert_eq!(stats.std(), vec![STD_FLOOR]);
    }

    #[test]
    fn summary_ignores_non_positive_entries() {
        let rows = vec![vec![0.0, 2.0], vec![4.0, 0.0], vec![6.0, -1.0]];
        let (mean, std) = positive_summary(&rows, 2);
        assert_eq!(mean, vec![5.0, 2.0]);
        assert_eq!(std, vec![1.0, 0.0]);
    }

    #[test]
    fn summary_of_silent_column_is_zero() {
        let rows = vec![vec![0.0], vec![0.0]];
        assert_eq!(positive_summary(&rows, 1), (vec![0.0], vec![0.0]));
    }

    #[test]
    fn brightness_is_clamped() {
        assert_eq!(brightness(10.0, 10.0, 2.0), 0.4);
        assert_eq!(brightness(100.0, 10.0, 2.0), 1.0);
        assert_eq!(brightness(0.0, 10.0, 2.0), 0.0);
        assert_eq!(brightness(5.0, 5.0, 0.0), 0.0);
        assert_eq!(brightness(f64::NAN, 5.0, 1.0), 0.0);
    }
}
