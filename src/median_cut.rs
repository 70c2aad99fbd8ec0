use std::cmp::Ordering;

use crate::histogram::HistEntry;
use crate::oklab::OKLab;

/// A box of histogram entries for median cut subdivision.
#[derive(Debug, Clone)]
struct ColorBox {
    entries: Vec<HistEntry>,
}

impl ColorBox {
    fn new(entries: Vec<HistEntry>) -> Self {
        Self { entries }
    }

    fn total_weight(&self) -> f32 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    /// Compute the range (max - min) along each OKLab axis.
    fn ranges(&self) -> (f32, f32, f32) {
        let mut l_min = f32::MAX;
        let mut l_max = f32::MIN;
        let mut a_min = f32::MAX;
        let mut a_max = f32::MIN;
        let mut b_min = f32::MAX;
        let mut b_max = f32::MIN;

        for e in &self.entries {
            l_min = l_min.min(e.lab.l);
            l_max = l_max.max(e.lab.l);
            a_min = a_min.min(e.lab.a);
            a_max = a_max.max(e.lab.a);
            b_min = b_min.min(e.lab.b);
            b_max = b_max.max(e.lab.b);
        }

        (l_max - l_min, a_max - a_min, b_max - b_min)
    }

    /// Split priority: larger weighted boxes with more color variation split first.
    fn priority(&self) -> f32 {
        let (rl, ra, rb) = self.ranges();
        self.total_weight() * rl.max(ra).max(rb)
    }

    fn centroid(&self) -> OKLab {
        let mut l_sum = 0.0f64;
        let mut a_sum = 0.0f64;
        let mut b_sum = 0.0f64;
        let mut w_sum = 0.0f64;

        for e in &self.entries {
            let w = e.weight as f64;
            l_sum += e.lab.l as f64 * w;
            a_sum += e.lab.a as f64 * w;
            b_sum += e.lab.b as f64 * w;
            w_sum += w;
        }

        if w_sum < 1e-10 {
            return OKLab::new(0.0, 0.0, 0.0);
        }

        OKLab::new(
            (l_sum / w_sum) as f32,
            (a_sum / w_sum) as f32,
            (b_sum / w_sum) as f32,
        )
    }

    /// The member color closest to the weighted centroid; lowest key wins ties.
    fn representative(&self) -> u32 {
        let centroid = self.centroid();
        let mut best = self.entries[0].key;
        let mut best_dist = f32::MAX;
        for e in &self.entries {
            let d = centroid.distance_sq(e.lab);
            if d < best_dist || (d == best_dist && e.key < best) {
                best_dist = d;
                best = e.key;
            }
        }
        best
    }

    /// Split this box along the axis with the largest range at the weighted median.
    fn split(mut self) -> (ColorBox, ColorBox) {
        let (rl, ra, rb) = self.ranges();

        let axis = if rl >= ra && rl >= rb {
            0
        } else if ra >= rb {
            1
        } else {
            2
        };
        let coord = |e: &HistEntry| match axis {
            0 => e.lab.l,
            1 => e.lab.a,
            _ => e.lab.b,
        };

        // Key tie-break keeps the order total, so identical input always splits identically.
        self.entries.sort_by(|a, b| {
            coord(a)
                .partial_cmp(&coord(b))
                .unwrap_or(Ordering::Equal)
                .then(a.key.cmp(&b.key))
        });

        let half_weight = self.total_weight() / 2.0;
        let mut accumulated = 0.0f32;
        let mut split_idx = 1;

        for (i, e) in self.entries.iter().enumerate() {
            accumulated += e.weight;
            if accumulated >= half_weight && i + 1 < self.entries.len() {
                split_idx = i + 1;
                break;
            }
        }

        split_idx = split_idx.max(1).min(self.entries.len() - 1);

        let right = self.entries.split_off(split_idx);
        (ColorBox::new(self.entries), ColorBox::new(right))
    }
}

/// Weighted median cut over histogram entries.
///
/// Returns up to `max_colors` 24-bit color keys, each one a color present in
/// the histogram. When the histogram has no more than `max_colors` entries
/// every entry is returned as is.
pub fn median_cut(histogram: Vec<HistEntry>, max_colors: usize) -> Vec<u32> {
    if histogram.is_empty() || max_colors == 0 {
        return Vec::new();
    }

    if histogram.len() <= max_colors {
        return histogram.into_iter().map(|e| e.key).collect();
    }

    let mut boxes = Vec::with_capacity(max_colors);
    boxes.push(ColorBox::new(histogram));

    while boxes.len() < max_colors {
        // First box wins on equal priority.
        let mut best: Option<(usize, f32)> = None;
        for (i, b) in boxes.iter().enumerate() {
            if b.entries.len() < 2 {
                continue;
            }
            let p = b.priority();
            if best.is_none_or(|(_, bp)| p > bp) {
                best = Some((i, p));
            }
        }

        let Some((idx, _)) = best else {
            break;
        };

        let to_split = boxes.remove(idx);
        let (left, right) = to_split.split();
        boxes.insert(idx, right);
        boxes.insert(idx, left);
    }

    boxes.iter().map(ColorBox::representative).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oklab::srgb_to_oklab;

    fn entry(r: u8, g: u8, b: u8, weight: f32) -> HistEntry {
        HistEntry {
            lab: srgb_to_oklab(r, g, b),
            weight,
            key: (r as u32) << 16 | (g as u32) << 8 | b as u32,
        }
    }

    #[test]
    fn empty_histogram() {
        assert!(median_cut(Vec::new(), 16).is_empty());
    }

    #[test]
    fn fewer_colors_than_max() {
        let hist = vec![entry(10, 10, 10, 10.0), entry(200, 200, 200, 10.0)];
        assert_eq!(median_cut(hist, 16), vec![0x0A0A0A, 0xC8C8C8]);
    }

    #[test]
    fn produces_requested_count_from_input_colors() {
        let hist: Vec<HistEntry> = (0..100u8).map(|i| entry(i * 2, i, 255 - i, 1.0)).collect();
        let keys: Vec<u32> = hist.iter().map(|e| e.key).collect();
        let result = median_cut(hist, 8);
        assert_eq!(result.len(), 8);
        for k in &result {
            assert!(keys.contains(k));
        }
        let mut dedup = result.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), 8);
    }

    #[test]
    fn deterministic() {
        let make = || -> Vec<HistEntry> {
            (0..300u32)
                .map(|i| entry((i * 7) as u8, (i * 13) as u8, (i * 29) as u8, (i % 5 + 1) as f32))
                .collect()
        };
        assert_eq!(median_cut(make(), 32), median_cut(make(), 32));
    }

    #[test]
    fn weighted_entries_influence_selection() {
        let mut hist = Vec::new();
        for i in 0..10u8 {
            hist.push(entry(40 + i, 40 + i, 40 + i, 10.0));
        }
        for i in 0..10u8 {
            hist.push(entry(200 + i, 200 + i, 200 + i, 0.1));
        }
        let result = median_cut(hist, 4);
        assert_eq!(result.len(), 4);
        let dark = result.iter().filter(|&&k| (k >> 16) < 128).count();
        let light = result.len() - dark;
        assert!(dark >= light, "dark={dark}, light={light}");
    }
}
