//! Frame and cycle storage.
//!
//! Cycles address frames by position, so every structural change to the
//! frame list rewrites the cycle indices in the same call. Every frame added
//! or removed is registered with or unregistered from the color histogram in
//! the same call too, so the histogram always describes exactly the frames
//! present. Index arguments are clamped or ignored, never a panic.

use std::collections::BTreeSet;

use crate::frame::{CycleEntry, FrameEntry, FrameOptions};
use crate::histogram::ColorHistogram;

#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    frames: Vec<FrameEntry>,
    cycles: Vec<CycleEntry>,
    histogram: ColorHistogram,
    alpha_threshold: u8,
    revision: u64,
}

impl FrameStore {
    pub fn new(alpha_threshold: u8) -> Self {
        Self {
            alpha_threshold,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> &[FrameEntry] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&FrameEntry> {
        self.frames.get(index)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn cycles(&self) -> &[CycleEntry] {
        &self.cycles
    }

    pub fn cycle(&self, index: usize) -> Option<&CycleEntry> {
        self.cycles.get(index)
    }

    pub fn cycle_count(&self) -> usize {
        self.cycles.len()
    }

    pub fn histogram(&self) -> &ColorHistogram {
        &self.histogram
    }

    pub fn alpha_threshold(&self) -> u8 {
        self.alpha_threshold
    }

    /// Incremented on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Change the transparency cutoff and recount the histogram under it.
    pub(crate) fn set_alpha_threshold(&mut self, alpha_threshold: u8) {
        if alpha_threshold == self.alpha_threshold {
            return;
        }
        self.alpha_threshold = alpha_threshold;
        self.histogram.clear();
        for frame in &self.frames {
            self.histogram.register_colors(&frame.image, alpha_threshold);
        }
        self.touch();
    }

    // --- frames ---

    /// Insert frames at `pos` (clamped to `[0, len]`), shifting cycle references at or after it.
    pub fn insert_frames(&mut self, pos: usize, frames: Vec<FrameEntry>) {
        let count = frames.len();
        if count == 0 {
            return;
        }
        let pos = pos.min(self.frames.len());
        for frame in &frames {
            self.histogram.register_colors(&frame.image, self.alpha_threshold);
        }
        self.frames.splice(pos..pos, frames);
        for cycle in &mut self.cycles {
            for idx in &mut cycle.frames {
                if *idx >= pos {
                    *idx += count;
                }
            }
        }
        self.touch();
    }

    /// Append frames, returning the position of the first one.
    pub fn add_frames(&mut self, frames: Vec<FrameEntry>) -> usize {
        let pos = self.frames.len();
        self.insert_frames(pos, frames);
        pos
    }

    /// Remove the frames at `indices`. Out-of-range and duplicate indices are ignored.
    ///
    /// References to removed frames are dropped from every cycle, remaining
    /// references shift down by the number of removed positions below them.
    pub fn remove_frames(&mut self, indices: &[usize]) -> Vec<FrameEntry> {
        let removed: BTreeSet<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.frames.len())
            .collect();
        if removed.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(removed.len());
        for &i in removed.iter().rev() {
            let frame = self.frames.remove(i);
            self.histogram
                .unregister_colors(&frame.image, self.alpha_threshold);
            out.push(frame);
        }
        out.reverse();

        for cycle in &mut self.cycles {
            cycle.frames.retain(|idx| !removed.contains(idx));
            for idx in &mut cycle.frames {
                let below = removed.range(..*idx).count();
                *idx -= below;
            }
        }
        self.touch();
        out
    }

    /// Swap the frame at `index` with the one `offset` positions away (clamped).
    ///
    /// Only cycle entries naming either of the two positions change. Returns the
    /// frame's new position, or `None` if `index` is out of range.
    pub fn move_frame(&mut self, index: usize, offset: isize) -> Option<usize> {
        if index >= self.frames.len() {
            return None;
        }
        let target = clamp_offset(index, offset, self.frames.len());
        if target == index {
            return Some(index);
        }
        self.frames.swap(index, target);
        for cycle in &mut self.cycles {
            for idx in &mut cycle.frames {
                if *idx == index {
                    *idx = target;
                } else if *idx == target {
                    *idx = index;
                }
            }
        }
        self.touch();
        Some(target)
    }

    /// Replace a frame's content, keeping its cycle references.
    pub fn replace_frame(&mut self, index: usize, frame: FrameEntry) -> Option<FrameEntry> {
        let slot = self.frames.get_mut(index)?;
        self.histogram
            .unregister_colors(&slot.image, self.alpha_threshold);
        self.histogram
            .register_colors(&frame.image, self.alpha_threshold);
        let old = std::mem::replace(slot, frame);
        self.touch();
        Some(old)
    }

    pub fn set_frame_center(&mut self, index: usize, x: i16, y: i16) -> bool {
        let Some(frame) = self.frames.get_mut(index) else {
            return false;
        };
        frame.center_x = x;
        frame.center_y = y;
        self.touch();
        true
    }

    pub fn set_frame_options(&mut self, index: usize, options: FrameOptions) -> bool {
        let Some(frame) = self.frames.get_mut(index) else {
            return false;
        };
        frame.options = options;
        self.touch();
        true
    }

    /// Positions of frames referenced by no cycle.
    pub fn unused_frame_indices(&self) -> BTreeSet<usize> {
        let mut unused: BTreeSet<usize> = (0..self.frames.len()).collect();
        for cycle in &self.cycles {
            for idx in &cycle.frames {
                unused.remove(idx);
            }
        }
        unused
    }

    /// Drop every frame no cycle references. Returns how many were removed.
    pub fn remove_unused_frames(&mut self) -> usize {
        let unused: Vec<usize> = self.unused_frame_indices().into_iter().collect();
        self.remove_frames(&unused).len()
    }

    // --- cycles ---

    /// Insert a cycle at `pos` (clamped). References to missing frames are dropped.
    pub fn insert_cycle(&mut self, pos: usize, mut cycle: CycleEntry) -> usize {
        let len = self.frames.len();
        cycle.frames.retain(|&i| i < len);
        let pos = pos.min(self.cycles.len());
        self.cycles.insert(pos, cycle);
        self.touch();
        pos
    }

    pub fn add_cycle(&mut self, cycle: CycleEntry) -> usize {
        self.insert_cycle(self.cycles.len(), cycle)
    }

    pub fn remove_cycle(&mut self, index: usize) -> Option<CycleEntry> {
        if index >= self.cycles.len() {
            return None;
        }
        self.touch();
        Some(self.cycles.remove(index))
    }

    /// Swap a cycle with the one `offset` positions away (clamped). Returns its new position.
    pub fn move_cycle(&mut self, index: usize, offset: isize) -> Option<usize> {
        if index >= self.cycles.len() {
            return None;
        }
        let target = clamp_offset(index, offset, self.cycles.len());
        if target != index {
            self.cycles.swap(index, target);
            self.touch();
        }
        Some(target)
    }

    /// Replace a cycle's frame list. References to missing frames are dropped.
    pub fn set_cycle_frames(&mut self, index: usize, mut frames: Vec<usize>) -> bool {
        let len = self.frames.len();
        let Some(cycle) = self.cycles.get_mut(index) else {
            return false;
        };
        frames.retain(|&i| i < len);
        cycle.frames = frames;
        self.touch();
        true
    }

    /// Reverse the order of the cycle list.
    pub fn reverse_cycle_order(&mut self) {
        self.cycles.reverse();
        self.touch();
    }

    /// Insert a copy of a cycle right after it. Returns the copy's position.
    pub fn duplicate_cycle(&mut self, index: usize) -> Option<usize> {
        let copy = self.cycles.get(index)?.clone();
        self.cycles.insert(index + 1, copy);
        self.touch();
        Some(index + 1)
    }

    pub fn sort_cycle_frames_by_index(&mut self, index: usize) -> bool {
        self.with_cycle(index, |c| c.frames.sort_unstable())
    }

    pub fn reverse_cycle_frame_order(&mut self, index: usize) -> bool {
        self.with_cycle(index, |c| c.frames.reverse())
    }

    /// Make a cycle reference every frame once, in order.
    pub fn assign_all_frames_to_cycle(&mut self, index: usize) -> bool {
        let len = self.frames.len();
        self.with_cycle(index, |c| c.frames = (0..len).collect())
    }

    pub fn set_cycle_label(&mut self, index: usize, label: impl Into<String>) -> bool {
        let label = label.into();
        self.with_cycle(index, |c| c.label = label)
    }

    /// Insert frame references into a cycle at `pos` (clamped). Missing frames are dropped.
    pub fn insert_cycle_frames(&mut self, index: usize, pos: usize, frames: &[usize]) -> bool {
        let len = self.frames.len();
        self.with_cycle(index, |c| {
            let pos = pos.min(c.frames.len());
            let valid = frames.iter().copied().filter(|&i| i < len);
            c.frames.splice(pos..pos, valid);
        })
    }

    /// Remove `count` references from a cycle starting at `pos`, clamped to the cycle.
    pub fn remove_cycle_frames(&mut self, index: usize, pos: usize, count: usize) -> bool {
        self.with_cycle(index, |c| {
            let start = pos.min(c.frames.len());
            let end = start.saturating_add(count).min(c.frames.len());
            c.frames.drain(start..end);
        })
    }

    /// Swap a reference within a cycle with the one `offset` slots away (clamped).
    pub fn move_cycle_frame(&mut self, index: usize, pos: usize, offset: isize) -> Option<usize> {
        let cycle = self.cycles.get_mut(index)?;
        if pos >= cycle.frames.len() {
            return None;
        }
        let target = clamp_offset(pos, offset, cycle.frames.len());
        cycle.frames.swap(pos, target);
        self.touch();
        Some(target)
    }

    fn with_cycle(&mut self, index: usize, f: impl FnOnce(&mut CycleEntry)) -> bool {
        let Some(cycle) = self.cycles.get_mut(index) else {
            return false;
        };
        f(cycle);
        self.touch();
        true
    }

    /// Remove all frames and cycles.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.cycles.clear();
        self.histogram.clear();
        self.touch();
    }
}

fn clamp_offset(index: usize, offset: isize, len: usize) -> usize {
    let max = len.saturating_sub(1) as isize;
    (index as isize).saturating_add(offset).clamp(0, max) as usize
}
