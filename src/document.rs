use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::ConvertConfig;
use crate::decode::read_bam;
use crate::encode::{OutputFiles, commit};
use crate::error::{BamError, ImportError, ImportReport};
use crate::filter::{Filter, FilterChain, OutputFilter};
use crate::frame::{CycleEntry, FrameEntry};
use crate::histogram::ColorHistogram;
use crate::progress::Progress;
use crate::store::FrameStore;

/// Read-only view of the post-filter animation handed to encoders and previews.
///
/// Cycles are the store's own list; only the frames are derived.
#[derive(Debug, Clone, Copy)]
pub struct FinalDocument<'a> {
    pub frames: &'a [FrameEntry],
    pub cycles: &'a [CycleEntry],
    /// Color counts of `frames`, when they are known to match the original frames' colors.
    pub histogram: Option<&'a ColorHistogram>,
}

/// How an imported BAM combines with the current content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    /// Append frames and cycles after the existing ones.
    Merge,
}

/// An animation under conversion: original frames and cycles, the filter
/// chain, and the cached result of running the chain.
#[derive(Debug, Clone)]
pub struct Document {
    store: FrameStore,
    filters: FilterChain,
    config: ConvertConfig,
    output_path: Option<PathBuf>,
    /// Target of the BAM output `convert` appended on its own, while it is in the chain.
    synthesized_output: Option<PathBuf>,
    final_frames: Option<Vec<FrameEntry>>,
    /// Store revision the cached final frames were derived from.
    final_revision: u64,
    filters_changed: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(ConvertConfig::default())
    }
}

impl Document {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            store: FrameStore::new(config.alpha_threshold()),
            filters: FilterChain::new(),
            config,
            output_path: None,
            synthesized_output: None,
            final_frames: None,
            final_revision: 0,
            filters_changed: false,
        }
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    /// Mutable access to frames and cycles. Changes invalidate the final frames.
    pub fn store_mut(&mut self) -> &mut FrameStore {
        &mut self.store
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Mutable access to the filter chain. Invalidates the final frames.
    pub fn filters_mut(&mut self) -> &mut FilterChain {
        self.filters_changed = true;
        &mut self.filters
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ConvertConfig) -> Result<(), BamError> {
        config.validate()?;
        self.store.set_alpha_threshold(config.alpha_threshold());
        if config != self.config {
            self.filters_changed = true;
        }
        self.config = config;
        Ok(())
    }

    /// Target used when the chain holds no output filter.
    ///
    /// A BAM output appended by an earlier [`convert`](Self::convert) follows
    /// the new path.
    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if let Some(old) = self.synthesized_output.take() {
            let old = OutputFilter::Bam { path: old };
            if let Some(out) = self.filters.outputs_mut().find(|o| **o == old) {
                *out = OutputFilter::Bam { path: path.clone() };
                self.synthesized_output = Some(path.clone());
            }
        }
        self.output_path = Some(path);
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.final_frames.is_none()
            || self.filters_changed
            || self.final_revision != self.store.revision()
    }

    /// Rebuild the final frames from scratch by running the filter chain over a
    /// copy of the original frames. A failed rebuild leaves no cached result.
    pub fn rebuild(&mut self) -> Result<(), BamError> {
        self.final_frames = None;
        let frames = self.filters.apply(self.store.frames().to_vec())?;
        debug!(
            "rebuilt {} final frames through {} filters",
            frames.len(),
            self.filters.len()
        );
        self.final_frames = Some(frames);
        self.final_revision = self.store.revision();
        self.filters_changed = false;
        Ok(())
    }

    /// The final document, rebuilding first if anything changed.
    pub fn final_document(&mut self) -> Result<FinalDocument<'_>, BamError> {
        self.store.set_alpha_threshold(self.config.alpha_threshold());
        if self.is_dirty() {
            self.rebuild()?;
        }
        Ok(self.view())
    }

    /// The last built final document, without rebuilding. `None` if never built or stale.
    pub fn snapshot(&self) -> Option<FinalDocument<'_>> {
        (!self.is_dirty()).then(|| self.view())
    }

    fn view(&self) -> FinalDocument<'_> {
        // Geometric filters keep colors; color filters invalidate the original counts.
        let histogram = (!self.filters.has_color_filters()).then(|| self.store.histogram());
        FinalDocument {
            frames: self.final_frames.as_deref().unwrap_or(&[]),
            cycles: self.store.cycles(),
            histogram,
        }
    }

    /// Run the filter chain and every output filter.
    ///
    /// Without an output filter in the chain, a BAM output targeting
    /// [`output_path`](Self::output_path) is appended first. All outputs are
    /// encoded before any file is written, so a failing or cancelled output
    /// leaves every target untouched.
    pub fn convert(&mut self, progress: &mut dyn Progress) -> Result<(), BamError> {
        self.config.validate()?;
        if !self.filters.has_output() {
            let path = self.output_path.clone().ok_or(BamError::NoOutputTarget)?;
            debug!("no output filter, defaulting to BAM at {}", path.display());
            self.filters.add(Filter::Output(OutputFilter::Bam { path: path.clone() }));
            self.synthesized_output = Some(path);
        }
        // A replaced store may carry its own cutoff; the histogram must follow the config.
        self.store.set_alpha_threshold(self.config.alpha_threshold());
        if self.is_dirty() {
            self.rebuild()?;
        }

        let outputs: Vec<OutputFilter> = self.filters.outputs().cloned().collect();
        let doc = self.view();
        let mut files = OutputFiles::new();
        for output in &outputs {
            files.extend(output.encode(&doc, &self.config, progress)?);
        }
        if progress.is_cancelled() {
            return Err(BamError::Cancelled);
        }
        for output in &outputs {
            output.prepare_target()?;
        }
        commit(&files)?;
        info!(
            "converted {} frames in {} cycles",
            doc.frames.len(),
            doc.cycles.len()
        );
        Ok(())
    }

    /// Decode image files and append them as frames.
    ///
    /// Unreadable files are skipped and reported; cancellation is honoured
    /// between files.
    pub fn import_images<P: AsRef<Path>>(
        &mut self,
        paths: &[P],
        progress: &mut dyn Progress,
    ) -> ImportReport {
        let mut report = ImportReport::default();
        let mut frames = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            if progress.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let path = path.as_ref();
            match load_frame(path) {
                Ok(frame) => frames.push(frame),
                Err(source) => {
                    warn!("skipping {}: {source}", path.display());
                    report.failed.push(ImportError {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
            progress.report(i + 1, paths.len());
        }
        report.imported = frames.len();
        self.store.add_frames(frames);
        report
    }

    /// Load a BAM V1 (plain or BAMC-compressed) file.
    pub fn import_bam(&mut self, path: impl AsRef<Path>, mode: ImportMode) -> Result<(), BamError> {
        let bytes = std::fs::read(path.as_ref())?;
        let contents = read_bam(&bytes)?;
        if mode == ImportMode::Replace {
            self.store.clear();
        }
        let base = self.store.add_frames(contents.frames);
        for mut cycle in contents.cycles {
            for idx in &mut cycle.frames {
                *idx += base;
            }
            self.store.add_cycle(cycle);
        }
        info!(
            "imported {} ({:?}): now {} frames, {} cycles",
            path.as_ref().display(),
            mode,
            self.store.frame_count(),
            self.store.cycle_count()
        );
        Ok(())
    }
}

fn load_frame(path: &Path) -> Result<FrameEntry, BamError> {
    let img = image::open(path)?.to_rgba8();
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(BamError::ZeroDimension);
    }
    let (Ok(width), Ok(height)) = (u16::try_from(w), u16::try_from(h)) else {
        return Err(BamError::UnsupportedImage(format!("{w}x{h} exceeds 65535 pixels")));
    };
    let pixels = img
        .pixels()
        .map(|p| rgb::RGBA8::new(p[0], p[1], p[2], p[3]))
        .collect();
    let label = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FrameEntry::from_rgba(width, height, pixels)?.with_label(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ColorFilter, Rotation, TransformFilter};
    use crate::progress::NoProgress;
    use rgb::RGBA8;

    fn solid(v: u8) -> FrameEntry {
        FrameEntry::from_rgba(2, 1, vec![RGBA8::new(v, v, v, 255); 2]).unwrap()
    }

    #[test]
    fn final_frames_follow_filters_and_edits() {
        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(10), solid(20)]);
        doc.filters_mut()
            .add(Filter::Color(ColorFilter::Brightness(5)));
        let fd = doc.final_document().unwrap();
        assert_eq!(fd.frames[0].to_rgba()[0].r, 15);
        assert!(fd.histogram.is_none());
        assert!(!doc.is_dirty());

        doc.store_mut().remove_frames(&[0]);
        assert!(doc.is_dirty());
        assert!(doc.snapshot().is_none());
        let fd = doc.final_document().unwrap();
        assert_eq!(fd.frames.len(), 1);
        assert_eq!(fd.frames[0].to_rgba()[0].r, 25);
    }

    #[test]
    fn original_frames_are_untouched() {
        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(10)]);
        doc.filters_mut().add(Filter::Transform(TransformFilter::Rotate {
            angle: Rotation::R90,
            adjust_center: true,
        }));
        let fd = doc.final_document().unwrap();
        assert_eq!((fd.frames[0].width, fd.frames[0].height), (1, 2));
        assert!(fd.histogram.is_some());
        assert_eq!(doc.store().frame(0).unwrap().width, 2);
    }

    #[test]
    fn cycles_are_shared_with_final_view() {
        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(1), solid(2)]);
        doc.store_mut().add_cycle(CycleEntry::new(vec![1, 0]));
        let fd = doc.final_document().unwrap();
        assert_eq!(fd.cycles[0].frames, vec![1, 0]);
    }

    #[test]
    fn convert_without_target_fails() {
        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(1)]);
        assert!(matches!(
            doc.convert(&mut NoProgress),
            Err(BamError::NoOutputTarget)
        ));
    }

    #[test]
    fn default_output_follows_path_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (dir.path().join("a.bam"), dir.path().join("b.bam"));
        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(1)]);
        doc.store_mut().add_cycle(CycleEntry::new(vec![0]));

        doc.set_output_path(&a);
        doc.convert(&mut NoProgress).unwrap();
        std::fs::remove_file(&a).unwrap();

        doc.set_output_path(&b);
        doc.convert(&mut NoProgress).unwrap();
        assert!(b.exists());
        assert!(!a.exists());
        assert_eq!(doc.filters().outputs().count(), 1);
    }

    #[test]
    fn explicit_output_ignores_default_path() {
        let dir = tempfile::tempdir().unwrap();
        let chosen = dir.path().join("chosen.bam");
        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(1)]);
        doc.store_mut().add_cycle(CycleEntry::new(vec![0]));
        doc.filters_mut().add(Filter::Output(OutputFilter::Bam {
            path: chosen.clone(),
        }));
        doc.set_output_path(dir.path().join("other.bam"));
        doc.convert(&mut NoProgress).unwrap();
        assert!(chosen.exists());
        assert!(!dir.path().join("other.bam").exists());
    }

    #[test]
    fn failing_output_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let bam = dir.path().join("anim.bam");
        // A regular file where the sequence directory should go.
        let blocked = dir.path().join("frames");
        std::fs::write(&blocked, b"").unwrap();

        let mut doc = Document::default();
        doc.store_mut().add_frames(vec![solid(1), solid(2)]);
        doc.store_mut().add_cycle(CycleEntry::new(vec![0, 1]));
        doc.filters_mut()
            .add(Filter::Output(OutputFilter::Bam { path: bam.clone() }));
        doc.filters_mut().add(Filter::Output(OutputFilter::ImageSequence {
            dir: blocked,
            prefix: "f".into(),
        }));

        assert!(doc.convert(&mut NoProgress).is_err());
        assert!(!bam.exists());
    }

    #[test]
    fn histogram_cutoff_follows_config() {
        let mut doc = Document::default();
        *doc.store_mut() = FrameStore::new(200);
        doc.store_mut().add_frames(vec![
            FrameEntry::from_rgba(2, 1, vec![RGBA8::new(1, 1, 1, 100), RGBA8::new(2, 2, 2, 255)])
                .unwrap(),
        ]);
        assert_eq!(doc.store().histogram().len(), 1);

        doc.final_document().unwrap();
        assert_eq!(doc.store().alpha_threshold(), doc.config().alpha_threshold());
        assert_eq!(doc.store().histogram().len(), 2);

        doc.set_config(ConvertConfig::new().transparency_threshold(50))
            .unwrap();
        assert_eq!(doc.store().alpha_threshold(), 128);
        assert_eq!(doc.store().histogram().len(), 1);
    }

    #[test]
    fn import_collects_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]))
            .save(&good)
            .unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();
        let missing = dir.path().join("missing.png");

        let mut doc = Document::default();
        let report = doc.import_images(&[&good, &bad, &missing], &mut NoProgress);
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].path, bad);
        assert_eq!(doc.store().frame_count(), 1);
        assert_eq!(doc.store().frame(0).unwrap().options.label, "good");
    }
}
