//! End-to-end conversions: image files in, BAM files out, read back where possible.

use std::path::{Path, PathBuf};

use bamconv::{
    BamVersion, ColorFilter, ConvertConfig, CycleEntry, Document, Filter, ImportMode, NoProgress,
    OutputFilter, Rotation, TransformFilter, read_bam,
};

/// Write an opaque gradient PNG and return its path.
fn write_png(dir: &Path, name: &str, w: u32, h: u32, seed: u8) -> PathBuf {
    let path = dir.join(name);
    image::RgbaImage::from_fn(w, h, |x, y| {
        image::Rgba([
            (x * 4) as u8 ^ seed,
            (y * 4) as u8,
            seed.wrapping_mul(3),
            255,
        ])
    })
    .save(&path)
    .unwrap();
    path
}

fn three_frame_document(dir: &Path) -> Document {
    let paths: Vec<PathBuf> = (0..3)
        .map(|i| write_png(dir, &format!("f{i}.png"), 64, 64, i as u8 * 40))
        .collect();
    let mut doc = Document::new(ConvertConfig::default().transparency_threshold(5));
    let report = doc.import_images(&paths, &mut NoProgress);
    assert!(report.is_clean());
    assert_eq!(report.imported, 3);
    doc.store_mut().add_cycle(CycleEntry::new(vec![0, 1, 2]));
    doc
}

#[test]
fn png_frames_to_legacy_bam() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = three_frame_document(dir.path());
    let target = dir.path().join("anim.bam");
    doc.set_output_path(&target);
    doc.convert(&mut NoProgress).unwrap();

    let contents = read_bam(&std::fs::read(&target).unwrap()).unwrap();
    assert_eq!(contents.frames.len(), 3);
    assert_eq!(contents.cycles.len(), 1);
    assert_eq!(contents.cycles[0].frames, vec![0, 1, 2]);

    let ti = contents.transparent_index;
    for frame in &contents.frames {
        assert_eq!((frame.width, frame.height), (64, 64));
        let bamconv::FrameImage::Indexed { pixels, palette } = &frame.image else {
            panic!("decoded frames are indexed");
        };
        assert_eq!(palette.len(), 256);
        // Fully opaque input introduces no transparent pixels.
        assert!(pixels.iter().all(|&p| p != ti));
    }
}

#[test]
fn bamc_output_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = three_frame_document(dir.path());
    doc.set_config(ConvertConfig::default().compress_bamc(true))
        .unwrap();
    let target = dir.path().join("anim.bam");
    doc.set_output_path(&target);
    doc.convert(&mut NoProgress).unwrap();

    let bytes = std::fs::read(&target).unwrap();
    assert_eq!(&bytes[..8], b"BAMCV1  ");
    assert_eq!(read_bam(&bytes).unwrap().frames.len(), 3);
}

#[test]
fn modern_bam_writes_pages() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = three_frame_document(dir.path());
    doc.set_config(
        ConvertConfig::default()
            .version(BamVersion::V2)
            .page_offset(2000),
    )
    .unwrap();
    let target = dir.path().join("anim.bam");
    doc.set_output_path(&target);
    doc.convert(&mut NoProgress).unwrap();

    let bytes = std::fs::read(&target).unwrap();
    assert_eq!(&bytes[..8], b"BAM V2  ");
    assert!(dir.path().join("MOS2000.PVRZ").exists());
    // V2 files carry no pixel data of their own.
    assert!(read_bam(&bytes).is_err());
}

#[test]
fn output_filter_runs_after_everything_else() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = three_frame_document(dir.path());
    let seq = dir.path().join("seq");
    // Output first in the list, transform and color after it.
    doc.filters_mut().add(Filter::Output(OutputFilter::ImageSequence {
        dir: seq.clone(),
        prefix: "frame".into(),
    }));
    doc.filters_mut().add(Filter::Transform(TransformFilter::Rotate {
        angle: Rotation::R90,
        adjust_center: true,
    }));
    doc.filters_mut().add(Filter::Color(ColorFilter::Invert));
    doc.convert(&mut NoProgress).unwrap();

    let first = image::open(seq.join("frame00000.png")).unwrap().to_rgba8();
    let source = image::open(dir.path().join("f0.png")).unwrap().to_rgba8();
    // (0,0) after a clockwise quarter turn came from the bottom-left source pixel, inverted.
    let src = source.get_pixel(0, 63);
    let out = first.get_pixel(0, 0);
    assert_eq!(out[0], 255 - src[0]);
    assert_eq!(out[1], 255 - src[1]);
    assert_eq!(out[3], 255);
}

#[test]
fn merge_import_appends_frames_and_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = three_frame_document(dir.path());
    let target = dir.path().join("anim.bam");
    doc.set_output_path(&target);
    doc.convert(&mut NoProgress).unwrap();

    let mut other = Document::default();
    other
        .store_mut()
        .add_frames(vec![bamconv::FrameEntry::from_rgba(1, 1, vec![rgb::RGBA8::new(1, 2, 3, 255)]).unwrap()]);
    other.store_mut().add_cycle(CycleEntry::new(vec![0]));

    other.import_bam(&target, ImportMode::Merge).unwrap();
    assert_eq!(other.store().frame_count(), 4);
    assert_eq!(other.store().cycle(1).unwrap().frames, vec![1, 2, 3]);

    other.import_bam(&target, ImportMode::Replace).unwrap();
    assert_eq!(other.store().frame_count(), 3);
    assert_eq!(other.store().cycle_count(), 1);
}

#[test]
fn reconverting_an_imported_bam_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = three_frame_document(dir.path());
    let first = dir.path().join("first.bam");
    doc.set_output_path(&first);
    doc.convert(&mut NoProgress).unwrap();

    let mut again = Document::default();
    again.import_bam(&first, ImportMode::Replace).unwrap();
    let second = dir.path().join("second.bam");
    again.set_output_path(&second);
    again.convert(&mut NoProgress).unwrap();

    let a = read_bam(&std::fs::read(&first).unwrap()).unwrap();
    let b = read_bam(&std::fs::read(&second).unwrap()).unwrap();
    for (fa, fb) in a.frames.iter().zip(&b.frames) {
        assert_eq!(fa.to_rgba(), fb.to_rgba());
    }
}
