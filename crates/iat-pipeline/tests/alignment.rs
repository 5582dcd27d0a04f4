//! Integration test: load two shifted images through the async panel
//! load path, pair control points, align, and save.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use iat_pipeline::{
    Aligner, ByteFetcher, Dimensions, FetchedImage, IatConfig, IatError, ImageFormat,
    ImageSource, LoadOutcome, PixelBuffer, Point, SaveFormat,
};

/// Serves encoded images keyed by API record id.
struct MemoryArchive {
    records: HashMap<String, Vec<u8>>,
}

impl ByteFetcher for MemoryArchive {
    async fn fetch(&self, source: &ImageSource) -> Result<FetchedImage, IatError> {
        let ImageSource::Api { id } = source else {
            return Err(IatError::Format(format!("unsupported source {source:?}")));
        };
        let bytes = self.records.get(id).cloned().ok_or(IatError::EmptyInput)?;
        Ok(FetchedImage {
            bytes,
            filename: Some(format!("{id}.img")),
        })
    }
}

const SIZE: u32 = 100;
const SHIFT: u32 = 10;

/// A textured reference image: every pixel is distinct within a row.
fn reference_image() -> PixelBuffer {
    let mut buf = PixelBuffer::new(SIZE, SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let r = u8::try_from(x * 2).unwrap();
            let g = u8::try_from(y * 2).unwrap();
            let b = u8::try_from((x ^ y) & 0xFF).unwrap();
            buf.put_pixel(x, y, [r, g, b, 255]);
        }
    }
    buf
}

/// The reference shifted down-right by `SHIFT`, black where uncovered.
fn shifted_image(reference: &PixelBuffer) -> PixelBuffer {
    let mut buf = PixelBuffer::filled(SIZE, SIZE, [0, 0, 0, 255]);
    for y in SHIFT..SIZE {
        for x in SHIFT..SIZE {
            buf.put_pixel(x, y, reference.pixel(x - SHIFT, y - SHIFT).unwrap());
        }
    }
    buf
}

fn archive(reference: &PixelBuffer, moving: &PixelBuffer) -> MemoryArchive {
    let mut records = HashMap::new();
    records.insert(
        "reference".to_string(),
        iat_pipeline::encode::encode(reference, SaveFormat::Png, 1.0).unwrap(),
    );
    // The moving image travels as TIFF so the in-crate decoder is on the path.
    records.insert(
        "moving".to_string(),
        iat_pipeline::encode::encode(moving, SaveFormat::Tiff, 1.0).unwrap(),
    );
    MemoryArchive { records }
}

fn load_both(aligner: &mut Aligner, archive: &MemoryArchive) {
    let reference = ImageSource::Api {
        id: "reference".into(),
    };
    let moving = ImageSource::Api { id: "moving".into() };
    let a = pollster::block_on(aligner.reference_mut().load(archive, &reference)).unwrap();
    let b = pollster::block_on(aligner.moving_mut().load(archive, &moving)).unwrap();
    assert_eq!(a, LoadOutcome::Loaded(Dimensions::new(SIZE, SIZE)));
    assert_eq!(b, LoadOutcome::Loaded(Dimensions::new(SIZE, SIZE)));
}

fn place(aligner: &mut Aligner, reference: &[(f64, f64)], moving: &[(f64, f64)]) {
    for &(x, y) in reference {
        aligner.reference_mut().place_point(Point::new(x, y)).unwrap();
    }
    for &(x, y) in moving {
        aligner.moving_mut().place_point(Point::new(x, y)).unwrap();
    }
}

#[test]
fn four_corner_translation_reproduces_reference() {
    let reference = reference_image();
    let moving = shifted_image(&reference);
    let archive = archive(&reference, &moving);

    let mut aligner = Aligner::new(IatConfig::default()).unwrap();
    load_both(&mut aligner, &archive);

    let descriptor = aligner.moving().panel().descriptor.clone().unwrap();
    assert!(descriptor.file_type.is_tiff());
    assert_eq!(descriptor.filename.as_deref(), Some("moving.img"));

    let corners = [(10.0, 10.0), (80.0, 10.0), (80.0, 80.0), (10.0, 80.0)];
    let shifted = corners.map(|(x, y)| (x + f64::from(SHIFT), y + f64::from(SHIFT)));
    place(&mut aligner, &corners, &shifted);

    let report = aligner.align().unwrap();
    let h = report.homography.coefficients();
    let expected = [1.0, 0.0, 10.0, 0.0, 1.0, 10.0, 0.0, 0.0];
    for (i, (got, want)) in h.iter().zip(expected).enumerate() {
        assert!((got - want).abs() < 1e-6, "h{i}: expected {want}, got {got}");
    }

    let aligned = aligner.moving().render().clone();
    assert_eq!(aligned.dimensions(), Dimensions::new(SIZE, SIZE));
    let limit = SIZE - SHIFT;
    let mut differing = 0;
    for y in 0..limit {
        for x in 0..limit {
            if aligned.pixel(x, y) != reference.pixel(x, y) {
                differing += 1;
            }
        }
    }
    assert!(differing <= 4, "{differing} pixels differ in the overlap");
    // Beyond the overlap the moving image had no data.
    assert_eq!(aligned.pixel(SIZE - 1, 3), Some(PixelBuffer::TRANSPARENT));

    // Moving points now sit on the reference points.
    for (p, &(x, y)) in aligner.moving().points().iter().zip(&corners) {
        assert!(p.distance(Point::new(x, y)) < 1e-6);
    }

    let saved = aligner.save(SaveFormat::Png, 1.0).unwrap();
    let decoded = iat_pipeline::decode::decode_image(&saved).unwrap();
    assert_eq!(decoded.format, ImageFormat::Png);
    assert_eq!(decoded.buffer, aligned);
}

#[test]
fn outlier_pair_is_ranked_last() {
    let reference = reference_image();
    let moving = shifted_image(&reference);
    let archive = archive(&reference, &moving);

    let config = IatConfig {
        control_point_max: 6,
        ..IatConfig::default()
    };
    let mut aligner = Aligner::new(config).unwrap();
    load_both(&mut aligner, &archive);

    let ref_pts = [
        (10.0, 10.0),
        (80.0, 10.0),
        (80.0, 80.0),
        (10.0, 80.0),
        (45.0, 30.0),
        (35.0, 55.0),
    ];
    let mut mov_pts = ref_pts.map(|(x, y)| (x + 10.0, y + 10.0));
    // Misplaced by the user.
    mov_pts[5] = (76.0, 62.0);
    place(&mut aligner, &ref_pts, &mov_pts);
    assert_eq!(aligner.reference().points().len(), 6);
    assert_eq!(aligner.moving().points().len(), 6);

    let report = aligner.align().unwrap();
    assert_eq!(report.candidates.len(), 15);
    let best = &report.candidates[0];
    assert!(!best.indices.contains(&5), "best fit used the outlier");
    // The five subsets without pair 5 come before every subset with it.
    assert!(
        report.candidates[..5]
            .iter()
            .all(|c| !c.indices.contains(&5))
    );
    assert!(report.candidates[5..].iter().all(|c| c.indices.contains(&5)));
    assert!((report.homography.coefficients()[2] - 10.0).abs() < 1e-6);
    assert!(
        report
            .candidates
            .windows(2)
            .all(|w| w[0].rmse <= w[1].rmse)
    );
}

#[test]
fn report_serializes_to_json() {
    let reference = reference_image();
    let archive = archive(&reference, &reference);
    let mut aligner = Aligner::new(IatConfig::default()).unwrap();
    load_both(&mut aligner, &archive);
    let corners = [(10.0, 10.0), (80.0, 10.0), (80.0, 80.0), (10.0, 80.0)];
    place(&mut aligner, &corners, &corners);

    let report = aligner.align().unwrap();
    let json = serde_json::to_string(&report).unwrap();
    let back: iat_pipeline::AlignmentReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.dimensions, report.dimensions);
    assert_eq!(back.candidates.len(), 1);
}
