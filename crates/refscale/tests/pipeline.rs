mod common;

use common::{assert_close_rel, Scene, Shape};
use image::{Rgb, RgbImage};
use nalgebra::Point2;
use refscale::{
    CalibrationProfile, CalibrationStrategy, MeasurementPipeline, PipelineConfig, ReferenceSpec,
    ScaleReference, SheetSpec, Stage,
};
use refscale_calib::{BrownConrady5, CameraIntrinsics, PinholeCamera};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sheet_config(px_per_mm: f64) -> PipelineConfig {
    PipelineConfig {
        reference: ReferenceSpec::ImplicitRectified {
            sheet: SheetSpec::A4.with_scale(px_per_mm),
        },
        ..PipelineConfig::default()
    }
}

fn tilted_scene(shapes: Vec<Shape>) -> Scene {
    Scene {
        width: 640,
        height: 800,
        sheet: [
            Point2::new(70.0, 45.0),
            Point2::new(560.0, 80.0),
            Point2::new(600.0, 760.0),
            Point2::new(35.0, 730.0),
        ],
        sheet_mm: (210.0, 297.0),
        shapes,
    }
}

#[test]
fn measures_a_rotated_object_on_a_tilted_sheet() {
    init_logging();
    let img = tilted_scene(vec![Shape::rect((105.0, 150.0), (140.0, 55.0), 30.0)]).render();
    let pipeline = MeasurementPipeline::new(sheet_config(2.0)).expect("config");
    let r = pipeline.measure(&img).expect("measurement");

    assert_eq!(r.strategy, CalibrationStrategy::ImplicitRectified);
    assert!(!r.undistorted);
    assert_close_rel(r.width_mm, 140.0, 0.03, "width");
    assert_close_rel(r.height_mm, 55.0, 0.05, "height");
    match r.reference {
        ScaleReference::Sheet {
            quad,
            px_per_mm,
            width_mm,
            height_mm,
        } => {
            assert_eq!((width_mm, height_mm), (210.0, 297.0));
            assert_eq!(px_per_mm, 2.0);
            assert!((quad.top_left() - Point2::new(70.0, 45.0)).norm() < 6.0);
        }
        other => panic!("unexpected reference {other:?}"),
    }
}

#[test]
fn default_config_measures_to_within_a_millimetre() {
    init_logging();
    let pipeline = MeasurementPipeline::new(PipelineConfig::default()).expect("config");
    for angle in [0.0, 30.0] {
        // sheet edges on pixel boundaries at the default 3 px/mm
        let scene = Scene::fronto_parallel(3.0, 19.5, vec![Shape::rect((105.0, 150.0), (60.0, 30.0), angle)]);
        let r = pipeline.measure(&scene.render()).expect("measurement");
        assert!((r.width_mm - 60.0).abs() < 1.0, "{angle} deg: width {:.2}", r.width_mm);
        assert!((r.height_mm - 30.0).abs() < 1.0, "{angle} deg: height {:.2}", r.height_mm);
        if let ScaleReference::Sheet { px_per_mm, .. } = r.reference {
            assert_eq!(px_per_mm, 3.0);
        }
    }
}

#[test]
fn landscape_sheet_keeps_the_aspect_ratio() {
    init_logging();
    // a portrait sheet rotated by 90 degrees on screen
    let scene = Scene {
        width: 700,
        height: 520,
        sheet: [
            Point2::new(30.0, 30.0),
            Point2::new(30.0 + 594.0, 30.0),
            Point2::new(30.0 + 594.0, 30.0 + 420.0),
            Point2::new(30.0, 30.0 + 420.0),
        ],
        sheet_mm: (297.0, 210.0),
        shapes: vec![Shape::rect((150.0, 100.0), (90.0, 30.0), 0.0)],
    };
    let r = MeasurementPipeline::new(sheet_config(2.0))
        .expect("config")
        .measure(&scene.render())
        .expect("measurement");
    assert_close_rel(r.width_mm, 90.0, 0.03, "width");
    assert_close_rel(r.height_mm, 30.0, 0.06, "height");
    if let ScaleReference::Sheet {
        width_mm,
        height_mm,
        ..
    } = r.reference
    {
        assert_eq!((width_mm, height_mm), (297.0, 210.0));
    }
}

#[test]
fn reference_object_strategy_through_the_pipeline() {
    init_logging();
    // 85.6 x 54 mm card next to a 120 x 25 mm bar, on a plain light surface
    let px_per_mm = 3.0;
    let img = RgbImage::from_fn(600, 400, |x, y| {
        let (xm, ym) = (f64::from(x) / px_per_mm, f64::from(y) / px_per_mm);
        let card = (10.0..95.6).contains(&xm) && (10.0..64.0).contains(&ym);
        let bar = (40.0..160.0).contains(&xm) && (90.0..115.0).contains(&ym);
        Rgb(if card || bar { [20, 20, 24] } else { [225, 222, 215] })
    });
    let mut config = PipelineConfig::with_reference_object(85.6, 54.0);
    config.reference_object.correction_factor = 1.0;
    let r = MeasurementPipeline::new(config)
        .expect("config")
        .measure(&img)
        .expect("measurement");

    assert_eq!(r.strategy, CalibrationStrategy::ExplicitReferenceObject);
    assert_close_rel(r.width_mm, 120.0, 0.03, "width");
    assert_close_rel(r.height_mm, 25.0, 0.05, "height");
    match r.reference {
        ScaleReference::Object { px_per_mm: s, .. } => assert_close_rel(s, px_per_mm, 0.02, "scale"),
        other => panic!("unexpected reference {other:?}"),
    }
}

#[test]
fn default_correction_factor_scales_the_result_down() {
    let img = RgbImage::from_fn(300, 200, |x, y| {
        let card = (20..120).contains(&x) && (20..120).contains(&y);
        let bar = (150..290).contains(&x) && (50..90).contains(&y);
        Rgb(if card || bar { [15, 15, 15] } else { [230, 230, 230] })
    });
    let corrected = MeasurementPipeline::new(PipelineConfig::with_reference_object(50.0, 50.0))
        .expect("config")
        .measure(&img)
        .expect("corrected");
    let mut raw_config = PipelineConfig::with_reference_object(50.0, 50.0);
    raw_config.reference_object.correction_factor = 1.0;
    let raw = MeasurementPipeline::new(raw_config)
        .expect("config")
        .measure(&img)
        .expect("raw");
    assert_close_rel(corrected.width_mm * 2.75, raw.width_mm, 1e-9, "correction");
}

#[test]
fn batch_keeps_going_past_failures() {
    init_logging();
    let good = tilted_scene(vec![Shape::rect((100.0, 140.0), (120.0, 60.0), -10.0)]).render();
    let blank = RgbImage::from_pixel(200, 200, Rgb([80, 80, 80]));
    let empty_sheet = tilted_scene(Vec::new()).render();
    let pipeline = MeasurementPipeline::new(sheet_config(2.0)).expect("config");

    let results = pipeline.measure_batch(&[blank, good, empty_sheet, RgbImage::new(0, 0)]);
    assert_eq!(results.len(), 4);

    let err = results[0].as_ref().expect_err("blank frame");
    assert_eq!(err.code(), "segmentation_degenerate");
    assert_eq!(err.stage(), Stage::Segmentation);

    let ok = results[1].as_ref().expect("good frame");
    assert_close_rel(ok.width_mm, 120.0, 0.03, "width");

    let err = results[2].as_ref().expect_err("nothing on the sheet");
    assert_eq!(err.code(), "object_not_found");
    assert_eq!(err.stage(), Stage::Isolation);

    let err = results[3].as_ref().expect_err("empty image");
    assert_eq!(err.code(), "invalid_image");
}

#[test]
fn identity_profile_undistorts_without_changing_the_result() {
    init_logging();
    let img = tilted_scene(vec![Shape::rect((105.0, 150.0), (140.0, 55.0), 30.0)]).render();
    let profile = CalibrationProfile::from_camera(
        &PinholeCamera::new(
            CameraIntrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 400.0,
            },
            BrownConrady5::default(),
        ),
        0.2,
        Some([640, 800]),
    );
    let plain = MeasurementPipeline::new(sheet_config(2.0))
        .expect("config")
        .measure(&img)
        .expect("plain");
    let corrected = MeasurementPipeline::new(sheet_config(2.0))
        .expect("config")
        .with_profile(Arc::new(profile))
        .measure(&img)
        .expect("undistorted");

    assert!(corrected.undistorted);
    assert!((corrected.width_mm - plain.width_mm).abs() < 0.5);
    assert!((corrected.height_mm - plain.height_mm).abs() < 0.5);
}

#[test]
fn undistortion_can_be_switched_off() {
    let img = tilted_scene(vec![Shape::rect((105.0, 150.0), (140.0, 55.0), 30.0)]).render();
    let profile = CalibrationProfile::from_camera(
        &PinholeCamera::new(
            CameraIntrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 400.0,
            },
            BrownConrady5::default(),
        ),
        0.2,
        None,
    );
    let config = PipelineConfig {
        undistort: false,
        ..sheet_config(2.0)
    };
    let r = MeasurementPipeline::new(config)
        .expect("config")
        .with_profile(Arc::new(profile))
        .measure(&img)
        .expect("measurement");
    assert!(!r.undistorted);
}

#[test]
fn results_serialize_for_downstream_tools() {
    let img = tilted_scene(vec![Shape::rect((105.0, 150.0), (140.0, 55.0), 30.0)]).render();
    let r = MeasurementPipeline::new(sheet_config(1.0))
        .expect("config")
        .measure(&img)
        .expect("measurement");
    let v = serde_json::to_value(&r).expect("serialize");
    assert_eq!(v["strategy"], "implicit_rectified");
    assert_eq!(v["reference"]["kind"], "sheet");
    assert!(v["width_mm"].as_f64().expect("number") > v["height_mm"].as_f64().expect("number"));
    assert!(v["hull"].as_array().expect("hull").len() >= 4);
}
