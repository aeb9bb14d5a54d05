mod common;

use pf_engine::CoreError;
use pf_expr::ExprError;
use pf_frame::{ConstantStore, ConstantUpdate, Frame};
use pf_types::{FormulaScope, FrameId, GridResolution, GridSpec, InterpolationMethod, OutputMode};

use common::{config, core_with, lattice};

fn grid(n: usize) -> OutputMode {
    OutputMode::grid(GridSpec::new(
        GridResolution::new(n, n).expect("resolution"),
        InterpolationMethod::Linear,
    ))
}

#[test]
fn sum_of_squares_per_point() {
    let frame = Frame::from_dict(
        FrameId(0),
        vec![
            ("x", vec![0.0, 1.0]),
            ("y", vec![0.0, 1.0]),
            ("u", vec![3.0, 4.0]),
            ("v", vec![4.0, 3.0]),
        ],
    )
    .expect("frame");
    let core = core_with(vec![frame], config(8));
    let out = core
        .evaluate_text("u**2+v**2", FrameId(0), OutputMode::Points)
        .expect("evaluate");
    assert_eq!(out.values(), &[25.0, 25.0]);
}

#[test]
fn mean_in_frame_and_dataset_scope() {
    let frame = Frame::from_dict(
        FrameId(0),
        vec![
            ("x", vec![0.0, 1.0, 2.0]),
            ("y", vec![0.0, 0.0, 1.0]),
            ("p", vec![1.0, 2.0, 3.0]),
        ],
    )
    .expect("frame");
    let core = core_with(vec![frame], config(8));

    let broadcast = core
        .evaluate_text("mean(p)", FrameId(0), OutputMode::Points)
        .expect("frame scope");
    assert_eq!(broadcast.values(), &[2.0, 2.0, 2.0]);

    let resolved = core
        .parse_and_resolve("mean(p)", FormulaScope::Constant)
        .expect("constant scope");
    assert_eq!(core.evaluate_constant(&resolved).expect("dataset"), 2.0);
}

#[test]
fn gradient_of_linear_field_is_constant() {
    let core = core_with(vec![lattice(0, 6, &[])], config(11));

    let points = core
        .evaluate_text("grad_x(2*x)", FrameId(0), OutputMode::Points)
        .expect("points");
    assert_eq!(points.len(), 36);
    assert!(points.values().iter().all(|v| (v - 2.0).abs() < 1e-9));

    let field = core
        .evaluate_text("grad_x(2*x)", FrameId(0), grid(11))
        .expect("grid");
    let field = field.as_grid().expect("grid output");
    for row in 1..10 {
        for col in 1..10 {
            assert!((field.get(row, col).expect("node") - 2.0).abs() < 1e-9);
        }
    }
}

#[test]
fn rotation_has_no_divergence_and_constant_curl() {
    let frame = lattice(
        0,
        9,
        &[("u", |_: f64, y: f64| -y), ("v", |x: f64, _: f64| x)],
    );
    let core = core_with(vec![frame], config(17));
    let div = core
        .evaluate_text("div(u, v)", FrameId(0), grid(17))
        .expect("div");
    let curl = core
        .evaluate_text("curl(u, v)", FrameId(0), grid(17))
        .expect("curl");
    let (div, curl) = (div.as_grid().expect("grid"), curl.as_grid().expect("grid"));
    for row in 2..15 {
        for col in 2..15 {
            assert!(div.get(row, col).expect("node").abs() < 1e-9);
            assert!((curl.get(row, col).expect("node") - 2.0).abs() < 1e-9);
        }
    }

    let at_points = core
        .evaluate_text("curl(u, v) / 2", FrameId(0), OutputMode::Points)
        .expect("points");
    assert_eq!(at_points.len(), 81);
    assert!(at_points.values().iter().all(|v| (v - 1.0).abs() < 1e-9));
}

#[test]
fn repeated_evaluation_is_a_pure_cache_hit() {
    let core = core_with(vec![lattice(0, 5, &[("p", |x: f64, y: f64| x * y)])], config(9));
    let resolved = core
        .parse_and_resolve("laplacian(p) + grad_y(p)", FormulaScope::Row)
        .expect("resolve");

    let first = core
        .evaluate(&resolved, FrameId(0), OutputMode::Points)
        .expect("first");
    let after_first = core.metrics();
    assert!(after_first.interpolations > 0);

    let second = core
        .evaluate(&resolved, FrameId(0), OutputMode::Points)
        .expect("second");
    let after_second = core.metrics();
    assert_eq!(after_second.interpolations, after_first.interpolations);
    assert_eq!(after_second.cache.hits, 1);
    assert_eq!(after_second.cache.misses, 1);
    assert_eq!(after_second.evaluations, 2);
    assert_eq!(first, second);
}

#[test]
fn recomputing_a_constant_invalidates_dependent_fields() {
    let frame = Frame::from_dict(
        FrameId(0),
        vec![
            ("x", vec![0.0, 1.0]),
            ("y", vec![0.0, 1.0]),
            ("p", vec![1.0, 3.0]),
        ],
    )
    .expect("frame");
    let core = core_with(vec![frame], config(8));
    core.define_constant("scale = max(p)").expect("define");

    let resolved = core
        .parse_and_resolve("p * scale", FormulaScope::Row)
        .expect("resolve");
    let before = core
        .evaluate(&resolved, FrameId(0), OutputMode::Points)
        .expect("before");
    assert_eq!(before.values(), &[3.0, 9.0]);

    core.recompute_constant("scale", "min(p)").expect("recompute");
    let after = core
        .evaluate(&resolved, FrameId(0), OutputMode::Points)
        .expect("after");
    assert_eq!(after.values(), &[1.0, 3.0]);
    assert_eq!(core.cache_stats().misses, 2);
}

#[test]
fn removed_constant_is_a_reference_error() {
    let frame = Frame::from_dict(FrameId(0), vec![("x", vec![0.0]), ("y", vec![0.0])])
        .expect("frame");
    let core = core_with(vec![frame], config(4));
    core.constant_store()
        .publish(vec![ConstantUpdate::new("offset", 2.0)])
        .expect("publish");
    let resolved = core
        .parse_and_resolve("x + offset", FormulaScope::Row)
        .expect("resolve");
    let value = core
        .evaluate(&resolved, FrameId(0), OutputMode::Points)
        .expect("evaluate");
    assert_eq!(value.values(), &[2.0]);

    assert!(core.remove_constant("offset").expect("remove"));
    let err = core
        .evaluate(&resolved, FrameId(0), OutputMode::Points)
        .expect_err("constant is gone");
    assert!(matches!(
        err,
        CoreError::Expr(ExprError::Reference { ref name }) if name == "offset"
    ));
}

#[test]
fn resolution_errors_surface_before_evaluation() {
    let core = core_with(vec![lattice(0, 3, &[])], config(4));
    for (text, expected) in [
        ("nope + 1", "unknown"),
        ("curl(x)", "arity"),
        ("sin(", "parse"),
    ] {
        let err = core
            .evaluate_text(text, FrameId(0), OutputMode::Points)
            .expect_err(text);
        let matched = match expected {
            "parse" => matches!(err, CoreError::Expr(ExprError::Parse(_))),
            _ => matches!(err, CoreError::Expr(ExprError::Resolve(_))),
        };
        assert!(matched, "{text}: {err}");
    }
    assert_eq!(core.metrics().evaluations, 0);
}

#[test]
fn grid_output_of_plain_formula_interpolates() {
    let core = core_with(
        vec![lattice(0, 4, &[("p", |x: f64, y: f64| x + 10.0 * y)])],
        config(4),
    );
    let field = core
        .evaluate_text("p", FrameId(0), grid(7))
        .expect("grid");
    let field = field.as_grid().expect("grid output");
    assert_eq!(field.values().len(), 49);
    assert!((field.get(6, 6).expect("corner") - 33.0).abs() < 1e-9);
    assert!((field.get(3, 3).expect("centre") - 16.5).abs() < 1e-9);
    assert_eq!(core.metrics().interpolations, 1);
}

#[test]
fn builtin_constants_and_nan_semantics() {
    let frame = Frame::from_dict(
        FrameId(0),
        vec![("x", vec![0.0, 1.0]), ("y", vec![0.0, 1.0]), ("p", vec![0.0, -1.0])],
    )
    .expect("frame");
    let core = core_with(vec![frame], config(4));
    let out = core
        .evaluate_text("1 / p + log(p) + pi", FrameId(0), OutputMode::Points)
        .expect("evaluate");
    assert!(out.values().iter().all(|v| v.is_nan()));

    let out = core
        .evaluate_text("cos(pi * p)", FrameId(0), OutputMode::Points)
        .expect("evaluate");
    assert!((out.values()[1] + 1.0).abs() < 1e-12);
}

#[test]
fn timeseries_follows_the_nearest_point() {
    let frames = vec![
        lattice(0, 4, &[("u", |x: f64, _: f64| x)]),
        lattice(1, 4, &[("u", |x: f64, _: f64| 2.0 * x)]),
    ];
    let core = core_with(frames, config(8));
    let resolved = core
        .parse_and_resolve("u + 1", FormulaScope::Row)
        .expect("resolve");

    let series = core
        .timeseries_at(&resolved, (1.1, 2.0), 0.25)
        .expect("series");
    assert_eq!(series, vec![(FrameId(0), 2.0), (FrameId(1), 3.0)]);

    let far = core
        .timeseries_at(&resolved, (10.0, 10.0), 0.5)
        .expect("no match is not an error");
    assert!(far.is_empty());

    assert!(matches!(
        core.timeseries_at(&resolved, (1.0, 1.0), -1.0),
        Err(CoreError::InvalidLocation { .. })
    ));
}
